//! Проекция плоского списка комментариев поста в дерево ответов.
//!
//! Дерево не хранится: его пересобирают при каждом изменении списка.
//! Ответы, чей родитель отсутствует в списке, и комментарии, зацикленные
//! через `parent_comment_id`, в дерево не попадают ни на каком уровне.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::models::Comment;

#[derive(Debug, Clone, Default, PartialEq)]
/// Дерево комментариев одного поста.
pub struct CommentTree {
    post_id: i64,
    top_level: Vec<i64>,
    replies: HashMap<i64, Vec<i64>>,
    comments: HashMap<i64, Comment>,
}

#[derive(Debug, Clone, PartialEq)]
/// Комментарий вместе с вложенными ответами.
pub struct CommentThread<'a> {
    /// Сам комментарий.
    pub comment: &'a Comment,
    /// Глубина: 0 для комментариев верхнего уровня.
    pub depth: usize,
    /// Прямые ответы по возрастанию времени создания.
    pub replies: Vec<CommentThread<'a>>,
}

impl CommentTree {
    /// Строит дерево по комментариям поста `post_id`.
    ///
    /// Комментарии чужих постов игнорируются; на каждом уровне
    /// порядок по времени создания, при равенстве по идентификатору.
    pub fn build(post_id: i64, comments: &[Comment]) -> Self {
        let mut seen = HashSet::new();
        let mut ordered: Vec<&Comment> = comments
            .iter()
            .filter(|comment| comment.post_id == post_id && seen.insert(comment.id))
            .collect();
        ordered.sort_by_key(|comment| (comment.created_at, comment.id));

        let mut top_level = Vec::new();
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        for comment in &ordered {
            match comment.parent_comment_id {
                None => top_level.push(comment.id),
                Some(parent) => children.entry(parent).or_default().push(comment.id),
            }
        }

        let mut reachable: HashSet<i64> = top_level.iter().copied().collect();
        let mut frontier = top_level.clone();
        let mut replies = HashMap::new();
        while let Some(id) = frontier.pop() {
            let Some(direct) = children.remove(&id) else {
                continue;
            };
            let direct: Vec<i64> = direct
                .into_iter()
                .filter(|child| reachable.insert(*child))
                .collect();
            frontier.extend(direct.iter().copied());
            replies.insert(id, direct);
        }

        let dropped = ordered.len() - reachable.len();
        if dropped > 0 {
            debug!(post_id, dropped, "comments without a reachable parent skipped");
        }

        let comments = ordered
            .into_iter()
            .filter(|comment| reachable.contains(&comment.id))
            .map(|comment| (comment.id, comment.clone()))
            .collect();

        Self {
            post_id,
            top_level,
            replies,
            comments,
        }
    }

    /// Пост, которому принадлежит дерево.
    pub fn post_id(&self) -> i64 {
        self.post_id
    }

    /// Комментарии верхнего уровня.
    pub fn top_level(&self) -> &[i64] {
        &self.top_level
    }

    /// Прямые ответы на комментарий.
    pub fn replies(&self, comment_id: i64) -> &[i64] {
        self.replies
            .get(&comment_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Количество прямых ответов на комментарий.
    pub fn reply_count(&self, comment_id: i64) -> usize {
        self.replies(comment_id).len()
    }

    /// Комментарий, попавший в дерево.
    pub fn comment(&self, comment_id: i64) -> Option<&Comment> {
        self.comments.get(&comment_id)
    }

    /// `true`, если комментарий попал в дерево.
    pub fn contains(&self, comment_id: i64) -> bool {
        self.comments.contains_key(&comment_id)
    }

    /// Количество комментариев в дереве.
    pub fn len(&self) -> usize {
        self.comments.len()
    }

    /// `true`, если дерево пустое.
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    /// Вложенное представление для отрисовки.
    pub fn threads(&self) -> Vec<CommentThread<'_>> {
        self.top_level
            .iter()
            .filter_map(|id| self.thread(*id, 0))
            .collect()
    }

    fn thread(&self, id: i64, depth: usize) -> Option<CommentThread<'_>> {
        let comment = self.comments.get(&id)?;
        let replies = self
            .replies(id)
            .iter()
            .filter_map(|child| self.thread(*child, depth + 1))
            .collect();
        Some(CommentThread {
            comment,
            depth,
            replies,
        })
    }
}

mod logging;
mod settings;

use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use forum_client::{
    Category, CategoryDraft, CommentDraft, CommentThread, Credentials, FileSideChannel,
    ForumClient, ForumError, PasswordReset, Post, PostDraft, PostQuery, PostSort, ProfileUpdate,
    Registration, User, VoteTarget, VoteType,
};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::logging::init_logging;
use crate::settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "forum-cli", version, about = "CLI клиент форума")]
struct Cli {
    /// Адрес сервера (по умолчанию FORUM_API_URL).
    #[arg(long, global = true)]
    server: Option<String>,

    /// Печатать ответы в JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VoteArg {
    Like,
    Dislike,
}

impl From<VoteArg> for VoteType {
    fn from(value: VoteArg) -> Self {
        match value {
            VoteArg::Like => VoteType::Like,
            VoteArg::Dislike => VoteType::Dislike,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Likes,
    Date,
}

impl From<SortArg> for PostSort {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Likes => PostSort::Likes,
            SortArg::Date => PostSort::Date,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Регистрация. Войти можно после подтверждения email.
    Register {
        #[arg(long)]
        login: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        password: String,
        /// По умолчанию совпадает с `--password`.
        #[arg(long)]
        password_confirmation: Option<String>,
    },
    /// Подтверждение email кодом из письма.
    Verify {
        #[arg(long)]
        code: String,
    },
    /// Вход по логину или email.
    Login {
        #[arg(long)]
        login: String,
        #[arg(long)]
        password: String,
    },
    /// Выход: токен, голоса и избранное забываются.
    Logout,
    /// Ссылка для сброса пароля на email.
    ForgotPassword {
        #[arg(long)]
        email: String,
    },
    /// Новый пароль по токену из письма.
    ResetPassword {
        #[arg(long)]
        token: String,
        #[arg(long)]
        password: String,
        /// По умолчанию совпадает с `--password`.
        #[arg(long)]
        password_confirmation: Option<String>,
    },
    /// Текущий пользователь.
    Whoami,
    /// Список постов.
    Posts {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long, value_enum)]
        sort: Option<SortArg>,
        /// Нижняя граница даты, `YYYY-MM-DD`.
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Верхняя граница даты, `YYYY-MM-DD`.
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Можно повторять.
        #[arg(long = "category")]
        categories: Vec<i64>,
        #[arg(long)]
        locked: Option<bool>,
    },
    /// Пост вместе с деревом комментариев.
    Post {
        #[arg(long)]
        id: i64,
    },
    /// Избранные посты (требует токен).
    Favorites,
    /// Создание поста (требует токен).
    CreatePost {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long = "category")]
        categories: Vec<i64>,
        #[arg(long)]
        locked: Option<bool>,
    },
    /// Обновление поста (требует токен).
    ///
    /// Не указанные поля берутся из текущей версии поста.
    UpdatePost {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long = "category")]
        categories: Vec<i64>,
        #[arg(long)]
        locked: Option<bool>,
    },
    /// Удаление поста (требует токен).
    DeletePost {
        #[arg(long)]
        id: i64,
    },
    /// Комментарий к посту (требует токен).
    Comment {
        #[arg(long)]
        post: i64,
        #[arg(long)]
        content: String,
    },
    /// Ответ на комментарий (требует токен).
    Reply {
        #[arg(long)]
        comment: i64,
        #[arg(long)]
        content: String,
    },
    /// Редактирование комментария (требует токен).
    EditComment {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        content: String,
    },
    /// Удаление комментария с ответами (требует токен).
    DeleteComment {
        #[arg(long)]
        id: i64,
    },
    /// Лайк или дизлайк; повтор того же голоса снимает его.
    Vote {
        #[arg(long, required_unless_present = "comment", conflicts_with = "comment")]
        post: Option<i64>,
        #[arg(long)]
        comment: Option<i64>,
        #[arg(value_enum)]
        kind: VoteArg,
    },
    /// Добавить пост в избранное или убрать из него.
    Favorite {
        #[arg(long)]
        post: i64,
    },
    /// Список категорий.
    Categories,
    /// Категория и её посты.
    Category {
        #[arg(long)]
        id: i64,
    },
    /// Создание категории (нужны права администратора).
    CreateCategory {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Обновление категории (нужны права администратора).
    UpdateCategory {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Удаление категории (нужны права администратора).
    DeleteCategory {
        #[arg(long)]
        id: i64,
    },
    /// Список пользователей (требует токен).
    Users,
    /// Пользователь и его посты.
    User {
        #[arg(long)]
        id: i64,
    },
    /// Изменение профиля текущего пользователя.
    Profile {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        login: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        old_password: Option<String>,
        #[arg(long)]
        new_password: Option<String>,
    },
    /// Загрузка аватара из файла.
    Avatar {
        #[arg(long)]
        file: PathBuf,
    },
}

impl Command {
    // Команды входа сами заводят сессию; остальным нужен сохранённый токен.
    fn restores_session(&self) -> bool {
        !matches!(
            self,
            Command::Register { .. }
                | Command::Verify { .. }
                | Command::Login { .. }
                | Command::ForgotPassword { .. }
                | Command::ResetPassword { .. }
        )
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Ошибка: {err:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env().context("некорректные настройки окружения")?;
    init_logging(&settings.log_level)?;

    let cli = Cli::parse();
    let json = cli.json;
    let channel = FileSideChannel::open(&settings.state_file)
        .with_context(|| format!("не удалось открыть {}", settings.state_file.display()))?;
    let client = ForumClient::new(settings.client_config(cli.server), Arc::new(channel))
        .map_err(map_client_error)?;

    if cli.command.restores_session()
        && let Err(err) = client.session().bootstrap().await
    {
        warn!(error = %err, "failed to restore session, continuing anonymously");
    }

    let session = client.session();
    let mutations = client.mutations();

    match cli.command {
        Command::Register {
            login,
            email,
            full_name,
            password,
            password_confirmation,
        } => {
            let password_confirmation = password_confirmation.unwrap_or_else(|| password.clone());
            let message = session
                .register(Registration {
                    login,
                    email,
                    full_name,
                    password,
                    password_confirmation,
                })
                .await
                .map_err(map_client_error)?;
            println!("Регистрация принята: {message}");
            println!("Подтвердите email: `forum-cli verify --code ...`");
        }
        Command::Verify { code } => {
            let user = session.verify_email(&code).await.map_err(map_client_error)?;
            emit(json, &user, |user| print_user("Email подтверждён", user))?;
        }
        Command::ForgotPassword { email } => {
            let message = session
                .request_password_reset(&email)
                .await
                .map_err(map_client_error)?;
            println!("Запрос на сброс пароля принят: {message}");
        }
        Command::ResetPassword {
            token,
            password,
            password_confirmation,
        } => {
            let confirm_password = password_confirmation.unwrap_or_else(|| password.clone());
            let message = session
                .reset_password(
                    &token,
                    PasswordReset {
                        new_password: password,
                        confirm_password,
                    },
                )
                .await
                .map_err(map_client_error)?;
            println!("Пароль изменён: {message}");
            println!("Войдите с новым паролем: `forum-cli login ...`");
        }
        Command::Login { login, password } => {
            let user = session
                .login(Credentials { login, password })
                .await
                .map_err(map_client_error)?;
            emit(json, &user, |user| print_user("Вход выполнен", user))?;
        }
        Command::Logout => {
            session.logout();
            println!("Выход выполнен");
        }
        Command::Whoami => {
            let user = session.require_user().map_err(map_client_error)?;
            emit(json, &user, |user| print_user("Текущий пользователь", user))?;
        }
        Command::Posts {
            page,
            sort,
            from,
            to,
            categories,
            locked,
        } => {
            let query = PostQuery {
                page,
                sort: sort.map(PostSort::from),
                start_date: from,
                end_date: to,
                locked,
                ..PostQuery::default()
            }
            .with_categories(&categories);
            let posts = mutations
                .fetch_posts(&query)
                .await
                .map_err(map_client_error)?;
            emit(json, &posts, |posts| print_post_list(&client, posts))?;
        }
        Command::Post { id } => {
            let post = mutations.fetch_post(id).await.map_err(map_client_error)?;
            mutations.fetch_comments(id).await.map_err(map_client_error)?;
            if json {
                let tree = client.comment_tree(id);
                let threads: Vec<_> = tree.threads().iter().map(thread_json).collect();
                print_json(&json!({ "post": post, "comments": threads }))?;
            } else {
                print_post(&client, "Пост", &post);
                print_comment_tree(&client, id);
            }
        }
        Command::Favorites => {
            let posts = mutations.fetch_favorites().await.map_err(map_client_error)?;
            emit(json, &posts, |posts| print_post_list(&client, posts))?;
        }
        Command::CreatePost {
            title,
            content,
            categories,
            locked,
        } => {
            let mut draft = PostDraft::new(title, content);
            draft.categories = categories;
            draft.locked = locked;
            let post = mutations
                .create_post(draft)
                .await
                .map_err(map_client_error)?;
            emit(json, &post, |post| print_post(&client, "Пост создан", post))?;
        }
        Command::UpdatePost {
            id,
            title,
            content,
            categories,
            locked,
        } => {
            // Не переданные поля берём из текущей версии поста.
            let current = mutations.fetch_post(id).await.map_err(map_client_error)?;
            let draft = post_draft_from(&current, title, content, categories, locked);
            let post = mutations
                .update_post(id, draft)
                .await
                .map_err(map_client_error)?;
            emit(json, &post, |post| print_post(&client, "Пост обновлён", post))?;
        }
        Command::DeletePost { id } => {
            mutations.delete_post(id).await.map_err(map_client_error)?;
            println!("Пост удалён: id={id}");
        }
        Command::Comment { post, content } => {
            mutations.fetch_post(post).await.map_err(map_client_error)?;
            let comment = mutations
                .create_comment(post, CommentDraft::new(content))
                .await
                .map_err(map_client_error)?;
            emit(json, &comment, |comment| {
                println!("Комментарий добавлен: id={} post_id={}", comment.id, comment.post_id);
            })?;
        }
        Command::Reply { comment, content } => {
            let reply = mutations
                .create_reply(comment, CommentDraft::new(content))
                .await
                .map_err(map_client_error)?;
            emit(json, &reply, |reply| {
                println!(
                    "Ответ добавлен: id={} parent={}",
                    reply.id,
                    display_or_dash(&reply.parent_comment_id)
                );
            })?;
        }
        Command::EditComment { id, content } => {
            let comment = mutations
                .update_comment(id, CommentDraft::new(content))
                .await
                .map_err(map_client_error)?;
            emit(json, &comment, |comment| {
                println!("Комментарий обновлён: id={}", comment.id);
            })?;
        }
        Command::DeleteComment { id } => {
            mutations.delete_comment(id).await.map_err(map_client_error)?;
            println!("Комментарий удалён: id={id}");
        }
        Command::Vote {
            post,
            comment,
            kind,
        } => {
            let target = vote_target(post, comment)?;
            // Свежие лайки поста делают переключение голоса точным.
            if let VoteTarget::Post(id) = target {
                mutations.fetch_post(id).await.map_err(map_client_error)?;
            }
            let outcome = client
                .votes()
                .set_vote(target, kind.into())
                .await
                .map_err(map_client_error)?;
            let vote = outcome.vote.map(VoteType::as_str).unwrap_or("снят");
            if json {
                print_json(&json!({
                    "target": outcome.target.to_string(),
                    "vote": outcome.vote,
                    "rating": outcome.rating.map(|rating| rating.rating),
                    "likes_count": outcome.rating.map(|rating| rating.likes_count),
                }))?;
            } else {
                println!(
                    "Голос за {}: {vote} (rating={}, likes={})",
                    outcome.target,
                    display_or_dash(&outcome.rating.map(|rating| rating.rating)),
                    display_or_dash(&outcome.rating.map(|rating| rating.likes_count))
                );
            }
        }
        Command::Favorite { post } => {
            mutations.fetch_favorites().await.map_err(map_client_error)?;
            let favorite = mutations
                .toggle_favorite(post)
                .await
                .map_err(map_client_error)?;
            if favorite {
                println!("Пост {post} добавлен в избранное");
            } else {
                println!("Пост {post} убран из избранного");
            }
        }
        Command::Categories => {
            let categories = mutations
                .fetch_categories()
                .await
                .map_err(map_client_error)?;
            emit(json, &categories, |categories| print_categories(categories))?;
        }
        Command::Category { id } => {
            let category = mutations.fetch_category(id).await.map_err(map_client_error)?;
            let posts = mutations
                .fetch_category_posts(id)
                .await
                .map_err(map_client_error)?;
            if json {
                print_json(&json!({ "category": category, "posts": posts }))?;
            } else {
                print_categories(std::slice::from_ref(&category));
                print_post_list(&client, &posts);
            }
        }
        Command::CreateCategory { title, description } => {
            let category = mutations
                .create_category(CategoryDraft {
                    title: title.trim().to_string(),
                    description,
                })
                .await
                .map_err(map_client_error)?;
            emit(json, &category, |category| {
                println!("Категория создана: id={}", category.id);
            })?;
        }
        Command::UpdateCategory {
            id,
            title,
            description,
        } => {
            let current = mutations.fetch_category(id).await.map_err(map_client_error)?;
            let draft = CategoryDraft {
                title: title.or(current.title).unwrap_or_default().trim().to_string(),
                description: description.or(current.description),
            };
            let category = mutations
                .update_category(id, draft)
                .await
                .map_err(map_client_error)?;
            emit(json, &category, |category| {
                println!("Категория обновлена: id={}", category.id);
            })?;
        }
        Command::DeleteCategory { id } => {
            mutations.delete_category(id).await.map_err(map_client_error)?;
            println!("Категория удалена: id={id}");
        }
        Command::Users => {
            let users = mutations.fetch_users().await.map_err(map_client_error)?;
            emit(json, &users, |users| {
                println!("Пользователей: {}", users.len());
                for user in users {
                    println!(
                        "- [{}] {} ({})",
                        user.id,
                        display_or_dash(&user.login),
                        display_or_dash(&user.full_name)
                    );
                }
            })?;
        }
        Command::User { id } => {
            let user = mutations.fetch_user(id).await.map_err(map_client_error)?;
            let posts = mutations
                .fetch_user_posts(id, &PostQuery::default())
                .await
                .map_err(map_client_error)?;
            if json {
                print_json(&json!({ "user": user, "posts": posts }))?;
            } else {
                print_user("Пользователь", &user);
                print_post_list(&client, &posts);
            }
        }
        Command::Profile {
            full_name,
            login,
            email,
            old_password,
            new_password,
        } => {
            let user = mutations
                .update_profile(ProfileUpdate {
                    full_name,
                    login,
                    email,
                    old_password,
                    new_password,
                })
                .await
                .map_err(map_client_error)?;
            emit(json, &user, |user| print_user("Профиль обновлён", user))?;
        }
        Command::Avatar { file } => {
            let bytes =
                fs::read(&file).with_context(|| format!("не удалось прочитать {}", file.display()))?;
            let file_name = file
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("avatar");
            let path = mutations
                .upload_avatar(file_name, bytes)
                .await
                .map_err(map_client_error)?;
            println!("Аватар загружен: {path}");
        }
    }

    Ok(())
}

fn vote_target(post: Option<i64>, comment: Option<i64>) -> Result<VoteTarget> {
    match (post, comment) {
        (Some(_), Some(_)) => bail!("укажите либо --post, либо --comment"),
        (Some(id), None) => Ok(VoteTarget::Post(id)),
        (None, Some(id)) => Ok(VoteTarget::Comment(id)),
        (None, None) => bail!("укажите --post или --comment"),
    }
}

fn post_draft_from(
    current: &Post,
    title: Option<String>,
    content: Option<String>,
    categories: Vec<i64>,
    locked: Option<bool>,
) -> PostDraft {
    let title = title.or_else(|| current.title.clone()).unwrap_or_default();
    let content = content
        .or_else(|| current.content.clone())
        .unwrap_or_default();
    let mut draft = PostDraft::new(title, content);
    draft.categories = if categories.is_empty() {
        current
            .categories
            .as_ref()
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    } else {
        categories
    };
    draft.locked = locked.or(current.locked);
    draft
}

fn map_client_error(err: ForumError) -> anyhow::Error {
    let message = match err {
        ForumError::Unauthenticated => {
            "требуется авторизация: выполните `forum-cli login ...`".to_string()
        }
        ForumError::AuthorizationRejected => {
            "сессия недействительна, войдите заново: `forum-cli login ...`".to_string()
        }
        ForumError::Forbidden(message) => format!("недостаточно прав: {message}"),
        ForumError::ValidationFailed(message) => format!("некорректный запрос: {message}"),
        ForumError::NotFound => "ресурс не найден".to_string(),
        ForumError::PostLocked { post_id } => {
            format!("пост {post_id} закрыт для комментариев")
        }
        ForumError::Transient(message) => {
            format!("сервер недоступен, повторите позже: {message}")
        }
        ForumError::Decode(message) => format!("неожиданный ответ сервера: {message}"),
        ForumError::Storage(message) => format!("ошибка локального хранилища: {message}"),
    };
    anyhow::anyhow!(message)
}

fn emit<T: Serialize>(json: bool, value: &T, render: impl FnOnce(&T)) -> Result<()> {
    if json {
        return print_json(value);
    }
    render(value);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value).context("не удалось сериализовать ответ")?;
    println!("{raw}");
    Ok(())
}

fn thread_json(thread: &CommentThread<'_>) -> serde_json::Value {
    json!({
        "comment": thread.comment,
        "depth": thread.depth,
        "replies": thread.replies.iter().map(thread_json).collect::<Vec<_>>(),
    })
}

fn display_or_dash<T: Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string())
}

fn format_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_user(title: &str, user: &User) {
    println!("{title}");
    println!("  id: {}", user.id);
    println!("  login: {}", display_or_dash(&user.login));
    println!("  full_name: {}", display_or_dash(&user.full_name));
    println!("  email: {}", display_or_dash(&user.email));
    println!("  rating: {}", display_or_dash(&user.rating));
    if user.is_admin() {
        println!("  role: admin");
    }
}

fn print_post(client: &ForumClient, title: &str, post: &Post) {
    let categories: Vec<String> = client
        .post_categories(post.id)
        .iter()
        .map(|category| display_or_dash(&category.title))
        .collect();
    let vote = client
        .vote_marker(VoteTarget::Post(post.id))
        .map(VoteType::as_str)
        .unwrap_or("-");

    println!("{title}");
    println!("id: {}", post.id);
    println!("title: {}", display_or_dash(&post.title));
    println!("content: {}", display_or_dash(&post.content));
    println!("author_id: {}", display_or_dash(&post.author_id));
    println!("created_at: {}", format_time(post.created_at));
    println!("rating: {}", display_or_dash(&post.rating));
    println!("categories: {}", categories.join(", "));
    if post.is_locked() {
        println!("locked: yes");
    }
    if client.session().is_authenticated() {
        println!("my vote: {vote}");
        println!("favorite: {}", client.is_favorite(post.id));
    }
}

fn print_post_list(client: &ForumClient, posts: &[Post]) {
    println!("Постов: {}", posts.len());
    for post in posts {
        let marker = if client.is_favorite(post.id) { "*" } else { " " };
        println!(
            "{marker} [{}] {} (rating={}, author_id={}, {})",
            post.id,
            display_or_dash(&post.title),
            display_or_dash(&post.rating),
            display_or_dash(&post.author_id),
            format_time(post.created_at)
        );
    }
}

fn print_comment_tree(client: &ForumClient, post_id: i64) {
    let tree = client.comment_tree(post_id);
    println!("Комментариев: {}", client.comment_count(post_id));
    for thread in tree.threads() {
        print_thread(client, &thread);
    }
}

fn print_thread(client: &ForumClient, thread: &CommentThread<'_>) {
    let comment = thread.comment;
    let indent = "  ".repeat(thread.depth + 1);
    let vote = client
        .vote_marker(VoteTarget::Comment(comment.id))
        .map(|vote| format!(" [{}]", vote.as_str()))
        .unwrap_or_default();
    println!(
        "{indent}- [{}] {} (author_id={}, rating={}){vote}",
        comment.id,
        display_or_dash(&comment.content),
        display_or_dash(&comment.author_id),
        display_or_dash(&comment.rating)
    );
    for reply in &thread.replies {
        print_thread(client, reply);
    }
}

fn print_categories(categories: &[Category]) {
    println!("Категорий: {}", categories.len());
    for category in categories {
        println!(
            "- [{}] {}: {}",
            category.id,
            display_or_dash(&category.title),
            display_or_dash(&category.description)
        );
    }
}

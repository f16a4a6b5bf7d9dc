use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use forum_client::{
    ClientConfig, CommentDraft, Credentials, ForumClient, ForumError, MemorySideChannel,
    PostDraft, PostQuery, VoteTarget, VoteType,
};

fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock must be after unix epoch")
        .as_nanos();
    format!("{nanos}")
}

#[tokio::test]
#[ignore = "requires running forum server with a verified account"]
async fn http_smoke_flow() {
    let base_url =
        std::env::var("FORUM_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let login = std::env::var("FORUM_LOGIN").expect("FORUM_LOGIN must be set");
    let password = std::env::var("FORUM_PASSWORD").expect("FORUM_PASSWORD must be set");
    let client = ForumClient::new(
        ClientConfig::new(base_url),
        Arc::new(MemorySideChannel::new()),
    )
    .expect("client must build");

    let user = client
        .session()
        .login(Credentials { login, password })
        .await
        .expect("login must succeed");
    assert!(client.session().is_authenticated());

    let mutations = client.mutations();
    let suffix = unique_suffix();
    let created = mutations
        .create_post(PostDraft::new(
            format!("smoke title {suffix}"),
            "smoke content",
        ))
        .await
        .expect("create_post must succeed");
    assert_eq!(created.author_id, Some(user.id));

    let fetched = mutations
        .fetch_post(created.id)
        .await
        .expect("fetch_post must succeed");
    assert_eq!(fetched.id, created.id);

    mutations
        .fetch_posts(&PostQuery::default())
        .await
        .expect("fetch_posts must succeed");

    let comment = mutations
        .create_comment(created.id, CommentDraft::new("smoke comment"))
        .await
        .expect("create_comment must succeed");
    let reply = mutations
        .create_reply(comment.id, CommentDraft::new("smoke reply"))
        .await
        .expect("create_reply must succeed");
    mutations
        .fetch_comments(created.id)
        .await
        .expect("fetch_comments must succeed");
    let tree = client.comment_tree(created.id);
    assert!(tree.replies(comment.id).contains(&reply.id));

    let outcome = client
        .votes()
        .set_vote(VoteTarget::Post(created.id), VoteType::Like)
        .await
        .expect("vote must succeed");
    assert_eq!(outcome.vote, Some(VoteType::Like));

    assert!(
        mutations
            .toggle_favorite(created.id)
            .await
            .expect("favorite must succeed")
    );

    mutations
        .delete_post(created.id)
        .await
        .expect("delete_post must succeed");
    assert!(client.post(created.id).is_none());

    let after_delete = mutations.fetch_post(created.id).await;
    assert!(matches!(after_delete, Err(ForumError::NotFound)));
}

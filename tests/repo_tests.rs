#![cfg(feature = "inmem-store")]

use discuss::comments::{self, PageParams};
use discuss::error::ApiError;
use discuss::models::{NewComment, NewThread, OAuthProfile, UpdateComment, UpdateThread};
use discuss::repo::{inmem::InMemRepo, RepoError};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use discuss::repo::{CommentRepo, ThreadRepo, UserRepo};

/// Helper that returns a fresh, empty repository for every test run.
fn repo() -> InMemRepo {
    InMemRepo::ephemeral()
}

fn reply(content: &str, parent: Option<i64>) -> NewComment {
    NewComment { content: content.into(), parent_id: parent, attachments: vec![] }
}

async fn thread(r: &InMemRepo, author: i64) -> i64 {
    comments::create_thread(r, author, NewThread {
        title: "Rust".into(),
        content: "Let's talk".into(),
        attachments: vec![],
    })
    .await
    .unwrap()
    .id
}

#[tokio::test]
async fn deleted_reply_is_masked_and_keeps_its_subtree() {
    let r = repo();
    let t = thread(&r, 1).await;

    let a = comments::create_comment(&r, 1, t, reply("A", None)).await.unwrap();
    let b = comments::create_comment(&r, 1, t, reply("B", None)).await.unwrap();
    let a1 = comments::create_comment(&r, 2, t, reply("A1", Some(a.id))).await.unwrap();
    let a1a = comments::create_comment(&r, 3, t, reply("A1a", Some(a1.id))).await.unwrap();
    let a1a_i = comments::create_comment(&r, 4, t, reply("A1a-i", Some(a1a.id))).await.unwrap();

    comments::soft_delete_comment(&r, &b).await.unwrap();
    comments::soft_delete_comment(&r, &a1a).await.unwrap();

    let page = comments::thread_comments(&r, t, PageParams::default()).await.unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.comments.len(), 1);

    let root = &page.comments[0];
    assert_eq!(root.id, a.id);
    assert_eq!(root.content.as_deref(), Some("A"));
    assert_eq!(root.replies.len(), 1);
    let visible = &root.replies[0];
    assert_eq!(visible.id, a1.id);
    assert_eq!(visible.content.as_deref(), Some("A1"));

    let masked = &visible.replies[0];
    assert_eq!(masked.id, a1a.id);
    assert!(masked.is_deleted);
    assert_eq!(masked.content, None);
    assert_eq!(masked.user, None);
    assert_eq!(masked.parent_id, Some(a1.id));

    let leaf = &masked.replies[0];
    assert_eq!(leaf.id, a1a_i.id);
    assert_eq!(leaf.content.as_deref(), Some("A1a-i"));
    assert!(!leaf.is_deleted);

    // the stored row is untouched
    let stored = r.get_comment(a1a.id).await.unwrap();
    assert_eq!(stored.content, "A1a");
}

#[tokio::test]
async fn deleted_top_level_comment_drops_out_with_its_replies() {
    let r = repo();
    let t = thread(&r, 1).await;
    let a = comments::create_comment(&r, 1, t, reply("A", None)).await.unwrap();
    comments::create_comment(&r, 1, t, reply("under A", Some(a.id))).await.unwrap();
    let b = comments::create_comment(&r, 1, t, reply("B", None)).await.unwrap();

    comments::soft_delete_comment(&r, &a).await.unwrap();

    let page = comments::thread_comments(&r, t, PageParams::default()).await.unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.comments.len(), 1);
    assert_eq!(page.comments[0].id, b.id);
}

#[tokio::test]
async fn pagination_counts_top_level_only() {
    let r = repo();
    let t = thread(&r, 1).await;
    let mut roots = Vec::new();
    for i in 0..5 {
        let c = comments::create_comment(&r, 1, t, reply(&format!("root {i}"), None)).await.unwrap();
        comments::create_comment(&r, 2, t, reply("reply", Some(c.id))).await.unwrap();
        roots.push(c.id);
    }

    let page = comments::thread_comments(&r, t, PageParams { page: 2, limit: 2 }).await.unwrap();
    assert_eq!(page.pagination.total, 5);
    assert_eq!(page.pagination.total_pages, 3);
    let ids: Vec<_> = page.comments.iter().map(|c| c.id).collect();
    assert_eq!(ids, roots[2..4].to_vec());
    assert!(page.comments.iter().all(|c| c.replies.len() == 1));

    let past = comments::thread_comments(&r, t, PageParams { page: 9, limit: 2 }).await.unwrap();
    assert!(past.comments.is_empty());
    assert_eq!(past.pagination.total, 5);
}

#[tokio::test]
async fn empty_thread_has_zero_pages() {
    let r = repo();
    let t = thread(&r, 1).await;
    let page = comments::thread_comments(&r, t, PageParams::default()).await.unwrap();
    assert!(page.comments.is_empty());
    assert_eq!(page.pagination.total, 0);
    assert_eq!(page.pagination.total_pages, 0);
}

#[tokio::test]
async fn unknown_thread_is_not_found() {
    let r = repo();
    let err = comments::thread_comments(&r, 999, PageParams::default()).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound("thread")));
    let err = comments::create_comment(&r, 1, 999, reply("x", None)).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound("thread")));
}

#[tokio::test]
async fn missing_parent_is_rejected_and_nothing_is_stored() {
    let r = repo();
    let t = thread(&r, 1).await;
    let err = comments::create_comment(&r, 1, t, reply("orphan", Some(4242))).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound("parent comment")));
    assert_eq!(r.count_top_level(t).await.unwrap(), 0);
    assert!(r.comment_rows(t).await.unwrap().is_empty());
}

#[tokio::test]
async fn blank_content_is_rejected() {
    let r = repo();
    let t = thread(&r, 1).await;
    let err = comments::create_comment(&r, 1, t, reply("   ", None)).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));

    let c = comments::create_comment(&r, 1, t, reply("keep me", None)).await.unwrap();
    let err = comments::update_comment(&r, &c, UpdateComment { content: String::new() }).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
    assert_eq!(r.get_comment(c.id).await.unwrap().content, "keep me");

    let updated = comments::update_comment(&r, &c, UpdateComment { content: "edited".into() }).await.unwrap();
    assert_eq!(updated.content, "edited");
    assert!(updated.updated_at >= c.updated_at);
}

#[tokio::test]
async fn replying_to_deleted_comment_and_re_deleting_are_allowed() {
    let r = repo();
    let t = thread(&r, 1).await;
    let a = comments::create_comment(&r, 1, t, reply("A", None)).await.unwrap();
    let a1 = comments::create_comment(&r, 1, t, reply("A1", Some(a.id))).await.unwrap();
    let deleted = comments::soft_delete_comment(&r, &a1).await.unwrap();
    assert!(deleted.is_deleted);
    comments::soft_delete_comment(&r, &deleted).await.unwrap();

    let late = comments::create_comment(&r, 2, t, reply("still here", Some(a1.id))).await.unwrap();
    let page = comments::thread_comments(&r, t, PageParams::default()).await.unwrap();
    assert_eq!(page.comments[0].replies[0].replies[0].id, late.id);
}

#[tokio::test]
async fn authors_are_attached_to_nodes() {
    let r = repo();
    let user = r.upsert_google_user(OAuthProfile {
        google_id: "g-1".into(),
        name: "Ada".into(),
        email: Some("ada@example.com".into()),
        picture: None,
        admin: false,
    }).await.unwrap();
    let t = thread(&r, user.id).await;
    comments::create_comment(&r, user.id, t, reply("hello", None)).await.unwrap();

    let page = comments::thread_comments(&r, t, PageParams::default()).await.unwrap();
    let author = page.comments[0].user.as_ref().expect("author");
    assert_eq!(author.name, "Ada");
    assert_eq!(r.get_thread(t).await.unwrap().user.unwrap().id, user.id);
}

#[tokio::test]
async fn upsert_promotes_but_never_demotes() {
    let r = repo();
    let profile = |admin| OAuthProfile {
        google_id: "g-2".into(),
        name: "Grace".into(),
        email: None,
        picture: None,
        admin,
    };
    let u = r.upsert_google_user(profile(false)).await.unwrap();
    assert_eq!(u.role, "user");
    let u2 = r.upsert_google_user(profile(true)).await.unwrap();
    assert_eq!(u2.id, u.id);
    assert_eq!(u2.role, "admin");
    let u3 = r.upsert_google_user(profile(false)).await.unwrap();
    assert_eq!(u3.role, "admin");
}

#[tokio::test]
async fn thread_update_and_cascading_delete() {
    let r = repo();
    let t = thread(&r, 1).await;
    let target = r.get_thread(t).await.unwrap();
    let updated = comments::update_thread(&r, &target, UpdateThread {
        title: Some("  ".into()),
        content: Some("new body".into()),
    }).await.unwrap();
    assert_eq!(updated.title, "Rust");
    assert_eq!(updated.content, "new body");

    let a = comments::create_comment(&r, 1, t, reply("A", None)).await.unwrap();
    let a1 = comments::create_comment(&r, 1, t, reply("A1", Some(a.id))).await.unwrap();
    comments::delete_thread(&r, &updated).await.unwrap();

    assert!(matches!(r.get_thread(t).await, Err(RepoError::NotFound)));
    assert!(matches!(r.get_comment(a1.id).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn threads_list_newest_first() {
    let r = repo();
    let first = thread(&r, 1).await;
    let second = thread(&r, 1).await;
    let page = comments::list_threads(&r, PageParams::default()).await.unwrap();
    assert_eq!(page.pagination.total, 2);
    let ids: Vec<_> = page.threads.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![second, first]);
}

#[tokio::test]
async fn snapshot_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("DISCUSS_DATA_DIR", dir.path());
    let r = InMemRepo::new();
    let t = thread(&r, 1).await;
    comments::create_comment(&r, 1, t, reply("persisted", None)).await.unwrap();

    let reloaded = InMemRepo::new();
    std::env::remove_var("DISCUSS_DATA_DIR");
    let page = comments::thread_comments(&reloaded, t, PageParams::default()).await.unwrap();
    assert_eq!(page.comments[0].content.as_deref(), Some("persisted"));
}

#[test]
fn deep_reply_chain_is_served_on_a_2mb_stack() {
    const DEPTH: usize = 5_000;
    let worker = std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let r = repo();
                let t = thread(&r, 1).await;
                let mut parent = None;
                for i in 0..DEPTH {
                    let c = comments::create_comment(&r, 1, t, reply(&format!("level {i}"), parent)).await.unwrap();
                    if i % 3 == 2 {
                        comments::soft_delete_comment(&r, &c).await.unwrap();
                    }
                    parent = Some(c.id);
                }

                let page = comments::thread_comments(&r, t, PageParams::default()).await.unwrap();
                assert_eq!(page.pagination.total, 1);
                let mut depth = 1;
                let mut node = &page.comments[0];
                while let Some(next) = node.replies.first() {
                    node = next;
                    depth += 1;
                }
                assert_eq!(depth, DEPTH);
                assert_eq!(node.content.as_deref(), Some(format!("level {}", DEPTH - 1).as_str()));

                let body = discuss::tree::page_json(&page).unwrap();
                assert!(body.starts_with(b"{\"comments\":[{"));
            });
        })
        .unwrap();
    worker.join().expect("deep reply chain overflowed the stack");
}

#[tokio::test]
async fn parent_from_another_thread_is_accepted_and_listed_under_the_parent() {
    let r = repo();
    let t1 = thread(&r, 1).await;
    let t2 = thread(&r, 1).await;
    let a = comments::create_comment(&r, 1, t1, reply("A in T1", None)).await.unwrap();
    let before = r.count_top_level(t2).await.unwrap();

    let stray = comments::create_comment(&r, 2, t2, reply("reply filed under T2", Some(a.id))).await.unwrap();
    assert_eq!(stray.thread_id, t2);
    assert_eq!(stray.parent_id, Some(a.id));

    let page = comments::thread_comments(&r, t1, PageParams::default()).await.unwrap();
    assert_eq!(page.comments[0].id, a.id);
    assert_eq!(page.comments[0].replies[0].id, stray.id);
    assert_eq!(page.comments[0].replies[0].thread_id, t2);

    assert_eq!(r.count_top_level(t2).await.unwrap(), before);
    let t2_page = comments::thread_comments(&r, t2, PageParams::default()).await.unwrap();
    assert!(t2_page.comments.is_empty());
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Postgres BIGSERIAL keys
pub type Id = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub media_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub google_id: String,
    pub name: String,
    pub email: Option<String>,
    pub picture: Option<String>,
    pub role: String, // "user" | "admin"
    pub created_at: DateTime<Utc>,
}

/// Public author projection attached to threads and comment nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: Id,
    pub name: String,
    pub email: Option<String>,
    pub picture: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        Self { id: u.id, name: u.name.clone(), email: u.email.clone(), picture: u.picture.clone() }
    }
}

/// Profile returned by the OAuth provider, used to create or refresh a `User`.
#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub google_id: String,
    pub name: String,
    pub email: Option<String>,
    pub picture: Option<String>,
    pub admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: Id,
    pub title: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub user_id: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: Option<UserSummary>,
}

/// Thread joined with its author, as selected from the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ThreadRow {
    pub id: Id,
    pub title: String,
    pub content: String,
    #[sqlx(json)]
    pub attachments: Vec<Attachment>,
    pub user_id: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author_id: Option<Id>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_picture: Option<String>,
}

impl From<ThreadRow> for Thread {
    fn from(row: ThreadRow) -> Self {
        let user = row.author_id.map(|id| UserSummary {
            id,
            name: row.author_name.unwrap_or_default(),
            email: row.author_email,
            picture: row.author_picture,
        });
        Thread {
            id: row.id,
            title: row.title,
            content: row.content,
            attachments: row.attachments,
            user_id: row.user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            user,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewThread {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateThread {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id,
    pub thread_id: Id,
    pub user_id: Id,
    pub parent_id: Option<Id>,
    pub content: String,
    #[sqlx(json)]
    pub attachments: Vec<Attachment>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    #[serde(default)]
    pub content: String,
    pub parent_id: Option<Id>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateComment {
    #[serde(default)]
    pub content: String,
}

/// One row of the recursive thread retrieval: the comment, its author and
/// its position (depth, root-to-node id path) in the reply forest.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommentRow {
    pub id: Id,
    pub thread_id: Id,
    pub user_id: Id,
    pub parent_id: Option<Id>,
    pub content: String,
    #[sqlx(json)]
    pub attachments: Vec<Attachment>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author_id: Option<Id>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_picture: Option<String>,
    pub depth: i32,
    pub path: Vec<Id>,
}

/// A comment as rendered on the read path, carrying its direct replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: Id,
    pub thread_id: Id,
    pub user_id: Id,
    pub parent_id: Option<Id>,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user: Option<UserSummary>,
    pub replies: Vec<TreeNode>,
}

// Flattens the subtree before it is freed; reply chains have no depth limit.
impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.replies);
        }
    }
}

impl From<CommentRow> for TreeNode {
    fn from(row: CommentRow) -> Self {
        let user = row.author_id.map(|id| UserSummary {
            id,
            name: row.author_name.unwrap_or_default(),
            email: row.author_email,
            picture: row.author_picture,
        });
        TreeNode {
            id: row.id,
            thread_id: row.thread_id,
            user_id: row.user_id,
            parent_id: row.parent_id,
            content: Some(row.content),
            attachments: row.attachments,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
            user,
            replies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total <= 0 { 0 } else { total / limit + i64::from(total % limit != 0) };
        Self { page, limit, total, total_pages }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentPage {
    pub comments: Vec<TreeNode>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadPage {
    pub threads: Vec<Thread>,
    pub pagination: Pagination,
}

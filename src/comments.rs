//! Thread and comment operations shared by the HTTP layer and the tests.
//!
//! Authorization is not checked here: update and delete expect the caller
//! to have loaded the target and verified owner-or-admin access already.

use tracing::{info, warn};

use crate::error::ApiError;
use crate::models::*;
use crate::repo::{CommentRepo, Repo, ThreadRepo};
use crate::tree::{mask_deleted, CommentForest};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
}

impl Default for PageParams {
    fn default() -> Self {
        Self { page: DEFAULT_PAGE, limit: DEFAULT_LIMIT }
    }
}

impl PageParams {
    /// Lenient query parsing: anything that is not a positive integer falls
    /// back to the default instead of failing the request.
    pub fn parse(page: Option<&str>, limit: Option<&str>) -> Self {
        fn positive(raw: Option<&str>, default: i64) -> i64 {
            raw.and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(default)
        }
        Self { page: positive(page, DEFAULT_PAGE), limit: positive(limit, DEFAULT_LIMIT) }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn require_text(value: &str, message: &'static str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(message));
    }
    Ok(())
}

/// One page of a thread's top-level comments with their full reply trees.
///
/// The total comes from a separate count query, so under concurrent writes
/// it may briefly disagree with the forest that was materialized.
pub async fn thread_comments(repo: &dyn Repo, thread_id: Id, params: PageParams) -> Result<CommentPage, ApiError> {
    repo.get_thread(thread_id).await.map_err(ApiError::missing("thread"))?;

    let total = repo.count_top_level(thread_id).await?;
    let rows = repo.comment_rows(thread_id).await?;

    let forest = CommentForest::fold(rows);
    let offset = usize::try_from(params.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(params.limit).unwrap_or(usize::MAX);
    let mut comments = forest.into_page(offset, limit);
    mask_deleted(&mut comments);

    Ok(CommentPage { comments, pagination: Pagination::new(params.page, params.limit, total) })
}

pub async fn create_comment(repo: &dyn Repo, author: Id, thread_id: Id, new: NewComment) -> Result<Comment, ApiError> {
    require_text(&new.content, "content is required")?;
    repo.get_thread(thread_id).await.map_err(ApiError::missing("thread"))?;

    if let Some(parent_id) = new.parent_id {
        // replying to a soft-deleted comment is allowed
        let parent = repo.get_comment(parent_id).await.map_err(ApiError::missing("parent comment"))?;
        if parent.thread_id != thread_id {
            warn!(thread_id, parent_id, parent_thread = parent.thread_id, "reply attached to a parent from another thread");
        }
    }

    let comment = repo.create_comment(author, thread_id, new).await.map_err(ApiError::missing("thread"))?;
    info!(comment_id = comment.id, thread_id, user_id = author, "comment created");
    Ok(comment)
}

pub async fn update_comment(repo: &dyn Repo, target: &Comment, upd: UpdateComment) -> Result<Comment, ApiError> {
    require_text(&upd.content, "content is required")?;
    let comment = repo.update_comment_content(target.id, upd.content).await.map_err(ApiError::missing("comment"))?;
    info!(comment_id = comment.id, "comment updated");
    Ok(comment)
}

/// Sets the deletion flag. Re-deleting is accepted and children are left alone.
pub async fn soft_delete_comment(repo: &dyn Repo, target: &Comment) -> Result<Comment, ApiError> {
    let comment = repo.soft_delete_comment(target.id).await.map_err(ApiError::missing("comment"))?;
    info!(comment_id = comment.id, already_deleted = target.is_deleted, "comment deleted");
    Ok(comment)
}

pub async fn list_threads(repo: &dyn Repo, params: PageParams) -> Result<ThreadPage, ApiError> {
    let total = repo.count_threads().await?;
    let threads = repo.list_threads(params.offset(), params.limit).await?;
    Ok(ThreadPage { threads, pagination: Pagination::new(params.page, params.limit, total) })
}

pub async fn create_thread(repo: &dyn Repo, author: Id, new: NewThread) -> Result<Thread, ApiError> {
    require_text(&new.title, "title and content are required")?;
    require_text(&new.content, "title and content are required")?;
    let thread = repo.create_thread(author, new).await?;
    info!(thread_id = thread.id, user_id = author, "thread created");
    Ok(thread)
}

/// Blank fields are ignored rather than rejected.
pub async fn update_thread(repo: &dyn Repo, target: &Thread, upd: UpdateThread) -> Result<Thread, ApiError> {
    let upd = UpdateThread {
        title: upd.title.filter(|t| !t.trim().is_empty()),
        content: upd.content.filter(|c| !c.trim().is_empty()),
    };
    let thread = repo.update_thread(target.id, upd).await.map_err(ApiError::missing("thread"))?;
    info!(thread_id = thread.id, "thread updated");
    Ok(thread)
}

pub async fn delete_thread(repo: &dyn Repo, target: &Thread) -> Result<(), ApiError> {
    repo.delete_thread(target.id).await.map_err(ApiError::missing("thread"))?;
    info!(thread_id = target.id, "thread deleted");
    Ok(())
}

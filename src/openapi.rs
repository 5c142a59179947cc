use crate::models::{
    Attachment, Comment, CommentPage, NewComment, NewThread, Pagination, Thread, ThreadPage, TreeNode,
    UpdateComment, UpdateThread, UserSummary,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_threads,
        crate::routes::create_thread,
        crate::routes::get_thread,
        crate::routes::update_thread,
        crate::routes::delete_thread,
        crate::routes::list_comments,
        crate::routes::create_comment,
        crate::routes::update_comment,
        crate::routes::delete_comment,
        crate::routes::upload_image,
        crate::routes::auth_me,
        crate::routes::auth_status,
    ),
    components(schemas(
        Attachment, UserSummary, Thread, NewThread, UpdateThread, ThreadPage,
        Comment, NewComment, UpdateComment, TreeNode, CommentPage, Pagination,
        crate::routes::UploadResponse, crate::routes::MeResponse,
        crate::routes::AuthStatus, crate::routes::StatusUser
    )),
    tags(
        (name = "threads", description = "Thread operations"),
        (name = "comments", description = "Threaded comment operations"),
    )
)]
pub struct ApiDoc;

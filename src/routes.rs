use std::sync::Arc;
use actix_web::{web, HttpResponse};
use actix_multipart::Multipart;
use futures_util::TryStreamExt as _;
use serde::Deserialize;
use sha2::{Sha256, Digest};
use utoipa::IntoParams;

use crate::auth::{create_jwt, Auth, Role};
use crate::comments::{self, PageParams};
use crate::error::ApiError;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{CommentRepo, Repo, ThreadRepo, UserRepo};
use crate::storage::{image_url, ImageStore, ImageStoreError};
use crate::tree::page_json;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/threads")
                    .route(web::get().to(list_threads))
                    .route(web::post().to(create_thread)),
            )
            .service(
                web::resource("/threads/{id}")
                    .route(web::get().to(get_thread))
                    .route(web::put().to(update_thread))
                    .route(web::delete().to(delete_thread)),
            )
            .service(
                web::resource("/threads/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(
                web::resource("/comments/{id}")
                    .route(web::put().to(update_comment))
                    .route(web::delete().to(delete_comment)),
            )
            .service(web::resource("/upload").route(web::post().to(upload_image)))
            .service(web::resource("/auth/google/login").route(web::get().to(google_login)))
            .service(web::resource("/auth/google/callback").route(web::get().to(google_callback)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/auth/status").route(web::get().to(auth_status)))
            .service(web::resource("/auth/refresh").route(web::post().to(refresh_token)))
            .service(web::resource("/auth/logout").route(web::post().to(logout))),
    );
    // public fetch route (no /api/v1 prefix so <img src="/images/{hash}"> works)
    cfg.route("/images/{hash}", web::get().to(get_image));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
    pub limits: RateLimiterFacade,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, image_store: Arc<dyn ImageStore>) -> Self {
        Self { repo, image_store, limits: RateLimiterFacade::from_env() }
    }
}

/// Raw pagination query; values are parsed leniently by [`PageParams::parse`].
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page, defaults to 1
    page: Option<String>,
    /// page size, defaults to 10
    limit: Option<String>,
}

impl PageQuery {
    fn params(&self) -> PageParams {
        PageParams::parse(self.page.as_deref(), self.limit.as_deref())
    }
}

fn message(text: &str) -> serde_json::Value {
    serde_json::json!({ "message": text })
}

// ---------------- Threads -----------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/threads",
    params(PageQuery),
    responses((status = 200, description = "Threads, newest first", body = ThreadPage))
)]
pub async fn list_threads(data: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse, ApiError> {
    let page = comments::list_threads(data.repo.as_ref(), query.params()).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    post,
    path = "/api/v1/threads",
    request_body = NewThread,
    responses(
        (status = 201, description = "Thread created", body = Thread),
        (status = 400, description = "Title or content missing"),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_thread(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewThread>) -> Result<HttpResponse, ApiError> {
    let author = auth.user_id()?;
    if !data.limits.allow_thread(author) { return Err(ApiError::TooManyRequests); }
    let thread = comments::create_thread(data.repo.as_ref(), author, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(thread))
}

#[utoipa::path(
    get,
    path = "/api/v1/threads/{id}",
    params(("id" = i64, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread", body = Thread),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn get_thread(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let thread = data.repo.get_thread(path.into_inner()).await.map_err(ApiError::missing("thread"))?;
    Ok(HttpResponse::Ok().json(thread))
}

#[utoipa::path(
    put,
    path = "/api/v1/threads/{id}",
    request_body = UpdateThread,
    params(("id" = i64, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread updated", body = Thread),
        (status = 403, description = "Not the author or an admin"),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn update_thread(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateThread>,
) -> Result<HttpResponse, ApiError> {
    let thread = data.repo.get_thread(path.into_inner()).await.map_err(ApiError::missing("thread"))?;
    auth.ensure_owner_or_admin(thread.user_id)?;
    let updated = comments::update_thread(data.repo.as_ref(), &thread, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/v1/threads/{id}",
    params(("id" = i64, Path, description = "Thread id")),
    responses(
        (status = 200, description = "Thread and its comments deleted"),
        (status = 403, description = "Not the author or an admin"),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn delete_thread(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let thread = data.repo.get_thread(path.into_inner()).await.map_err(ApiError::missing("thread"))?;
    auth.ensure_owner_or_admin(thread.user_id)?;
    comments::delete_thread(data.repo.as_ref(), &thread).await?;
    Ok(HttpResponse::Ok().json(message("Thread deleted successfully")))
}

// ---------------- Comments ----------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/threads/{id}/comments",
    params(("id" = i64, Path, description = "Thread id"), PageQuery),
    responses(
        (status = 200, description = "Top-level comments with nested replies; deleted replies are masked", body = CommentPage),
        (status = 404, description = "Thread not found")
    )
)]
pub async fn list_comments(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = comments::thread_comments(data.repo.as_ref(), path.into_inner(), query.params()).await?;
    let body = page_json(&page).map_err(|e| {
        tracing::error!(error = %e, "comment page serialization failed");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Ok().content_type("application/json").body(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/threads/{id}/comments",
    request_body = NewComment,
    params(("id" = i64, Path, description = "Thread id")),
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Content missing"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Thread or parent comment not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    let author = auth.user_id()?;
    if !data.limits.allow_comment(author) { return Err(ApiError::TooManyRequests); }
    let comment = comments::create_comment(data.repo.as_ref(), author, path.into_inner(), payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    put,
    path = "/api/v1/comments/{id}",
    request_body = UpdateComment,
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment updated", body = Comment),
        (status = 400, description = "Content missing"),
        (status = 403, description = "Not the author or an admin"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn update_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateComment>,
) -> Result<HttpResponse, ApiError> {
    let comment = data.repo.get_comment(path.into_inner()).await.map_err(ApiError::missing("comment"))?;
    auth.ensure_owner_or_admin(comment.user_id)?;
    let updated = comments::update_comment(data.repo.as_ref(), &comment, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/v1/comments/{id}",
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment soft-deleted"),
        (status = 403, description = "Not the author or an admin"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn delete_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let comment = data.repo.get_comment(path.into_inner()).await.map_err(ApiError::missing("comment"))?;
    auth.ensure_owner_or_admin(comment.user_id)?;
    comments::soft_delete_comment(data.repo.as_ref(), &comment).await?;
    Ok(HttpResponse::Ok().json(message("Comment deleted successfully")))
}

// ---------------- Uploads -----------------------------------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub media_type: String,
    pub hash: String,
    pub size: usize,
    pub duplicate: bool, // already stored under this hash
}

const UPLOAD_SIZE_LIMIT: usize = 5 * 1024 * 1024; // 5 MB

const ALLOWED_MIME: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/api/v1/upload",
    responses(
        (status = 201, description = "Image stored (new)", body = UploadResponse),
        (status = 200, description = "Image already existed", body = UploadResponse),
        (status = 400, description = "No file field"),
        (status = 413, description = "Payload too large"),
        (status = 415, description = "Unsupported media type"),
    )
)]
pub async fn upload_image(auth: Auth, data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    let uploader = auth.user_id()?;
    if !data.limits.allow_upload(uploader) { return Err(ApiError::TooManyRequests); }

    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::BadRequest("malformed multipart body")
    })? {
        if field.content_disposition().get_name() != Some("file") { continue; }
        let mut bytes: Vec<u8> = Vec::new();
        let mut hasher = Sha256::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::BadRequest("malformed multipart body")
        })? {
            if bytes.len() + chunk.len() > UPLOAD_SIZE_LIMIT { return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish()); }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let hash = format!("{:x}", hasher.finalize());
        // trust the bytes, not the declared content type
        let media_type = infer::get(&bytes).map(|t| t.mime_type().to_string()).unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&media_type.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let (status, duplicate) = match data.image_store.save(&hash, &media_type, &bytes).await {
            Ok(()) => (StatusCode::CREATED, false),
            Err(ImageStoreError::Duplicate) => (StatusCode::OK, true),
            Err(e) => { log::error!("image_store save error: {e}"); return Err(ApiError::Internal); }
        };
        log::info!("upload {hash} ({media_type}, {} bytes) by user {uploader}", bytes.len());
        let resp = UploadResponse { url: image_url(&hash), media_type, hash, size: bytes.len(), duplicate };
        return Ok(HttpResponse::build(status).json(resp));
    }
    Err(ApiError::BadRequest("file field is required"))
}

pub async fn get_image(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let hash = path.into_inner();
    if hash.len() < 2 { return Err(ApiError::NotFound("image")); }
    match data.image_store.load(&hash).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok().insert_header(("Content-Type", mime)).body(bytes)),
        Err(ImageStoreError::NotFound) => Err(ApiError::NotFound("image")),
        Err(e) => { log::error!("image_store load error: {e}"); Err(ApiError::Internal) }
    }
}

// ---------------- Google OAuth ------------------------------------

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

// GOOGLE_TOKEN_URL / GOOGLE_USERINFO_URL point the flow at a mock server in tests
fn google_endpoint(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn redirect_uri() -> String {
    std::env::var("GOOGLE_REDIRECT_URI")
        .unwrap_or_else(|_| "http://localhost:8080/api/v1/auth/google/callback".to_string())
}

fn frontend_url() -> String {
    std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string())
}

fn oauth_not_configured(stage: &str) -> HttpResponse {
    HttpResponse::ServiceUnavailable().json(serde_json::json!({
        "error": "google_oauth_not_configured",
        "stage": stage,
        "message": "Set GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET to enable Google login"
    }))
}

fn redirect(location: String) -> HttpResponse {
    HttpResponse::Found().insert_header(("Location", location)).finish()
}

pub async fn google_login() -> Result<HttpResponse, ApiError> {
    let Ok(client_id) = std::env::var("GOOGLE_CLIENT_ID") else {
        return Ok(oauth_not_configured("client_id"));
    };
    let auth_url = format!(
        "{GOOGLE_AUTH_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}",
        urlencoding::encode(&client_id),
        urlencoding::encode(&redirect_uri()),
        urlencoding::encode("openid email profile"),
    );
    Ok(redirect(auth_url))
}

#[derive(Deserialize)]
pub struct GoogleCallback {
    code: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    name: Option<String>,
    email: Option<String>,
    picture: Option<String>,
}

fn is_bootstrap_admin(email: Option<&str>) -> bool {
    let Some(email) = email else { return false };
    std::env::var("BOOTSTRAP_ADMIN_EMAILS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .any(|s| s.eq_ignore_ascii_case(email))
}

pub async fn google_callback(query: web::Query<GoogleCallback>, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let code = match (&query.code, &query.error) {
        (Some(code), None) => code.clone(),
        _ => {
            tracing::warn!(error = ?query.error, "google login failed");
            return Ok(redirect(format!("{}/login?error=auth_failed", frontend_url())));
        }
    };
    let Ok(client_id) = std::env::var("GOOGLE_CLIENT_ID") else { return Ok(oauth_not_configured("client_id")) };
    let Ok(client_secret) = std::env::var("GOOGLE_CLIENT_SECRET") else { return Ok(oauth_not_configured("client_secret")) };
    let redirect_uri = redirect_uri();

    let client = reqwest::Client::new();
    let token = client
        .post(google_endpoint("GOOGLE_TOKEN_URL", GOOGLE_TOKEN_URL))
        .form(&[
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ])
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| { tracing::error!(error = %e, "google token exchange failed"); ApiError::Internal })?
        .json::<GoogleTokenResponse>()
        .await
        .map_err(|e| { tracing::error!(error = %e, "google token response malformed"); ApiError::Internal })?;

    let info = client
        .get(google_endpoint("GOOGLE_USERINFO_URL", GOOGLE_USERINFO_URL))
        .bearer_auth(&token.access_token)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| { tracing::error!(error = %e, "google userinfo request failed"); ApiError::Internal })?
        .json::<GoogleUserInfo>()
        .await
        .map_err(|e| { tracing::error!(error = %e, "google userinfo malformed"); ApiError::Internal })?;

    let admin = is_bootstrap_admin(info.email.as_deref());
    let profile = OAuthProfile {
        name: info.name.or_else(|| info.email.clone()).unwrap_or_else(|| "Anonymous".into()),
        google_id: info.sub,
        email: info.email,
        picture: info.picture,
        admin,
    };
    let user = data.repo.upsert_google_user(profile).await?;
    tracing::info!(user_id = user.id, role = %user.role, "user logged in");

    let jwt = create_jwt(user.id, vec![Role::from_db(&user.role)])
        .map_err(|e| { tracing::error!(error = %e, "jwt signing failed"); ApiError::Internal })?;
    Ok(redirect(format!("{}/?token={}", frontend_url(), jwt)))
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    id: Id,
    name: String,
    email: Option<String>,
    picture: Option<String>,
    role: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(auth.user_id()?).await.map_err(|_| ApiError::Unauthorized)?;
    Ok(HttpResponse::Ok().json(MeResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        picture: user.picture,
        role: user.role,
    }))
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct AuthStatus {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<StatusUser>,
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct StatusUser {
    id: Id,
    email: Option<String>,
    name: String,
}

/// Never fails: a missing, invalid or stale token reads as signed out.
#[utoipa::path(
    get,
    path = "/api/v1/auth/status",
    responses((status = 200, description = "Whether the caller is signed in", body = AuthStatus))
)]
pub async fn auth_status(auth: Option<Auth>, data: web::Data<AppState>) -> HttpResponse {
    let user = match auth.and_then(|a| a.user_id().ok()) {
        Some(id) => data.repo.get_user(id).await.ok(),
        None => None,
    };
    HttpResponse::Ok().json(AuthStatus {
        authenticated: user.is_some(),
        user: user.map(|u| StatusUser { id: u.id, email: u.email, name: u.name }),
    })
}

pub async fn refresh_token(auth: Auth) -> Result<HttpResponse, ApiError> {
    let jwt = create_jwt(auth.user_id()?, auth.0.roles)
        .map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": jwt })))
}

// Tokens are stateless; the client just drops its copy.
pub async fn logout() -> HttpResponse {
    HttpResponse::Ok().json(message("Logged out"))
}

#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use discuss::rate_limit::RateLimiterFacade;
use discuss::repo::inmem::InMemRepo;
use discuss::storage::{ImageStore, ImageStoreError};
use discuss::{config, AppState};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct NoImages;

#[async_trait::async_trait]
impl ImageStore for NoImages {
    async fn save(&self, _: &str, _: &str, _: &[u8]) -> Result<(), ImageStoreError> { Ok(()) }
    async fn load(&self, _: &str) -> Result<(Vec<u8>, String), ImageStoreError> { Err(ImageStoreError::NotFound) }
}

fn state() -> web::Data<AppState> {
    web::Data::new(AppState {
        repo: Arc::new(InMemRepo::ephemeral()),
        image_store: Arc::new(NoImages),
        limits: RateLimiterFacade::disabled(),
    })
}

fn clear_env() {
    for var in ["GOOGLE_TOKEN_URL", "GOOGLE_USERINFO_URL", "BOOTSTRAP_ADMIN_EMAILS", "GOOGLE_CLIENT_SECRET"] {
        std::env::remove_var(var);
    }
}

#[actix_web::test]
#[serial_test::serial]
async fn callback_upserts_user_and_redirects_with_token() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("GOOGLE_CLIENT_ID", "cid");
    std::env::set_var("GOOGLE_CLIENT_SECRET", "csecret");
    std::env::set_var("FRONTEND_URL", "http://front.test");
    std::env::set_var("BOOTSTRAP_ADMIN_EMAILS", "someone@else.test, Boss@Example.com");

    let google = MockServer::start().await;
    std::env::set_var("GOOGLE_TOKEN_URL", format!("{}/token", google.uri()));
    std::env::set_var("GOOGLE_USERINFO_URL", format!("{}/userinfo", google.uri()));

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "at-1", "token_type": "Bearer"})))
        .mount(&google)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "google-123",
            "name": "The Boss",
            "email": "boss@example.com",
            "picture": "https://pics.test/boss.png"
        })))
        .mount(&google)
        .await;

    let app = test::init_service(App::new().app_data(state()).configure(config)).await;

    let resp = test::call_service(&app, test::TestRequest::get()
        .uri("/api/v1/auth/google/callback?code=auth-code")
        .to_request()).await;
    assert_eq!(resp.status(), 302);
    let location = resp.headers().get("location").unwrap().to_str().unwrap().to_string();
    let token = location.strip_prefix("http://front.test/?token=").expect("token redirect").to_string();

    let resp = test::call_service(&app, test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request()).await;
    assert_eq!(resp.status(), 200);
    let me: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(me["name"], "The Boss");
    assert_eq!(me["role"], "admin");
    assert_eq!(me["picture"], "https://pics.test/boss.png");

    clear_env();
}

#[actix_web::test]
#[serial_test::serial]
async fn provider_error_redirects_to_login() {
    std::env::set_var("FRONTEND_URL", "http://front.test");
    let app = test::init_service(App::new().app_data(state()).configure(config)).await;
    let resp = test::call_service(&app, test::TestRequest::get()
        .uri("/api/v1/auth/google/callback?error=access_denied")
        .to_request()).await;
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers().get("location").unwrap(), "http://front.test/login?error=auth_failed");
}

#[actix_web::test]
#[serial_test::serial]
async fn failed_token_exchange_is_500() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("GOOGLE_CLIENT_ID", "cid");
    std::env::set_var("GOOGLE_CLIENT_SECRET", "csecret");
    let google = MockServer::start().await;
    std::env::set_var("GOOGLE_TOKEN_URL", format!("{}/token", google.uri()));
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&google)
        .await;

    let app = test::init_service(App::new().app_data(state()).configure(config)).await;
    let resp = test::call_service(&app, test::TestRequest::get()
        .uri("/api/v1/auth/google/callback?code=stale")
        .to_request()).await;
    assert_eq!(resp.status(), 500);

    clear_env();
}

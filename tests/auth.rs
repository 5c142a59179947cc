use actix_web::{dev::Payload, test, FromRequest};
use discuss::auth::{create_jwt, Auth, Claims, Role};
use discuss::error::ApiError;
use std::env;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

fn claims(sub: &str, roles: Vec<Role>) -> Auth {
    Auth(Claims { sub: sub.into(), exp: usize::MAX, roles })
}

#[actix_web::test]
async fn jwt_roundtrip_ok() {
    set_secret();
    let token = create_jwt(42, vec![Role::User]).expect("token");
    // The Auth extractor is the public way to validate, so use it here.
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.0.sub, "42");
    assert_eq!(auth.user_id().unwrap(), 42);
    assert!(auth.0.roles.contains(&Role::User));
    assert!(!auth.is_admin());
}

#[actix_web::test]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
async fn extractor_requires_header() {
    set_secret();
    let req = test::TestRequest::default().to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[::core::prelude::v1::test]
fn owner_or_admin_gate() {
    let owner = claims("5", vec![Role::User]);
    let stranger = claims("6", vec![Role::User]);
    let admin = claims("1", vec![Role::Admin]);

    assert!(owner.ensure_owner_or_admin(5).is_ok());
    assert!(matches!(stranger.ensure_owner_or_admin(5), Err(ApiError::Forbidden)));
    assert!(admin.ensure_owner_or_admin(5).is_ok());
}

#[::core::prelude::v1::test]
fn non_numeric_subject_is_unauthorized() {
    let odd = claims("not-a-number", vec![Role::User]);
    assert!(matches!(odd.user_id(), Err(ApiError::Unauthorized)));
}

#[::core::prelude::v1::test]
fn role_column_mapping() {
    assert_eq!(Role::from_db("admin"), Role::Admin);
    assert_eq!(Role::from_db("ADMIN"), Role::Admin);
    assert_eq!(Role::from_db("user"), Role::User);
    assert_eq!(Role::from_db("moderator"), Role::User);
}

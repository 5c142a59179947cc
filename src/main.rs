use actix_web::{web, App, HttpServer, middleware::Compress};
use actix_cors::Cors;
use utoipa_swagger_ui::SwaggerUi;

use discuss::openapi::ApiDoc;
use discuss::repo::Repo;
use discuss::storage::build_image_store;
use discuss::{config, AppState, SecurityHeaders};
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping discussion server");
    info!("Google OAuth configured: {}", std::env::var("GOOGLE_CLIENT_ID").is_ok());
    let frontend = std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());
    info!("Frontend URL: {frontend}");

    #[cfg(feature = "postgres-store")]
    let pool = {
        use sqlx::postgres::PgPoolOptions;
        let db_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set for postgres-store"))?;
        let max = std::env::var("DB_POOL_MAX").ok().and_then(|v| v.parse().ok()).unwrap_or(10);
        let pool = PgPoolOptions::new().max_connections(max).connect(&db_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Postgres pool ready (max {max} connections), migrations applied");
        pool
    };

    #[cfg(feature = "postgres-store")]
    let repo: Arc<dyn Repo> = Arc::new(discuss::repo::pg::PgRepo::new(pool.clone()));

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo: Arc<dyn Repo> = {
        info!("Using in-memory repository backend");
        Arc::new(discuss::repo::inmem::InMemRepo::new())
    };

    let image_store = build_image_store().await?;
    let state = AppState::new(repo, image_store);

    // evict idle rate-limit keys so the map tracks only recent users
    let limits = state.limits.clone();
    actix_web::rt::spawn(async move {
        let mut tick = actix_web::rt::time::interval(Duration::from_secs(300));
        loop {
            tick.tick().await;
            limits.sweep();
        }
    });
    let openapi = ApiDoc::openapi();
    info!("OpenAPI document generated");

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            // during local dev allow React/Vite default port
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allowed_origin(&frontend)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind_addr)?;

    info!("Listening on http://{bind_addr}");
    server.run().await?;

    #[cfg(feature = "postgres-store")]
    {
        pool.close().await;
        info!("Postgres pool closed");
    }
    Ok(())
}

/// Exit early on missing or weak required configuration.
fn validate_env_vars() {
    use std::env;

    match env::var("JWT_SECRET") {
        Err(_) => {
            eprintln!("Missing required environment variable JWT_SECRET");
            eprintln!("Please copy .env.example to .env and configure it");
            std::process::exit(1);
        }
        Ok(secret) if secret.len() < 32 => {
            eprintln!("JWT_SECRET must be at least 32 characters long");
            std::process::exit(1);
        }
        Ok(_) => {}
    }

    if env::var("GOOGLE_CLIENT_ID").is_err() || env::var("GOOGLE_CLIENT_SECRET").is_err() {
        eprintln!("Warning: Google OAuth not configured (GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET missing)");
        eprintln!("Google login will not work without these variables");
    }
}

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use claimdesk::config::AppConfig;
use claimdesk::notify::{build_transport, ReportMailer};
use claimdesk::openapi::ApiDoc;
use claimdesk::render::ReportRenderer;
use claimdesk::repo::ReportRepo;
use claimdesk::storage::build_object_store;
use claimdesk::{config, AppState};

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ReportRepo>> {
    use claimdesk::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;

    let db_url = cfg
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for postgres-store"))?;
    let pool = PgPoolOptions::new().max_connections(5).connect_lazy(db_url)?;
    let repo = PgRepo::new(pool);
    repo.migrate().await?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ReportRepo>> {
    use claimdesk::repo::inmem::InMemRepo;

    let repo = match &cfg.snapshot_path {
        Some(path) => {
            info!("Using in-memory repository backend (snapshot: {})", path.display());
            InMemRepo::with_snapshot(path)
        }
        None => {
            info!("Using in-memory repository backend (no persistence)");
            InMemRepo::new()
        }
    };
    Ok(Arc::new(repo))
}

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable the inmem-store or postgres-store feature");

fn startup_error(e: anyhow::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, format!("{e:#}"))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping claimdesk server");
    let cfg = AppConfig::from_env();
    info!("Frontend URL: {}", cfg.frontend_url.as_deref().unwrap_or("(none)"));

    let repo = build_repo(&cfg).await.map_err(startup_error)?;
    let object_store = build_object_store(&cfg.storage).await.map_err(startup_error)?;
    let renderer = ReportRenderer::new(cfg.public_base_url.clone());
    let transport = build_transport(&cfg.mail).map_err(startup_error)?;
    let mailer = ReportMailer::new(transport, renderer.clone(), cfg.mail.from.clone())
        .with_retry(cfg.mail.max_attempts, cfg.mail.retry_delay);
    info!("Mail transport: {}", mailer.transport_name());

    let state = web::Data::new(AppState { repo, object_store, renderer, mailer });
    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let frontend_url = cfg.frontend_url.clone();
    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local Vite dev server
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PATCH", "OPTIONS"])
                .max_age(3600);
            if let Some(front) = &frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(cfg.bind_addr.as_str())?;

    info!("Listening on http://{}", cfg.bind_addr);

    server.run().await
}

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use reqwest::Client;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use contentops_backend::config::Config;
use contentops_backend::db::postgres_run_repository::PostgresRunRepository;
use contentops_backend::db::run_repository::RunRepository;
use contentops_backend::responses::JsonResponse;
use contentops_backend::routes::runs::run_tracking_routes;
use contentops_backend::services::n8n::{ExecutionSource, N8nClient};
use contentops_backend::services::scoring::{AnthropicScorer, ContentScorer};
use contentops_backend::state::AppState;
use contentops_backend::worker;

#[cfg(feature = "tls")]
use axum_server::tls_rustls::RustlsConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = Config::from_env()?;

    let global_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit_ms)
            .burst_size(config.rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .context("invalid rate limiter configuration")?,
    );

    // Background task to cleanup old IPs
    let governor_limiter = global_governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let pg_pool = establish_connection(&config.database_url).await?;
    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("failed to run database migrations")?;

    let run_repo = Arc::new(PostgresRunRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn RunRepository>;

    let http_client = Client::new();
    let n8n = Arc::new(N8nClient::new(
        &http_client,
        &config.n8n_base_url,
        &config.n8n_api_key,
    )) as Arc<dyn ExecutionSource>;
    let scorer = config.anthropic_api_key.as_deref().map(|key| {
        Arc::new(AnthropicScorer::new(
            &http_client,
            key,
            &config.anthropic_base_url,
            &config.anthropic_model,
        )) as Arc<dyn ContentScorer>
    });
    if scorer.is_none() {
        info!("ANTHROPIC_API_KEY not set; content scoring disabled");
    }

    let state = AppState::new(config.poll, run_repo, n8n, scorer);

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .context("FRONTEND_ORIGIN is not a valid header value")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .allow_credentials(true);

    let app = Router::new()
        .route("/", get(root))
        .nest("/api/run-tracking", run_tracking_routes())
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: global_governor_conf.clone(),
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = config.bind_addr;

    worker::resume_active_pollers(&state).await;

    #[cfg(feature = "tls")]
    {
        let tls_config = RustlsConfig::from_pem_file(
            std::env::var("DEV_CERT_LOCATION").context("DEV_CERT_LOCATION must be set")?,
            std::env::var("DEV_KEY_LOCATION").context("DEV_KEY_LOCATION must be set")?,
        )
        .await
        .context("Failed to load TLS certs")?;

        info!("Running with TLS at https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .serve(make_service)
            .await?;

        return Ok(()); // Skip the fallback if TLS was used
    }

    #[allow(unreachable_code)]
    {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("Running without TLS at http://{}", addr);
        axum::serve(listener, make_service).await?;
        Ok(())
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Run tracking is up").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPool::connect(database_url)
        .await
        .context("Failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("Failed to verify database connection")?;

    info!("Successfully connected to the database");
    Ok(pool)
}

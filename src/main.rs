use applicant_portal::{
    AppState,
    auth::{HttpSessionBackend, SessionState},
    centers::{CenterSourceState, CenterStores, EXPIRY_SWEEP_PERIOD, PgCenterSource},
    config::{AppConfig, Env},
    create_router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, installs logging, connects the center source and the session
/// backend, and serves the router.
#[tokio::main]
async fn main() {
    // 1. Configuration
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise sensible development defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "applicant_portal=debug,tower_http=info,axum=trace".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // JSON lines for the log aggregator.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Center source (Postgres with LISTEN/NOTIFY live updates)
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    // LOCAL-ONLY: bring the schema up to date for the development database.
    if config.env == Env::Local {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("FATAL: Failed to apply migrations.");
    }

    // One shared LISTEN connection; subscriptions only borrow pooled connections.
    let source = PgCenterSource::connect(pool)
        .await
        .expect("FATAL: Failed to listen for center changes.");
    let source = Arc::new(source) as CenterSourceState;

    // 4. Session backend (identity service)
    let sessions = Arc::new(HttpSessionBackend::new(&config)) as SessionState;

    // 5. Application state: per-user center stores, disposed once their session lapses.
    let centers = Arc::new(CenterStores::with_superadmin_rule(
        source,
        config.superadmin_rule,
    ));
    centers.spawn_expiry_sweep(EXPIRY_SWEEP_PERIOD);

    let bind_addr = config.bind_addr.clone();
    let app_state = AppState {
        sessions,
        centers,
        config,
    };

    // 6. Router and server
    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("FATAL: HTTP server terminated unexpectedly.");
}

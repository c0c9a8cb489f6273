use houseparty::{
    config::AppConfig,
    router,
    session::{
        models::GameDefinition, InMemoryRewardsService, InMemorySessionBackend,
        PostgresRewardsService, PostgresSessionBackend, RewardsService, SessionBackend,
        TokenConfig,
    },
    AppState,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_HOUSE: &str = "demo-house";
const DEMO_HOST: &str = "demo-host";

/// Seeds the in-memory backend so the dev server is usable right away.
async fn demo_backend() -> Arc<InMemorySessionBackend> {
    let backend = Arc::new(InMemorySessionBackend::new());
    for (id, name, scoring_type) in [
        ("beer-pong", "Beer Pong", "accuracy"),
        ("darts", "Darts", "points"),
        ("mini-golf", "Mini Golf", "rank"),
        ("shot-put", "Shot Put", "distance"),
    ] {
        backend
            .add_game(GameDefinition {
                id: id.to_string(),
                house_id: DEMO_HOUSE.to_string(),
                name: name.to_string(),
                scoring_type: scoring_type.to_string(),
                lower_is_better: None,
                display_unit: None,
            })
            .await;
    }
    backend.add_house_member(DEMO_HOUSE, DEMO_HOST).await;
    backend
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "houseparty=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!(bind_addr = %config.bind_addr, "Starting house party server");

    let tokens = TokenConfig::new(config.jwt_secret.clone(), config.token_expiration_hours);

    let (backend, rewards): (Arc<dyn SessionBackend>, Arc<dyn RewardsService>) =
        match &config.database_url {
            Some(database_url) => {
                let pool = sqlx::PgPool::connect(database_url)
                    .await
                    .expect("Failed to connect to database");
                let backend = PostgresSessionBackend::new(pool.clone());
                backend
                    .spawn_invitation_listener()
                    .await
                    .expect("Failed to listen for invitation changes");
                info!("Using PostgreSQL backend");
                let backend: Arc<dyn SessionBackend> = Arc::new(backend);
                let rewards: Arc<dyn RewardsService> = Arc::new(PostgresRewardsService::new(pool));
                (backend, rewards)
            }
            None => {
                let token = tokens
                    .create_token(DEMO_HOST)
                    .expect("Failed to issue demo token");
                info!(user_id = DEMO_HOST, %token, "Using in-memory backend with demo data");
                let backend: Arc<dyn SessionBackend> = demo_backend().await;
                let rewards: Arc<dyn RewardsService> = Arc::new(InMemoryRewardsService::new(
                    config.kit_unlock_chance,
                    vec!["neon_kit".to_string(), "retro_kit".to_string()],
                ));
                (backend, rewards)
            }
        };

    let app_state = AppState::new(backend, rewards, tokens, config.coordinator_config());

    let app = router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listener");
    info!("Server running on http://{}", config.bind_addr);
    axum::serve(listener, app).await.expect("Server error");
}

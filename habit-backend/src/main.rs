use std::sync::{Arc, LazyLock};

use habit_backend::{AppState, router};

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
});

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    LazyLock::force(&LOGGER);

    let Ok(jwt_secret) = std::env::var("HABIT_JWT_SECRET") else {
        log::error!("HABIT_JWT_SECRET must be set");
        std::process::exit(1);
    };
    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());

    let app = router(Arc::new(AppState::new(&jwt_secret)));

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to bind port {port}: {e}");
            std::process::exit(1);
        }
    };
    log::info!("Listening on port {port}");
    if let Err(e) = axum::serve(listener, app).await {
        log::error!("Server error: {e}");
    }
}

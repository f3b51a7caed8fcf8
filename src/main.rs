use axum::serve;
use clap::Parser;
use color_eyre::Result;
use srs_relay::{
    dispatch::Dispatcher,
    gateway::SupabaseGateway,
    metrics::MetricsAggregator,
    router::{
        create_router,
        AppState,
    },
    sessions::SessionTracker,
    srs::SrsApiClient,
    thumbnails::ThumbnailManager,
};
use srs_relay_config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

fn init_logging() {
    color_eyre::install().expect("color_eyre init");

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(EnvFilter::from_default_env()))
        .with(tracing_error::ErrorLayer::default())
        .init();
}

async fn start_server(config: Config) -> Result<()> {
    let http = reqwest::Client::new();
    let gateway = Arc::new(SupabaseGateway::new(
        http.clone(),
        config.supabase_url.clone(),
        &config.supabase_key,
    )?);
    let control_plane = Arc::new(SrsApiClient::new(http, config.clone()));

    let aggregator = Arc::new(MetricsAggregator::new(
        control_plane.clone(),
        gateway.clone(),
        config.server_id.clone(),
        config.server_ip.clone(),
    ));
    // Best-effort: a data-store outage at boot must not keep the webhook
    // endpoints from coming up.
    if let Err(e) = aggregator.register_server().await {
        tracing::warn!("initial server registration failed: {e}");
    }
    tokio::spawn(aggregator.run());

    let state = AppState {
        config: config.clone(),
        control_plane,
        gateway: gateway.clone(),
        sessions: Arc::new(SessionTracker::new(
            gateway,
            config.server_id.clone(),
            config.server_ip.clone(),
        )),
        thumbnails: Arc::new(ThumbnailManager::new()),
        dispatcher: Dispatcher::default(),
    };
    let app = create_router(state);

    tracing::info!("listening on {}", config.listen_address);
    let listener = TcpListener::bind(config.listen_address).await?;
    serve(listener, app.into_make_service()).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    start_server(Config::parse()).await
}

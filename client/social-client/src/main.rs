use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use query_cache::{CacheMetrics, NotificationQueue, RemoteError};
use social_client::config::LogFormat;
use social_client::domain::{ContentType, UserId};
use social_client::{Config, InMemoryBackend, SocialClient};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "social_client=info,query_cache=info".into());
    let (json, text) = match format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.app.log_format);

    info!(
        env = %config.app.env,
        retries = config.cache.query_retry.retries.count(),
        "Starting social client"
    );

    let registry = Registry::new();
    CacheMetrics::register(&registry).context("Failed to register cache metrics")?;

    let me = UserId::from(
        config
            .app
            .identity
            .clone()
            .unwrap_or_else(|| "demo-user".to_string()),
    );
    let creator = UserId::from("creator");

    // Seed an in-process backend so the session has something to show
    let backend = Arc::new(InMemoryBackend::new(me.clone()));
    backend.register(&me, "demo", "Just looking around");
    backend.register(&creator, "creator", "Skate clips every day");
    let featured = backend.seed_video(&creator, "Kickflip at sunset", 10, ContentType::Video);
    backend.seed_video(&creator, "Tiny ollie", 4, ContentType::Vidle);

    let notifications = NotificationQueue::new();
    let client = SocialClient::new(
        backend.clone(),
        me.clone(),
        config.cache.clone(),
        Arc::new(notifications.clone()),
    );

    let feed = client
        .most_liked_videos()
        .await
        .context("Failed to load feed")?;
    info!(videos = feed.len(), "Feed loaded");

    client.like_video(featured).await.ok();
    // A second like is rejected locally without reaching the backend.
    client.like_video(featured).await.ok();

    backend.fail_next("follow_user", RemoteError::unavailable("connection reset"));
    if let Err(e) = client.follow(&creator).await {
        warn!(error = %e, "Follow rolled back");
    }
    client.follow(&creator).await.ok();
    client.comment(featured, "Clean landing!").await.ok();
    client
        .send_message(&creator, "", Some(&format!("/video/{}", featured)))
        .await
        .ok();

    client.cache().wait_for_fetches().await;

    for notification in notifications.drain() {
        info!(level = ?notification.level, message = %notification.message, "Notification");
    }

    let feed = client.most_liked_videos().await?;
    info!(
        feed = %serde_json::to_string(&feed).context("Failed to encode feed")?,
        "Final feed"
    );
    info!(
        following = ?client.is_following(&creator),
        liked = client.has_liked(featured),
        "Session state"
    );

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    debug!(metrics = %String::from_utf8_lossy(&buffer), "Cache metrics");

    client.shutdown();
    info!("Social client stopped");
    Ok(())
}

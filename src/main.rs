use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use bidwire::auction::{AuctionEventRelay, AuctionEventSchema};
use bidwire::auth::JwtIdentityVerifier;
use bidwire::backbone::{Backbone, RedisBackbone};
use bidwire::broadcast::RoomBroadcaster;
use bidwire::config::Settings;
use bidwire::consumer::EventSubscriber;
use bidwire::logging;
use bidwire::shared::AppState;
use bidwire::websockets::websocket_handler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = Settings::load()?;
    logging::init(settings.logging.backend)?;

    info!("Starting bidwire auction event server");

    // Backbone shared by every room of this process
    let backbone = Arc::new(RedisBackbone::new(&settings.redis.url)?);
    backbone.connect().await.map_err(|e| {
        error!(error = %e, "Failed to connect to the pub/sub backbone");
        e
    })?;

    let broadcaster = Arc::new(RoomBroadcaster::new(backbone));
    let identity = Arc::new(JwtIdentityVerifier::new(settings.auth.jwt_secret.clone()));
    let app_state = AppState::new(Arc::clone(&broadcaster), identity);

    // Broker -> relay -> rooms
    let mut subscriber = EventSubscriber::new(
        settings.amqp.subscriber_config(),
        Arc::new(AuctionEventSchema),
    );
    subscriber.connect().await?;
    subscriber
        .subscribe_events(
            &settings.amqp.queue,
            Arc::new(AuctionEventRelay::new(Arc::clone(&broadcaster))),
        )
        .await?;
    let mut failures = subscriber
        .failures()
        .ok_or("consumer failure channel unavailable")?;

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws/:auction_id", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let address = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "Server running");

    let (stop_sender, stop_receiver) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_receiver.await;
            })
            .await
    });

    let exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
        Some(e) = failures.recv() => {
            error!(error = %e, "Event consumer failed, shutting down");
            Err(e)
        }
    };

    let _ = stop_sender.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server stopped with error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
    }

    broadcaster.shutdown().await;
    subscriber.close().await?;
    info!("Shutdown complete");

    exit.map_err(Into::into)
}

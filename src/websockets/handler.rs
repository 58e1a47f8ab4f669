use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::auth::{bearer_token, AuthError, Identity, IdentityVerifier};
use crate::shared::{AppError, AppState};

use super::socket::{Connection, SocketWrapper};

/// Query string of the upgrade request: `?Authorization=Bearer%20<jwt>`
#[derive(Debug, Default, Deserialize)]
pub struct AuthQuery {
    #[serde(rename = "Authorization")]
    pub authorization: Option<String>,
}

/// Resolve the caller from the `Authorization` query parameter, falling back
/// to the `Authorization` header
pub async fn authenticate(
    identity: &dyn IdentityVerifier,
    query: &AuthQuery,
    headers: &HeaderMap,
) -> Result<Identity, AuthError> {
    let authorization = query
        .authorization
        .as_deref()
        .or_else(|| headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()))
        .ok_or(AuthError::MissingToken)?;

    let token = bearer_token(authorization)?;
    identity.verify(token).await
}

/// WebSocket endpoint for live auction updates
/// GET /ws/{auction_id} with a Bearer JWT in the Authorization query parameter or header
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(auction_id): Path<String>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    State(app_state): State<AppState>,
) -> Result<Response, AppError> {
    info!(auction_id = %auction_id, "WebSocket connection requested");

    let identity = authenticate(app_state.identity.as_ref(), &query, &headers)
        .await
        .map_err(|e| {
            warn!(auction_id = %auction_id, error = %e, "WebSocket authentication failed");
            AppError::from(e)
        })?;

    info!(
        auction_id = %auction_id,
        user_id = %identity.user_id,
        "WebSocket authentication successful"
    );

    Ok(ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, auction_id, identity, app_state)
    }))
}

/// Handle the upgraded WebSocket connection
async fn handle_websocket_connection(
    mut socket: WebSocket,
    auction_id: String,
    identity: Identity,
    app_state: AppState,
) {
    // Outbound channel (broadcaster -> client)
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel::<String>();

    let connection_id = match app_state
        .broadcaster
        .connect(&auction_id, outbound_sender)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!(
                auction_id = %auction_id,
                user_id = %identity.user_id,
                error = %e,
                "Failed to join auction room"
            );
            let _ = SocketWrapper::close(&mut socket).await;
            return;
        }
    };

    info!(
        auction_id = %auction_id,
        user_id = %identity.user_id,
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    let connection = Connection::new(
        connection_id,
        auction_id.clone(),
        identity.user_id.clone(),
        Box::new(socket),
        outbound_receiver,
    );

    match connection.run().await {
        Ok(()) => {
            info!(
                auction_id = %auction_id,
                connection_id = %connection_id,
                "WebSocket connection closed cleanly"
            );
        }
        Err(e) => {
            warn!(
                auction_id = %auction_id,
                connection_id = %connection_id,
                error = ?e,
                "WebSocket connection error"
            );
        }
    }

    if let Err(e) = app_state
        .broadcaster
        .disconnect(&auction_id, connection_id)
        .await
    {
        warn!(
            auction_id = %auction_id,
            connection_id = %connection_id,
            error = %e,
            "Failed to leave auction room"
        );
    }
}

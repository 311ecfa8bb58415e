// =============================================================================
// WebSocket Handler (push-based report updates)
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive:
//   1. An immediate update on connect: status plus the latest report.
//   2. A fresh update, checked every 500 ms, whenever the state_version has
//      changed since the last push (new report, cache invalidation, errors).
//
// Ping frames are answered with Pong; any text frame is treated as a
// heartbeat and ignored.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app_state::{AppState, StatusSnapshot};
use crate::screener::ScanReport;

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// One outbound frame.
#[derive(Serialize)]
struct WsUpdate<'a> {
    seq: u64,
    status: StatusSnapshot,
    report: Option<&'a ScanReport>,
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Validates the `?token=` query parameter before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !state.admin_token.verify(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("WebSocket connection accepted, upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

// =============================================================================
// Connection handler
// =============================================================================

/// Push loop and receive loop multiplexed with `tokio::select!`.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut sequence: u64 = 0;

    let mut last_sent_version = state.current_state_version();
    if let Err(e) = send_update(&mut sender, &state, &mut sequence).await {
        warn!(error = %e, "Failed to send initial WebSocket update");
        return;
    }

    let mut push_interval = interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = push_interval.tick() => {
                let current_version = state.current_state_version();
                if current_version != last_sent_version {
                    if let Err(e) = send_update(&mut sender, &state, &mut sequence).await {
                        debug!(error = %e, "WebSocket send failed, disconnecting");
                        break;
                    }
                    last_sent_version = current_version;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket heartbeat");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong, disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error, disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!(sent = sequence, "WebSocket connection closed");
}

// =============================================================================
// Helpers
// =============================================================================

async fn send_update<S>(
    sender: &mut S,
    state: &Arc<AppState>,
    sequence: &mut u64,
) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    *sequence += 1;
    let latest = state.latest_report();
    let update = WsUpdate {
        seq: *sequence,
        status: state.build_status(),
        report: latest.as_deref(),
    };

    match serde_json::to_string(&update) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            debug!(
                version = update.status.state_version,
                seq = *sequence,
                "WebSocket update sent"
            );
            Ok(())
        }
        Err(e) => {
            // Serialisation errors are not network errors; keep the socket.
            warn!(error = %e, "Failed to serialize WebSocket update");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::Stream;
    use serde_json::Value;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::{Error as ClientError, Message as ClientMessage};

    use crate::api::auth::AdminToken;
    use crate::delta::DeltaClient;
    use crate::market_data::CandleCache;
    use crate::runtime_config::ScreenerConfig;
    use crate::screener::Screener;
    use crate::test_support::{spawn_fake_exchange, FakeExchange};

    const TOKEN: &str = "ws-test-token";

    /// Serve the full router on an ephemeral port; returns the feed URL.
    async fn serve() -> (String, Arc<AppState>) {
        let base = spawn_fake_exchange(FakeExchange::default()).await;
        let client = Arc::new(DeltaClient::new(base, Duration::from_secs(5)).unwrap());
        let cache = Arc::new(CandleCache::new(16, Duration::from_secs(300)));
        let state = Arc::new(AppState::new(
            ScreenerConfig::default(),
            Arc::new(Screener::new(client, cache)),
            AdminToken::new(TOKEN),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::api::rest::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{addr}/api/v1/ws"), state)
    }

    fn rejection_status(err: ClientError) -> u16 {
        match err {
            ClientError::Http(resp) => resp.status().as_u16(),
            other => panic!("expected an HTTP rejection, got {other}"),
        }
    }

    async fn next_update<S>(socket: &mut S) -> Value
    where
        S: Stream<Item = Result<ClientMessage, ClientError>> + Unpin,
    {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("update within 5s")
            .expect("socket open")
            .expect("valid frame");
        serde_json::from_str(frame.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn upgrade_requires_the_admin_token() {
        let (url, _) = serve().await;

        let err = connect_async(url.clone()).await.unwrap_err();
        assert_eq!(rejection_status(err), 403);

        let err = connect_async(format!("{url}?token=wrong")).await.unwrap_err();
        assert_eq!(rejection_status(err), 403);
    }

    #[tokio::test]
    async fn sends_initial_update_then_pushes_changes() {
        let (url, state) = serve().await;
        let (mut socket, _) = connect_async(format!("{url}?token={TOKEN}")).await.unwrap();

        let first = next_update(&mut socket).await;
        assert_eq!(first["seq"], 1);
        assert!(first["report"].is_null());
        assert_eq!(first["status"]["scans_completed"], 0);

        state.push_error("exchange unreachable".into());
        let second = next_update(&mut socket).await;
        assert_eq!(second["seq"], 2);
        assert_eq!(
            second["status"]["recent_errors"][0]["message"],
            "exchange unreachable"
        );
    }
}

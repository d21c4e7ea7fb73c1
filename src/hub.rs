//! Broadcast hub
//!
//! Manages live subscriber connections and multicasts derived trades and
//! events to all of them. Admission requires a valid single-use ticket;
//! rejected connections are closed with a distinct reason code before any
//! message is sent. The channel is output-only: incoming client frames
//! are drained and ignored.
//!
//! Fan-out uses one `tokio::sync::broadcast` channel with a forwarding
//! task per connection, so a stalled subscriber lags (and eventually
//! drops messages) without delaying delivery to anyone else.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::TicketError;
use crate::models::{EventRecord, HubMessage, Trade};
use crate::ticket::TicketVerifier;

/// Shared hub state: the fan-out channel plus admission checking.
pub struct BroadcastHub {
    tx: broadcast::Sender<HubMessage>,
    verifier: TicketVerifier,
    program_id: String,
}

/// Query parameters for the WebSocket route.
#[derive(Deserialize)]
pub struct WsQuery {
    pub ticket: Option<String>,
}

impl BroadcastHub {
    pub fn new(verifier: TicketVerifier, program_id: String, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            verifier,
            program_id,
        }
    }

    /// Publish a derived trade to all connected subscribers.
    pub fn publish_trade(&self, trade: Trade) {
        let pool = trade.pool.clone();
        // Send errors only mean there are currently no subscribers.
        let _ = self.tx.send(HubMessage::Trade { pool, data: trade });
    }

    /// Publish a formatted event to all connected subscribers.
    pub fn publish_event(&self, pool: Option<String>, record: EventRecord) {
        let _ = self.tx.send(HubMessage::Event { pool, data: record });
    }

    /// Subscribe to the raw message stream (used by connection tasks and
    /// tests).
    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Router exposing the `/ws` endpoint.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/ws", get(websocket_handler))
            .with_state(self)
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(hub): State<Arc<BroadcastHub>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub, params.ticket))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<BroadcastHub>, ticket: Option<String>) {
    let verdict = match ticket.as_deref() {
        Some(ticket) => hub.verifier.verify(ticket),
        None => Err(TicketError::Malformed),
    };

    if let Err(reason) = verdict {
        warn!("rejecting subscriber: {}", reason.reason_code());
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: Cow::Borrowed(reason.reason_code()),
            })))
            .await;
        return;
    }

    let greeting = HubMessage::Hello {
        server: "dlmm-indexer".to_string(),
        program: hub.program_id.clone(),
    };
    if send_json(&mut socket, &greeting).await.is_err() {
        return;
    }

    info!("subscriber connected ({} total)", hub.subscriber_count() + 1);

    let (mut sender, mut receiver) = socket.split();
    let mut rx = hub.subscribe();

    // Forward broadcast messages; a receiver that lags past the channel
    // capacity drops the missed messages and keeps going.
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode hub message: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!("slow subscriber dropped {} messages", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Drain (and ignore) whatever the client sends; this only exists to
    // notice the socket closing.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!("subscriber disconnected");
}

async fn send_json(socket: &mut WebSocket, message: &HubMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}

/// Serve the hub on `bind_address` until the process exits.
pub async fn serve(hub: Arc<BroadcastHub>, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("broadcast hub listening on {}", bind_address);
    axum::serve(listener, hub.router()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventBody;
    use std::time::Duration;

    fn test_hub() -> Arc<BroadcastHub> {
        let verifier = TicketVerifier::new(
            b"secret",
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        Arc::new(BroadcastHub::new(verifier, "Prog111".to_string(), 64))
    }

    fn sample_trade() -> Trade {
        Trade {
            signature: "sig".to_string(),
            slot: 5,
            block_time: Some(1_700_000_000),
            pool: "pool111".to_string(),
            user: Some("user111".to_string()),
            input_mint: "mintQ".to_string(),
            output_mint: "mintB".to_string(),
            amount_in: "500000".to_string(),
            amount_out: "1000000".to_string(),
            txn_order: 3,
        }
    }

    #[tokio::test]
    async fn trade_messages_reach_all_subscribers() {
        let hub = test_hub();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        hub.publish_trade(sample_trade());

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                HubMessage::Trade { pool, data } => {
                    assert_eq!(pool, "pool111");
                    assert_eq!(data.amount_in, "500000");
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn wire_shapes_match_the_protocol() {
        let hub = test_hub();
        let mut rx = hub.subscribe();

        hub.publish_event(
            Some("pool111".to_string()),
            EventRecord {
                signature: "sig".to_string(),
                slot: 9,
                block_time: None,
                event: EventBody {
                    name: "LiquidityChanged".to_string(),
                    data: None,
                },
            },
        );

        let message = rx.recv().await.unwrap();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["pool"], "pool111");
        assert_eq!(json["data"]["event"]["name"], "LiquidityChanged");

        let trade_json = serde_json::to_value(HubMessage::Trade {
            pool: "p".to_string(),
            data: sample_trade(),
        })
        .unwrap();
        assert_eq!(trade_json["type"], "trade");
        assert_eq!(trade_json["data"]["amountIn"], "500000");
        assert_eq!(trade_json["data"]["txnOrder"], 3);
    }
}

//! RPC pubsub client
//!
//! Owns the `logsSubscribe` WebSocket session against the upstream node:
//! one subscription per connection, filtered to transactions mentioning
//! the indexed program.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::error::RpcError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One log notification from the node.
#[derive(Debug, Clone)]
pub struct LogNotification {
    pub signature: String,
    pub slot: u64,
    /// Execution error reported with the notification, if any.
    pub err: Option<Value>,
    pub logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationFrame {
    method: Option<String>,
    params: Option<NotificationParams>,
    result: Option<Value>,
    id: Option<u64>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: NotificationResult,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    context: NotificationContext,
    value: LogValue,
}

#[derive(Debug, Deserialize)]
struct NotificationContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct LogValue {
    signature: String,
    err: Option<Value>,
    #[serde(default)]
    logs: Vec<String>,
}

/// An active log subscription.
pub struct LogSubscription {
    ws: WsStream,
    subscription_id: Option<u64>,
}

impl LogSubscription {
    /// Connect and subscribe to logs mentioning `program_id`.
    pub async fn connect(
        ws_url: &str,
        program_id: &Pubkey,
        commitment: &str,
    ) -> Result<Self, RpcError> {
        let (mut ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [program_id.to_string()] },
                { "commitment": commitment }
            ]
        });

        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| RpcError::ConnectionFailed(e.to_string()))?;

        let mut subscription = Self {
            ws,
            subscription_id: None,
        };

        // The node confirms the subscription with a numeric result before
        // any notification arrives.
        while subscription.subscription_id.is_none() {
            match subscription.next_frame().await? {
                Frame::Confirmed(id) => subscription.subscription_id = Some(id),
                Frame::Notification(_) => {
                    return Err(RpcError::MalformedResponse(
                        "notification before subscription confirmation".to_string(),
                    ))
                }
                Frame::Ignored => {}
            }
        }

        debug!(
            "log subscription established (id {})",
            subscription.subscription_id.unwrap_or_default()
        );
        Ok(subscription)
    }

    /// Next log notification, or `None` when the stream has ended.
    pub async fn next(&mut self) -> Option<Result<LogNotification, RpcError>> {
        loop {
            match self.next_frame().await {
                Ok(Frame::Notification(notification)) => return Some(Ok(notification)),
                Ok(Frame::Confirmed(_)) | Ok(Frame::Ignored) => continue,
                Err(RpcError::SubscriptionClosed(_)) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Unsubscribe and close the session.
    pub async fn unsubscribe(mut self) {
        if let Some(id) = self.subscription_id {
            let request = json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "logsUnsubscribe",
                "params": [id]
            });
            if let Err(e) = self.ws.send(Message::Text(request.to_string())).await {
                warn!("logsUnsubscribe failed: {}", e);
            }
        }
        let _ = self.ws.close(None).await;
    }

    async fn next_frame(&mut self) -> Result<Frame, RpcError> {
        loop {
            let message = match self.ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(RpcError::ConnectionFailed(e.to_string())),
                None => return Err(RpcError::SubscriptionClosed("stream ended".to_string())),
            };

            match message {
                Message::Text(text) => return parse_frame(&text),
                Message::Ping(payload) => {
                    let _ = self.ws.send(Message::Pong(payload)).await;
                }
                Message::Close(frame) => {
                    return Err(RpcError::SubscriptionClosed(format!("{:?}", frame)))
                }
                _ => {}
            }
        }
    }
}

enum Frame {
    Confirmed(u64),
    Notification(LogNotification),
    Ignored,
}

fn parse_frame(text: &str) -> Result<Frame, RpcError> {
    let frame: NotificationFrame = serde_json::from_str(text)?;

    if let Some(error) = frame.error {
        return Err(RpcError::Node {
            code: error["code"].as_i64().unwrap_or(0),
            message: error["message"].as_str().unwrap_or("unknown").to_string(),
        });
    }

    if frame.method.as_deref() == Some("logsNotification") {
        let params = frame.params.ok_or_else(|| {
            RpcError::MalformedResponse("logsNotification without params".to_string())
        })?;
        return Ok(Frame::Notification(LogNotification {
            signature: params.result.value.signature,
            slot: params.result.context.slot,
            err: params.result.value.err,
            logs: params.result.value.logs,
        }));
    }

    if frame.id == Some(1) {
        if let Some(id) = frame.result.as_ref().and_then(Value::as_u64) {
            return Ok(Frame::Confirmed(id));
        }
    }

    Ok(Frame::Ignored)
}

use crate::sync::Backoff;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tally_common::api::StreamMessage;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};

/// What the consumer reports back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The server announced changed data; schedule a partial pull.
    UpdateNotice,
    /// The server refused our token; the session must re-authenticate.
    AuthRejected,
}

/// Server drops us if a ping goes unanswered; anything quieter than
/// this is treated as a dead connection.
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const PING_INTERVAL: Duration = Duration::from_secs(25);

enum ConnectionEnd {
    Cancelled,
    AuthRejected,
    Lost,
}

/// Run the live-update consumer until cancelled. Reconnects with the
/// shared backoff schedule; the backoff resets on any received frame.
pub async fn run(
    websocket_url: String,
    api_token: String,
    events: mpsc::Sender<StreamEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    let url = ws_url(&websocket_url);
    let mut backoff = Backoff::new();

    loop {
        if *cancel.borrow() {
            return;
        }
        match connection(&url, &api_token, &events, &mut cancel, &mut backoff).await {
            ConnectionEnd::Cancelled => return,
            ConnectionEnd::AuthRejected => {
                let _ = events.send(StreamEvent::AuthRejected).await;
                return;
            }
            ConnectionEnd::Lost => {
                let delay = backoff.delay();
                backoff.bump();
                debug!(?delay, "websocket lost, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn connection(
    url: &str,
    api_token: &str,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> ConnectionEnd {
    let mut ws = match connect_async(url).await {
        Ok((ws, _)) => ws,
        Err(WsError::Http(response)) if response.status().as_u16() == 401 => {
            warn!("websocket authentication rejected");
            return ConnectionEnd::AuthRejected;
        }
        Err(err) => {
            debug!(%err, "websocket connect failed");
            return ConnectionEnd::Lost;
        }
    };

    // The first frame authenticates the session.
    let auth = StreamMessage::Authenticate {
        api_token: api_token.to_owned(),
    };
    let Ok(body) = serde_json::to_string(&auth) else {
        return ConnectionEnd::Lost;
    };
    if ws.send(Message::Text(body.into())).await.is_err() {
        return ConnectionEnd::Lost;
    }
    debug!("websocket connected");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    let _ = ws.close(None).await;
                    return ConnectionEnd::Cancelled;
                }
            }
            _ = ping.tick() => {
                if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return ConnectionEnd::Lost;
                }
            }
            frame = tokio::time::timeout(IDLE_TIMEOUT, ws.next()) => {
                let frame = match frame {
                    Ok(Some(Ok(frame))) => frame,
                    Ok(Some(Err(err))) => {
                        debug!(%err, "websocket read failed");
                        return ConnectionEnd::Lost;
                    }
                    Ok(None) => return ConnectionEnd::Lost,
                    Err(_) => {
                        debug!("websocket idle timeout");
                        return ConnectionEnd::Lost;
                    }
                };
                backoff.reset();
                match frame {
                    Message::Text(text) => {
                        match serde_json::from_str::<StreamMessage>(text.as_ref()) {
                            Ok(StreamMessage::Ping) => {
                                let Ok(pong) = serde_json::to_string(&StreamMessage::Pong) else {
                                    continue;
                                };
                                if ws.send(Message::Text(pong.into())).await.is_err() {
                                    return ConnectionEnd::Lost;
                                }
                            }
                            Ok(StreamMessage::Update) => {
                                if events.send(StreamEvent::UpdateNotice).await.is_err() {
                                    return ConnectionEnd::Cancelled;
                                }
                            }
                            Ok(_) => {}
                            Err(err) => debug!(%err, "unrecognized stream frame"),
                        }
                    }
                    Message::Close(_) => return ConnectionEnd::Lost,
                    // Protocol pings are answered by the library.
                    _ => {}
                }
            }
        }
    }
}

/// The configured endpoint uses an http(s) scheme; the websocket stack
/// wants ws(s).
fn ws_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    format!("{swapped}/ws")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_schemes() {
        assert_eq!(ws_url("https://stream.toggl.com"), "wss://stream.toggl.com/ws");
        assert_eq!(ws_url("http://127.0.0.1:9000/"), "ws://127.0.0.1:9000/ws");
        assert_eq!(ws_url("wss://already"), "wss://already/ws");
    }

    #[test]
    fn stream_frames_round_trip() {
        let ping: StreamMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, StreamMessage::Ping));

        let update: StreamMessage = serde_json::from_str(r#"{"type":"update"}"#).unwrap();
        assert!(matches!(update, StreamMessage::Update));

        let pong = serde_json::to_string(&StreamMessage::Pong).unwrap();
        assert_eq!(pong, r#"{"type":"pong"}"#);

        let auth = serde_json::to_string(&StreamMessage::Authenticate {
            api_token: "secret".into(),
        })
        .unwrap();
        assert!(auth.contains(r#""type":"authenticate""#));
        assert!(auth.contains("secret"));
    }
}

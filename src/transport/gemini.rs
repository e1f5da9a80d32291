//! Gemini Live websocket transport.
//!
//! `GeminiConnector::open` spawns one task per session that connects, sends
//! the setup frame, waits for `setupComplete`, and then pumps frames in both
//! directions. Everything the task observes is posted to the session's
//! event queue; the returned `GeminiLink` is the controller's handle for
//! sending and closing.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{ClientFrame, ServerFrame};
use super::{ClientMessage, ServerContent, SessionSetup, TransportLink};
use crate::error::SessionError;
use crate::session::{EventSender, SessionEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Public Gemini Live endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Opens websocket sessions against one endpoint.
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    endpoint: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl GeminiConnector {
    pub fn new(endpoint: &str, api_key: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key,
            connect_timeout,
        }
    }

    fn session_url(&self) -> Result<String, SessionError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SessionError::TransportOpen("no API key configured".into()))?;
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}key={}", self.endpoint, sep, key))
    }

    /// Start opening a session. Returns immediately; the outcome arrives as
    /// `TransportOpened`, `TransportError`, or `TransportClosed`.
    pub fn open(&self, setup: &SessionSetup, events: EventSender) -> Result<GeminiLink, SessionError> {
        let url = self.session_url()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::TransportOpen(format!("no async runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let setup_frame = ClientFrame::setup(setup);

        info!(session = events.session(), model = %setup.model, "Opening remote session");
        runtime.spawn(run_link(
            url,
            setup_frame,
            self.connect_timeout,
            outbound_rx,
            shutdown_rx,
            events,
        ));

        Ok(GeminiLink {
            outbound: Some(outbound_tx),
            shutdown: Some(shutdown_tx),
        })
    }
}

/// Controller-side handle for one websocket session.
pub struct GeminiLink {
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TransportLink for GeminiLink {
    fn send(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| SessionError::Transport("link already closed".into()))?;
        tx.send(message)
            .map_err(|_| SessionError::Transport("link task has exited".into()))
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.outbound = None;
    }
}

impl Drop for GeminiLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn encode(frame: &ClientFrame) -> Result<Message, SessionError> {
    serde_json::to_string(frame)
        .map(Message::Text)
        .map_err(|e| SessionError::Transport(format!("failed to serialize frame: {e}")))
}

/// Parse a text or binary payload into a server frame.
fn parse_frame(message: &Message) -> Option<ServerFrame> {
    let text = match message {
        Message::Text(text) => text.as_str(),
        Message::Binary(bytes) => std::str::from_utf8(bytes).ok()?,
        _ => return None,
    };
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("Unparseable server frame: {}", e);
            None
        }
    }
}

/// Connect, send setup, and wait for the server to acknowledge it.
async fn establish(url: &str, setup: &ClientFrame) -> Result<WsStream, String> {
    let (mut ws, _response) = connect_async(url)
        .await
        .map_err(|e| format!("websocket connect failed: {e}"))?;

    let frame = encode(setup).map_err(|e| e.to_string())?;
    ws.send(frame)
        .await
        .map_err(|e| format!("failed to send setup: {e}"))?;

    while let Some(incoming) = ws.next().await {
        let message = incoming.map_err(|e| format!("websocket error during setup: {e}"))?;
        if let Message::Close(close) = &message {
            let reason = close
                .as_ref()
                .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                .unwrap_or_else(|| "no reason".into());
            return Err(format!("closed during setup: {reason}"));
        }
        if let Some(frame) = parse_frame(&message) {
            if frame.setup_complete.is_some() {
                return Ok(ws);
            }
            debug!("Ignoring frame received before setupComplete");
        }
    }
    Err("connection ended during setup".into())
}

async fn run_link(
    url: String,
    setup: ClientFrame,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    mut shutdown: oneshot::Receiver<()>,
    events: EventSender,
) {
    let session = events.session();

    let ws = tokio::select! {
        result = tokio::time::timeout(connect_timeout, establish(&url, &setup)) => match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(reason)) => {
                warn!(session, "Remote session failed to open: {}", reason);
                events.send(SessionEvent::TransportError(reason));
                return;
            }
            Err(_) => {
                warn!(session, timeout_secs = connect_timeout.as_secs(), "Remote session open timed out");
                events.send(SessionEvent::TransportError(format!(
                    "timed out after {}s",
                    connect_timeout.as_secs()
                )));
                return;
            }
        },
        _ = &mut shutdown => {
            debug!(session, "Link closed before it opened");
            return;
        }
    };

    info!(session, "Remote session open");
    events.send(SessionEvent::TransportOpened);

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                debug!(session, "Link closed locally");
                break;
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = sink.close().await;
                    break;
                };
                let frame = match encode(&ClientFrame::from(message)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session, "{}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(frame).await {
                    events.send(SessionEvent::TransportError(format!("send failed: {e}")));
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(close))) => {
                    let reason = close.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                    info!(session, reason = ?reason, "Remote closed the session");
                    events.send(SessionEvent::TransportClosed(reason));
                    break;
                }
                Some(Ok(message)) => {
                    let Some(frame) = parse_frame(&message) else { continue };
                    if let Some(go_away) = frame.go_away {
                        warn!(session, time_left = ?go_away.time_left, "Server announced disconnect");
                    }
                    if let Some(content) = frame.server_content {
                        events.send(SessionEvent::ServerMessage(ServerContent::from(content)));
                    }
                }
                Some(Err(e)) => {
                    events.send(SessionEvent::TransportError(e.to_string()));
                    break;
                }
                None => {
                    events.send(SessionEvent::TransportClosed(None));
                    break;
                }
            }
        }
    }
}

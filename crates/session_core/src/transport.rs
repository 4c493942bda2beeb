use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::domain::SessionId;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
};
use tracing::debug;
use url::Url;

use crate::{error::TransportError, SessionEvent};

const CLIENT_CLOSE_REASON: &str = "Client closing connection normally.";

/// How one stream ended. `was_clean` means either side performed a normal
/// closure; everything else is grounds for the reconnect supervisor.
#[derive(Debug, Clone)]
pub struct StreamClose {
    pub code: Option<u16>,
    pub reason: Option<String>,
    pub was_clean: bool,
}

/// Control handle for one open stream. `shutdown` asks the reader task to
/// send a normal close frame before winding down; dropping the handle has
/// the same effect.
#[derive(Debug)]
pub struct StreamHandle {
    shutdown: watch::Sender<bool>,
}

impl StreamHandle {
    pub(crate) fn new(shutdown: watch::Sender<bool>) -> Self {
        Self { shutdown }
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Queue endpoint a connector delivers stream activity into. Every event
/// carries the stream sequence number it belongs to, so the driver can
/// discard leftovers from a superseded connection attempt.
#[derive(Clone)]
pub struct FrameSink {
    queue: mpsc::UnboundedSender<SessionEvent>,
    stream_seq: u64,
}

impl FrameSink {
    pub(crate) fn new(queue: mpsc::UnboundedSender<SessionEvent>, stream_seq: u64) -> Self {
        Self { queue, stream_seq }
    }

    pub fn opened(&self, handle: StreamHandle) -> bool {
        self.queue
            .send(SessionEvent::StreamOpened {
                seq: self.stream_seq,
                handle,
            })
            .is_ok()
    }

    pub fn frame(&self, text: String) -> bool {
        self.queue
            .send(SessionEvent::Frame {
                seq: self.stream_seq,
                text,
            })
            .is_ok()
    }

    pub fn closed(&self, close: StreamClose) -> bool {
        self.queue
            .send(SessionEvent::StreamClosed {
                seq: self.stream_seq,
                close,
            })
            .is_ok()
    }
}

/// Opens the server-push event stream. A successful open hands a
/// [`StreamHandle`] to the sink before any frame is delivered; connect
/// failures surface through the returned error instead.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(
        &self,
        base_url: &str,
        session: &SessionId,
        auth_token: Option<&str>,
        sink: FrameSink,
    ) -> Result<(), TransportError>;
}

/// Derives the websocket endpoint from the HTTP base url, appending the
/// auth token as a query pair when present.
pub fn stream_url(
    base_url: &str,
    session: &SessionId,
    auth_token: Option<&str>,
) -> Result<Url, TransportError> {
    let ws_base = if base_url.starts_with("https://") {
        base_url.replacen("https://", "wss://", 1)
    } else if base_url.starts_with("http://") {
        base_url.replacen("http://", "ws://", 1)
    } else {
        return Err(TransportError::UnsupportedScheme);
    };
    let mut url = Url::parse(&format!(
        "{}/api/sim/ws/{session}",
        ws_base.trim_end_matches('/')
    ))?;
    if let Some(token) = auth_token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

pub struct WsConnector;

#[async_trait]
impl StreamConnector for WsConnector {
    async fn open(
        &self,
        base_url: &str,
        session: &SessionId,
        auth_token: Option<&str>,
        sink: FrameSink,
    ) -> Result<(), TransportError> {
        let url = stream_url(base_url, session, auth_token)?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut writer, mut reader) = ws_stream.split();

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        sink.opened(StreamHandle::new(shutdown_tx));

        tokio::spawn(async move {
            let close = loop {
                tokio::select! {
                    // Either an explicit shutdown or the handle being
                    // dropped ends the stream with a normal close.
                    _ = shutdown_rx.changed() => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: CLIENT_CLOSE_REASON.into(),
                        };
                        if let Err(err) = writer.send(Message::Close(Some(frame))).await {
                            debug!(error = %err, "close frame send failed");
                        }
                        break StreamClose {
                            code: Some(u16::from(CloseCode::Normal)),
                            reason: Some(CLIENT_CLOSE_REASON.to_string()),
                            was_clean: true,
                        };
                    }
                    message = reader.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if !sink.frame(text) {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => break close_from_frame(frame),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            break StreamClose {
                                code: None,
                                reason: Some(err.to_string()),
                                was_clean: false,
                            }
                        }
                        None => {
                            break StreamClose {
                                code: None,
                                reason: None,
                                was_clean: false,
                            }
                        }
                    }
                }
            };
            let _ = writer.close().await;
            sink.closed(close);
        });

        Ok(())
    }
}

fn close_from_frame(frame: Option<CloseFrame<'_>>) -> StreamClose {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            StreamClose {
                code: Some(code),
                reason: if frame.reason.is_empty() {
                    None
                } else {
                    Some(frame.reason.into_owned())
                },
                was_clean: code == u16::from(CloseCode::Normal),
            }
        }
        None => StreamClose {
            code: None,
            reason: None,
            was_clean: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_url_swaps_schemes_and_appends_token() {
        let session = SessionId::from("sim-42");
        let url = stream_url("http://localhost:8000", &session, None).expect("http base");
        assert_eq!(url.as_str(), "ws://localhost:8000/api/sim/ws/sim-42");

        let url = stream_url("https://example.com/", &session, Some("tok en"))
            .expect("https base");
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/api/sim/ws/sim-42");
        assert_eq!(url.query(), Some("token=tok+en"));

        assert!(matches!(
            stream_url("ftp://example.com", &session, None),
            Err(TransportError::UnsupportedScheme)
        ));
    }

    #[test]
    fn peer_close_frames_map_to_clean_and_unclean() {
        let clean = close_from_frame(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }));
        assert!(clean.was_clean);
        assert_eq!(clean.code, Some(1000));
        assert_eq!(clean.reason.as_deref(), Some("done"));

        let abnormal = close_from_frame(Some(CloseFrame {
            code: CloseCode::Abnormal,
            reason: "".into(),
        }));
        assert!(!abnormal.was_clean);
        assert_eq!(abnormal.code, Some(1006));
        assert!(abnormal.reason.is_none());

        let missing = close_from_frame(None);
        assert!(!missing.was_clean);
        assert!(missing.code.is_none());
    }
}

use anyhow::{Context, Result};
use futures::{future::BoxFuture, FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub const NORMAL_CLOSURE: u16 = 1000;
pub const NO_STATUS_RECEIVED: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

impl Frame {
    pub fn normal_close(reason: impl Into<String>) -> Self {
        Frame::Close {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
        }
    }
}

/// An open bidirectional link. Dropping `outgoing` closes the write half;
/// `incoming` ends after a `Frame::Close` or when the peer vanishes.
#[derive(Debug)]
pub struct TransportLink {
    pub outgoing: mpsc::UnboundedSender<Frame>,
    pub incoming: mpsc::UnboundedReceiver<Frame>,
}

/// Opens links to the sync endpoint. Swappable so tests can run the
/// channel against an in-memory peer.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: String) -> BoxFuture<'static, Result<TransportLink>>;
}

/// WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&self, url: String) -> BoxFuture<'static, Result<TransportLink>> {
        async move {
            let (stream, _response) = connect_async(url.as_str())
                .await
                .with_context(|| format!("websocket handshake with {url} failed"))?;
            let (mut write, mut read) = stream.split();

            let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();
            let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Frame>();

            tokio::spawn(async move {
                while let Some(frame) = outgoing_rx.recv().await {
                    let (message, closing) = match frame {
                        Frame::Text(text) => (Message::Text(text), false),
                        Frame::Close { code, reason } => (
                            Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            })),
                            true,
                        ),
                    };
                    if let Err(err) = write.send(message).await {
                        log_warn!("websocket write failed: {err}");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                let _ = write.close().await;
            });

            tokio::spawn(async move {
                let mut close = Frame::Close {
                    code: ABNORMAL_CLOSURE,
                    reason: "connection lost".to_string(),
                };
                while let Some(next) = read.next().await {
                    let frame = match next {
                        Ok(Message::Text(text)) => Frame::Text(text),
                        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                            Ok(text) => Frame::Text(text),
                            Err(_) => {
                                log_debug!("dropping non-utf8 binary frame");
                                continue;
                            }
                        },
                        Ok(Message::Close(frame)) => {
                            close = match frame {
                                Some(frame) => Frame::Close {
                                    code: u16::from(frame.code),
                                    reason: frame.reason.into_owned(),
                                },
                                None => Frame::Close {
                                    code: NO_STATUS_RECEIVED,
                                    reason: String::new(),
                                },
                            };
                            break;
                        }
                        Ok(_) => continue,
                        Err(err) => {
                            log_warn!("websocket read failed: {err}");
                            break;
                        }
                    };
                    if incoming_tx.send(frame).is_err() {
                        return;
                    }
                }
                let _ = incoming_tx.send(close);
            });

            Ok(TransportLink {
                outgoing: outgoing_tx,
                incoming: incoming_rx,
            })
        }
        .boxed()
    }
}

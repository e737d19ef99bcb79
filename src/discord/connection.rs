use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::spawn;
use tokio::sync::mpsc::{self, channel};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::dispatch::DispatchRouter;
use super::error::GatewayError;
use super::listener::{self, Inbound};
use super::session::Sequence;

pub(crate) type Frames = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const OUTBOUND_CAPACITY: usize = 16;
const INBOUND_CAPACITY: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Cloneable handle for writing frames to the current connection.
#[derive(Debug, Clone)]
pub(crate) struct FrameSender(mpsc::Sender<Message>);

impl FrameSender {
    pub(crate) fn new(output: mpsc::Sender<Message>) -> Self {
        FrameSender(output)
    }

    pub(crate) async fn send(&self, frame: String) -> Result<(), GatewayError> {
        self.0
            .send(Message::Text(frame))
            .await
            .map_err(|_| GatewayError::SendClosed)
    }
}

/// One live websocket connection: a writer task and, once started, its listener.
pub(crate) struct Connection {
    output: FrameSender,
    writer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl Connection {
    pub(crate) async fn open(url: &Url) -> Result<(Self, Frames), GatewayError> {
        let (socket, response) = match connect_async(url.as_str()).await {
            Ok(connected) => connected,
            Err(tungstenite::Error::Http(response)) => {
                return Err(GatewayError::UpgradeRejected(response.status()))
            }
            Err(e) => return Err(GatewayError::Connect(e)),
        };
        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(GatewayError::UpgradeRejected(response.status()));
        }
        debug!(host = ?url.host_str(), "gateway connection opened");

        let (mut output_stream, input) = socket.split();
        let (output, mut receiver) = channel::<Message>(OUTBOUND_CAPACITY);
        let writer = spawn(async move {
            while let Some(message) = receiver.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = output_stream.send(message).await {
                    debug!(error = %e, "gateway writer stopped");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        Ok((
            Connection {
                output: FrameSender::new(output),
                writer: Some(writer),
                listener: None,
            },
            input,
        ))
    }

    pub(crate) fn sender(&self) -> &FrameSender {
        &self.output
    }

    pub(crate) async fn send(&self, frame: String) -> Result<(), GatewayError> {
        self.output.send(frame).await
    }

    /// Starts the listener for this connection and returns the channel it feeds.
    pub(crate) fn listen(
        &mut self,
        frames: Frames,
        sequence: Sequence,
        router: DispatchRouter,
    ) -> mpsc::Receiver<Inbound> {
        let (inbound, receiver) = channel(INBOUND_CAPACITY);
        if let Some(previous) = self.listener.replace(spawn(listener::listen(
            frames, inbound, sequence, router,
        ))) {
            previous.abort();
        }
        receiver
    }

    /// Sends a close frame, then stops the writer and listener. Both tasks are
    /// finished when this returns.
    pub(crate) async fn close(&mut self, code: CloseCode, reason: &'static str) {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        if self.output.0.send(Message::Close(Some(frame))).await.is_err() {
            debug!("gateway writer already stopped before close");
        }
        if let Some(mut writer) = self.writer.take() {
            if timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                warn!("gateway writer did not finish closing in time");
                writer.abort();
                let _ = writer.await;
            }
        }
        if let Some(listener) = self.listener.take() {
            listener.abort();
            let _ = listener.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer {
            writer.abort();
        }
        if let Some(listener) = &self.listener {
            listener.abort();
        }
    }
}

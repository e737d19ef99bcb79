use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, trace};

use super::dispatch::{DispatchRouter, Route};
use super::error::{DecodeError, GatewayError};
use super::payload::{self, Event};
use super::session::Sequence;

/// What the listener hands to the client.
#[derive(Debug)]
pub enum Inbound {
    Event(Event),
    /// The peer closed the connection, or the stream ended.
    Closed { code: Option<u16>, reason: Box<str> },
    /// The connection is unusable: a transport error or a malformed frame.
    Failed(GatewayError),
}

pub(crate) async fn listen<S>(
    mut input: S,
    inbound: mpsc::Sender<Inbound>,
    sequence: Sequence,
    router: DispatchRouter,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let last = loop {
        let message = match input.next().await {
            Some(Ok(message)) => message,
            Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
            | None => {
                break Inbound::Closed {
                    code: None,
                    reason: "stream ended".into(),
                }
            }
            Some(Err(e)) => break Inbound::Failed(GatewayError::Transport(e)),
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(frame) => {
                break match frame {
                    Some(frame) => Inbound::Closed {
                        code: Some(frame.code.into()),
                        reason: frame.reason.into_owned().into(),
                    },
                    None => Inbound::Closed {
                        code: None,
                        reason: "".into(),
                    },
                }
            }
            Message::Binary(_) => break Inbound::Failed(DecodeError::Binary.into()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };
        trace!(frame = %text, "gateway frame received");

        let event = match payload::decode(&text) {
            Ok(event) => event,
            Err(e) => break Inbound::Failed(e.into()),
        };

        let forward = match event {
            Event::Dispatch(dispatch) => {
                if let Some(s) = dispatch.sequence {
                    sequence.set(s).await;
                }
                match router.deliver(&dispatch) {
                    Route::Lifecycle => Some(Event::Dispatch(dispatch)),
                    Route::Unhandled => None,
                }
            }
            other => Some(other),
        };

        if let Some(event) = forward {
            if inbound.send(Inbound::Event(event)).await.is_err() {
                debug!("gateway client stopped reading, listener exiting");
                return;
            }
        }
    };

    if inbound.send(last).await.is_err() {
        debug!("gateway client stopped reading before listener exit was reported");
    }
}

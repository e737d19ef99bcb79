use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::payload::Ready;
use crate::identity::Identity;

/// Last dispatch sequence seen on the gateway.
///
/// Only the listener writes it; the heartbeat monitor and resume path read it.
#[derive(Debug, Clone, Default)]
pub struct Sequence(Arc<Mutex<Option<u64>>>);

impl Sequence {
    pub async fn get(&self) -> Option<u64> {
        *self.0.lock().await
    }

    pub(crate) async fn set(&self, sequence: u64) {
        self.0.lock().await.replace(sequence);
    }

    pub(crate) async fn reset(&self) {
        self.0.lock().await.take();
    }
}

#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) identity: Identity,
    pub(crate) sequence: Sequence,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) session_id: Option<Box<str>>,
    pub(crate) resume_url: Option<Box<str>>,
}

impl Session {
    pub(crate) fn new(identity: Identity) -> Self {
        Session {
            identity,
            sequence: Sequence::default(),
            heartbeat_interval: Duration::ZERO,
            session_id: None,
            resume_url: None,
        }
    }

    pub(crate) fn establish(&mut self, ready: Ready, heartbeat_interval: Duration) {
        self.session_id = Some(ready.session_id);
        self.resume_url = Some(ready.resume_gateway_url);
        self.heartbeat_interval = heartbeat_interval;
    }

    pub(crate) fn resume_target(&self) -> Option<(&str, &str)> {
        Some((self.session_id.as_deref()?, self.resume_url.as_deref()?))
    }

    pub(crate) async fn forget(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.sequence.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{GatewayIntents, Token};

    #[tokio::test]
    async fn establish_then_forget() {
        let mut session = Session::new(Identity::new(Token::new("t"), GatewayIntents::GUILDS));
        assert!(session.resume_target().is_none());

        session.establish(
            Ready {
                session_id: "abc123".into(),
                resume_gateway_url: "wss://resume.example".into(),
            },
            Duration::from_millis(41250),
        );
        session.sequence.set(12).await;

        assert_eq!(session.resume_target(), Some(("abc123", "wss://resume.example")));
        assert_eq!(session.heartbeat_interval, Duration::from_millis(41250));

        session.forget().await;
        assert!(session.resume_target().is_none());
        assert_eq!(session.sequence.get().await, None);
    }
}

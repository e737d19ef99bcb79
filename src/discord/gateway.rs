use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use const_format::formatcp;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};
use url::Url;

use super::backoff::ReconnectConfig;
use super::close_code::{self, Recovery};
use super::connection::{Connection, FrameSender};
use super::dispatch::DispatchRouter;
use super::error::GatewayError;
use super::heartbeat::{stop_requested, HeartbeatMonitor, MonitorExit};
use super::listener::Inbound;
use super::payload::{self, Dispatch, DispatchData, Event, Hello, Ready};
use super::session::{Sequence, Session};
use super::{DiscordClient, API_VERSION};
use crate::identity::{Identity, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Observable view of the gateway session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub state: ConnectionState,
    pub session_id: Option<Box<str>>,
    pub resume_url: Option<Box<str>>,
}

/// Owns a gateway session for its whole life.
///
/// [`connect`](Self::connect) runs the initial handshake on the caller's task
/// and reports its failure directly. Once connected, a background driver owns
/// the connection: it runs the heartbeat monitor and decides how to recover
/// from every loss until [`disconnect`](Self::disconnect) is called or the
/// reconnect attempts are exhausted.
pub struct GatewayClient {
    http: DiscordClient,
    identity: Identity,
    router: DispatchRouter,
    reconnect: ReconnectConfig,
    status: Arc<watch::Sender<Status>>,
    stop: watch::Sender<bool>,
    driver: Option<JoinHandle<()>>,
}

impl GatewayClient {
    pub fn new(http: DiscordClient, identity: Identity) -> Self {
        let (status, _) = watch::channel(Status::default());
        let (stop, _) = watch::channel(false);
        GatewayClient {
            http,
            identity,
            router: DispatchRouter::default(),
            reconnect: ReconnectConfig::default(),
            status: Arc::new(status),
            stop,
            driver: None,
        }
    }

    pub fn with_router(mut self, router: DispatchRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub async fn connect(&mut self) -> Result<(), GatewayError> {
        if self.driver.as_ref().is_some_and(|driver| !driver.is_finished()) {
            return Err(GatewayError::AlreadyConnected);
        }

        let (stop, stopped) = watch::channel(false);
        self.stop = stop;
        let mut driver = Driver {
            http: self.http.clone(),
            session: Session::new(self.identity.clone()),
            router: self.router.clone(),
            reconnect: self.reconnect.clone(),
            status: self.status.clone(),
            stopped,
            link: None,
            failures: 0,
        };

        if let Err(e) = driver.connect().await {
            driver.shutdown().await;
            return Err(e);
        }
        self.driver = Some(tokio::spawn(driver.run()));
        Ok(())
    }

    /// Stops the session and waits for the background driver to finish.
    /// Calling it again, or before `connect`, is a no-op.
    pub async fn disconnect(&mut self) {
        self.stop.send_replace(true);
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                error!(error = %e, "gateway driver task failed");
            }
        }
        self.status.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            status.session_id = None;
            status.resume_url = None;
        });
    }
}

/// The live connection generation: its transport and the single inbound channel
/// its listener feeds.
struct Link {
    connection: Connection,
    inbound: mpsc::Receiver<Inbound>,
}

struct Driver {
    http: DiscordClient,
    session: Session,
    router: DispatchRouter,
    reconnect: ReconnectConfig,
    status: Arc<watch::Sender<Status>>,
    stopped: watch::Receiver<bool>,
    link: Option<Link>,
    /// Recovery rounds since a connection was last acknowledged.
    failures: u32,
}

impl Driver {
    async fn run(mut self) {
        let mut monitor = HeartbeatMonitor::new(self.session.heartbeat_interval);

        while let Some(link) = self.link.as_mut() {
            let exit = monitor
                .run(
                    &mut link.inbound,
                    link.connection.sender(),
                    &self.session.sequence,
                    &mut self.stopped,
                )
                .await;
            if monitor.acknowledged() {
                self.failures = 0;
            }

            let recovery = match exit {
                MonitorExit::Stopped => break,
                MonitorExit::TimedOut => {
                    let error = GatewayError::LivenessTimeout(monitor.interval());
                    warn!(error = %error, "gateway connection is unresponsive");
                    Recovery::Resume
                }
                MonitorExit::SendFailed(e) => {
                    warn!(error = %e, "heartbeat could not be sent");
                    Recovery::Resume
                }
                MonitorExit::Interrupted(Inbound::Closed { code, reason }) => {
                    let recovery = Recovery::for_close_code(code);
                    info!(
                        code = ?code,
                        meaning = code.map_or("no close frame", close_code::describe),
                        reason = %reason,
                        ?recovery,
                        "gateway connection closed"
                    );
                    recovery
                }
                MonitorExit::Interrupted(Inbound::Failed(e)) => {
                    error!(error = %e, "gateway connection failed");
                    Recovery::Identify
                }
                MonitorExit::Interrupted(Inbound::Event(Event::Reconnect)) => {
                    info!("gateway requested a reconnect");
                    Recovery::Resume
                }
                MonitorExit::Interrupted(Inbound::Event(Event::InvalidSession { resumable })) => {
                    warn!(resumable, "gateway invalidated the session");
                    if resumable {
                        Recovery::Resume
                    } else {
                        Recovery::Identify
                    }
                }
                MonitorExit::Interrupted(Inbound::Event(event)) => {
                    debug!(event = %event.describe(), "ignoring event in steady state");
                    continue;
                }
            };

            if let Err(e) = self.recover(recovery).await {
                if !matches!(e, GatewayError::Stopped) {
                    error!(error = %e, "giving up on the gateway session");
                }
                break;
            }
            monitor = HeartbeatMonitor::new(self.session.heartbeat_interval);
        }

        self.shutdown().await;
    }

    /// Re-establishes the session. A failed resume falls back to a fresh
    /// identify at once; every other round waits out the backoff for the
    /// failures since the last acknowledged connection.
    async fn recover(&mut self, mut recovery: Recovery) -> Result<(), GatewayError> {
        self.set_state(ConnectionState::Reconnecting);
        let mut stopped = self.stopped.clone();
        let mut fallback = false;

        loop {
            if !fallback {
                if self.failures > 0 {
                    if !self.reconnect.should_retry(self.failures) {
                        return Err(GatewayError::RetriesExhausted(self.failures));
                    }
                    let delay = self.reconnect.delay_for_attempt(self.failures);
                    debug!(attempt = self.failures, ?delay, "backing off before reconnect");
                    tokio::select! {
                        biased;
                        () = stop_requested(&mut stopped) => return Err(GatewayError::Stopped),
                        () = sleep(delay) => {}
                    }
                }
                self.failures += 1;
            }

            let result = tokio::select! {
                biased;
                () = stop_requested(&mut stopped) => return Err(GatewayError::Stopped),
                result = async {
                    match recovery {
                        Recovery::Resume => self.resume().await,
                        Recovery::Identify => self.connect().await,
                    }
                } => result,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if recovery == Recovery::Resume => {
                    warn!(error = %e, "resume failed, starting a new session");
                    recovery = Recovery::Identify;
                    fallback = true;
                }
                Err(e) => {
                    warn!(error = %e, attempt = self.failures, "reconnect failed");
                    fallback = false;
                }
            }
        }
    }

    /// Full handshake: Hello, Identify, Ready.
    async fn connect(&mut self) -> Result<(), GatewayError> {
        self.teardown(CloseCode::Normal, "starting new session").await;
        self.session.forget().await;
        self.set_state(ConnectionState::Connecting);

        let url = self.http.get_gateway_url(self.session.identity.token()).await?;
        let (mut connection, frames) = Connection::open(&url).await?;
        let mut inbound = connection.listen(
            frames,
            self.session.sequence.clone(),
            self.router.clone(),
        );

        let hello = match next_event(&mut inbound).await? {
            Event::Hello(hello) => hello,
            other => return Err(violation("Hello", &other)),
        };
        connection
            .send(payload::encode_identify(&self.session.identity)?)
            .await?;

        let ready = match next_event(&mut inbound).await? {
            Event::Dispatch(Dispatch {
                data: DispatchData::Ready(ready),
                ..
            }) => ready,
            other => return Err(violation("READY", &other)),
        };

        self.establish(ready, &hello);
        self.link = Some(Link {
            connection,
            inbound,
        });
        info!(session_id = ?self.session.session_id, "gateway session established");
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Reattaches to the stored session at its resume url.
    async fn resume(&mut self) -> Result<(), GatewayError> {
        self.teardown(CloseCode::Restart, "resuming").await;

        let (session_id, resume_url) = self
            .session
            .resume_target()
            .ok_or(GatewayError::NotResumable)?;
        let url = with_gateway_params(resume_url)?;
        let resume = payload::encode_resume(
            self.session.identity.token().expose(),
            session_id,
            self.session.sequence.get().await,
        )?;
        let deadline = self.session.heartbeat_interval;

        let (mut connection, frames) = Connection::open(&url).await?;
        let mut inbound = connection.listen(
            frames,
            self.session.sequence.clone(),
            self.router.clone(),
        );

        let hello = match wait("Hello", deadline, next_event(&mut inbound)).await? {
            Event::Hello(hello) => hello,
            other => return Err(violation("Hello", &other)),
        };
        connection.send(resume).await?;

        wait(
            "RESUMED",
            deadline,
            resumed(&mut inbound, connection.sender(), &self.session.sequence),
        )
        .await?;

        self.session.heartbeat_interval = Duration::from_millis(hello.heartbeat_interval);
        self.link = Some(Link {
            connection,
            inbound,
        });
        let sequence = self.session.sequence.get().await;
        info!(
            session_id = ?self.session.session_id,
            ?sequence,
            "gateway session resumed"
        );
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    fn establish(&mut self, ready: Ready, hello: &Hello) {
        self.session
            .establish(ready, Duration::from_millis(hello.heartbeat_interval));
        let (session_id, resume_url) = (
            self.session.session_id.clone(),
            self.session.resume_url.clone(),
        );
        self.status.send_modify(|status| {
            status.session_id = session_id;
            status.resume_url = resume_url;
        });
    }

    /// Stops the previous generation's listener and writer before anything new
    /// is opened.
    async fn teardown(&mut self, code: CloseCode, reason: &'static str) {
        if let Some(mut link) = self.link.take() {
            link.inbound.close();
            link.connection.close(code, reason).await;
        }
    }

    async fn shutdown(&mut self) {
        self.teardown(CloseCode::Normal, "disconnecting").await;
        self.session.forget().await;
        self.status.send_modify(|status| {
            status.state = ConnectionState::Disconnected;
            status.session_id = None;
            status.resume_url = None;
        });
        info!("gateway client disconnected");
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(%state, "gateway state changed");
        self.status.send_modify(|status| status.state = state);
    }
}

async fn next_event(inbound: &mut mpsc::Receiver<Inbound>) -> Result<Event, GatewayError> {
    match inbound.recv().await {
        Some(Inbound::Event(event)) => Ok(event),
        Some(Inbound::Failed(e)) => Err(e),
        Some(Inbound::Closed { code, reason }) => Err(GatewayError::Closed { code, reason }),
        None => Err(GatewayError::Closed {
            code: None,
            reason: "listener stopped".into(),
        }),
    }
}

/// Answers heartbeat requests until RESUMED; replayed dispatches never reach here.
async fn resumed(
    inbound: &mut mpsc::Receiver<Inbound>,
    output: &FrameSender,
    sequence: &Sequence,
) -> Result<(), GatewayError> {
    loop {
        match next_event(inbound).await? {
            Event::Dispatch(Dispatch {
                data: DispatchData::Resumed,
                ..
            }) => return Ok(()),
            Event::Heartbeat => {
                output
                    .send(payload::encode_heartbeat(sequence.get().await)?)
                    .await?;
            }
            Event::HeartbeatAck => continue,
            other => return Err(violation("RESUMED", &other)),
        }
    }
}

async fn wait<T>(
    step: &'static str,
    deadline: Duration,
    future: impl std::future::Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    timeout(deadline, future)
        .await
        .map_err(|_| GatewayError::HandshakeTimeout(step))?
}

fn violation(expected: &'static str, received: &Event) -> GatewayError {
    GatewayError::HandshakeViolation {
        expected,
        received: received.describe(),
    }
}

fn with_gateway_params(raw: &str) -> Result<Url, GatewayError> {
    let mut url = Url::parse(raw)?;
    url.query_pairs_mut()
        .clear()
        .append_pair("v", formatcp!("{API_VERSION}"))
        .append_pair("encoding", "json");
    Ok(url)
}

impl DiscordClient {
    pub(crate) async fn get_gateway_url(&self, token: &Token) -> Result<Url, GatewayError> {
        #[derive(Deserialize)]
        struct Response {
            url: Option<Box<str>>,
        }

        let response = self
            .http
            .get(format!("{}/gateway/bot", self.api))
            .header("Authorization", format!("Bot {}", token.expose()))
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(GatewayError::Bootstrap(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let url = response
            .json::<Response>()
            .await?
            .url
            .ok_or_else(|| GatewayError::Bootstrap("response has no url".into()))?;
        debug!(url = %url, "gateway url resolved");
        with_gateway_params(&url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::GatewayIntents;

    #[test]
    fn gateway_params_replace_existing_query() {
        let url = with_gateway_params("wss://gateway.example/?v=6&compress=zlib").unwrap();
        assert_eq!(url.as_str(), "wss://gateway.example/?v=10&encoding=json");
    }

    #[test]
    fn gateway_params_reject_garbage() {
        assert!(matches!(
            with_gateway_params("not a url"),
            Err(GatewayError::Url(_))
        ));
    }

    #[test]
    fn driver_future_is_send() {
        fn assert_send<T: Send>(_: T) {}

        let (status, _) = watch::channel(Status::default());
        let (_stop, stopped) = watch::channel(false);
        let driver = Driver {
            http: DiscordClient::new().unwrap(),
            session: Session::new(Identity::new(Token::new("t"), GatewayIntents::GUILDS)),
            router: DispatchRouter::default(),
            reconnect: ReconnectConfig::default(),
            status: Arc::new(status),
            stopped,
            link: None,
            failures: 0,
        };
        assert_send(driver.run());
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }
}

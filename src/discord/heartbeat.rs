//! Heartbeat liveness protocol.
//!
//! The monitor is driven by the gateway client on its own task: it consumes the
//! inbound channel while the connection is steady, answers heartbeat traffic,
//! and hands every event that requires a recovery decision back to the client.

use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use super::connection::FrameSender;
use super::error::GatewayError;
use super::listener::Inbound;
use super::payload::{self, Event};
use super::session::Sequence;

#[derive(Debug)]
pub(crate) enum MonitorExit {
    /// The stop signal was raised.
    Stopped,
    /// No acknowledgement arrived within one interval of the last beat.
    TimedOut,
    SendFailed(GatewayError),
    /// An event the client has to act on.
    Interrupted(Inbound),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Next beat is due at the given instant.
    Waiting(Instant),
    /// A beat was sent at the given instant and has not been acknowledged.
    AwaitingAck(Instant),
}

#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    interval: Duration,
    phase: Phase,
    acknowledged: bool,
}

impl HeartbeatMonitor {
    /// The first beat is delayed by a random jitter in `[0, interval)`.
    pub(crate) fn new(interval: Duration) -> Self {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..millis));
        debug!(?interval, ?jitter, "heartbeat monitor started");
        HeartbeatMonitor {
            interval,
            phase: Phase::Waiting(Instant::now() + jitter),
            acknowledged: false,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the gateway has acknowledged at least one beat on this connection.
    pub(crate) fn acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub(crate) async fn run(
        &mut self,
        inbound: &mut mpsc::Receiver<Inbound>,
        output: &FrameSender,
        sequence: &Sequence,
        stop: &mut watch::Receiver<bool>,
    ) -> MonitorExit {
        loop {
            let deadline = match self.phase {
                Phase::Waiting(at) => at,
                Phase::AwaitingAck(sent) => sent + self.interval,
            };

            tokio::select! {
                biased;

                () = stop_requested(stop) => return MonitorExit::Stopped,

                received = inbound.recv() => match received {
                    Some(Inbound::Event(Event::HeartbeatAck)) => {
                        if let Phase::AwaitingAck(sent) = self.phase {
                            trace!(latency = ?sent.elapsed(), "heartbeat acknowledged");
                            self.phase = Phase::Waiting(sent + self.interval);
                            self.acknowledged = true;
                        }
                    }
                    Some(Inbound::Event(Event::Heartbeat)) => {
                        debug!("gateway requested an immediate heartbeat");
                        if let Err(e) = self.beat(output, sequence).await {
                            return MonitorExit::SendFailed(e);
                        }
                    }
                    Some(
                        inbound @ (Inbound::Closed { .. }
                        | Inbound::Failed(_)
                        | Inbound::Event(Event::Reconnect | Event::InvalidSession { .. })),
                    ) => return MonitorExit::Interrupted(inbound),
                    Some(Inbound::Event(event)) => {
                        trace!(event = %event.describe(), "ignored by heartbeat monitor");
                    }
                    None => {
                        return MonitorExit::Interrupted(Inbound::Closed {
                            code: None,
                            reason: "listener stopped".into(),
                        })
                    }
                },

                () = sleep_until(deadline) => match self.phase {
                    Phase::Waiting(_) => {
                        if let Err(e) = self.beat(output, sequence).await {
                            return MonitorExit::SendFailed(e);
                        }
                    }
                    Phase::AwaitingAck(sent) => {
                        warn!(elapsed = ?sent.elapsed(), interval = ?self.interval, "heartbeat was not acknowledged");
                        return MonitorExit::TimedOut;
                    }
                },
            }
        }
    }

    async fn beat(&mut self, output: &FrameSender, sequence: &Sequence) -> Result<(), GatewayError> {
        let last = sequence.get().await;
        output.send(payload::encode_heartbeat(last)?).await?;
        trace!(sequence = ?last, "heartbeat sent");
        self.phase = Phase::AwaitingAck(Instant::now());
        Ok(())
    }
}

/// Resolves once stop is raised. A dropped sender counts as raised.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::discord::payload::Opcode;

    struct Harness {
        inbound: mpsc::Sender<Inbound>,
        frames: mpsc::Receiver<Message>,
        stop: watch::Sender<bool>,
        monitor: JoinHandle<MonitorExit>,
    }

    fn start(interval: Duration, sequence: Sequence) -> Harness {
        let (inbound, mut inbound_rx) = mpsc::channel(16);
        let (output, frames) = mpsc::channel(16);
        let (stop, mut stop_rx) = watch::channel(false);
        let monitor = tokio::spawn(async move {
            let mut monitor = HeartbeatMonitor::new(interval);
            monitor
                .run(&mut inbound_rx, &FrameSender::new(output), &sequence, &mut stop_rx)
                .await
        });
        Harness {
            inbound,
            frames,
            stop,
            monitor,
        }
    }

    async fn next_beat(frames: &mut mpsc::Receiver<Message>) -> Value {
        let Some(Message::Text(text)) = frames.recv().await else {
            panic!("expected a heartbeat frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["op"], 1);
        value["d"].clone()
    }

    #[tokio::test(start_paused = true)]
    async fn first_beat_waits_for_jitter_within_interval() {
        let sequence = Sequence::default();
        sequence.set(7).await;
        let started = Instant::now();
        let mut harness = start(Duration::from_millis(41250), sequence);

        assert_eq!(next_beat(&mut harness.frames).await, 7);
        assert!(started.elapsed() <= Duration::from_millis(41250));
        harness.monitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out_after_one_interval() {
        let mut harness = start(Duration::from_millis(1000), Sequence::default());

        assert_eq!(next_beat(&mut harness.frames).await, Value::Null);
        let sent = Instant::now();

        let exit = harness.monitor.await.unwrap();
        let elapsed = sent.elapsed();
        assert!(matches!(exit, MonitorExit::TimedOut), "{exit:?}");
        assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn ack_schedules_next_beat_one_interval_later() {
        let interval = Duration::from_millis(1000);
        let mut harness = start(interval, Sequence::default());

        next_beat(&mut harness.frames).await;
        let sent = Instant::now();
        harness
            .inbound
            .send(Inbound::Event(Event::HeartbeatAck))
            .await
            .unwrap();

        next_beat(&mut harness.frames).await;
        assert_eq!(sent.elapsed(), interval);
        harness.monitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn first_ack_marks_connection_acknowledged() {
        let (inbound, mut inbound_rx) = mpsc::channel(4);
        let (output, mut frames) = mpsc::channel(4);
        let (stop, mut stop_rx) = watch::channel(false);
        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(1000));
        assert!(!monitor.acknowledged());

        inbound.send(Inbound::Event(Event::HeartbeatAck)).await.unwrap();
        let driver = async {
            next_beat(&mut frames).await;
            inbound.send(Inbound::Event(Event::HeartbeatAck)).await.unwrap();
            next_beat(&mut frames).await;
            stop.send_replace(true);
        };
        let sender = FrameSender::new(output);
        let seq = Sequence::default();
        let (exit, ()) = tokio::join!(
            monitor.run(&mut inbound_rx, &sender, &seq, &mut stop_rx),
            driver,
        );

        assert!(matches!(exit, MonitorExit::Stopped), "{exit:?}");
        assert!(monitor.acknowledged());
    }

    #[tokio::test(start_paused = true)]
    async fn server_request_triggers_immediate_beat() {
        let mut harness = start(Duration::from_millis(5000), Sequence::default());

        next_beat(&mut harness.frames).await;
        harness
            .inbound
            .send(Inbound::Event(Event::HeartbeatAck))
            .await
            .unwrap();
        let requested = Instant::now();
        harness
            .inbound
            .send(Inbound::Event(Event::Heartbeat))
            .await
            .unwrap();

        next_beat(&mut harness.frames).await;
        assert!(requested.elapsed() < Duration::from_millis(5000));
        harness.monitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_monitor_without_another_beat() {
        let mut harness = start(Duration::from_millis(1000), Sequence::default());

        next_beat(&mut harness.frames).await;
        harness
            .inbound
            .send(Inbound::Event(Event::HeartbeatAck))
            .await
            .unwrap();
        harness.stop.send_replace(true);
        harness.stop.send_replace(true);

        let exit = harness.monitor.await.unwrap();
        assert!(matches!(exit, MonitorExit::Stopped), "{exit:?}");
        assert!(harness.frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stop_signal_counts_as_stop() {
        let harness = start(Duration::from_millis(1000), Sequence::default());
        drop(harness.stop);

        let exit = harness.monitor.await.unwrap();
        assert!(matches!(exit, MonitorExit::Stopped), "{exit:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_events_are_handed_back() {
        let mut harness = start(Duration::from_millis(1000), Sequence::default());

        next_beat(&mut harness.frames).await;
        harness
            .inbound
            .send(Inbound::Event(Event::Unexpected(Opcode::PresenceUpdate)))
            .await
            .unwrap();
        harness
            .inbound
            .send(Inbound::Event(Event::Reconnect))
            .await
            .unwrap();

        let exit = harness.monitor.await.unwrap();
        assert!(
            matches!(exit, MonitorExit::Interrupted(Inbound::Event(Event::Reconnect))),
            "{exit:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closed_writer_is_a_send_failure() {
        let (_inbound, mut inbound_rx) = mpsc::channel(1);
        let (output, frames) = mpsc::channel(1);
        drop(frames);
        let (_stop, mut stop_rx) = watch::channel(false);

        let mut monitor = HeartbeatMonitor::new(Duration::from_millis(1000));
        let exit = monitor
            .run(
                &mut inbound_rx,
                &FrameSender::new(output),
                &Sequence::default(),
                &mut stop_rx,
            )
            .await;
        assert!(
            matches!(exit, MonitorExit::SendFailed(GatewayError::SendClosed)),
            "{exit:?}"
        );
    }
}

//! Run status broadcasting
//!
//! One bounded `tokio::sync::broadcast` channel per run. Publishing never
//! blocks the pipeline: a subscriber that falls behind loses its oldest
//! events rather than slowing anyone down. New subscribers first receive
//! the latest event, then the live stream, and the stream ends after the
//! run's terminal event.
//!
//! Channels for finished runs are kept for a grace period so late
//! subscribers still see the outcome, then removed by [`Broadcaster::sweep`]
//! (or the background reaper from [`Broadcaster::spawn_reaper`]).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use tribunal_state::RunId;

use crate::domain::event::StatusEvent;
use crate::metrics::METRICS;

struct RunChannel {
    sender: broadcast::Sender<StatusEvent>,
    last: Option<StatusEvent>,
    finished_at: Option<Instant>,
}

impl RunChannel {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            last: None,
            finished_at: None,
        }
    }
}

/// Registry of per-run status channels. Create one per process and share it.
pub struct Broadcaster {
    channels: Mutex<HashMap<RunId, RunChannel>>,
    capacity: usize,
    grace: Duration,
}

impl Broadcaster {
    pub fn new(capacity: usize, grace: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
            grace,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, RunChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a run so subscribers can attach before its first event.
    pub fn open(&self, run_id: &RunId) {
        let capacity = self.capacity;
        self.lock()
            .entry(run_id.clone())
            .or_insert_with(|| RunChannel::new(capacity));
    }

    /// Deliver `event` to every subscriber of its run. Never blocks.
    pub fn publish(&self, event: StatusEvent) {
        let capacity = self.capacity;
        let mut channels = self.lock();
        let channel = channels
            .entry(event.run_id.clone())
            .or_insert_with(|| RunChannel::new(capacity));
        if event.is_terminal() {
            channel.finished_at = Some(Instant::now());
        }
        channel.last = Some(event.clone());
        // No receivers is fine: the event is still retained as `last`.
        let receivers = channel.sender.send(event).unwrap_or(0);
        trace!(receivers, "status event published");
        METRICS.inc_events_published();
    }

    /// Re-broadcast the last event of a live run as a heartbeat.
    ///
    /// Returns `false` once the run is finished or unknown.
    pub fn heartbeat(&self, run_id: &RunId) -> bool {
        let channels = self.lock();
        let Some(channel) = channels.get(run_id) else {
            return false;
        };
        match &channel.last {
            Some(last) if !last.is_terminal() => {
                let _ = channel.sender.send(last.to_heartbeat());
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Attach to a run: replay of the latest event, then the live stream.
    ///
    /// `None` if the run was never opened or has been retired.
    pub fn subscribe(&self, run_id: &RunId) -> Option<Subscription> {
        let channels = self.lock();
        let channel = channels.get(run_id)?;
        // Receiver and replay are taken under the same lock, so nothing is
        // delivered twice or lost between them.
        Some(Subscription {
            replay: channel.last.clone(),
            receiver: channel.sender.subscribe(),
            finished: false,
        })
    }

    pub fn last_event(&self, run_id: &RunId) -> Option<StatusEvent> {
        self.lock().get(run_id).and_then(|c| c.last.clone())
    }

    pub fn subscriber_count(&self, run_id: &RunId) -> usize {
        self.lock()
            .get(run_id)
            .map_or(0, |c| c.sender.receiver_count())
    }

    pub fn is_open(&self, run_id: &RunId) -> bool {
        self.lock().contains_key(run_id)
    }

    /// Remove channels whose run finished more than the grace period ago.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let grace = self.grace;
        let mut channels = self.lock();
        let before = channels.len();
        channels.retain(|_, c| c.finished_at.map_or(true, |at| at.elapsed() < grace));
        let removed = before - channels.len();
        if removed > 0 {
            debug!(removed, "retired finished run channels");
        }
        removed
    }

    /// Drop every channel. Live subscriptions end.
    pub fn shutdown(&self) {
        let mut channels = self.lock();
        debug!(channels = channels.len(), "broadcaster shutting down");
        channels.clear();
    }

    /// Heartbeat `run_id` every `interval` until it finishes or `cancel` fires.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        run_id: RunId,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !broadcaster.heartbeat(&run_id) {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        broadcaster.sweep();
                    }
                }
            }
        })
    }
}

/// A subscriber's view of one run.
pub struct Subscription {
    replay: Option<StatusEvent>,
    receiver: broadcast::Receiver<StatusEvent>,
    finished: bool,
}

impl Subscription {
    /// Next event, or `None` once the terminal event has been delivered or
    /// the channel is gone.
    pub async fn next(&mut self) -> Option<StatusEvent> {
        if self.finished {
            return None;
        }
        if let Some(event) = self.replay.take() {
            self.finished = event.is_terminal();
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged; oldest events dropped");
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = StatusEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{EventKind, EventScope, EventStatus};
    use chrono::Utc;

    fn event(run: &str, seq: u64, scope: EventScope, status: EventStatus, progress: u8) -> StatusEvent {
        StatusEvent {
            run_id: RunId::from(run),
            seq,
            scope,
            status,
            kind: EventKind::Transition,
            progress,
            current_task: format!("step {seq}"),
            quality: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_replay_then_live() {
        let b = Broadcaster::new(16, Duration::from_secs(30));
        let run = RunId::from("r1");
        b.open(&run);
        b.publish(event("r1", 1, EventScope::System, EventStatus::Running, 0));
        b.publish(event("r1", 2, EventScope::Skeptic, EventStatus::Processing, 5));

        let mut sub = b.subscribe(&run).unwrap();
        b.publish(event("r1", 3, EventScope::Skeptic, EventStatus::Completed, 33));

        assert_eq!(sub.next().await.unwrap().seq, 2);
        assert_eq!(sub.next().await.unwrap().seq, 3);
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_event() {
        let b = Broadcaster::new(16, Duration::from_secs(30));
        let run = RunId::from("r2");
        b.open(&run);
        let mut sub = b.subscribe(&run).unwrap();
        b.publish(event("r2", 1, EventScope::System, EventStatus::Running, 0));
        b.publish(event("r2", 2, EventScope::System, EventStatus::Completed, 100));
        b.publish(event("r2", 3, EventScope::System, EventStatus::Completed, 100));

        assert_eq!(sub.next().await.unwrap().seq, 1);
        assert_eq!(sub.next().await.unwrap().seq, 2);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn subscribing_to_finished_run_replays_outcome() {
        let b = Broadcaster::new(16, Duration::from_secs(30));
        let run = RunId::from("r3");
        b.publish(event("r3", 9, EventScope::System, EventStatus::Failed, 40));
        let mut sub = b.subscribe(&run).unwrap();
        let only = sub.next().await.unwrap();
        assert_eq!(only.status, EventStatus::Failed);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn heartbeat_stops_at_terminal() {
        let b = Broadcaster::new(16, Duration::from_secs(30));
        let run = RunId::from("r4");
        b.open(&run);
        b.publish(event("r4", 1, EventScope::Validator, EventStatus::Processing, 40));
        let mut sub = b.subscribe(&run).unwrap();
        assert!(sub.next().await.is_some());

        assert!(b.heartbeat(&run));
        let beat = sub.next().await.unwrap();
        assert!(beat.is_heartbeat());
        assert_eq!(beat.progress, 40);

        b.publish(event("r4", 2, EventScope::System, EventStatus::Cancelled, 40));
        assert!(!b.heartbeat(&run));
        assert!(!b.heartbeat(&RunId::from("unknown")));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_retires_after_grace() {
        let b = Broadcaster::new(16, Duration::from_secs(30));
        let live = RunId::from("live");
        let done = RunId::from("done");
        b.open(&live);
        b.publish(event("done", 1, EventScope::System, EventStatus::Completed, 100));

        assert_eq!(b.sweep(), 0);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(b.sweep(), 1);
        assert!(b.is_open(&live));
        assert!(b.subscribe(&done).is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest() {
        let b = Broadcaster::new(2, Duration::from_secs(30));
        let run = RunId::from("r5");
        b.open(&run);
        let mut sub = b.subscribe(&run).unwrap();
        for seq in 1..=5 {
            b.publish(event("r5", seq, EventScope::Skeptic, EventStatus::Processing, seq as u8));
        }
        let first = sub.next().await.unwrap();
        assert_eq!(first.seq, 4);
        assert_eq!(sub.next().await.unwrap().seq, 5);
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let b = Broadcaster::new(4, Duration::from_secs(30));
        let run = RunId::from("r6");
        b.open(&run);
        let mut sub = b.subscribe(&run).unwrap();
        b.shutdown();
        assert!(sub.next().await.is_none());
        assert!(!b.is_open(&run));
    }
}

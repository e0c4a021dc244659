//! Broadcast hub
//!
//! A single task owns the connection set and the accumulation buffer. It
//! drains the [`UpdateQueue`], flushes when the buffer reaches the size
//! threshold or the flush interval elapses, and hands every flushed batch
//! to each connection's mailbox with a non-blocking send. A connection
//! whose mailbox is full is evicted on the spot.
//!
//! Membership changes arrive as commands on a channel, so the connection
//! set is only ever touched by the hub task.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};
use types::ids::ConnectionId;
use types::pixel::PixelUpdate;

use crate::config::HubConfig;
use crate::metrics::PipelineMetrics;
use crate::queue::UpdateQueue;
use crate::shutdown::ShutdownListener;

/// One flushed batch, shared by every mailbox it is delivered to.
pub type Batch = Arc<[PixelUpdate]>;

/// Sending half of a connection's mailbox.
pub type Mailbox = mpsc::Sender<Batch>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Interval,
    Shutdown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("broadcast hub is not running")]
    Stopped,
}

// ── Batcher ─────────────────────────────────────────────────────────

/// Accumulation buffer with a size trigger.
#[derive(Debug)]
pub struct Batcher {
    buffer: Vec<PixelUpdate>,
    threshold: usize,
}

impl Batcher {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            buffer: Vec::with_capacity(threshold),
            threshold,
        }
    }

    /// Updates that still fit before the size trigger fires. Never zero.
    pub fn remaining_capacity(&self) -> usize {
        self.threshold.saturating_sub(self.buffer.len()).max(1)
    }

    /// Buffer `updates`; returns the batch if the threshold was reached.
    pub fn push(&mut self, updates: Vec<PixelUpdate>) -> Option<Batch> {
        self.buffer.extend(updates);
        if self.buffer.len() >= self.threshold {
            self.take()
        } else {
            None
        }
    }

    /// Everything buffered so far, or `None` when empty.
    pub fn take(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.threshold));
        Some(Arc::from(batch))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

// ── Fanout ──────────────────────────────────────────────────────────

/// Registered connections and their mailboxes.
pub struct Fanout {
    connections: HashMap<ConnectionId, Mailbox>,
    metrics: Arc<PipelineMetrics>,
}

impl Fanout {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            connections: HashMap::new(),
            metrics,
        }
    }

    /// Add a connection. A second registration of the same id is ignored
    /// and returns `false`.
    pub fn register(&mut self, id: ConnectionId, mailbox: Mailbox) -> bool {
        if self.connections.contains_key(&id) {
            warn!(connection_id = %id, "Duplicate registration ignored");
            return false;
        }
        self.connections.insert(id, mailbox);
        self.metrics.record_registered();
        info!(connection_id = %id, connections = self.connections.len(), "Connection registered");
        true
    }

    /// Remove a connection, closing its mailbox. Repeat calls are no-ops.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(_mailbox) => {
                self.metrics.record_unregistered();
                info!(connection_id = %id, connections = self.connections.len(), "Connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Deliver `batch` to every mailbox without waiting.
    ///
    /// Connections with a full mailbox are evicted, ones whose receiver is
    /// gone are dropped. Returns the evicted ids.
    pub fn broadcast(&mut self, batch: &Batch) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        let mut closed = Vec::new();

        for (id, mailbox) in &self.connections {
            match mailbox.try_send(batch.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => evicted.push(*id),
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in &evicted {
            self.connections.remove(id);
            self.metrics.record_evicted();
            warn!(connection_id = %id, "Mailbox full; evicting slow connection");
        }
        for id in closed {
            self.unregister(id);
        }
        evicted
    }

    /// Record and deliver one flushed batch.
    pub fn flush(&mut self, batch: Batch, trigger: FlushTrigger) {
        self.metrics.record_flush(trigger, batch.len());
        let evicted = self.broadcast(&batch);
        debug!(
            size = batch.len(),
            trigger = ?trigger,
            receivers = self.connections.len(),
            evicted = evicted.len(),
            "Flushed batch"
        );
    }

    /// Drop every mailbox; each connection drains what it holds and closes.
    pub fn close_all(&mut self) {
        for (id, _mailbox) in self.connections.drain() {
            self.metrics.record_unregistered();
            debug!(connection_id = %id, "Closing mailbox");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }
}

// ── Hub Task ────────────────────────────────────────────────────────

enum HubCommand {
    Register {
        id: ConnectionId,
        mailbox: Mailbox,
        ack: oneshot::Sender<bool>,
    },
    Unregister {
        id: ConnectionId,
        ack: oneshot::Sender<bool>,
    },
    ConnectionCount {
        reply: oneshot::Sender<usize>,
    },
}

/// Cheap, cloneable entry point to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Register a connection's mailbox. `Ok(false)` means the id was
    /// already registered.
    pub async fn register(&self, id: ConnectionId, mailbox: Mailbox) -> Result<bool, HubError> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { id, mailbox, ack })
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Unregister a connection. Returns whether it was registered; a
    /// stopped hub has no registrations left.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let (ack, rx) = oneshot::channel();
        if self
            .commands
            .send(HubCommand::Unregister { id, ack })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn connection_count(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HubCommand::ConnectionCount { reply })
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }
}

pub struct BroadcastHub {
    queue: Arc<UpdateQueue>,
    config: HubConfig,
    metrics: Arc<PipelineMetrics>,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl BroadcastHub {
    pub fn new(
        queue: Arc<UpdateQueue>,
        config: HubConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            queue,
            config,
            metrics,
            commands: rx,
        };
        (hub, HubHandle { commands: tx })
    }

    pub fn spawn(self, shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Drain, batch and fan out until shutdown, then flush what is left
    /// and close every mailbox.
    pub async fn run(self, mut shutdown: ShutdownListener) {
        let BroadcastHub {
            queue,
            config,
            metrics,
            mut commands,
        } = self;

        let mut batcher = Batcher::new(config.flush_threshold);
        let mut fanout = Fanout::new(metrics);
        let mut ticker = interval_at(Instant::now() + config.flush_interval, config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            flush_threshold = config.flush_threshold,
            "Broadcast hub started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                Some(command) = commands.recv() => handle_command(&mut fanout, command),
                updates = queue.dequeue_batch(batcher.remaining_capacity()) => {
                    if let Some(batch) = batcher.push(updates) {
                        fanout.flush(batch, FlushTrigger::Size);
                        ticker.reset();
                    }
                }
                _ = ticker.tick() => {
                    if let Some(batch) = batcher.take() {
                        fanout.flush(batch, FlushTrigger::Interval);
                    }
                }
            }
        }

        // No enqueue can succeed past this point, so the drain below sees
        // every update ingestion ever reported as accepted.
        queue.close();
        loop {
            let updates = queue.try_dequeue_batch(batcher.remaining_capacity());
            let drained = updates.is_empty();
            if let Some(batch) = batcher.push(updates) {
                fanout.flush(batch, FlushTrigger::Shutdown);
            }
            if drained {
                break;
            }
        }
        if let Some(batch) = batcher.take() {
            fanout.flush(batch, FlushTrigger::Shutdown);
        }

        let connections = fanout.len();
        fanout.close_all();
        info!(connections, "Broadcast hub stopped");
    }
}

fn handle_command(fanout: &mut Fanout, command: HubCommand) {
    match command {
        HubCommand::Register { id, mailbox, ack } => {
            let _ = ack.send(fanout.register(id, mailbox));
        }
        HubCommand::Unregister { id, ack } => {
            let _ = ack.send(fanout.unregister(id));
        }
        HubCommand::ConnectionCount { reply } => {
            let _ = reply.send(fanout.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::canvas::CanvasBounds;
    use types::pixel::PixelRequest;

    fn update(x: i64) -> PixelUpdate {
        PixelRequest::new(x, 1, "#00FF00", "bob")
            .validate(&CanvasBounds::default())
            .unwrap()
            .stamp(1_000 + x)
    }

    fn updates(range: std::ops::Range<i64>) -> Vec<PixelUpdate> {
        range.map(update).collect()
    }

    #[test]
    fn test_batcher_flushes_at_threshold() {
        let mut batcher = Batcher::new(50);
        assert!(batcher.push(updates(0..49)).is_none());
        assert_eq!(batcher.remaining_capacity(), 1);

        let batch = batcher.push(updates(49..50)).unwrap();
        assert_eq!(batch.len(), 50);
        assert_eq!(batch[0].x, 0);
        assert_eq!(batch[49].x, 49);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_batcher_take_empty_is_none() {
        let mut batcher = Batcher::new(3);
        assert!(batcher.take().is_none());
        batcher.push(updates(0..2));
        assert_eq!(batcher.take().unwrap().len(), 2);
        assert!(batcher.take().is_none());
    }

    #[test]
    fn test_fanout_duplicate_register_is_noop() {
        let mut fanout = Fanout::new(Arc::new(PipelineMetrics::new()));
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);
        assert!(fanout.register(id, tx.clone()));
        assert!(!fanout.register(id, tx));
        assert_eq!(fanout.len(), 1);

        assert!(fanout.unregister(id));
        assert!(!fanout.unregister(id));
    }

    #[test]
    fn test_fanout_unregister_closes_mailbox() {
        let mut fanout = Fanout::new(Arc::new(PipelineMetrics::new()));
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(1);
        fanout.register(id, tx);
        fanout.unregister(id);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_fanout_evicts_full_mailbox_only() {
        let metrics = Arc::new(PipelineMetrics::new());
        let mut fanout = Fanout::new(metrics.clone());

        let slow = ConnectionId::new();
        let fast = ConnectionId::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        fanout.register(slow, slow_tx);
        fanout.register(fast, fast_tx);

        let first: Batch = Arc::from(updates(0..1));
        let second: Batch = Arc::from(updates(1..2));
        assert!(fanout.broadcast(&first).is_empty());
        assert_eq!(fanout.broadcast(&second), vec![slow]);

        assert!(!fanout.contains(&slow));
        assert!(fanout.contains(&fast));
        assert_eq!(fast_rx.try_recv().unwrap()[0].x, 0);
        assert_eq!(fast_rx.try_recv().unwrap()[0].x, 1);

        // The evicted mailbox keeps what it already had, then reports closed.
        assert_eq!(slow_rx.try_recv().unwrap()[0].x, 0);
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(metrics.snapshot(0, 0).connections_evicted, 1);
    }

    #[test]
    fn test_fanout_drops_closed_receivers() {
        let mut fanout = Fanout::new(Arc::new(PipelineMetrics::new()));
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(4);
        fanout.register(id, tx);
        drop(rx);

        let batch: Batch = Arc::from(updates(0..1));
        assert!(fanout.broadcast(&batch).is_empty());
        assert!(fanout.is_empty());
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_hub() {
        let queue = Arc::new(UpdateQueue::with_capacity(4));
        let (hub, handle) =
            BroadcastHub::new(queue, HubConfig::default(), Arc::new(PipelineMetrics::new()));
        drop(hub);

        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(
            handle.register(ConnectionId::new(), tx).await,
            Err(HubError::Stopped)
        );
        assert!(!handle.unregister(ConnectionId::new()).await);
    }
}

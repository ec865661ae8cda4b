//! Aggregation of transport acknowledgements per application write
//!
//! One `write_or_buffer_data` call may be split across several session
//! writes, and acknowledgements for the first segments can arrive before the
//! last segment has even been accepted. An [`AckNotifier`] counts the
//! outstanding segments and reports to the application once, over a oneshot
//! channel, after the final segment was written and every segment was acked.

use std::ops::AddAssign;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Acknowledgement counts for one session write, or the aggregate of many
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckNotification {
    /// Packets acked on first transmission
    pub num_original_packets: u64,
    /// Bytes acked on first transmission
    pub num_original_bytes: u64,
    /// Packets acked after retransmission
    pub num_retransmitted_packets: u64,
    /// Bytes acked after retransmission
    pub num_retransmitted_bytes: u64,
    /// Time between the largest observed packet being sent and acked
    pub delta_largest_observed: Duration,
}

impl AckNotification {
    /// Counts for a write acked without retransmission
    pub fn original(packets: u64, bytes: u64) -> Self {
        Self {
            num_original_packets: packets,
            num_original_bytes: bytes,
            ..Default::default()
        }
    }
}

impl AddAssign for AckNotification {
    fn add_assign(&mut self, other: Self) {
        self.num_original_packets += other.num_original_packets;
        self.num_original_bytes += other.num_original_bytes;
        self.num_retransmitted_packets += other.num_retransmitted_packets;
        self.num_retransmitted_bytes += other.num_retransmitted_bytes;
        // The latest ack carries the freshest estimate.
        self.delta_largest_observed = other.delta_largest_observed;
    }
}

#[derive(Debug)]
struct ProxyState {
    /// Application's receiver; taken when the aggregate fires
    delegate: Option<oneshot::Sender<AckNotification>>,
    /// Session writes not yet acked
    pending_acks: usize,
    /// Set once the final segment of the write was accepted
    wrote_last_data: bool,
    /// Running totals
    totals: AckNotification,
}

/// Shared counted waiter for one application write.
///
/// Cloning shares the same state; pending chunks and the session each hold a
/// clone and the state is freed when the last clone drops. The handle is
/// `Send`, so a connection task owning streams and notifiers can be spawned
/// on a multi-thread runtime.
#[derive(Debug, Clone)]
pub struct AckNotifier {
    inner: Arc<Mutex<ProxyState>>,
}

impl AckNotifier {
    /// Wrap the application's sender
    pub fn new(delegate: oneshot::Sender<AckNotification>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProxyState {
                delegate: Some(delegate),
                pending_acks: 0,
                wrote_last_data: false,
                totals: AckNotification::default(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProxyState> {
        // The state stays consistent even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a notifier together with the receiver it reports to
    pub fn channel() -> (Self, oneshot::Receiver<AckNotification>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(tx), rx)
    }

    /// Record that a session write carrying part of this data was accepted.
    ///
    /// `last_data` is true when nothing of the application write remains
    /// queued.
    pub fn wrote_data(&self, last_data: bool) {
        let mut state = self.state();
        if state.wrote_last_data {
            error!("Ack notifier received a write after the final write");
            debug_assert!(false, "Ack notifier received a write after the final write");
            return;
        }
        state.pending_acks += 1;
        state.wrote_last_data = last_data;
    }

    /// Record the acknowledgement of one session write
    pub fn on_ack_notification(&self, ack: AckNotification) {
        let mut state = self.state();
        if state.pending_acks == 0 {
            error!("Ack notifier received an ack with no pending writes");
            debug_assert!(false, "Ack notifier received an ack with no pending writes");
            return;
        }
        state.pending_acks -= 1;
        state.totals += ack;

        if state.wrote_last_data && state.pending_acks == 0 {
            let totals = state.totals;
            if let Some(delegate) = state.delegate.take() {
                if delegate.send(totals).is_err() {
                    debug!("Ack receiver dropped before all data was acked");
                }
            }
        }
    }

    /// Session writes not yet acked
    pub fn pending_acks(&self) -> usize {
        self.state().pending_acks
    }

    /// Check if the aggregate has been delivered
    pub fn is_complete(&self) -> bool {
        self.state().delegate.is_none()
    }
}

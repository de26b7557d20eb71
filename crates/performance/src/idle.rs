//! Idle transactions.
//!
//! An idle transaction finishes by itself once it has had no open children
//! for the idle timeout, or when the final timeout caps its duration. Timers
//! are tokio tasks; each idle timer carries a generation so a timer that
//! already woke up cannot finish a transaction that was re-armed since.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::clock::timestamp_in_seconds;
use crate::lock;
use crate::span::{Measurement, SpanStatus};
use crate::transaction::{BeforeFinishCallback, Transaction, TransactionEvent};

/// Timeouts of an idle transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeouts {
    pub idle: Duration,
    /// `None` disables the hard cap
    pub final_timeout: Option<Duration>,
}

impl Default for IdleTimeouts {
    fn default() -> Self {
        Self {
            idle: Duration::from_millis(1_000),
            final_timeout: Some(Duration::from_millis(600_000)),
        }
    }
}

struct IdleState {
    transaction: Transaction,
    idle_timer: Option<JoinHandle<()>>,
    final_timer: Option<JoinHandle<()>>,
    idle_generation: u64,
    last_child_end: Option<f64>,
    event: Option<TransactionEvent>,
}

impl IdleState {
    fn cancel_idle_timer(&mut self) {
        self.idle_generation += 1;
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_idle_timer();
        if let Some(timer) = self.final_timer.take() {
            timer.abort();
        }
    }
}

struct IdleInner {
    state: Mutex<IdleState>,
    timeouts: IdleTimeouts,
    finished_tx: UnboundedSender<TransactionEvent>,
}

/// Handle to an idle transaction. Cloning shares the same transaction.
#[derive(Clone)]
pub struct IdleTransaction {
    inner: Arc<IdleInner>,
}

impl std::fmt::Debug for IdleTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("IdleTransaction")
            .field("transaction", &state.transaction)
            .field("timeouts", &self.inner.timeouts)
            .finish()
    }
}

impl IdleTransaction {
    /// Start tracking a transaction and arm its timers.
    ///
    /// The finished event is sent on `finished_tx`. Timers need a tokio
    /// runtime; without one the transaction only finishes explicitly.
    pub fn start(
        transaction: Transaction,
        timeouts: IdleTimeouts,
        finished_tx: UnboundedSender<TransactionEvent>,
    ) -> Self {
        tracing::debug!(
            "Starting idle transaction {} ({})",
            transaction.name(),
            transaction.op()
        );

        let idle = Self {
            inner: Arc::new(IdleInner {
                state: Mutex::new(IdleState {
                    transaction,
                    idle_timer: None,
                    final_timer: None,
                    idle_generation: 0,
                    last_child_end: None,
                    event: None,
                }),
                timeouts,
                finished_tx,
            }),
        };

        let mut state = lock(&idle.inner.state);
        idle.arm_idle_timer(&mut state);
        if let Some(final_timeout) = timeouts.final_timeout {
            let weak = Arc::downgrade(&idle.inner);
            state.final_timer = spawn_timer(final_timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    IdleTransaction { inner }.on_final_timeout();
                }
            });
        }
        drop(state);

        idle
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Read the underlying transaction.
    pub fn with_transaction<R>(&self, f: impl FnOnce(&Transaction) -> R) -> R {
        f(&lock(&self.inner.state).transaction)
    }

    pub fn name(&self) -> String {
        self.with_transaction(|t| t.name().to_string())
    }

    pub fn op(&self) -> String {
        self.with_transaction(|t| t.op().to_string())
    }

    pub fn span_id(&self) -> String {
        self.with_transaction(|t| t.span_id().to_string())
    }

    pub fn start_timestamp(&self) -> f64 {
        self.with_transaction(Transaction::start_timestamp)
    }

    pub fn is_sampled(&self) -> bool {
        self.with_transaction(Transaction::is_sampled)
    }

    pub fn is_finished(&self) -> bool {
        self.with_transaction(Transaction::is_finished)
    }

    pub fn timeouts(&self) -> IdleTimeouts {
        self.inner.timeouts
    }

    /// Event produced when the transaction finished.
    pub fn finished_event(&self) -> Option<TransactionEvent> {
        lock(&self.inner.state).event.clone()
    }

    /// Check whether two handles refer to the same transaction.
    pub fn same_as(&self, other: &IdleTransaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Mutators
    // ========================================================================

    pub fn set_data(&self, key: &str, value: Value) -> bool {
        lock(&self.inner.state).transaction.set_data(key, value)
    }

    pub fn set_measurement(&self, name: &str, measurement: Measurement) -> bool {
        lock(&self.inner.state).transaction.set_measurement(name, measurement)
    }

    pub fn set_tag(&self, key: &str, value: &str) -> bool {
        lock(&self.inner.state).transaction.set_tag(key, value)
    }

    pub fn register_before_finish(&self, callback: BeforeFinishCallback) -> bool {
        lock(&self.inner.state).transaction.register_before_finish(callback)
    }

    /// Start a child now. Cancels the idle timer.
    pub fn start_child(&self, op: &str, description: Option<&str>) -> Option<String> {
        self.start_child_at(op, description, timestamp_in_seconds())
    }

    /// Start a child at the given timestamp. Cancels the idle timer.
    pub fn start_child_at(&self, op: &str, description: Option<&str>, start: f64) -> Option<String> {
        let mut state = lock(&self.inner.state);
        let id = state.transaction.start_child_at(op, description, start)?;
        state.cancel_idle_timer();
        Some(id)
    }

    /// End a child now.
    pub fn finish_child(&self, span_id: &str) -> bool {
        self.finish_child_at(span_id, timestamp_in_seconds())
    }

    /// End a child at the given timestamp. Re-arms the idle timer once no
    /// children are open.
    pub fn finish_child_at(&self, span_id: &str, end: f64) -> bool {
        let mut state = lock(&self.inner.state);
        if !state.transaction.finish_child(span_id, end) {
            return false;
        }
        state.last_child_end = Some(state.last_child_end.map_or(end, |last| last.max(end)));
        if state.transaction.open_children() == 0 {
            self.arm_idle_timer(&mut state);
        }
        true
    }

    /// Set the status of a child span.
    pub fn set_child_status(&self, span_id: &str, status: SpanStatus) -> bool {
        lock(&self.inner.state).transaction.set_child_status(span_id, status)
    }

    // ========================================================================
    // Finishing
    // ========================================================================

    /// Finish now.
    pub fn finish(&self) -> bool {
        self.finish_at(timestamp_in_seconds())
    }

    /// Finish at the given timestamp. Returns `false` if already finished.
    ///
    /// Before-finish callbacks run without the state lock held. Calls made
    /// through a handle meanwhile see a finished copy of the transaction.
    pub fn finish_at(&self, end: f64) -> bool {
        let mut transaction = {
            let mut state = lock(&self.inner.state);
            if state.transaction.is_finished() {
                return false;
            }
            state.cancel_timers();
            let frozen = state.transaction.frozen_copy(end);
            std::mem::replace(&mut state.transaction, frozen)
        };

        transaction.finish(end);
        let event = transaction.to_event();
        {
            let mut state = lock(&self.inner.state);
            state.transaction = transaction;
            state.event = Some(event.clone());
        }

        tracing::debug!(
            "Finished idle transaction {} with status {}",
            event.transaction,
            event.status
        );
        if self.inner.finished_tx.send(event).is_err() {
            tracing::debug!("No receiver for finished transactions");
        }
        true
    }

    /// Mark as cancelled and finish now.
    pub fn cancel(&self) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if !state.transaction.set_status(SpanStatus::Cancelled) {
                return false;
            }
        }
        self.finish()
    }

    /// Mark as unsampled and finish now, so nothing is sent.
    pub fn discard(&self) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if !state.transaction.set_sampled(false) {
                return false;
            }
        }
        self.finish()
    }

    fn arm_idle_timer(&self, state: &mut IdleState) {
        state.cancel_idle_timer();
        let generation = state.idle_generation;
        let weak: Weak<IdleInner> = Arc::downgrade(&self.inner);
        state.idle_timer = spawn_timer(self.inner.timeouts.idle, move || {
            if let Some(inner) = weak.upgrade() {
                IdleTransaction { inner }.on_idle_timeout(generation);
            }
        });
    }

    fn on_idle_timeout(&self, generation: u64) {
        let end = {
            let state = lock(&self.inner.state);
            if state.idle_generation != generation
                || state.transaction.is_finished()
                || state.transaction.open_children() > 0
            {
                return;
            }
            state.last_child_end.unwrap_or_else(timestamp_in_seconds)
        };
        tracing::debug!("Idle timeout reached");
        self.finish_at(end);
    }

    fn on_final_timeout(&self) {
        let end = {
            let mut state = lock(&self.inner.state);
            if state.transaction.is_finished() {
                return;
            }
            state.transaction.set_status(SpanStatus::DeadlineExceeded);
            let final_timeout = self.inner.timeouts.final_timeout.unwrap_or_default();
            state.transaction.start_timestamp() + final_timeout.as_secs_f64()
        };
        tracing::debug!("Final timeout reached");
        self.finish_at(end);
    }
}

fn spawn_timer(delay: Duration, on_fire: impl FnOnce() + Send + 'static) -> Option<JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        })),
        Err(_) => {
            tracing::warn!("No async runtime, idle transaction timers are disabled");
            None
        }
    }
}

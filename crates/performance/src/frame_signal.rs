//! Reconciliation of native frame events with a JS-side fallback.
//!
//! Each listening cycle resolves to exactly one [`FrameSignal`]: either a
//! native "new frame" event confirms it, or the fallback timestamp is
//! delivered after the fallback delay. A cycle owns a latch that moves from
//! armed to fired exactly once; whichever path fires it first wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::timestamp_in_seconds;
use crate::lock;
use crate::native::{NativeBridge, NativeFrameEvent};

const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// A resolved display timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSignal {
    /// Listening cycle this signal resolves
    pub cycle: u64,
    /// Timestamp in seconds since the epoch
    pub timestamp: f64,
    /// No native frame event confirmed the timestamp
    pub is_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Armed,
    Fired,
    Superseded,
}

#[derive(Debug)]
struct Latch {
    cycle: u64,
    state: Mutex<LatchState>,
}

impl Latch {
    fn new(cycle: u64) -> Self {
        Self {
            cycle,
            state: Mutex::new(LatchState::Armed),
        }
    }

    fn is_armed(&self) -> bool {
        *lock(&self.state) == LatchState::Armed
    }

    fn try_fire(&self) -> bool {
        let mut state = lock(&self.state);
        if *state != LatchState::Armed {
            return false;
        }
        *state = LatchState::Fired;
        true
    }

    fn supersede(&self) {
        let mut state = lock(&self.state);
        if *state == LatchState::Armed {
            *state = LatchState::Superseded;
        }
    }
}

struct ReconcilerInner<B> {
    bridge: Arc<B>,
    fallback_delay: Duration,
    next_cycle: AtomicU64,
    current: Mutex<Option<Arc<Latch>>>,
    signals: broadcast::Sender<FrameSignal>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<B> ReconcilerInner<B> {
    fn emit(&self, latch: &Arc<Latch>, timestamp: f64, is_fallback: bool) {
        {
            let mut current = lock(&self.current);
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, latch)) {
                *current = None;
            }
        }

        let signal = FrameSignal {
            cycle: latch.cycle,
            timestamp,
            is_fallback,
        };
        tracing::debug!(
            "Frame signal for cycle {} at {} (fallback: {})",
            signal.cycle,
            signal.timestamp,
            signal.is_fallback
        );
        if self.signals.send(signal).is_err() {
            tracing::debug!("No subscribers for frame signal");
        }
    }

    fn on_native_frame(&self, event: NativeFrameEvent) {
        let armed = lock(&self.current).clone();
        match armed {
            Some(latch) if latch.try_fire() => {
                self.emit(&latch, event.new_frame_timestamp_in_seconds, false);
            }
            _ => tracing::trace!("Ignoring native frame event outside of a listening cycle"),
        }
    }
}

/// Races native frame confirmation against a delayed local fallback.
pub struct FrameSignalReconciler<B> {
    inner: Arc<ReconcilerInner<B>>,
}

impl<B> Clone for FrameSignalReconciler<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: NativeBridge> std::fmt::Debug for FrameSignalReconciler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSignalReconciler")
            .field("fallback_delay", &self.inner.fallback_delay)
            .field("listening", &self.is_listening())
            .finish()
    }
}

impl<B: NativeBridge> FrameSignalReconciler<B> {
    /// Create a reconciler. Nothing listens until [`Self::initialize`].
    pub fn new(bridge: Arc<B>, fallback_delay: Duration) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ReconcilerInner {
                bridge,
                fallback_delay,
                next_cycle: AtomicU64::new(1),
                current: Mutex::new(None),
                signals,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to the stream of native "new frame" events.
    ///
    /// Replaces any earlier subscription. Must run inside a tokio runtime.
    pub fn initialize(&self, mut native_events: broadcast::Receiver<NativeFrameEvent>) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                match native_events.recv().await {
                    Ok(event) => inner.on_native_frame(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {} native frame events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Native frame event stream closed");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = lock(&self.inner.listener).replace(handle) {
            previous.abort();
        }
    }

    /// Receive resolved frame signals.
    pub fn subscribe(&self) -> broadcast::Receiver<FrameSignal> {
        self.inner.signals.subscribe()
    }

    /// Check whether a listening cycle is armed.
    pub fn is_listening(&self) -> bool {
        lock(&self.inner.current).as_ref().is_some_and(|l| l.is_armed())
    }

    /// Arm a new listening cycle and start its fallback chain.
    ///
    /// A cycle that is still armed is superseded and will not deliver.
    /// Returns the id carried by the signal resolving this cycle.
    pub fn start_listening(&self) -> u64 {
        let cycle = self.inner.next_cycle.fetch_add(1, Ordering::Relaxed);
        let latch = Arc::new(Latch::new(cycle));

        if let Some(previous) = lock(&self.inner.current).replace(Arc::clone(&latch)) {
            tracing::debug!("Cycle {} superseded by cycle {}", previous.cycle, cycle);
            previous.supersede();
        }

        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_fallback(inner, latch));
            }
            Err(_) => tracing::warn!("No async runtime, frame signal fallback is disabled"),
        }

        cycle
    }

    /// Stop listening to native events.
    pub fn shutdown(&self) {
        if let Some(listener) = lock(&self.inner.listener).take() {
            listener.abort();
        }
        if let Some(latch) = lock(&self.inner.current).take() {
            latch.supersede();
        }
    }
}

async fn run_fallback<B: NativeBridge>(inner: Arc<ReconcilerInner<B>>, latch: Arc<Latch>) {
    let timestamp = match inner.bridge.get_new_screen_time_to_display().await {
        Ok(Some(timestamp)) => timestamp,
        Ok(None) => {
            tokio::task::yield_now().await;
            timestamp_in_seconds()
        }
        Err(e) => {
            tracing::debug!("Failed to get screen time to display, using local time: {}", e);
            tokio::task::yield_now().await;
            timestamp_in_seconds()
        }
    };

    if !latch.is_armed() {
        return;
    }

    tokio::time::sleep(inner.fallback_delay).await;

    if latch.try_fire() {
        inner.emit(&latch, timestamp, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::mock::{MockBridge, ScreenTime};
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::Instant;

    fn reconciler(bridge: MockBridge) -> (FrameSignalReconciler<MockBridge>, broadcast::Sender<NativeFrameEvent>) {
        let reconciler = FrameSignalReconciler::new(Arc::new(bridge), Duration::from_secs(3));
        let (native_tx, native_rx) = broadcast::channel(8);
        reconciler.initialize(native_rx);
        (reconciler, native_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_slow_native_answer() {
        let bridge = MockBridge::default();
        bridge.set_screen_time(ScreenTime::Value(123.5), Duration::from_millis(3_500));
        let (reconciler, _native_tx) = reconciler(bridge);
        let mut signals = reconciler.subscribe();

        let started = Instant::now();
        let cycle = reconciler.start_listening();
        let signal = signals.recv().await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(signal.cycle, cycle);
        assert_eq!(signal.timestamp, 123.5);
        assert!(signal.is_fallback);
        assert!(!reconciler.is_listening());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(matches!(signals.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_confirmation_cancels_fallback() {
        let bridge = MockBridge::default();
        bridge.set_screen_time(ScreenTime::Value(100.0), Duration::ZERO);
        let (reconciler, native_tx) = reconciler(bridge);
        let mut signals = reconciler.subscribe();

        reconciler.start_listening();
        tokio::time::sleep(Duration::from_secs(1)).await;
        native_tx
            .send(NativeFrameEvent {
                new_frame_timestamp_in_seconds: 101.0,
            })
            .unwrap();

        let signal = signals.recv().await.unwrap();
        assert_eq!(signal.timestamp, 101.0);
        assert!(!signal.is_fallback);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(matches!(signals.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_native_time_uses_local_time() {
        let bridge = MockBridge::default();
        bridge.set_screen_time(ScreenTime::Reject, Duration::ZERO);
        let (reconciler, _native_tx) = reconciler(bridge);
        let mut signals = reconciler.subscribe();

        let before = timestamp_in_seconds();
        reconciler.start_listening();
        let signal = signals.recv().await.unwrap();

        assert!(signal.is_fallback);
        assert!(signal.timestamp >= before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_native_event_is_ignored() {
        let (reconciler, native_tx) = reconciler(MockBridge::default());
        let mut signals = reconciler.subscribe();

        native_tx
            .send(NativeFrameEvent {
                new_frame_timestamp_in_seconds: 1.0,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(signals.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_supersedes_previous_cycle() {
        let bridge = MockBridge::default();
        bridge.set_screen_time(ScreenTime::Missing, Duration::ZERO);
        let (reconciler, _native_tx) = reconciler(bridge);
        let mut signals = reconciler.subscribe();

        let first = reconciler.start_listening();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = reconciler.start_listening();
        assert_ne!(first, second);

        let signal = signals.recv().await.unwrap();
        assert_eq!(signal.cycle, second);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(matches!(signals.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_latch_fires_once() {
        let latch = Latch::new(1);
        assert!(latch.try_fire());
        assert!(!latch.try_fire());

        let latch = Latch::new(2);
        latch.supersede();
        assert!(!latch.is_armed());
        assert!(!latch.try_fire());
    }
}

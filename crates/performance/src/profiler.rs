//! Profile Capture Engine
//!
//! Drives one profiling session at a time across the native bridge and turns
//! what the bridge returns into a combined profile waiting in a bounded queue
//! until its transaction is sent.
//!
//! Session lifecycle: `Idle -> Capturing -> Finishing -> Idle`. Starting a
//! session while one is capturing force-finishes the previous one first.
//! Start and finish are serialized by an async mutex, so a hard stop racing
//! a regular finish resolves to a single finish.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use profiling::{
    combine, convert_js_trace, CapturedProfile, ClockAlignment, MergeContext, ProfileEventContext, ProfileQueue,
    RawProfiles,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::now_ns;
use crate::envelope::{Envelope, EnvelopeItem};
use crate::error::{TracingError, TracingResult};
use crate::idle::IdleTransaction;
use crate::lock;
use crate::native::NativeBridge;
use crate::sampling::Sampler;
use crate::transaction::PROFILE_ID_KEY;

const DEFAULT_MAX_HISTORY: usize = 50;

// =============================================================================
// Capture Summary
// =============================================================================

/// Phase of the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapturePhase {
    Idle,
    Capturing,
    Finishing,
}

/// Outline of a finished capture, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub profile_id: String,
    pub transaction_name: String,
    pub platform: String,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub sample_count: usize,
    pub frame_count: usize,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Session {
    profile_id: String,
    transaction_name: String,
    start_ns: u64,
}

// =============================================================================
// Profiling Engine
// =============================================================================

struct EngineInner<B> {
    bridge: Arc<B>,
    sampler: Sampler,
    max_duration: Duration,
    alignment: OnceLock<ClockAlignment>,
    session: tokio::sync::Mutex<Option<Session>>,
    phase: Mutex<CapturePhase>,
    queue: Mutex<ProfileQueue<CapturedProfile>>,
    hard_stop: Mutex<Option<(String, JoinHandle<()>)>>,
    history: Mutex<VecDeque<CaptureSummary>>,
    max_history: usize,
}

/// Captures profiles for transactions. Cloning shares the same engine.
pub struct ProfilingEngine<B> {
    inner: Arc<EngineInner<B>>,
}

impl<B> Clone for ProfilingEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> std::fmt::Debug for ProfilingEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilingEngine")
            .field("phase", &*lock(&self.inner.phase))
            .field("queued", &lock(&self.inner.queue).len())
            .field("max_duration", &self.inner.max_duration)
            .finish()
    }
}

impl<B: NativeBridge> ProfilingEngine<B> {
    /// Create an engine.
    pub fn new(bridge: Arc<B>, sampler: Sampler, max_duration: Duration, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                bridge,
                sampler,
                max_duration,
                alignment: OnceLock::new(),
                session: tokio::sync::Mutex::new(None),
                phase: Mutex::new(CapturePhase::Idle),
                queue: Mutex::new(ProfileQueue::new(queue_capacity)),
                hard_stop: Mutex::new(None),
                history: Mutex::new(VecDeque::new()),
                max_history: DEFAULT_MAX_HISTORY,
            }),
        }
    }

    /// Current session phase.
    pub fn phase(&self) -> CapturePhase {
        *lock(&self.inner.phase)
    }

    /// Id of the profile being captured, if any.
    pub async fn active_profile_id(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.profile_id.clone())
    }

    /// Number of finished profiles waiting for their transaction.
    pub fn queued_count(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Check whether a finished profile is waiting under the given id.
    pub fn has_queued(&self, profile_id: &str) -> bool {
        lock(&self.inner.queue).contains(profile_id)
    }

    /// Take a finished profile out of the queue.
    pub fn take_queued(&self, profile_id: &str) -> Option<CapturedProfile> {
        lock(&self.inner.queue).take(profile_id)
    }

    /// Native to JS clock alignment, once a native clock reading succeeded.
    pub fn clock_alignment(&self) -> Option<ClockAlignment> {
        self.inner.alignment.get().copied()
    }

    /// Recently finished captures, oldest first.
    pub fn history(&self) -> Vec<CaptureSummary> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    /// Start profiling a transaction.
    ///
    /// Force-finishes a session that is still capturing. Returns the id of
    /// the new profile, which is also recorded on the transaction.
    pub async fn start(&self, transaction: &IdleTransaction) -> Option<String> {
        let mut session = self.inner.session.lock().await;

        if session.is_some() {
            tracing::debug!("Finishing the running profile before starting a new one");
            self.finish_locked(&mut session).await;
        }

        if transaction.is_finished() {
            tracing::debug!("Not profiling finished transaction {}", transaction.name());
            return None;
        }
        if !transaction.is_sampled() {
            tracing::debug!("Not profiling unsampled transaction {}", transaction.name());
            return None;
        }
        if !self.inner.sampler.sample() {
            tracing::debug!("Profile of {} not sampled", transaction.name());
            return None;
        }

        if !self.inner.bridge.start_profiling().await {
            tracing::warn!("Native profiler did not start");
            return None;
        }

        // Set only from a successful reading; a missing clock is retried on the next start.
        if self.inner.alignment.get().is_none() {
            match self.inner.bridge.native_clock_ns() {
                Some(native) => {
                    let _ = self.inner.alignment.set(ClockAlignment::from_readings(now_ns(), native));
                }
                None => tracing::debug!("Native clock unavailable, native samples stay unaligned"),
            }
        }

        let profile_id = Uuid::new_v4().simple().to_string();
        let transaction_name = transaction.name();
        transaction.set_data(PROFILE_ID_KEY, Value::String(profile_id.clone()));

        *session = Some(Session {
            profile_id: profile_id.clone(),
            transaction_name,
            start_ns: now_ns(),
        });
        *lock(&self.inner.phase) = CapturePhase::Capturing;
        self.schedule_hard_stop(&profile_id);

        tracing::debug!("Started profile {} for {}", profile_id, transaction.name());
        Some(profile_id)
    }

    /// Finish the running session. Returns the id of the queued profile.
    pub async fn finish(&self) -> Option<String> {
        let mut session = self.inner.session.lock().await;
        self.finish_locked(&mut session).await
    }

    /// Finish the running session if it captures the given profile.
    pub async fn finish_profile(&self, profile_id: &str) -> Option<String> {
        let mut session = self.inner.session.lock().await;
        if session.as_ref().map(|s| s.profile_id.as_str()) != Some(profile_id) {
            return None;
        }
        self.finish_locked(&mut session).await
    }

    /// Attach queued profiles to the transactions of an envelope.
    ///
    /// The profile id is removed from every transaction. Returns the number
    /// of profiles attached.
    pub fn attach_profiles(&self, envelope: &mut Envelope) -> usize {
        let mut profiles = Vec::new();

        for event in envelope.transactions_mut() {
            let Some(profile_id) = event.take_profile_id() else {
                continue;
            };
            if !event.sampled {
                continue;
            }

            let captured = lock(&self.inner.queue).take(&profile_id);
            let Some(captured) = captured else {
                let err = TracingError::UnmatchedProfile(profile_id);
                tracing::debug!("Not attaching profile to {}: {}", event.transaction, err);
                continue;
            };

            let ctx = ProfileEventContext {
                transaction_name: event.transaction.clone(),
                transaction_id: event.event_id.clone(),
                trace_id: event.trace_id.clone(),
                start_timestamp: Some(event.start_timestamp),
                release: event.release.clone(),
                environment: event.environment.clone(),
            };
            if let Some(profile) = captured.enrich(&ctx) {
                profiles.push(profile);
            }
        }

        let attached = profiles.len();
        for profile in profiles {
            envelope.push(EnvelopeItem::Profile(profile));
        }
        attached
    }

    async fn finish_locked(&self, session: &mut Option<Session>) -> Option<String> {
        let current = session.take()?;
        *lock(&self.inner.phase) = CapturePhase::Finishing;

        {
            let mut hard_stop = lock(&self.inner.hard_stop);
            if hard_stop.as_ref().is_some_and(|(id, _)| *id == current.profile_id) {
                if let Some((_, handle)) = hard_stop.take() {
                    handle.abort();
                }
            }
        }

        let raw = self.inner.bridge.stop_profiling().await;
        let end_ns = now_ns();
        let result = match raw {
            Some(raw) => self.collect(&current, raw, end_ns),
            None => Err(TracingError::NativeUnavailable("stop_profiling returned nothing".to_string())),
        };

        *lock(&self.inner.phase) = CapturePhase::Idle;

        match result {
            Ok(()) => Some(current.profile_id),
            Err(e) => {
                tracing::warn!("Discarding profile {}: {}", current.profile_id, e);
                None
            }
        }
    }

    fn collect(&self, session: &Session, raw: RawProfiles, end_ns: u64) -> TracingResult<()> {
        let js = convert_js_trace(&raw.js_trace)?;
        let ctx = MergeContext {
            start_ns: session.start_ns,
            end_ns,
            alignment: self.clock_alignment(),
        };
        let profile = combine(&session.profile_id, js, raw.platform, &ctx);

        self.record_history(CaptureSummary {
            profile_id: session.profile_id.clone(),
            transaction_name: session.transaction_name.clone(),
            platform: profile.platform().to_string(),
            duration: Duration::from_nanos(ctx.duration_ns()),
            sample_count: profile.js_profile().samples.len(),
            frame_count: profile.js_profile().frame_count(),
            finished_at: Utc::now(),
        });

        let captured = CapturedProfile {
            profile,
            start_ns: session.start_ns,
            end_ns,
        };
        if let Some((evicted, _)) = lock(&self.inner.queue).insert(session.profile_id.clone(), captured) {
            tracing::debug!("Evicted unclaimed profile {}", evicted);
        }
        Ok(())
    }

    fn record_history(&self, summary: CaptureSummary) {
        let mut history = lock(&self.inner.history);
        history.push_back(summary);
        if history.len() > self.inner.max_history {
            history.pop_front();
        }
    }

    fn schedule_hard_stop(&self, profile_id: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, profiles are not stopped after {:?}", self.inner.max_duration);
            return;
        };

        let weak: Weak<EngineInner<B>> = Arc::downgrade(&self.inner);
        let id = profile_id.to_string();
        let delay = self.inner.max_duration;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut hard_stop = lock(&inner.hard_stop);
                if hard_stop.as_ref().is_some_and(|(slot, _)| *slot == id) {
                    hard_stop.take();
                }
            }
            tracing::debug!("Profile {} reached the maximum duration", id);
            ProfilingEngine { inner }.finish_profile(&id).await;
        });

        if let Some((_, previous)) = lock(&self.inner.hard_stop).replace((profile_id.to_string(), task)) {
            previous.abort();
        }
    }
}

// =============================================================================
// Serde Helpers
// =============================================================================

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_nanos().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u128::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos as u64))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::IdleTimeouts;
    use crate::native::mock::MockBridge;
    use crate::transaction::{Transaction, TransactionEvent};
    use profiling::{
        AndroidProfile, CombinedProfile, Frame, JsStackFrame, JsTrace, NativeCpuProfile, PlatformProfile, Profile,
        Sample,
    };
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn raw_profiles() -> RawProfiles {
        RawProfiles::js_only(
            JsTrace::new()
                .with_frame(1, JsStackFrame::root())
                .with_frame(2, JsStackFrame::javascript("App(app.js:1:1)", Some(1)))
                .with_sample("14", 100, 2)
                .with_sample("14", 110, 2),
        )
    }

    fn engine(bridge: &Arc<MockBridge>, rate: Option<f64>) -> ProfilingEngine<MockBridge> {
        ProfilingEngine::new(
            Arc::clone(bridge),
            Sampler::seeded(rate, 3),
            Duration::from_secs(30),
            profiling::DEFAULT_PROFILE_QUEUE_CAPACITY,
        )
    }

    fn transaction(
        name: &str,
        sampled: bool,
    ) -> (IdleTransaction, mpsc::UnboundedReceiver<TransactionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let t = Transaction::new(name, "navigation").with_sampled(sampled);
        (IdleTransaction::start(t, IdleTimeouts::default(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_finish() {
        let bridge = Arc::new(MockBridge::default());
        bridge.set_stop_result(Some(raw_profiles()));
        let engine = engine(&bridge, Some(1.0));
        let (t, _rx) = transaction("Home", true);

        let id = engine.start(&t).await.unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(engine.phase(), CapturePhase::Capturing);
        assert_eq!(engine.active_profile_id().await.as_deref(), Some(id.as_str()));
        assert_eq!(t.with_transaction(|t| t.profile_id().map(str::to_string)), Some(id.clone()));

        assert_eq!(engine.finish().await.as_deref(), Some(id.as_str()));
        assert_eq!(engine.phase(), CapturePhase::Idle);
        assert!(engine.active_profile_id().await.is_none());
        assert!(engine.has_queued(&id));
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.history()[0].sample_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_without_session_is_noop() {
        let bridge = Arc::new(MockBridge::default());
        let engine = engine(&bridge, Some(1.0));
        assert!(engine.finish().await.is_none());
        assert!(engine.finish_profile("unknown").await.is_none());
        assert_eq!(bridge.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_force_finishes_first() {
        let bridge = Arc::new(MockBridge::default());
        bridge.set_stop_result(Some(raw_profiles()));
        let engine = engine(&bridge, Some(1.0));
        let (first, _rx1) = transaction("First", true);
        let (second, _rx2) = transaction("Second", true);

        let first_id = engine.start(&first).await.unwrap();
        let second_id = engine.start(&second).await.unwrap();

        assert_ne!(first_id, second_id);
        assert!(engine.has_queued(&first_id));
        assert_eq!(engine.active_profile_id().await.as_deref(), Some(second_id.as_str()));
        assert_eq!(bridge.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_and_transaction_preconditions() {
        let bridge = Arc::new(MockBridge::default());
        let (sampled, _rx1) = transaction("Home", true);
        let (unsampled, _rx2) = transaction("Home", false);

        assert!(engine(&bridge, None).start(&sampled).await.is_none());
        assert!(engine(&bridge, Some(0.0)).start(&sampled).await.is_none());
        assert!(engine(&bridge, Some(1.0)).start(&unsampled).await.is_none());

        sampled.finish();
        assert!(engine(&bridge, Some(1.0)).start(&sampled).await.is_none());
        assert_eq!(bridge.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_start_failure() {
        let bridge = Arc::new(MockBridge::default());
        bridge.start_result.store(false, Ordering::SeqCst);
        let engine = engine(&bridge, Some(1.0));
        let (t, _rx) = transaction("Home", true);

        assert!(engine.start(&t).await.is_none());
        assert_eq!(engine.phase(), CapturePhase::Idle);
        assert!(t.with_transaction(|t| t.profile_id().is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_or_empty_profiles_are_discarded() {
        let bridge = Arc::new(MockBridge::default());
        let engine = engine(&bridge, Some(1.0));
        let (t, _rx) = transaction("Home", true);

        engine.start(&t).await.unwrap();
        assert!(engine.finish().await.is_none());

        bridge.set_stop_result(Some(RawProfiles::js_only(JsTrace::new())));
        engine.start(&t).await.unwrap();
        assert!(engine.finish().await.is_none());

        assert_eq!(engine.queued_count(), 0);
        assert_eq!(engine.phase(), CapturePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_stop_after_max_duration() {
        let bridge = Arc::new(MockBridge::default());
        bridge.set_stop_result(Some(raw_profiles()));
        let engine = engine(&bridge, Some(1.0));
        let (t, _rx) = transaction("Home", true);

        let id = engine.start(&t).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(engine.has_queued(&id));
        assert!(engine.active_profile_id().await.is_none());
        assert_eq!(bridge.stop_calls.load(Ordering::SeqCst), 1);

        assert!(engine.finish().await.is_none());
        assert_eq!(bridge.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_android_profile_is_wrapped() {
        let bridge = Arc::new(MockBridge::default());
        bridge.set_stop_result(Some(raw_profiles().with_platform(PlatformProfile::Android(AndroidProfile {
            sampled_profile: "blob".to_string(),
            android_api_level: 34,
            build_id: None,
        }))));
        let engine = engine(&bridge, Some(1.0));
        let (t, _rx) = transaction("Home", true);

        let id = engine.start(&t).await.unwrap();
        engine.finish().await.unwrap();

        let captured = engine.take_queued(&id).unwrap();
        assert!(matches!(captured.profile, CombinedProfile::Android(_)));
        assert!(engine.take_queued(&id).is_none());
    }

    const NATIVE_CLOCK_NS: u64 = 5_000;

    /// One native sample taken 1 ms after the bridge clock reading.
    fn native_cpu_profiles() -> RawProfiles {
        raw_profiles().with_platform(PlatformProfile::NativeCpu(NativeCpuProfile {
            profile: Profile {
                samples: vec![Sample::new(0, "259", 0)],
                stacks: vec![vec![0]],
                frames: vec![Frame::function("-[RCTBridge start]")],
                ..Default::default()
            },
            profile_start_timestamp_ns: Some(NATIVE_CLOCK_NS + 1_000_000),
            ..Default::default()
        }))
    }

    fn native_sample_offset(captured: &CapturedProfile) -> u64 {
        captured
            .profile
            .js_profile()
            .samples
            .iter()
            .find(|s| s.thread_id == "259")
            .map(|s| s.elapsed_since_start_ns)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_cpu_profile_is_merged_on_js_clock() {
        let bridge = Arc::new(MockBridge::default());
        *bridge.clock_ns.lock().unwrap() = Some(NATIVE_CLOCK_NS);
        bridge.set_stop_result(Some(native_cpu_profiles()));
        let engine = engine(&bridge, Some(1.0));
        let (t, _rx) = transaction("Home", true);

        let id = engine.start(&t).await.unwrap();
        assert!(engine.clock_alignment().is_some());
        engine.finish().await.unwrap();

        let captured = engine.take_queued(&id).unwrap();
        let profile = captured.profile.js_profile();
        assert_eq!(profile.samples.len(), 3);
        assert_eq!(profile.frame_count(), 2);

        let native = profile.samples.iter().find(|s| s.thread_id == "259").unwrap();
        assert_eq!(native.stack_id, 1);
        assert_eq!(profile.stacks[native.stack_id], vec![1]);

        // Native profile started 1 ms after the alignment reading, the session right after it.
        let offset = native_sample_offset(&captured);
        assert!(offset > 500_000 && offset <= 1_000_000, "offset {offset}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_alignment_waits_for_a_native_clock_reading() {
        let bridge = Arc::new(MockBridge::default());
        bridge.set_stop_result(Some(native_cpu_profiles()));
        let engine = engine(&bridge, Some(1.0));
        let (t, _rx) = transaction("Home", true);

        let first = engine.start(&t).await.unwrap();
        assert!(engine.clock_alignment().is_none());
        engine.finish().await.unwrap();
        assert_eq!(native_sample_offset(&engine.take_queued(&first).unwrap()), 0);

        *bridge.clock_ns.lock().unwrap() = Some(NATIVE_CLOCK_NS);
        let second = engine.start(&t).await.unwrap();
        let alignment = engine.clock_alignment();
        assert!(alignment.is_some());
        engine.finish().await.unwrap();
        assert!(native_sample_offset(&engine.take_queued(&second).unwrap()) > 500_000);

        *bridge.clock_ns.lock().unwrap() = Some(NATIVE_CLOCK_NS * 2);
        engine.start(&t).await.unwrap();
        assert_eq!(engine.clock_alignment(), alignment);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_profiles_to_envelope() {
        let bridge = Arc::new(MockBridge::default());
        bridge.set_stop_result(Some(raw_profiles()));
        let engine = engine(&bridge, Some(1.0));
        let (t, _rx) = transaction("Home", true);

        let id = engine.start(&t).await.unwrap();
        engine.finish().await.unwrap();
        t.finish();

        let mut envelope = Envelope::from_transaction(t.finished_event().unwrap());
        assert_eq!(engine.attach_profiles(&mut envelope), 1);

        let event = envelope.transactions().next().unwrap();
        assert!(event.profile_id().is_none());
        let profile = envelope.profiles().next().unwrap();
        assert_eq!(profile.profile_id(), id);
        let CombinedProfile::Js(profile) = profile else {
            panic!("expected js profile");
        };
        assert_eq!(profile.transaction.as_ref().unwrap().name, "Home");
        assert_eq!(engine.queued_count(), 0);

        let mut again = Envelope::from_transaction(t.finished_event().unwrap());
        assert_eq!(engine.attach_profiles(&mut again), 0);
        assert!(again.transactions().next().unwrap().profile_id().is_none());
    }
}

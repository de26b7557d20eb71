//! Route and user interaction tracing.
//!
//! Starts idle transactions when the routing instrumentation reports a route
//! change or the user interacts with an element, and wires up everything
//! attached to them: profiling, time to display, app start attribution and
//! the before-finish rules.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedSender;

use crate::app_start::{attach_app_start, compute_app_start, APP_START_TRANSACTION, UI_LOAD_OP};
use crate::clock::timestamp_in_seconds;
use crate::config::TracingOptions;
use crate::frame_signal::FrameSignalReconciler;
use crate::idle::{IdleTimeouts, IdleTransaction};
use crate::lock;
use crate::native::{NativeAppStart, NativeBridge, NativeFrameEvent};
use crate::native_frames::NativeFramesTracker;
use crate::profiler::ProfilingEngine;
use crate::sampling::Sampler;
use crate::scope::Scope;
use crate::span::{SpanStatus, OP_INITIAL_DISPLAY, OP_NAVIGATION_PROCESSING};
use crate::time_to_display;
use crate::transaction::{Transaction, TransactionEvent};

/// Op of route transactions.
pub const NAVIGATION_OP: &str = "navigation";

/// Tag set on transactions clamped to the final timeout.
pub const MAX_DURATION_EXCEEDED_TAG: &str = "maxTransactionDurationExceeded";

/// Child ops that do not make a transaction worth sending on their own.
pub const HOUSEKEEPING_OPS: [&str; 2] = [OP_INITIAL_DISPLAY, OP_NAVIGATION_PROCESSING];

/// A route reported by the routing instrumentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    pub name: String,
    /// Instrumentation-specific route key
    pub key: Option<String>,
}

impl RouteContext {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }
}

/// Application lifecycle state reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

#[derive(Debug, Default)]
struct AppStartSlot {
    app_start: Option<NativeAppStart>,
}

#[derive(Debug, Default)]
struct IntegrationState {
    current_route: Option<RouteContext>,
    seen_routes: HashSet<String>,
    route_started: bool,
    route_transaction: Option<IdleTransaction>,
    route_change_started_at: Option<f64>,
    interaction_transaction: Option<IdleTransaction>,
    pending: Vec<IdleTransaction>,
}

struct IntegrationInner<B> {
    options: TracingOptions,
    bridge: Arc<B>,
    scope: Arc<Scope>,
    reconciler: FrameSignalReconciler<B>,
    profiler: ProfilingEngine<B>,
    native_frames: Arc<NativeFramesTracker<B>>,
    traces_sampler: Sampler,
    finished_tx: UnboundedSender<TransactionEvent>,
    app_start: Arc<Mutex<AppStartSlot>>,
    state: Mutex<IntegrationState>,
}

/// Creates and manages the idle transactions of an app.
pub struct TracingIntegration<B> {
    inner: Arc<IntegrationInner<B>>,
}

impl<B> Clone for TracingIntegration<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B> std::fmt::Debug for TracingIntegration<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingIntegration")
            .field("options", &self.inner.options)
            .field("current_route", &lock(&self.inner.state).current_route)
            .finish()
    }
}

impl<B: NativeBridge> TracingIntegration<B> {
    /// Create the integration. Finished transactions are sent on `finished_tx`.
    pub fn new(options: TracingOptions, bridge: Arc<B>, finished_tx: UnboundedSender<TransactionEvent>) -> Self {
        let reconciler = FrameSignalReconciler::new(Arc::clone(&bridge), options.frame_fallback_delay());
        let profiler = ProfilingEngine::new(
            Arc::clone(&bridge),
            Sampler::new(options.profiles_sample_rate),
            options.max_profile_duration(),
            options.profile_queue_capacity.max(1),
        );
        let native_frames = Arc::new(NativeFramesTracker::new(Arc::clone(&bridge)));
        let traces_sampler = Sampler::new(options.traces_sample_rate);

        Self {
            inner: Arc::new(IntegrationInner {
                options,
                bridge,
                scope: Arc::new(Scope::new()),
                reconciler,
                profiler,
                native_frames,
                traces_sampler,
                finished_tx,
                app_start: Arc::new(Mutex::new(AppStartSlot::default())),
                state: Mutex::new(IntegrationState::default()),
            }),
        }
    }

    pub fn options(&self) -> &TracingOptions {
        &self.inner.options
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.inner.scope
    }

    pub fn profiler(&self) -> &ProfilingEngine<B> {
        &self.inner.profiler
    }

    pub fn native_frames(&self) -> &Arc<NativeFramesTracker<B>> {
        &self.inner.native_frames
    }

    pub fn reconciler(&self) -> &FrameSignalReconciler<B> {
        &self.inner.reconciler
    }

    /// Route most recently reported by the routing instrumentation.
    pub fn current_route(&self) -> Option<RouteContext> {
        lock(&self.inner.state).current_route.clone()
    }

    /// Current route transaction, if it is still running.
    pub fn route_transaction(&self) -> Option<IdleTransaction> {
        lock(&self.inner.state)
            .route_transaction
            .clone()
            .filter(|t| !t.is_finished())
    }

    /// Current user interaction transaction, if it is still running.
    pub fn interaction_transaction(&self) -> Option<IdleTransaction> {
        lock(&self.inner.state)
            .interaction_transaction
            .clone()
            .filter(|t| !t.is_finished())
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Hook up native frame events and fetch the app start.
    pub async fn setup(&self, native_events: broadcast::Receiver<NativeFrameEvent>) {
        let options = &self.inner.options;
        self.inner
            .bridge
            .enable_native_frames_tracking(options.enable_native_frames_tracking);
        self.inner.reconciler.initialize(native_events);

        if !options.enable_app_start_tracking {
            return;
        }

        let Some(app_start) = self.inner.bridge.fetch_native_app_start().await else {
            tracing::debug!("Native app start unavailable");
            return;
        };
        if app_start.did_fetch_app_start {
            tracing::debug!("App start was already reported");
            return;
        }

        if options.routing_instrumentation {
            lock(&self.inner.app_start).app_start = Some(app_start);
        } else {
            self.report_standalone_app_start(app_start);
        }
    }

    fn report_standalone_app_start(&self, app_start: NativeAppStart) {
        let now = timestamp_in_seconds();
        let Some(metrics) = compute_app_start(&app_start, now, self.max_app_start_ms()) else {
            return;
        };

        let mut transaction = Transaction::new(APP_START_TRANSACTION, UI_LOAD_OP)
            .with_start_timestamp(now)
            .with_sampled(self.inner.traces_sampler.sample());
        attach_app_start(&mut transaction, &metrics);
        transaction.finish(now);

        tracing::debug!("Reporting app start of {} ms", metrics.duration_ms);
        if self.inner.finished_tx.send(transaction.to_event()).is_err() {
            tracing::debug!("No receiver for finished transactions");
        }
    }

    fn max_app_start_ms(&self) -> f64 {
        self.inner.options.app_start_max_duration_ms as f64
    }

    fn timeouts(&self) -> IdleTimeouts {
        IdleTimeouts {
            idle: self.inner.options.idle_timeout(),
            final_timeout: self.inner.options.final_timeout(),
        }
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// Start a route transaction for the route about to be shown.
    pub async fn on_route_will_change(&self, route: RouteContext) -> Option<IdleTransaction> {
        let interaction = lock(&self.inner.state).interaction_transaction.take();
        if let Some(interaction) = interaction {
            if interaction.cancel() {
                tracing::debug!("Cancelled interaction {} on route change", interaction.name());
            }
        }

        let (previously_seen, first_route) = {
            let mut state = lock(&self.inner.state);
            let previously_seen = !state.seen_routes.insert(route.name.clone());
            let first_route = !state.route_started;
            state.route_started = true;
            (previously_seen, first_route)
        };

        let mut transaction =
            Transaction::new(&route.name, NAVIGATION_OP).with_sampled(self.inner.traces_sampler.sample());
        if let Some(key) = &route.key {
            transaction.set_data("route.key", Value::String(key.clone()));
        }

        if first_route && self.inner.options.enable_app_start_tracking {
            let slot = Arc::clone(&self.inner.app_start);
            let max_ms = self.max_app_start_ms();
            transaction.register_before_finish(Box::new(move |t| {
                let app_start = lock(&slot).app_start.take();
                if let Some(app_start) = app_start {
                    if let Some(metrics) = compute_app_start(&app_start, t.start_timestamp(), max_ms) {
                        attach_app_start(t, &metrics);
                    }
                }
            }));
        }

        self.register_final_timeout_clamp(&mut transaction);

        if previously_seen && self.inner.options.ignore_empty_back_navigation_transactions {
            transaction.register_before_finish(Box::new(|t| {
                let only_housekeeping = t.spans().iter().all(|s| HOUSEKEEPING_OPS.contains(&s.op.as_str()));
                if only_housekeeping {
                    tracing::debug!("Not sending empty back navigation to {}", t.name());
                    t.set_sampled(false);
                }
            }));
        }

        let idle = IdleTransaction::start(transaction, self.timeouts(), self.inner.finished_tx.clone());
        self.inner.scope.set_active(idle.clone());

        {
            let mut state = lock(&self.inner.state);
            state.current_route = Some(route);
            state.route_transaction = Some(idle.clone());
            state.route_change_started_at = Some(idle.start_timestamp());
            state.pending.retain(|t| !t.is_finished());
            state.pending.push(idle.clone());
        }

        time_to_display::track_initial_display(&idle, &self.inner.reconciler);
        self.on_transaction_started(&idle).await;
        Some(idle)
    }

    /// Record the time the routing instrumentation spent on a route change.
    pub fn on_route_did_change(&self) -> bool {
        let (transaction, started_at) = {
            let mut state = lock(&self.inner.state);
            (state.route_transaction.clone(), state.route_change_started_at.take())
        };
        let (Some(transaction), Some(started_at)) = (transaction, started_at) else {
            return false;
        };

        let Some(span) = transaction.start_child_at(OP_NAVIGATION_PROCESSING, None, started_at) else {
            return false;
        };
        transaction.finish_child(&span)
    }

    /// Record full display of the current route.
    pub fn record_full_display(&self, timestamp: f64) -> bool {
        match self.route_transaction() {
            Some(transaction) => time_to_display::record_full_display(&transaction, timestamp),
            None => false,
        }
    }

    // ========================================================================
    // User interactions
    // ========================================================================

    /// Start a transaction for a user interaction with an element.
    pub async fn start_user_interaction(&self, element_id: Option<&str>, op: &str) -> Option<IdleTransaction> {
        let options = &self.inner.options;
        if !options.enable_user_interaction_tracing {
            tracing::debug!("User interaction tracing is disabled");
            return None;
        }
        if !options.routing_instrumentation {
            tracing::debug!("User interaction tracing needs a routing instrumentation");
            return None;
        }
        let Some(element_id) = element_id.filter(|id| !id.is_empty()) else {
            tracing::debug!("Not tracing {} without an element id", op);
            return None;
        };

        let (route, in_flight) = {
            let state = lock(&self.inner.state);
            (state.current_route.clone(), state.interaction_transaction.clone())
        };
        let Some(route) = route else {
            tracing::debug!("Not tracing {} before the first route", op);
            return None;
        };

        if let Some(active) = self.inner.scope.active() {
            let is_in_flight = in_flight.as_ref().is_some_and(|t| t.same_as(&active));
            if !is_in_flight {
                tracing::warn!(
                    "Did not create {} transaction because {} is active on the scope",
                    op,
                    active.name()
                );
                return None;
            }
        }

        if let Some(previous) = in_flight {
            if previous.discard() {
                tracing::debug!("Discarded interaction {}", previous.name());
            }
        }

        let name = format!("{}.{}", route.name, element_id);
        let mut transaction = Transaction::new(&name, op).with_sampled(self.inner.traces_sampler.sample());
        self.register_final_timeout_clamp(&mut transaction);

        let idle = IdleTransaction::start(transaction, self.timeouts(), self.inner.finished_tx.clone());
        self.inner.scope.set_active(idle.clone());
        {
            let mut state = lock(&self.inner.state);
            state.interaction_transaction = Some(idle.clone());
            state.pending.retain(|t| !t.is_finished());
            state.pending.push(idle.clone());
        }

        self.on_transaction_started(&idle).await;
        Some(idle)
    }

    // ========================================================================
    // App state
    // ========================================================================

    /// React to the app moving between foreground and background.
    pub fn on_app_state_change(&self, app_state: AppState) {
        if app_state != AppState::Background {
            return;
        }

        let pending = std::mem::take(&mut lock(&self.inner.state).pending);
        for transaction in pending {
            if transaction.cancel() {
                tracing::debug!("Cancelled {} as the app moved to the background", transaction.name());
            }
        }
    }

    async fn on_transaction_started(&self, transaction: &IdleTransaction) {
        self.inner.profiler.start(transaction).await;
        if self.inner.options.enable_native_frames_tracking && transaction.is_sampled() {
            self.inner
                .native_frames
                .on_transaction_start(&transaction.span_id())
                .await;
        }
    }

    fn register_final_timeout_clamp(&self, transaction: &mut Transaction) {
        let Some(final_timeout) = self.inner.options.final_timeout() else {
            return;
        };
        let max_duration = final_timeout.as_secs_f64();

        transaction.register_before_finish(Box::new(move |t| {
            let Some(end) = t.end_timestamp() else {
                return;
            };
            let boundary = t.start_timestamp() + max_duration;
            if end >= boundary {
                t.set_end_timestamp(boundary);
                t.set_status(SpanStatus::DeadlineExceeded);
                t.set_tag(MAX_DURATION_EXCEEDED_TAG, "true");
            }
        }));
    }
}

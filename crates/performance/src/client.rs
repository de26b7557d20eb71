//! High-level tracing client for easy integration.
//!
//! Owns the tracing integration and the pipeline that turns finished
//! transactions into envelopes: sampling decisions, frame measurements,
//! profile attachment and transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::TracingOptions;
use crate::envelope::Envelope;
use crate::error::TracingResult;
use crate::integration::TracingIntegration;
use crate::native::{NativeBridge, NativeFrameEvent};
use crate::native_frames::NativeFramesTracker;
use crate::profiler::ProfilingEngine;
use crate::transaction::TransactionEvent;
use crate::transport::{EnvelopeSink, EnvelopeTransport, TransportConfig};

struct ClientInner<B, S> {
    options: TracingOptions,
    profiler: ProfilingEngine<B>,
    native_frames: Arc<NativeFramesTracker<B>>,
    transport: tokio::sync::Mutex<EnvelopeTransport<S>>,
    transactions_sent: AtomicU64,
    transactions_dropped: AtomicU64,
    processed: watch::Sender<u64>,
}

/// High-level tracing client integrating all tracing components.
pub struct TracingClient<B, S> {
    integration: TracingIntegration<B>,
    inner: Arc<ClientInner<B, S>>,
    processed: watch::Receiver<u64>,
    pipeline: Option<JoinHandle<()>>,
}

impl<B, S> std::fmt::Debug for TracingClient<B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingClient")
            .field("integration", &self.integration)
            .field("transactions_sent", &self.inner.transactions_sent.load(Ordering::Relaxed))
            .field("transactions_dropped", &self.inner.transactions_dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<B: NativeBridge, S: EnvelopeSink> TracingClient<B, S> {
    /// Create a client. Finished transactions are processed on a task of
    /// the current tokio runtime.
    pub fn new(options: TracingOptions, bridge: Arc<B>, sink: S) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let integration = TracingIntegration::new(options.clone(), bridge, finished_tx);
        let transport_config = TransportConfig::default().with_max_queue_size(options.max_queued_envelopes);
        let (processed_tx, processed_rx) = watch::channel(0);

        let inner = Arc::new(ClientInner {
            options,
            profiler: integration.profiler().clone(),
            native_frames: Arc::clone(integration.native_frames()),
            transport: tokio::sync::Mutex::new(EnvelopeTransport::with_config(sink, transport_config)),
            transactions_sent: AtomicU64::new(0),
            transactions_dropped: AtomicU64::new(0),
            processed: processed_tx,
        });

        let pipeline = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(run_pipeline(Arc::clone(&inner), finished_rx))),
            Err(e) => {
                tracing::warn!("Failed to start transaction pipeline, nothing will be sent: {}", e);
                None
            }
        };

        Self {
            integration,
            inner,
            processed: processed_rx,
            pipeline,
        }
    }

    /// Hook up native frame events and fetch the app start.
    pub async fn setup(&self, native_events: broadcast::Receiver<NativeFrameEvent>) {
        self.integration.setup(native_events).await;
    }

    /// Route, interaction and app state entry points.
    pub fn integration(&self) -> &TracingIntegration<B> {
        &self.integration
    }

    pub fn options(&self) -> &TracingOptions {
        &self.inner.options
    }

    pub fn profiler(&self) -> &ProfilingEngine<B> {
        &self.inner.profiler
    }

    /// Wait until the pipeline has handled `count` finished transactions.
    pub async fn wait_until_processed(&self, count: u64) {
        let mut processed = self.processed.clone();
        if processed.wait_for(|n| *n >= count).await.is_err() {
            tracing::debug!("Transaction pipeline stopped");
        }
    }

    /// Number of finished transactions the pipeline has handled.
    pub fn processed_count(&self) -> u64 {
        *self.processed.borrow()
    }

    /// Send all queued envelopes.
    pub async fn flush(&self) -> TracingResult<()> {
        self.inner.transport.lock().await.flush().await
    }

    /// Set offline mode.
    pub async fn set_offline(&self, offline: bool) {
        self.inner.transport.lock().await.set_offline(offline);
    }

    /// Check if client is in offline mode.
    pub async fn is_offline(&self) -> bool {
        self.inner.transport.lock().await.is_offline()
    }

    /// Get number of envelopes waiting to be sent.
    pub async fn envelopes_queued(&self) -> usize {
        self.inner.transport.lock().await.queued_count()
    }

    /// Get total number of transactions queued for sending.
    pub fn transactions_sent(&self) -> u64 {
        self.inner.transactions_sent.load(Ordering::SeqCst)
    }

    /// Get total number of transactions dropped before sending.
    pub fn transactions_dropped(&self) -> u64 {
        self.inner.transactions_dropped.load(Ordering::SeqCst)
    }

    /// Stop processing finished transactions and native frame events.
    pub fn shutdown(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort();
        }
        self.integration.reconciler().shutdown();
    }
}

impl<B, S> Drop for TracingClient<B, S> {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort();
        }
    }
}

async fn run_pipeline<B: NativeBridge, S: EnvelopeSink>(
    inner: Arc<ClientInner<B, S>>,
    mut finished: UnboundedReceiver<TransactionEvent>,
) {
    while let Some(event) = finished.recv().await {
        inner.process(event).await;
        inner.processed.send_modify(|n| *n += 1);
    }
}

impl<B: NativeBridge, S: EnvelopeSink> ClientInner<B, S> {
    async fn process(&self, mut event: TransactionEvent) {
        let profile_id = event.profile_id().map(str::to_string);

        if !event.sampled {
            self.native_frames.forget(&event.span_id);
            if let Some(profile_id) = &profile_id {
                self.profiler.finish_profile(profile_id).await;
                self.profiler.take_queued(profile_id);
            }
            self.transactions_dropped.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Dropping unsampled transaction {}", event.transaction);
            return;
        }

        if event.release.is_none() {
            event.release = self.options.release.clone();
        }
        if event.environment.is_none() {
            event.environment = self.options.environment.clone();
        }

        if self.options.enable_native_frames_tracking {
            self.native_frames.process_event(&mut event).await;
        }
        if let Some(profile_id) = &profile_id {
            self.profiler.finish_profile(profile_id).await;
        }

        let mut envelope = Envelope::from_transaction(event);
        let attached = self.profiler.attach_profiles(&mut envelope);
        if attached > 0 {
            tracing::debug!("Attached {} profile(s) to envelope", attached);
        }

        let mut transport = self.transport.lock().await;
        match transport.queue(envelope) {
            Ok(()) => {
                self.transactions_sent.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                self.transactions_dropped.fetch_add(1, Ordering::SeqCst);
                tracing::warn!("Failed to queue envelope: {}", e);
                return;
            }
        }

        if transport.should_flush() && !transport.is_offline() {
            if let Err(e) = transport.flush().await {
                tracing::warn!("Failed to flush envelopes: {}", e);
            }
        }
    }
}

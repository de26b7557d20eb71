//! Transport layer for sending envelopes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::envelope::Envelope;
use crate::error::{TracingError, TracingResult};
use crate::lock;

/// Destination of serialized envelopes.
#[trait_variant::make(Send)]
pub trait EnvelopeSink: Send + Sync + 'static {
    /// Deliver one envelope. `bytes` is its wire encoding.
    async fn send(&self, envelope: &Envelope, bytes: Vec<u8>) -> TracingResult<()>;
}

/// Sink that keeps every envelope in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    envelopes: Mutex<Vec<Envelope>>,
    bytes_sent: Mutex<usize>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Envelopes received so far.
    pub fn envelopes(&self) -> Vec<Envelope> {
        lock(&self.envelopes).clone()
    }

    /// Total wire bytes received.
    pub fn bytes_sent(&self) -> usize {
        *lock(&self.bytes_sent)
    }
}

impl EnvelopeSink for RecordingSink {
    async fn send(&self, envelope: &Envelope, bytes: Vec<u8>) -> TracingResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TracingError::Transport("recording sink set to fail".to_string()));
        }
        *lock(&self.bytes_sent) += bytes.len();
        lock(&self.envelopes).push(envelope.clone());
        Ok(())
    }
}

impl<S: EnvelopeSink> EnvelopeSink for Arc<S> {
    async fn send(&self, envelope: &Envelope, bytes: Vec<u8>) -> TracingResult<()> {
        (**self).send(envelope, bytes).await
    }
}

/// Configuration for the envelope transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum envelopes to batch before a flush is due
    pub batch_size: usize,
    /// Maximum queue size before dropping envelopes
    pub max_queue_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            max_queue_size: 100,
        }
    }
}

impl TransportConfig {
    /// Set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the maximum queue size.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }
}

/// Buffers envelopes and hands them to a sink.
#[derive(Debug)]
pub struct EnvelopeTransport<S> {
    config: TransportConfig,
    sink: S,
    batch: Vec<Envelope>,
    offline: bool,
    failed_send_count: u32,
}

impl<S: EnvelopeSink> EnvelopeTransport<S> {
    /// Create a transport with default configuration.
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, TransportConfig::default())
    }

    /// Create a transport with full configuration.
    pub fn with_config(sink: S, config: TransportConfig) -> Self {
        Self {
            config,
            sink,
            batch: Vec::new(),
            offline: false,
            failed_send_count: 0,
        }
    }

    /// Queue an envelope for sending.
    pub fn queue(&mut self, envelope: Envelope) -> TracingResult<()> {
        if self.batch.len() >= self.config.max_queue_size {
            return Err(TracingError::QueueFull);
        }
        self.batch.push(envelope);
        Ok(())
    }

    /// Check if the batch is ready to be flushed.
    pub fn should_flush(&self) -> bool {
        self.batch.len() >= self.config.batch_size
    }

    /// Get the number of queued envelopes.
    pub fn queued_count(&self) -> usize {
        self.batch.len()
    }

    /// Check if there are any queued envelopes.
    pub fn has_queued(&self) -> bool {
        !self.batch.is_empty()
    }

    /// Send all queued envelopes in order.
    ///
    /// Stops at the first failure and keeps that envelope and everything
    /// after it queued.
    pub async fn flush(&mut self) -> TracingResult<()> {
        if self.offline {
            return Err(TracingError::Offline);
        }

        let pending = std::mem::take(&mut self.batch);
        let mut remaining = pending.into_iter();

        while let Some(envelope) = remaining.next() {
            let result = match envelope.to_bytes() {
                Ok(bytes) => self.sink.send(&envelope, bytes).await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                self.failed_send_count += 1;
                self.batch.push(envelope);
                self.batch.extend(remaining);
                return Err(e);
            }
        }

        self.failed_send_count = 0;
        Ok(())
    }

    /// Set offline mode.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Check if transport is in offline mode.
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Get the number of consecutive failed sends.
    pub fn failed_send_count(&self) -> u32 {
        self.failed_send_count
    }

    /// Get a reference to the currently queued envelopes.
    pub fn queued_envelopes(&self) -> &[Envelope] {
        &self.batch
    }

    /// Get the transport configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Get the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Clear all queued envelopes without sending.
    pub fn clear(&mut self) {
        self.batch.clear();
    }

    /// Take ownership of queued envelopes (for persistence/retry).
    pub fn take_queued(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.batch)
    }
}

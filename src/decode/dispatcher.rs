//! Decode dispatcher
//!
//! Owns a fixed pool of worker threads. Jobs are assigned round-robin and
//! queue FIFO on each worker's channel. A job whose worker never answers is
//! retried a bounded number of times before the caller sees a
//! [`DecodeError::Transport`].

use anyhow::Context;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{DecodeRequest, DecodeResponse};
use super::{worker, BodyDecoder, DecodeError, DecodeJob};
use crate::models::ExchangeId;

const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_TRANSPORT_RETRIES: u32 = 2;
const DEFAULT_MAX_DECODED_BYTES: usize = 64 * 1024 * 1024;

/// Serialized-request handler run on each worker thread
pub type WorkerHandler = Arc<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

/// Decode pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of worker threads (at least one is always started)
    pub worker_count: usize,
    /// Extra attempts after a worker fails to answer
    pub max_transport_retries: u32,
    /// Cap on decoded output per stage; `None` disables the cap
    pub max_decoded_bytes: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let parallelism = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            worker_count: parallelism.clamp(1, DEFAULT_MAX_WORKERS),
            max_transport_retries: DEFAULT_TRANSPORT_RETRIES,
            max_decoded_bytes: Some(DEFAULT_MAX_DECODED_BYTES),
        }
    }
}

impl DispatcherConfig {
    /// Defaults with `BODY_DECODE_WORKERS`, `BODY_DECODE_RETRIES` and
    /// `BODY_DECODE_MAX_BYTES` applied. A max-bytes value of 0 disables the cap.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(workers) = parse_override(&lookup, "BODY_DECODE_WORKERS") {
            config.worker_count = workers;
        }
        if let Some(retries) = parse_override(&lookup, "BODY_DECODE_RETRIES") {
            config.max_transport_retries = retries;
        }
        if let Some(max_bytes) = parse_override::<usize>(&lookup, "BODY_DECODE_MAX_BYTES") {
            config.max_decoded_bytes = (max_bytes > 0).then_some(max_bytes);
        }
        config
    }
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}", name, raw);
            None
        }
    }
}

struct WorkerEnvelope {
    message: String,
    reply: oneshot::Sender<String>,
}

struct WorkerSlot {
    sender: mpsc::UnboundedSender<WorkerEnvelope>,
}

struct DispatcherInner {
    config: DispatcherConfig,
    handler: WorkerHandler,
    slots: Mutex<Vec<WorkerSlot>>,
    next_slot: AtomicUsize,
    submitted: AtomicU64,
}

/// Pool of decode worker threads
#[derive(Clone)]
pub struct DecodeDispatcher {
    inner: Arc<DispatcherInner>,
}

impl DecodeDispatcher {
    /// Start a pool running the standard decode worker.
    pub fn new(config: DispatcherConfig) -> anyhow::Result<Self> {
        Self::with_handler(config, Arc::new(worker::handle_message))
    }

    /// Start a pool whose workers run `handler` on every serialized request.
    pub fn with_handler(config: DispatcherConfig, handler: WorkerHandler) -> anyhow::Result<Self> {
        let worker_count = config.worker_count.max(1);
        let slots = (0..worker_count)
            .map(|index| spawn_worker(index, Arc::clone(&handler)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        tracing::info!("Decode dispatcher started with {} worker(s)", worker_count);
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                config,
                handler,
                slots: Mutex::new(slots),
                next_slot: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Total jobs handed to the pool since it started
    pub fn jobs_submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    /// Decode a body that is not tied to a captured exchange.
    pub async fn decode(&self, body: Bytes, encoding: Option<&str>) -> Result<Bytes, DecodeError> {
        let job = DecodeJob {
            exchange_id: ExchangeId::new(),
            body,
            content_encoding: encoding.map(str::to_string),
        };
        self.submit(job).await
    }
}

impl BodyDecoder for DecodeDispatcher {
    fn submit(&self, job: DecodeJob) -> BoxFuture<'static, Result<Bytes, DecodeError>> {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        async move { inner.run(job).await }.boxed()
    }
}

impl DispatcherInner {
    async fn run(&self, job: DecodeJob) -> Result<Bytes, DecodeError> {
        let DecodeJob {
            exchange_id,
            body,
            content_encoding,
        } = job;
        let request = DecodeRequest {
            body,
            encoding: content_encoding,
            max_decoded_bytes: self.config.max_decoded_bytes,
        };
        let message = request.to_message().map_err(|e| DecodeError::Transport {
            attempts: 0,
            message: format!("serializing request: {}", e),
        })?;

        let max_attempts = self.config.max_transport_retries.saturating_add(1);
        let mut last_failure = String::new();
        for attempt in 1..=max_attempts {
            match self.attempt(message.clone()).await {
                Ok(response) => return response.into_result(),
                Err(reason) => {
                    tracing::warn!(
                        "Decode job for {} lost on attempt {}/{}: {}",
                        exchange_id,
                        attempt,
                        max_attempts,
                        reason
                    );
                    last_failure = reason;
                }
            }
        }

        Err(DecodeError::Transport {
            attempts: max_attempts,
            message: last_failure,
        })
    }

    async fn attempt(&self, message: String) -> Result<DecodeResponse, String> {
        let reply = self.enqueue(message)?;
        let raw = reply
            .await
            .map_err(|_| "worker dropped the job without replying".to_string())?;
        DecodeResponse::from_message(&raw).map_err(|e| format!("malformed worker response: {}", e))
    }

    fn enqueue(&self, message: String) -> Result<oneshot::Receiver<String>, String> {
        let (reply, receiver) = oneshot::channel();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let index = self.next_slot.fetch_add(1, Ordering::Relaxed) % slots.len();

        let envelope = match slots[index].sender.send(WorkerEnvelope { message, reply }) {
            Ok(()) => return Ok(receiver),
            Err(mpsc::error::SendError(envelope)) => envelope,
        };

        tracing::warn!("Decode worker {} is gone; respawning", index);
        slots[index] =
            spawn_worker(index, Arc::clone(&self.handler)).map_err(|e| format!("{:#}", e))?;
        slots[index]
            .sender
            .send(envelope)
            .map_err(|_| "respawned decode worker refused the job".to_string())?;
        Ok(receiver)
    }
}

fn spawn_worker(index: usize, handler: WorkerHandler) -> anyhow::Result<WorkerSlot> {
    let (sender, receiver) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name(format!("body-decode-{}", index))
        .spawn(move || run_worker(index, handler, receiver))
        .with_context(|| format!("spawning decode worker {}", index))?;
    Ok(WorkerSlot { sender })
}

fn run_worker(index: usize, handler: WorkerHandler, mut jobs: mpsc::UnboundedReceiver<WorkerEnvelope>) {
    while let Some(WorkerEnvelope { message, reply }) = jobs.blocking_recv() {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(&message))) {
            Ok(Ok(response)) => {
                // The caller may have stopped waiting; the result is simply dropped.
                let _ = reply.send(response);
            }
            Ok(Err(err)) => {
                tracing::warn!("Decode worker {} could not process a job: {:#}", index, err)
            }
            Err(_) => tracing::error!("Decode worker {} panicked while decoding", index),
        }
    }
    tracing::debug!("Decode worker {} shutting down", index);
}

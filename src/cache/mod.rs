//! Decoded body cache
//!
//! Memoizes one decode per exchange. Views call [`DecodedBodyCache::ensure`]
//! on every render and [`DecodedBodyCache::read`] to pick up the result; when
//! a decode lands, observers registered with
//! [`DecodedBodyCache::on_resolved`] (and broadcast subscribers) are told so
//! they can re-read.
//!
//! Entries hold only a `Weak` reference to their exchange. The owning
//! collection calls [`DecodedBodyCache::evict`] when it drops an exchange,
//! which releases the decoded body. An exchange that is still referenced
//! elsewhere keeps a tombstone so it is never decoded twice. Entries whose
//! exchange has died are reaped whenever a decode completes, and
//! [`DecodedBodyCache::sweep`] clears them on demand.

use bytes::Bytes;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::decode::{BodyDecoder, DecodeError, DecodeJob};
use crate::models::{Exchange, ExchangeId};

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Notification that an exchange's decoded body is available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub exchange_id: ExchangeId,
    pub decoded_len: usize,
}

/// Externally visible state of an exchange's entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Never requested (or evicted)
    Absent,
    /// Decode outstanding, or failed
    Pending,
    Resolved,
}

/// Handle for removing a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ResolvedCallback = Arc<dyn Fn(&Resolved) + Send + Sync>;

#[derive(Debug)]
enum EntryState {
    Pending,
    Resolved(Bytes),
    /// Decode failed. Shown as pending; never retried automatically.
    Failed(DecodeError),
    /// Evicted while the exchange was still alive. Shown as absent.
    Evicted,
}

#[derive(Debug)]
struct CacheEntry {
    exchange: Weak<Exchange>,
    state: EntryState,
}

struct CacheInner {
    decoder: Arc<dyn BodyDecoder>,
    runtime: Handle,
    entries: Mutex<HashMap<ExchangeId, CacheEntry>>,
    observers: RwLock<Vec<(ObserverId, ResolvedCallback)>>,
    next_observer: AtomicU64,
    events: broadcast::Sender<Resolved>,
}

/// Per-exchange memo of decoded bodies
#[derive(Clone)]
pub struct DecodedBodyCache {
    inner: Arc<CacheInner>,
}

impl DecodedBodyCache {
    /// Build a cache that submits jobs to `decoder` and drives their futures
    /// on `runtime`.
    pub fn new(decoder: Arc<dyn BodyDecoder>, runtime: Handle) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                decoder,
                runtime,
                entries: Mutex::new(HashMap::new()),
                observers: RwLock::new(Vec::new()),
                next_observer: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Current decoded body, if resolved. Never blocks on a decode.
    pub fn read(&self, exchange: &Exchange) -> Option<Bytes> {
        match self.inner.entries().get(&exchange.id()) {
            Some(CacheEntry {
                state: EntryState::Resolved(body),
                ..
            }) => Some(body.clone()),
            _ => None,
        }
    }

    pub fn status(&self, exchange: &Exchange) -> EntryStatus {
        match self.inner.entries().get(&exchange.id()) {
            None => EntryStatus::Absent,
            Some(entry) => match entry.state {
                EntryState::Resolved(_) => EntryStatus::Resolved,
                EntryState::Pending | EntryState::Failed(_) => EntryStatus::Pending,
                EntryState::Evicted => EntryStatus::Absent,
            },
        }
    }

    /// Why the exchange's decode failed, if it did
    pub fn failure(&self, exchange: &Exchange) -> Option<DecodeError> {
        match self.inner.entries().get(&exchange.id()) {
            Some(CacheEntry {
                state: EntryState::Failed(err),
                ..
            }) => Some(err.clone()),
            _ => None,
        }
    }

    /// Start decoding `exchange` unless a decode was already started.
    ///
    /// Cheap and idempotent; only the first call for an exchange submits a job,
    /// even if the exchange has since been evicted.
    pub fn ensure(&self, exchange: &Arc<Exchange>) {
        let id = exchange.id();
        {
            let mut entries = self.inner.entries();
            match entries.entry(id) {
                Entry::Occupied(_) => return,
                Entry::Vacant(slot) => {
                    slot.insert(CacheEntry {
                        exchange: Arc::downgrade(exchange),
                        state: EntryState::Pending,
                    });
                }
            }
        }

        tracing::debug!("Decoding body for exchange {}", id);
        let decoding = self.inner.decoder.submit(DecodeJob::for_exchange(exchange));
        let cache = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            let outcome = decoding.await;
            if let Some(cache) = cache.upgrade() {
                cache.complete(id, outcome);
            }
        });
    }

    /// Register a callback fired once for each entry that becomes resolved.
    pub fn on_resolved<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&Resolved) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(observer, _)| *observer != id);
        before != observers.len()
    }

    /// Channel of resolution events, for consumers that prefer polling
    pub fn subscribe(&self) -> broadcast::Receiver<Resolved> {
        self.inner.events.subscribe()
    }

    /// Release the decoded body of an exchange its owner has discarded.
    ///
    /// Returns false if there was nothing to evict.
    pub fn evict(&self, id: ExchangeId) -> bool {
        let mut entries = self.inner.entries();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        if matches!(entry.state, EntryState::Evicted) {
            return false;
        }
        if entry.exchange.strong_count() == 0 {
            entries.remove(&id);
        } else {
            entry.state = EntryState::Evicted;
        }
        tracing::debug!("Evicted decoded body for exchange {}", id);
        true
    }

    /// Drop entries whose exchange no longer has an owner. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.inner.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.exchange.strong_count() > 0);
        before - entries.len()
    }

    /// Number of entries that are pending or resolved
    pub fn len(&self) -> usize {
        self.inner
            .entries()
            .values()
            .filter(|entry| !matches!(entry.state, EntryState::Evicted))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<ExchangeId, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, id: ExchangeId, outcome: Result<Bytes, DecodeError>) {
        let resolved = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&id) else {
                tracing::debug!("Discarding decoded body for evicted exchange {}", id);
                return;
            };
            if entry.exchange.strong_count() == 0 {
                entries.remove(&id);
                tracing::debug!("Discarding decoded body for dropped exchange {}", id);
                return;
            }
            if !matches!(entry.state, EntryState::Pending) {
                return;
            }

            let resolved = match outcome {
                Ok(body) => {
                    let event = Resolved {
                        exchange_id: id,
                        decoded_len: body.len(),
                    };
                    entry.state = EntryState::Resolved(body);
                    Some(event)
                }
                Err(err) => {
                    tracing::warn!("Body for exchange {} could not be decoded: {}", id, err);
                    entry.state = EntryState::Failed(err);
                    None
                }
            };

            let before = entries.len();
            entries.retain(|_, entry| entry.exchange.strong_count() > 0);
            if entries.len() < before {
                tracing::debug!("Reaped {} entries for dropped exchanges", before - entries.len());
            }
            let Some(resolved) = resolved else {
                return;
            };
            resolved
        };

        tracing::debug!(
            "Decoded body for exchange {} ({} bytes)",
            id,
            resolved.decoded_len
        );
        self.notify(&resolved);
    }

    fn notify(&self, resolved: &Resolved) {
        // Callbacks run without any cache lock held so they can re-read.
        let observers: Vec<ResolvedCallback> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in observers {
            callback(resolved);
        }
        let _ = self.events.send(resolved.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExchangeSide;
    use futures::future::{BoxFuture, FutureExt};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Decoder that counts submissions and returns the body unchanged unless
    /// told to fail. Completion waits for `release` when gated.
    struct CountingDecoder {
        submitted: AtomicUsize,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    impl CountingDecoder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                submitted: AtomicUsize::new(0),
                fail,
                gate: None,
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                submitted: AtomicUsize::new(0),
                fail: false,
                gate: Some(gate),
            })
        }

        fn submitted(&self) -> usize {
            self.submitted.load(Ordering::SeqCst)
        }
    }

    impl BodyDecoder for CountingDecoder {
        fn submit(&self, job: DecodeJob) -> BoxFuture<'static, Result<Bytes, DecodeError>> {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            let gate = self.gate.clone();
            async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                tokio::task::yield_now().await;
                if fail {
                    Err(DecodeError::unknown_encoding("randomized"))
                } else {
                    Ok(job.body)
                }
            }
            .boxed()
        }
    }

    fn exchange(body: &'static str) -> Arc<Exchange> {
        Arc::new(Exchange::new(ExchangeSide::Response, HashMap::new(), body))
    }

    async fn next_event(rx: &mut broadcast::Receiver<Resolved>) -> Resolved {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("resolution within timeout")
            .expect("channel open")
    }

    async fn wait_for_failure(cache: &DecodedBodyCache, exchange: &Exchange) -> DecodeError {
        for _ in 0..500 {
            if let Some(err) = cache.failure(exchange) {
                return err;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("decode never failed");
    }

    #[tokio::test]
    async fn repeated_ensure_dispatches_one_job() {
        let decoder = CountingDecoder::new(false);
        let cache = DecodedBodyCache::new(decoder.clone(), Handle::current());
        let x = exchange("hello world");
        let mut events = cache.subscribe();

        for _ in 0..10 {
            cache.ensure(&x);
        }
        assert_eq!(cache.status(&x), EntryStatus::Pending);
        assert_eq!(cache.read(&x), None);

        let event = next_event(&mut events).await;
        assert_eq!(event.exchange_id, x.id());
        assert_eq!(cache.read(&x).unwrap(), &b"hello world"[..]);
        assert_eq!(cache.status(&x), EntryStatus::Resolved);

        cache.ensure(&x);
        assert_eq!(decoder.submitted(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ensure_from_many_threads_collapses() {
        let gate = Arc::new(Notify::new());
        let decoder = CountingDecoder::gated(gate.clone());
        let cache = DecodedBodyCache::new(decoder.clone(), Handle::current());
        let x = exchange("contended");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let x = Arc::clone(&x);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        cache.ensure(&x);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(decoder.submitted(), 1);
        let mut events = cache.subscribe();
        gate.notify_one();
        next_event(&mut events).await;
        assert_eq!(cache.read(&x).unwrap(), &b"contended"[..]);
    }

    #[tokio::test]
    async fn identical_bodies_are_decoded_independently() {
        let decoder = CountingDecoder::new(false);
        let cache = DecodedBodyCache::new(decoder.clone(), Handle::current());
        let a = exchange("same bytes");
        let b = exchange("same bytes");
        let mut events = cache.subscribe();

        cache.ensure(&a);
        cache.ensure(&b);
        assert_eq!(decoder.submitted(), 2);
        assert_eq!(cache.len(), 2);

        let mut resolved = vec![
            next_event(&mut events).await.exchange_id,
            next_event(&mut events).await.exchange_id,
        ];
        resolved.sort();
        let mut expected = vec![a.id(), b.id()];
        expected.sort();
        assert_eq!(resolved, expected);
    }

    #[tokio::test]
    async fn observers_fire_once_per_resolution() {
        let decoder = CountingDecoder::new(false);
        let cache = DecodedBodyCache::new(decoder, Handle::current());
        let x = exchange("observed");
        let fired = Arc::new(AtomicUsize::new(0));
        let reread = Arc::new(Mutex::new(None));
        {
            let fired = Arc::clone(&fired);
            let reread = Arc::clone(&reread);
            let cache_handle = cache.clone();
            let x = Arc::clone(&x);
            cache.on_resolved(move |event| {
                assert_eq!(event.exchange_id, x.id());
                assert_eq!(event.decoded_len, 8);
                fired.fetch_add(1, Ordering::SeqCst);
                *reread.lock().unwrap() = cache_handle.read(&x);
            });
        }
        let mut events = cache.subscribe();

        cache.ensure(&x);
        cache.ensure(&x);
        next_event(&mut events).await;
        cache.ensure(&x);
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(reread.lock().unwrap().as_deref(), Some(&b"observed"[..]));
    }

    #[tokio::test]
    async fn removed_observer_is_not_called() {
        let cache = DecodedBodyCache::new(CountingDecoder::new(false), Handle::current());
        let fired = Arc::new(AtomicUsize::new(0));
        let id = {
            let fired = Arc::clone(&fired);
            cache.on_resolved(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(cache.remove_observer(id));
        assert!(!cache.remove_observer(id));

        let x = exchange("quiet");
        let mut events = cache.subscribe();
        cache.ensure(&x);
        next_event(&mut events).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_decode_stays_pending_without_notifying() {
        let decoder = CountingDecoder::new(true);
        let cache = DecodedBodyCache::new(decoder.clone(), Handle::current());
        let x = exchange("broken");
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            cache.on_resolved(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        cache.ensure(&x);
        let err = wait_for_failure(&cache, &x).await;
        assert_eq!(err, DecodeError::unknown_encoding("randomized"));

        assert_eq!(cache.status(&x), EntryStatus::Pending);
        assert_eq!(cache.read(&x), None);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // No automatic retry
        cache.ensure(&x);
        assert_eq!(decoder.submitted(), 1);
    }

    #[tokio::test]
    async fn evicted_entry_discards_late_result() {
        let gate = Arc::new(Notify::new());
        let decoder = CountingDecoder::gated(gate.clone());
        let cache = DecodedBodyCache::new(decoder, Handle::current());
        let x = exchange("late");
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            cache.on_resolved(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        cache.ensure(&x);
        assert!(cache.evict(x.id()));
        assert_eq!(cache.status(&x), EntryStatus::Absent);

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.read(&x), None);
        assert!(cache.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn evicted_exchange_is_never_decoded_again() {
        let decoder = CountingDecoder::new(false);
        let cache = DecodedBodyCache::new(decoder.clone(), Handle::current());
        let x = exchange("evicted but still held");
        let mut events = cache.subscribe();

        cache.ensure(&x);
        next_event(&mut events).await;
        assert!(cache.evict(x.id()));
        assert!(!cache.evict(x.id()));
        assert_eq!(cache.status(&x), EntryStatus::Absent);
        assert_eq!(cache.read(&x), None);
        assert!(cache.is_empty());

        cache.ensure(&x);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(decoder.submitted(), 1);
        assert_eq!(cache.status(&x), EntryStatus::Absent);

        drop(x);
        assert_eq!(cache.sweep(), 1);
    }

    #[tokio::test]
    async fn completion_reaps_entries_of_dropped_exchanges() {
        let cache = DecodedBodyCache::new(CountingDecoder::new(false), Handle::current());
        let mut events = cache.subscribe();
        let dropped = exchange("dropped");
        cache.ensure(&dropped);
        next_event(&mut events).await;
        drop(dropped);

        let kept = exchange("kept");
        cache.ensure(&kept);
        next_event(&mut events).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.read(&kept).unwrap(), &b"kept"[..]);
    }

    #[tokio::test]
    async fn entries_do_not_keep_exchanges_alive() {
        let cache = DecodedBodyCache::new(CountingDecoder::new(false), Handle::current());
        let x = exchange("short lived");
        let weak = Arc::downgrade(&x);
        let mut events = cache.subscribe();

        cache.ensure(&x);
        next_event(&mut events).await;
        assert_eq!(cache.len(), 1);

        drop(x);
        assert!(weak.upgrade().is_none());
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn result_for_dropped_exchange_is_discarded() {
        let gate = Arc::new(Notify::new());
        let cache = DecodedBodyCache::new(CountingDecoder::gated(gate.clone()), Handle::current());
        let x = exchange("gone before decode finished");

        cache.ensure(&x);
        drop(x);
        gate.notify_one();

        for _ in 0..500 {
            if cache.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("entry for dropped exchange was never cleared");
    }
}

//! Passive collector: buffers ingested `QuotaInfo` and flushes them to
//! the Store in batches, on size, on a ticker, or on `stop`. Backed by a
//! bounded MPSC queue per the "overflow must be surfaced, never
//! silently dropped" design note — `try_send` gives `Ingest` its
//! non-blocking, buffer-or-reject contract for free. The ticker/stop
//! race is the same `tokio::select!` idiom used by the reservation
//! reaper, grounded on `main.rs`'s dual-server select loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::CollectorError;
use crate::model::QuotaInfo;
use crate::store::Store;

pub struct CollectorConfig {
    pub capacity: usize,
    pub flush_interval: std::time::Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            flush_interval: std::time::Duration::from_secs(5),
        }
    }
}

struct Channel {
    tx: mpsc::Sender<QuotaInfo>,
}

pub struct PassiveCollector {
    store: Arc<dyn Store>,
    config: CollectorConfig,
    running: AtomicBool,
    channel: Mutex<Option<Channel>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Items accepted by `ingest` but not yet committed to the Store —
    /// whether still queued in the channel or pulled into `run`'s
    /// in-memory `pending` vec waiting on the next flush trigger.
    buffered_count: AtomicUsize,
}

impl PassiveCollector {
    pub fn new(store: Arc<dyn Store>, config: CollectorConfig) -> Self {
        Self {
            store,
            config,
            running: AtomicBool::new(false),
            channel: Mutex::new(None),
            stop_tx: Mutex::new(None),
            buffered_count: AtomicUsize::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffered_count.load(Ordering::SeqCst)
    }

    /// Idempotent error on a second call: starting an already-running
    /// collector is a programmer error, not a transient one.
    pub fn start(self: &Arc<Self>) -> Result<oneshot::Receiver<()>, CollectorError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CollectorError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel(self.config.capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let this = self.clone();
        tokio::spawn(async move {
            {
                let mut channel = this.channel.lock().await;
                *channel = Some(Channel { tx });
            }
            {
                let mut guard = this.stop_tx.lock().await;
                *guard = Some(stop_tx);
            }
            this.run(rx, stop_rx).await;
            let _ = done_tx.send(());
        });

        Ok(done_rx)
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<QuotaInfo>, mut stop_rx: oneshot::Receiver<()>) {
        let mut pending: Vec<QuotaInfo> = Vec::new();
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                item = rx.recv() => {
                    match item {
                        Some(quota) => {
                            pending.push(quota);
                            if pending.len() >= self.config.capacity {
                                self.flush(&mut pending).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut pending).await;
                }
                _ = &mut stop_rx => {
                    while let Ok(quota) = rx.try_recv() {
                        pending.push(quota);
                    }
                    self.flush(&mut pending).await;
                    break;
                }
            }
        }

        *self.channel.lock().await = None;
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn stop(&self) -> Result<(), CollectorError> {
        if !self.is_running() {
            return Err(CollectorError::NotRunning);
        }
        if let Some(tx) = self.stop_tx.lock().await.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    pub async fn ingest(&self, quota: QuotaInfo) -> Result<(), CollectorError> {
        let channel = self.channel.lock().await;
        let Some(channel) = channel.as_ref() else {
            return Err(CollectorError::NotRunning);
        };
        channel.tx.try_send(quota).map(|()| {
            self.buffered_count.fetch_add(1, Ordering::SeqCst);
        }).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => CollectorError::BufferFull {
                capacity: self.config.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => CollectorError::NotRunning,
        })
    }

    /// Atomically drain `pending` and commit last-write-wins-by
    /// `collected_at` per account id.
    async fn flush(&self, pending: &mut Vec<QuotaInfo>) {
        if pending.is_empty() {
            return;
        }
        let drained = std::mem::take(pending);
        self.buffered_count.fetch_sub(drained.len(), Ordering::SeqCst);

        let mut by_account: HashMap<String, QuotaInfo> = HashMap::new();
        for quota in drained {
            by_account
                .entry(quota.account_id.clone())
                .and_modify(|existing| {
                    if quota.collected_at > existing.collected_at {
                        *existing = quota.clone();
                    }
                })
                .or_insert(quota);
        }

        for (account_id, quota) in by_account {
            if let Err(err) = self.store.set_quota(quota).await {
                tracing::warn!(account_id, error = %err, "failed to flush quota to store");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dimension::{Dimension, DimensionType};
    use crate::model::{DimensionSource, Provider};
    use crate::store::InMemoryStore;

    fn quota_at(account_id: &str, collected_at: chrono::DateTime<chrono::Utc>) -> QuotaInfo {
        let dims = vec![Dimension::new(DimensionType::RPM, 100.0, 10.0, DimensionSource::Headers)];
        let mut q = QuotaInfo::new(Provider::OpenAI, account_id, "default", dims, DimensionSource::Headers, 1.0);
        q.collected_at = collected_at;
        q
    }

    async fn started(capacity: usize) -> (Arc<PassiveCollector>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let collector = Arc::new(PassiveCollector::new(
            store.clone(),
            CollectorConfig {
                capacity,
                flush_interval: std::time::Duration::from_secs(60),
            },
        ));
        let _done = collector.start().unwrap();
        // let the spawned task install the channel before ingesting
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        (collector, store)
    }

    #[tokio::test]
    async fn ingest_before_start_fails_not_running() {
        let store = Arc::new(InMemoryStore::new());
        let collector = Arc::new(PassiveCollector::new(store, CollectorConfig::default()));
        let err = collector.ingest(quota_at("a", chrono::Utc::now())).await.unwrap_err();
        assert!(matches!(err, CollectorError::NotRunning));
    }

    #[tokio::test]
    async fn starting_twice_fails_already_running() {
        let (collector, _store) = started(10).await;
        let second = collector.start();
        assert!(matches!(second, Err(CollectorError::AlreadyRunning)));
        collector.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_flushes_last_write_wins_by_collected_at() {
        let (collector, store) = started(10).await;

        let earlier = chrono::Utc::now();
        let later = earlier + chrono::Duration::seconds(5);
        collector.ingest(quota_at("acc-1", earlier)).await.unwrap();
        collector.ingest(quota_at("acc-1", later)).await.unwrap();

        collector.stop().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let stored = store.get_quota("acc-1").await.unwrap().unwrap();
        assert_eq!(stored.collected_at, later);
    }

    #[tokio::test]
    async fn buffer_full_is_surfaced_to_caller() {
        let (collector, _store) = started(1).await;
        collector.ingest(quota_at("a", chrono::Utc::now())).await.unwrap();
        let err = collector.ingest(quota_at("b", chrono::Utc::now())).await.unwrap_err();
        assert!(matches!(err, CollectorError::BufferFull { capacity: 1 }));
        collector.stop().await.unwrap();
    }

    #[tokio::test]
    async fn buffer_size_reflects_unflushed_items() {
        let (collector, _store) = started(10).await;
        assert_eq!(collector.buffer_size(), 0);
        collector.ingest(quota_at("a", chrono::Utc::now())).await.unwrap();
        assert_eq!(collector.buffer_size(), 1);
        collector.stop().await.unwrap();
    }
}

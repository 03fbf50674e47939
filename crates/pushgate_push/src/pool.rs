//! Pool of persistent Apple connections.
//!
//! Connections are keyed by [`ApnsCredential::fingerprint`]. Idle entries are swept
//! lazily, only when a new connection is about to be created.

use crate::error::PushError;
use crate::outcome::Delivery;
use async_trait::async_trait;
use pushgate_common::credentials::ApnsCredential;
use pushgate_common::PushPayload;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// A live, multiplexed connection able to deliver to any device of its bundle.
#[async_trait]
pub trait ApnsConnection: Send + Sync {
    async fn send(&self, device_token: &str, payload: &PushPayload) -> Delivery;

    /// Releases the underlying transport.
    async fn close(&self);
}

/// Opens connections for the pool.
#[async_trait]
pub trait ApnsConnector: Send + Sync {
    async fn connect(&self, credential: &ApnsCredential)
        -> Result<Arc<dyn ApnsConnection>, PushError>;
}

struct PoolEntry {
    connection: Arc<dyn ApnsConnection>,
    sent: u64,
    failed: u64,
    last_used: Instant,
}

/// Counters of one pooled connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntryStats {
    pub fingerprint: String,
    pub sent: u64,
    pub failed: u64,
}

/// A connection checked out of the pool.
#[derive(Clone)]
pub struct PooledConnection {
    pub fingerprint: String,
    pub connection: Arc<dyn ApnsConnection>,
}

pub struct ApnsPool {
    ttl: Duration,
    connector: Arc<dyn ApnsConnector>,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl ApnsPool {
    pub fn new(ttl: Duration, connector: Arc<dyn ApnsConnector>) -> Self {
        Self {
            ttl,
            connector,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the connection for `credential`, opening one if none is pooled.
    ///
    /// The pool lock is held while connecting, so concurrent callers with the same
    /// credential end up sharing one connection.
    pub async fn acquire(&self, credential: &ApnsCredential) -> Result<PooledConnection, PushError> {
        let fingerprint = credential.fingerprint();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(&fingerprint) {
            entry.last_used = Instant::now();
            return Ok(PooledConnection {
                fingerprint,
                connection: entry.connection.clone(),
            });
        }

        self.sweep(&mut entries).await;

        let connection = self.connector.connect(credential).await?;
        info!(
            bundle_id = %credential.bundle_id,
            production = credential.production,
            pooled = entries.len() + 1,
            "opened apns connection"
        );
        entries.insert(
            fingerprint.clone(),
            PoolEntry {
                connection: connection.clone(),
                sent: 0,
                failed: 0,
                last_used: Instant::now(),
            },
        );
        Ok(PooledConnection {
            fingerprint,
            connection,
        })
    }

    async fn sweep(&self, entries: &mut HashMap<String, PoolEntry>) {
        let now = Instant::now();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_used) > self.ttl)
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();

        for fingerprint in stale {
            if let Some(entry) = entries.remove(&fingerprint) {
                debug!(
                    fingerprint = %&fingerprint[..12],
                    sent = entry.sent,
                    failed = entry.failed,
                    "closing idle apns connection"
                );
                entry.connection.close().await;
            }
        }
    }

    /// Adds delivery counts to a pooled connection.
    pub async fn record(&self, fingerprint: &str, sent: u64, failed: u64) {
        if let Some(entry) = self.entries.lock().await.get_mut(fingerprint) {
            entry.sent += sent;
            entry.failed += failed;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> Vec<PoolEntryStats> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(fingerprint, entry)| PoolEntryStats {
                fingerprint: fingerprint.clone(),
                sent: entry.sent,
                failed: entry.failed,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushgate_common::credentials::ApnsAuth;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopConnection {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ApnsConnection for NoopConnection {
        async fn send(&self, _device_token: &str, _payload: &PushPayload) -> Delivery {
            Delivery::Sent
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ApnsConnector for CountingConnector {
        async fn connect(
            &self,
            _credential: &ApnsCredential,
        ) -> Result<Arc<dyn ApnsConnection>, PushError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NoopConnection {
                closed: self.closed.clone(),
            }))
        }
    }

    fn credential(cert: &str) -> ApnsCredential {
        ApnsCredential {
            bundle_id: "com.example.app".to_string(),
            production: false,
            auth: ApnsAuth::Certificate {
                cert: cert.to_string(),
                key: "key".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn identical_credentials_share_a_connection() {
        let connector = Arc::new(CountingConnector::default());
        let pool = ApnsPool::new(Duration::from_secs(60), connector.clone());

        let first = pool.acquire(&credential("cert-a")).await.unwrap();
        let second = pool.acquire(&credential("cert-a")).await.unwrap();

        assert!(Arc::ptr_eq(&first.connection, &second.connection));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn different_certificates_get_separate_connections() {
        let connector = Arc::new(CountingConnector::default());
        let pool = ApnsPool::new(Duration::from_secs(60), connector.clone());

        pool.acquire(&credential("cert-a")).await.unwrap();
        pool.acquire(&credential("cert-b")).await.unwrap();

        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connections_are_swept_on_next_creation() {
        let connector = Arc::new(CountingConnector::default());
        let pool = ApnsPool::new(Duration::from_secs(60), connector.clone());

        pool.acquire(&credential("cert-a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        // Nothing is swept until a connection is created
        assert_eq!(pool.len().await, 1);

        pool.acquire(&credential("cert-b")).await.unwrap();
        assert_eq!(pool.len().await, 1);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn counters_accumulate_per_connection() {
        let pool = ApnsPool::new(
            Duration::from_secs(60),
            Arc::new(CountingConnector::default()),
        );
        let pooled = pool.acquire(&credential("cert-a")).await.unwrap();

        pool.record(&pooled.fingerprint, 3, 1).await;
        pool.record(&pooled.fingerprint, 2, 0).await;

        let stats = pool.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!((stats[0].sent, stats[0].failed), (5, 1));
    }
}

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{CacheManager, EmbeddingStore, IngestReport};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::source::{EnrollmentSource, SourceError};

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("enrollment fetch failed: {0}")]
    Source(#[from] SourceError),
    #[error("enrollment fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Periodically rebuilds the recognition cache from the enrollment source.
///
/// A failed or timed-out fetch leaves the installed snapshot untouched; the
/// next attempt waits for the following tick.
pub struct RefreshScheduler {
    source: Arc<dyn EnrollmentSource>,
    cache: Arc<CacheManager>,
    interval: Duration,
    fetch_timeout: Duration,
    embedding_dim: usize,
}

impl RefreshScheduler {
    pub fn new(
        source: Arc<dyn EnrollmentSource>,
        cache: Arc<CacheManager>,
        interval: Duration,
        fetch_timeout: Duration,
        embedding_dim: usize,
    ) -> Self {
        Self {
            source,
            cache,
            interval,
            fetch_timeout,
            embedding_dim,
        }
    }

    /// Fetch, build and install one snapshot.
    pub async fn refresh_once(&self) -> Result<IngestReport, RefreshError> {
        let records = tokio::time::timeout(self.fetch_timeout, self.source.fetch_all())
            .await
            .map_err(|_| RefreshError::Timeout(self.fetch_timeout))??;

        let (store, report) = EmbeddingStore::from_records(records, self.embedding_dim);
        self.cache.install_snapshot(store);

        tracing::info!(
            accepted = report.accepted,
            rejected = report.rejected,
            generation = self.cache.generation(),
            "recognition cache refreshed"
        );
        Ok(report)
    }

    /// Run [`refresh_once`](Self::refresh_once) every interval until `cancel`
    /// fires. The first periodic refresh happens one interval after spawning.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.refresh_once().await {
                            tracing::warn!(
                                error = %err,
                                identities = self.cache.get_snapshot().len(),
                                "refresh failed; keeping previous snapshot"
                            );
                        }
                    }
                }
            }
            tracing::info!("refresh loop stopped");
        })
    }
}

//! Bounded-time, compare-and-swap access to the [`Store`].

use crate::error::{LedgerError, StoreError};
use crate::store::{Record, Store, Versioned};
use crate::dedup::DEFAULT_DEDUP_WINDOW;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{trace, warn};
use uuid::Uuid;

/// Ledger tuning.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Upper bound on every store call.
    pub store_timeout: Duration,
    /// Compare-and-swap attempts per entity write.
    pub cas_attempts: u32,
    /// Attempts for the dependent step of a two-step operation.
    pub saga_attempts: u32,
    /// Base delay between saga attempts, multiplied by the attempt number.
    pub saga_backoff: Duration,
    /// Idempotency keys remembered per record.
    pub dedup_window: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            cas_attempts: 16,
            saga_attempts: 3,
            saga_backoff: Duration::from_millis(25),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

#[derive(Clone)]
pub(crate) struct Gateway {
    store: Arc<dyn Store>,
    config: LedgerConfig,
}

impl Gateway {
    pub(crate) fn new(store: Arc<dyn Store>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub(crate) fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Await a store call, failing with [`LedgerError::DependencyTimeout`]
    /// once the configured bound passes.
    pub(crate) async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(LedgerError::from),
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.config.store_timeout.as_millis() as u64,
                    "Store call timed out"
                );
                Err(LedgerError::DependencyTimeout { operation })
            }
        }
    }

    pub(crate) async fn find<T: Record>(&self, id: Uuid) -> Result<Option<Versioned<T>>, LedgerError> {
        self.call("get", T::table(self.store()).get(id)).await
    }

    pub(crate) async fn load<T: Record>(&self, id: Uuid) -> Result<Versioned<T>, LedgerError> {
        self.find(id)
            .await?
            .ok_or_else(|| LedgerError::not_found(T::KIND, id))
    }

    pub(crate) async fn insert<T: Record>(&self, record: T) -> Result<T, LedgerError> {
        let id = record.id();
        let saved = self
            .call("insert", T::table(self.store()).insert(id, record))
            .await?;
        Ok(saved.record)
    }

    /// Read-modify-write one record.
    ///
    /// `apply` runs against a fresh copy on every attempt and must be
    /// repeatable. An error from `apply` aborts without writing.
    pub(crate) async fn mutate<T, R, F>(&self, id: Uuid, mut apply: F) -> Result<(T, R), LedgerError>
    where
        T: Record,
        R: Send,
        F: FnMut(&mut T) -> Result<R, LedgerError> + Send,
    {
        for attempt in 1..=self.config.cas_attempts.max(1) {
            let Versioned {
                version,
                record: mut next,
            } = self.load::<T>(id).await?;
            let out = apply(&mut next)?;

            let replace = T::table(self.store()).replace(id, version, next);
            match self.call("replace", replace).await {
                Ok(saved) => return Ok((saved.record, out)),
                Err(LedgerError::Store(StoreError::VersionConflict { .. })) => {
                    trace!(entity = T::KIND, %id, attempt, "Write lost a race, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        warn!(entity = T::KIND, %id, attempts = self.config.cas_attempts, "Gave up after repeated write conflicts");
        Err(LedgerError::Conflict {
            entity: T::KIND,
            id,
        })
    }

    /// Run the dependent step of a two-step operation, retrying failures
    /// that may be transient. The step must be idempotent.
    pub(crate) async fn retry<T, F, Fut>(&self, step: &'static str, mut run: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let attempts = self.config.saga_attempts.max(1);
        let mut attempt = 1;
        loop {
            match run().await {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(step, attempt, error = %err, "Step failed, retrying");
                    tokio::time::sleep(self.config.saga_backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

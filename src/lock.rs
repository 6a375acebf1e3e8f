//! Expirable distributed lock used to serialize periodic jobs cluster-wide.
//!
//! The lock is a lease: acquiring writes a (name, token, expiry) row; holders
//! are expected to finish or extend before the lease runs out, and expired
//! rows are reaped lazily before every acquire attempt. Release is
//! token-scoped, so a holder can never release a lease that has expired and
//! been re-acquired by someone else.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use uuid::Uuid;

use crate::errors::{ExperimentError, Result};
use crate::metrics;
use crate::store::StoreError;

/// Lease storage. Implementations must make `try_create` atomic: exactly one
/// of two racing creators for the same name wins.
pub trait LockStore: Send + Sync {
    /// Delete every lease expiring at or before `now`.
    fn reap(&self, now: DateTime<Utc>) -> std::result::Result<(), StoreError>;

    /// Insert a lease if the name is free. Returns false when the name is
    /// already held.
    fn try_create(
        &self,
        name: &str,
        token: Uuid,
        expire_at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError>;

    /// Move the expiry of a currently-held lease. Token must match.
    fn refresh(
        &self,
        name: &str,
        token: Uuid,
        expire_at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError>;

    /// Whether this exact lease (name and token) exists.
    fn exists(&self, name: &str, token: Uuid) -> std::result::Result<bool, StoreError>;

    /// Delete the lease if the token matches. Returns whether a row went away.
    fn remove(&self, name: &str, token: Uuid) -> std::result::Result<bool, StoreError>;
}

/// In-process lease store.
#[derive(Default)]
pub struct MemoryLockStore {
    leases: DashMap<String, (Uuid, DateTime<Utc>)>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for MemoryLockStore {
    fn reap(&self, now: DateTime<Utc>) -> std::result::Result<(), StoreError> {
        self.leases.retain(|_, (_, expire_at)| *expire_at > now);
        Ok(())
    }

    fn try_create(
        &self,
        name: &str,
        token: Uuid,
        expire_at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError> {
        let mut won = false;
        self.leases.entry(name.to_string()).or_insert_with(|| {
            won = true;
            (token, expire_at)
        });
        Ok(won)
    }

    fn refresh(
        &self,
        name: &str,
        token: Uuid,
        expire_at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError> {
        match self.leases.get_mut(name) {
            Some(mut lease) if lease.0 == token => {
                lease.1 = expire_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn exists(&self, name: &str, token: Uuid) -> std::result::Result<bool, StoreError> {
        Ok(self
            .leases
            .get(name)
            .map(|lease| lease.0 == token)
            .unwrap_or(false))
    }

    fn remove(&self, name: &str, token: Uuid) -> std::result::Result<bool, StoreError> {
        Ok(self
            .leases
            .remove_if(name, |_, (held, _)| *held == token)
            .is_some())
    }
}

/// Lease duration and polling deadline when the caller supplies none.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// Ceiling on requested timeouts, far beyond any sane lease.
pub const MAX_LOCK_TIMEOUT: Duration = Duration::from_secs(9_223_372_036);
const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const STORE_ERROR_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const RELEASE_ATTEMPTS: usize = 10;

/// Handle on one named lease.
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    name: String,
    token: Uuid,
    retry_interval: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            token: Uuid::new_v4(),
            retry_interval: RETRY_INTERVAL,
        }
    }

    /// Override the polling cadence of blocking acquires.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the lock. The lease auto-expires after `timeout`.
    ///
    /// A blocking acquire keeps retrying every [`RETRY_INTERVAL`] (jittered
    /// by ±25% so a herd of waiters spreads out) until `timeout` elapses.
    /// A timeout together with `blocking = false` is a caller error.
    pub fn acquire(&mut self, blocking: bool, timeout: Option<Duration>) -> Result<bool> {
        if !blocking && timeout.is_some() {
            return Err(ExperimentError::TimeoutWithoutBlocking);
        }
        let timeout = timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT);
        if timeout > MAX_LOCK_TIMEOUT {
            return Err(ExperimentError::TimeoutTooLarge(timeout));
        }

        self.reap();
        let deadline = Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let acquired = self.acquire_until(blocking, deadline);
        if acquired {
            // restart the lease now that we actually hold it
            let expire_at = Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
            if let Err(err) = self.store.refresh(&self.name, self.token, expire_at) {
                tracing::warn!(lock = %self.name, error = %err, "lease refresh after acquire failed");
            }
        }
        Ok(acquired)
    }

    fn acquire_until(&self, blocking: bool, deadline: DateTime<Utc>) -> bool {
        if self.try_create(deadline) {
            return true;
        }
        if !blocking {
            return false;
        }
        while Utc::now() < deadline {
            std::thread::sleep(jitter(self.retry_interval, 0.75, 1.25));
            self.reap();
            if self.try_create(deadline) {
                return true;
            }
        }
        false
    }

    fn try_create(&self, expire_at: DateTime<Utc>) -> bool {
        match self.store.try_create(&self.name, self.token, expire_at) {
            Ok(true) => true,
            Ok(false) => {
                metrics::LOCK_CONTENTION_TOTAL
                    .with_label_values(&[&self.name])
                    .inc();
                false
            }
            Err(err) => {
                tracing::warn!(lock = %self.name, error = %err, "lock acquire attempt failed");
                false
            }
        }
    }

    fn reap(&self) {
        if let Err(err) = self.store.reap(Utc::now()) {
            tracing::warn!(lock = %self.name, error = %err, "expired lease cleanup failed");
        }
    }

    /// Extend a held lease by `timeout` from now. Non-blocking; false when
    /// the lease is no longer ours.
    pub fn extend(&self, timeout: Duration) -> bool {
        if !self.locked() {
            return false;
        }
        let expire_at = Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        match self.store.refresh(&self.name, self.token, expire_at) {
            Ok(refreshed) => refreshed,
            Err(err) => {
                tracing::warn!(lock = %self.name, error = %err, "lease extension failed");
                false
            }
        }
    }

    /// Whether this handle currently holds a live lease.
    pub fn locked(&self) -> bool {
        self.reap();
        match self.store.exists(&self.name, self.token) {
            Ok(held) => held,
            Err(err) => {
                tracing::warn!(lock = %self.name, error = %err, "lease check failed");
                false
            }
        }
    }

    /// Release the lock so it may be acquired again. Transient store errors
    /// are retried with jittered backoff; running out of attempts surfaces
    /// loudly, since the lease would otherwise linger until expiry.
    pub fn release(&mut self) -> Result<bool> {
        let mut last_error = None;
        for attempt in 0..RELEASE_ATTEMPTS {
            match self.store.remove(&self.name, self.token) {
                Ok(removed) => return Ok(removed),
                Err(err) => {
                    last_error = Some(err);
                    if attempt < RELEASE_ATTEMPTS - 1 {
                        std::thread::sleep(jitter(STORE_ERROR_RETRY_INTERVAL, 0.3, 1.6));
                    }
                }
            }
        }
        Err(ExperimentError::LockReleaseFailed {
            name: self.name.clone(),
            attempts: RELEASE_ATTEMPTS,
            source: last_error.unwrap_or_else(|| StoreError::Connection("unknown".to_string())),
        })
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(error = %err, "lock release on drop failed");
        }
    }
}

fn jitter(base: Duration, low: f64, high: f64) -> Duration {
    base.mul_f64(rand::thread_rng().gen_range(low..high))
}

//! One exclusive lock per bucket.
//!
//! Locks are created on first reference and handed out as owned guards. Releasing a guard
//! is always deferred to a spawned timer, even with a zero delay, so waiters already queued
//! on the bucket (tokio's mutex is FIFO) get their turn before the releasing caller can
//! come back around.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::{Instant, sleep_until},
};

use super::{
    bucket::BucketKey,
    internal_event::{BucketsEvicted, InternalEvent, ReleaseScheduled},
};

#[derive(Debug, Default)]
struct Bucket {
    lock: Arc<Mutex<()>>,
    not_before: Option<Instant>,
}

/// Exclusive hold on a bucket. Dropping it releases the bucket immediately; prefer
/// [`LockRegistry::schedule_release`].
#[derive(Debug)]
pub struct BucketGuard {
    key: BucketKey,
    _guard: OwnedMutexGuard<()>,
}

impl BucketGuard {
    pub fn key(&self) -> &BucketKey {
        &self.key
    }
}

/// Registry of bucket locks.
///
/// Without a capacity the registry grows by one entry per distinct key and never shrinks,
/// which is bounded by the set of route/scope combinations a program actually uses. With a
/// capacity, inserting a new key into a full registry first drops every idle entry: one
/// with no holder, no waiter and no pending release. An evicted key is recreated unlocked
/// on its next use, which is indistinguishable from the entry never having been dropped.
#[derive(Debug, Default)]
pub struct LockRegistry {
    buckets: StdMutex<HashMap<BucketKey, Bucket>>,
    capacity: Option<usize>,
}

impl LockRegistry {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            buckets: StdMutex::default(),
            capacity,
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<BucketKey, Bucket>> {
        // Poisoning can only come from a panic between plain map operations.
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the lock for `key`, creating it on first use.
    pub fn get_lock(&self, key: &BucketKey) -> Arc<Mutex<()>> {
        let mut buckets = self.buckets();
        if let Some(bucket) = buckets.get(key) {
            return Arc::clone(&bucket.lock);
        }

        if let Some(capacity) = self.capacity
            && buckets.len() >= capacity
        {
            let before = buckets.len();
            // The map's own reference is the only one left on an idle bucket.
            buckets.retain(|_, bucket| Arc::strong_count(&bucket.lock) > 1);
            BucketsEvicted {
                evicted: before - buckets.len(),
                remaining: buckets.len(),
            }
            .emit();
        }

        let bucket = Bucket::default();
        let lock = Arc::clone(&bucket.lock);
        buckets.insert(key.clone(), bucket);
        lock
    }

    /// Suspends until the bucket is free. Waiters are served in arrival order.
    pub async fn acquire(&self, key: &BucketKey) -> BucketGuard {
        let lock = self.get_lock(key);
        BucketGuard {
            key: key.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Releases `guard` once `delay` has elapsed.
    ///
    /// The release never happens inline, a zero delay still waits for the timer task to be
    /// scheduled. Must be called from within a tokio runtime.
    pub fn schedule_release(&self, guard: BucketGuard, delay: Duration) {
        let release_at = Instant::now() + delay;
        if let Some(bucket) = self.buckets().get_mut(&guard.key) {
            bucket.not_before = Some(release_at);
        }
        ReleaseScheduled {
            bucket: &guard.key,
            delay,
        }
        .emit();

        tokio::spawn(async move {
            sleep_until(release_at).await;
            drop(guard);
        });
    }

    /// The instant the most recent scheduled release of `key` fires (or fired).
    pub fn not_before(&self, key: &BucketKey) -> Option<Instant> {
        self.buckets().get(key).and_then(|bucket| bucket.not_before)
    }

    pub fn is_locked(&self, key: &BucketKey) -> bool {
        self.buckets()
            .get(key)
            .is_some_and(|bucket| bucket.lock.try_lock().is_err())
    }

    pub fn len(&self) -> usize {
        self.buckets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets().is_empty()
    }
}

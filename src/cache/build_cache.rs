//! Single-flight keyed build cache.
//!
//! [`BuildCache`] maps a key to a built value and guarantees that at most one
//! build per key is in flight. Entries move through a small state machine held
//! in a [`DashMap`] (per-shard locking, never a lock across a build):
//!
//! - **vacant** → the first requester inserts `Pending(in_flight)` and builds;
//! - **Pending** → later requesters wait on the in-flight `Notify` and share
//!   the builder's outcome, success or failure;
//! - **Ready** → served directly.
//!
//! A failed or uncacheable build is handed to the builder and every current
//! waiter, then the key goes back to vacant, so the next request retries. A
//! build future that is dropped mid-flight removes its `Pending` entry and
//! wakes its waiters, one of which becomes the new builder.

use crate::core::AggregatorResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use regex::Regex;
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;

/// A cached value with its key and creation time.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// Cache key
    pub key: String,
    /// Built value
    pub value: Arc<V>,
    /// When the value was stored
    pub created: DateTime<Utc>,
}

/// What a build produced and whether it may be stored.
#[derive(Debug)]
pub struct BuildOutcome<V> {
    /// Built value, returned to the builder and all waiters
    pub value: V,
    /// `false` for error artifacts: delivered but never stored
    pub cacheable: bool,
}

impl<V> BuildOutcome<V> {
    /// Value to store.
    pub const fn cached(value: V) -> Self {
        Self {
            value,
            cacheable: true,
        }
    }

    /// Value to deliver without storing.
    pub const fn uncached(value: V) -> Self {
        Self {
            value,
            cacheable: false,
        }
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from a Ready entry
    pub hits: u64,
    /// Lookups that waited on an in-flight build
    pub waits: u64,
    /// Builds started
    pub builds: u64,
    /// Ready entries
    pub entries: usize,
}

struct InFlight<V> {
    notify: Notify,
    outcome: OnceLock<AggregatorResult<Arc<V>>>,
}

enum EntryState<V> {
    /// A build is running; waiters subscribe to its notifier.
    Pending(Arc<InFlight<V>>),
    /// Built and stored.
    Ready(Arc<CacheEntry<V>>),
}

/// Keyed cache with single-flight builds; see the module docs.
pub struct BuildCache<V> {
    name: &'static str,
    entries: DashMap<String, EntryState<V>>,
    pending_timeout: Duration,
    hits: AtomicU64,
    waits: AtomicU64,
    builds: AtomicU64,
}

/// Removes the builder's `Pending` entry and wakes its waiters when the build
/// future is dropped before completing.
struct PendingGuard<'a, V> {
    entries: &'a DashMap<String, EntryState<V>>,
    key: &'a str,
    in_flight: &'a Arc<InFlight<V>>,
    armed: bool,
}

impl<V> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            self.entries.remove_if(self.key, |_, state| is_pending(state, self.in_flight));
            self.in_flight.notify.notify_waiters();
        }
    }
}

fn is_pending<V>(state: &EntryState<V>, in_flight: &Arc<InFlight<V>>) -> bool {
    matches!(state, EntryState::Pending(p) if Arc::ptr_eq(p, in_flight))
}

impl<V> BuildCache<V> {
    /// Empty cache. `name` tags log lines and dumps; waiters log a warning
    /// every `pending_timeout` while they wait.
    pub fn new(name: &'static str, pending_timeout: Duration) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            pending_timeout,
            hits: AtomicU64::new(0),
            waits: AtomicU64::new(0),
            builds: AtomicU64::new(0),
        }
    }

    /// Cache name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Return the value for `key`, building it with `build` when absent.
    ///
    /// Concurrent callers for the same key share one build. Distinct keys
    /// build in parallel.
    pub async fn get_or_build<F, Fut>(&self, key: &str, build: F) -> AggregatorResult<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AggregatorResult<BuildOutcome<V>>>,
    {
        let in_flight = loop {
            match self.entries.entry(key.to_string()) {
                Entry::Occupied(entry) => match entry.get() {
                    EntryState::Ready(ready) => {
                        let value = Arc::clone(&ready.value);
                        drop(entry);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(target: "cache", "{} hit: {key}", self.name);
                        return Ok(value);
                    }
                    EntryState::Pending(pending) => {
                        let pending = Arc::clone(pending);
                        // Create the notified future BEFORE dropping the entry:
                        // Notify only wakes futures that already exist.
                        let notified = pending.notify.notified();
                        drop(entry);
                        self.waits.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(target: "cache", "{} waiting on in-flight build: {key}", self.name);

                        if let Some(outcome) = pending.outcome.get() {
                            return outcome.clone();
                        }
                        tokio::pin!(notified);
                        loop {
                            tokio::select! {
                                () = &mut notified => break,
                                () = tokio::time::sleep(self.pending_timeout) => {
                                    tracing::warn!(
                                        target: "cache",
                                        "{} build for '{key}' still running after {:?}; waiting",
                                        self.name,
                                        self.pending_timeout
                                    );
                                }
                            }
                        }
                        match pending.outcome.get() {
                            Some(outcome) => return outcome.clone(),
                            // builder was cancelled; compete for the slot again
                            None => continue,
                        }
                    }
                },
                Entry::Vacant(entry) => {
                    let in_flight = Arc::new(InFlight {
                        notify: Notify::new(),
                        outcome: OnceLock::new(),
                    });
                    entry.insert(EntryState::Pending(Arc::clone(&in_flight)));
                    break in_flight;
                }
            }
        };

        self.builds.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "cache", "{} miss, building: {key}", self.name);

        let mut guard = PendingGuard {
            entries: &self.entries,
            key,
            in_flight: &in_flight,
            armed: true,
        };
        let result = build().await;
        guard.armed = false;
        drop(guard);

        let (outcome, cacheable) = match result {
            Ok(BuildOutcome {
                value,
                cacheable,
            }) => (Ok(Arc::new(value)), cacheable),
            Err(error) => (Err(error), false),
        };
        let _ = in_flight.outcome.set(outcome.clone());

        // Replace our own Pending entry only; a clear() may have removed it
        // and another build may own the key by now.
        if let Entry::Occupied(mut entry) = self.entries.entry(key.to_string())
            && is_pending(entry.get(), &in_flight)
        {
            match (&outcome, cacheable) {
                (Ok(value), true) => {
                    entry.insert(EntryState::Ready(Arc::new(CacheEntry {
                        key: key.to_string(),
                        value: Arc::clone(value),
                        created: Utc::now(),
                    })));
                }
                _ => {
                    entry.remove();
                }
            }
        }
        in_flight.notify.notify_waiters();

        if let Err(error) = &outcome {
            tracing::debug!(target: "cache", "{} build failed for '{key}': {error}", self.name);
        }
        outcome
    }

    /// Ready value for `key`.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        match self.entries.get(key).as_deref() {
            Some(EntryState::Ready(ready)) => Some(Arc::clone(&ready.value)),
            _ => None,
        }
    }

    /// Store a value under `key` unless a build for it is in flight.
    /// Returns whether the value was stored.
    pub fn insert(&self, key: &str, value: Arc<V>) -> bool {
        let ready = EntryState::Ready(Arc::new(CacheEntry {
            key: key.to_string(),
            value,
            created: Utc::now(),
        }));
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if matches!(entry.get(), EntryState::Pending(_)) {
                    return false;
                }
                entry.insert(ready);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(ready);
                true
            }
        }
    }

    /// Remove the Ready value for `key`.
    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        match self.entries.remove_if(key, |_, state| matches!(state, EntryState::Ready(_))) {
            Some((_, EntryState::Ready(ready))) => Some(Arc::clone(&ready.value)),
            _ => None,
        }
    }

    /// Remove the Ready value for `key` if `predicate` holds for it.
    pub fn remove_if(&self, key: &str, predicate: impl Fn(&V) -> bool) -> bool {
        self.entries
            .remove_if(key, |_, state| match state {
                EntryState::Ready(ready) => predicate(ready.value.as_ref()),
                EntryState::Pending(_) => false,
            })
            .is_some()
    }

    /// Keep only the Ready entries for which `keep` holds. In-flight builds
    /// are untouched.
    pub fn retain(&self, keep: impl Fn(&str, &V) -> bool) {
        self.entries.retain(|key, state| match state {
            EntryState::Ready(ready) => keep(key.as_str(), ready.value.as_ref()),
            EntryState::Pending(_) => true,
        });
    }

    /// Drop every entry. In-flight builds still deliver to their waiters but
    /// do not store their result.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of Ready entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| matches!(e.value(), EntryState::Ready(_))).count()
    }

    /// Whether there are no Ready entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted keys of the Ready entries.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.snapshot().into_iter().map(|e| e.key.clone()).collect();
        keys.sort();
        keys
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn snapshot(&self) -> Vec<Arc<CacheEntry<V>>> {
        self.entries
            .iter()
            .filter_map(|e| match e.value() {
                EntryState::Ready(ready) => Some(Arc::clone(ready)),
                EntryState::Pending(_) => None,
            })
            .collect()
    }

    /// Write one line per Ready entry whose key matches `filter`, sorted by
    /// key. Never waits on in-flight builds.
    pub fn dump(
        &self,
        sink: &mut dyn Write,
        filter: Option<&Regex>,
        describe: impl Fn(&V) -> String,
    ) -> std::io::Result<()> {
        let mut entries = self.snapshot();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        writeln!(sink, "[{}] {} entries", self.name, entries.len())?;
        for entry in entries {
            if filter.is_some_and(|re| !re.is_match(&entry.key)) {
                continue;
            }
            writeln!(
                sink,
                "{}  created={}  {}",
                entry.key,
                entry.created.to_rfc3339(),
                describe(entry.value.as_ref())
            )?;
        }
        Ok(())
    }
}

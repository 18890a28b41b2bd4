//! Concurrency-safe set of tracked streams.
//!
//! The reconciliation loop is the only writer. Synchronizer tasks only ask
//! whether their own entry is still live.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::StreamDescriptor;

/// Registry entry for one active stream.
#[derive(Debug)]
pub struct TrackedStream {
    pub descriptor: StreamDescriptor,
    pub token: CancellationToken,
    /// Distinguishes successive synchronizers started for the same path.
    pub generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TrackedStream {
    fn has_exited(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_finished())
    }
}

/// Identity handed to a freshly started synchronizer.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub descriptor: StreamDescriptor,
    pub token: CancellationToken,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, TrackedStream>>,
    next_generation: AtomicU64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.streams.lock().contains_key(path)
    }

    /// True while `path` is tracked by the synchronizer of `generation`.
    pub fn is_live(&self, path: &str, generation: u64) -> bool {
        self.streams
            .lock()
            .get(path)
            .is_some_and(|s| s.generation == generation && !s.token.is_cancelled())
    }

    pub fn generation_of(&self, path: &str) -> Option<u64> {
        self.streams.lock().get(path).map(|s| s.generation)
    }

    /// Sorted snapshot of tracked paths.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.streams.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Tracks `descriptor` unless it is already present, starting its task via `spawn`
    /// while the lock is held so the entry exists before the task's first liveness check.
    ///
    /// Returns the new generation, or `None` if the path was already tracked.
    pub fn track<F>(
        &self,
        descriptor: StreamDescriptor,
        parent: &CancellationToken,
        spawn: F,
    ) -> Option<u64>
    where
        F: FnOnce(Assignment) -> JoinHandle<()>,
    {
        let mut streams = self.streams.lock();
        if streams.contains_key(&descriptor.path) {
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        let handle = spawn(Assignment {
            descriptor: descriptor.clone(),
            token: token.clone(),
            generation,
        });
        streams.insert(
            descriptor.path.clone(),
            TrackedStream {
                descriptor,
                token,
                generation,
                handle: Some(handle),
            },
        );
        Some(generation)
    }

    /// Removes `path` and cancels its synchronizer.
    pub fn untrack(&self, path: &str) -> Option<StreamDescriptor> {
        let removed = self.streams.lock().remove(path)?;
        removed.token.cancel();
        Some(removed.descriptor)
    }

    /// Removes and cancels every stream whose path is not in `keep`.
    pub fn retain_only(&self, keep: &HashSet<&str>) -> Vec<StreamDescriptor> {
        let mut streams = self.streams.lock();
        let stale: Vec<String> = streams
            .keys()
            .filter(|path| !keep.contains(path.as_str()))
            .cloned()
            .collect();

        stale
            .into_iter()
            .filter_map(|path| streams.remove(&path))
            .map(|entry| {
                entry.token.cancel();
                entry.descriptor
            })
            .collect()
    }

    /// Removes entries whose task exited without being cancelled.
    pub fn reap_exited(&self) -> Vec<StreamDescriptor> {
        let mut streams = self.streams.lock();
        let exited: Vec<String> = streams
            .iter()
            .filter(|(_, s)| !s.token.is_cancelled() && s.has_exited())
            .map(|(path, _)| path.clone())
            .collect();

        exited
            .into_iter()
            .filter_map(|path| streams.remove(&path))
            .map(|entry| entry.descriptor)
            .collect()
    }

    /// Cancels every stream and hands back their task handles for joining.
    pub fn drain(&self) -> Vec<JoinHandle<()>> {
        let drained: Vec<TrackedStream> =
            self.streams.lock().drain().map(|(_, entry)| entry).collect();
        debug!(count = drained.len(), "Draining tracked streams");
        drained
            .into_iter()
            .filter_map(|entry| {
                entry.token.cancel();
                entry.handle
            })
            .collect()
    }
}

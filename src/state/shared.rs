use std::sync::{Arc, Mutex, MutexGuard};

use crate::arbiter::{Arbiter, ArbiterError, Decision};
use crate::media::BackendSource;
use crate::settings::SourceClass;
use crate::state::registry::RegistrySnapshot;
use crate::state::source::{PlaybackStatus, Source};

/// The arbitration engine behind a single lock.
///
/// Every request holds the lock for its whole read-decide-commit cycle, so
/// concurrent callers are serialized and never observe a half-applied
/// decision. Backend I/O happens outside the lock.
#[derive(Clone, Default)]
pub struct SharedArbiter {
    inner: Arc<Mutex<Arbiter>>,
}

impl SharedArbiter {
    pub fn new(arbiter: Arbiter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(arbiter)),
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.lock_or_recover().snapshot()
    }

    pub fn revision(&self) -> u64 {
        self.lock_or_recover().revision()
    }

    pub fn request_play(&self, id: &str) -> Result<Decision, ArbiterError> {
        self.lock_or_recover().request_play(id)
    }

    pub fn request_pause(&self, id: &str) -> Result<Decision, ArbiterError> {
        self.lock_or_recover().request_pause(id)
    }

    pub fn update_source_status(
        &self,
        id: &str,
        status: PlaybackStatus,
    ) -> Result<Decision, ArbiterError> {
        self.lock_or_recover().update_source_status(id, status)
    }

    pub fn reconcile<F>(
        &self,
        observed: &[BackendSource],
        since_revision: u64,
        classify: F,
    ) -> Result<Decision, ArbiterError>
    where
        F: Fn(&str) -> SourceClass,
    {
        self.lock_or_recover()
            .reconcile(observed, since_revision, classify)
    }

    pub fn add_source(&self, source: Source) -> Result<Decision, ArbiterError> {
        self.lock_or_recover().add_source(source)
    }

    pub fn remove_source(&self, id: &str) -> Result<Decision, ArbiterError> {
        self.lock_or_recover().remove_source(id)
    }

    pub fn set_priority(&self, id: &str, priority: u32) -> Result<Decision, ArbiterError> {
        self.lock_or_recover().set_priority(id, priority)
    }

    pub fn set_volume(&self, id: &str, volume: f64) -> Result<Decision, ArbiterError> {
        self.lock_or_recover().set_volume(id, volume)
    }

    pub fn set_pause_all(&self, enabled: bool) -> Result<Decision, ArbiterError> {
        self.lock_or_recover().set_pause_all(enabled)
    }

    /// Kind of a registered source, e.g. to persist a priority change
    pub fn source_kind(&self, id: &str) -> Option<String> {
        self.lock_or_recover()
            .registry()
            .get(id)
            .map(|s| s.kind.clone())
    }

    /// Lock the engine, recovering from poison if necessary. The engine only
    /// commits fully checked registries, so the inner value is consistent
    /// even after a panic elsewhere.
    fn lock_or_recover(&self) -> MutexGuard<'_, Arbiter> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Recovering from poisoned mutex in SharedArbiter");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::source::TrackInfo;
    use std::thread;

    fn paused(id: &str, priority: u32) -> Source {
        Source::new(id, id, priority)
            .with_content(TrackInfo {
                title: id.to_string(),
                artist: None,
            })
            .with_status(PlaybackStatus::Paused)
    }

    #[test]
    fn test_shared_arbiter_delegates() {
        let shared =
            SharedArbiter::new(Arbiter::with_sources(vec![paused("a", 1), paused("b", 2)]).unwrap());

        shared.request_play("b").unwrap();
        let clone = shared.clone();
        clone.request_play("a").unwrap();

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.active_source_id.as_ref().unwrap().as_str(), "a");
        assert_eq!(snapshot.playing_count(), 1);
        assert_eq!(shared.revision(), 2);
        assert_eq!(shared.source_kind("b").as_deref(), Some("b"));
    }

    #[test]
    fn test_concurrent_requests_keep_single_player() {
        let ids = ["a", "b", "c", "d"];
        let sources = ids
            .iter()
            .enumerate()
            .map(|(i, id)| paused(id, i as u32 + 1))
            .collect();
        let shared = SharedArbiter::new(Arbiter::with_sources(sources).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let id = ids[(t + i) % ids.len()];
                        if (t + i) % 3 == 0 {
                            shared.request_pause(id).unwrap();
                        } else {
                            shared.request_play(id).unwrap();
                        }
                        assert!(shared.snapshot().playing_count() <= 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(shared.snapshot().playing_count() <= 1);
        assert_eq!(shared.revision(), 400);
    }

    #[test]
    fn test_recovers_from_poisoned_lock() {
        let shared = SharedArbiter::new(Arbiter::with_sources(vec![paused("a", 1)]).unwrap());

        let poisoner = shared.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(shared.request_play("a").is_ok());
        assert_eq!(shared.snapshot().playing_count(), 1);
    }
}

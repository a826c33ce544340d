use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::core::code_entry::CodeEntry;
use crate::core::types::{Clock, Micros, MonotonicClock};
use crate::profile::cpu_profile::CpuProfile;
use crate::trace::SharedSink;

/// Upper bound on concurrently running sessions.
pub const MAX_SIMULTANEOUS_PROFILES: usize = 100;

/// Registry of profiling sessions. Sessions are started and stopped from
/// the runtime's control surface while the sample path broadcasts into
/// every running session, so the current list sits behind a mutex whose
/// critical sections stay short.
pub struct CpuProfilesCollection {
    current_profiles: Mutex<Vec<CpuProfile>>,
    finished_profiles: Mutex<Vec<Arc<CpuProfile>>>,
    next_profile_id: AtomicU64,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
}

impl CpuProfilesCollection {
    pub fn new(sink: SharedSink) -> CpuProfilesCollection {
        CpuProfilesCollection::with_clock(sink, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(sink: SharedSink, clock: Arc<dyn Clock>) -> CpuProfilesCollection {
        CpuProfilesCollection {
            current_profiles: Mutex::new(Vec::new()),
            finished_profiles: Mutex::new(Vec::new()),
            next_profile_id: AtomicU64::new(1),
            clock,
            sink,
        }
    }

    /// Starts a session. Returns false when the collection is full. A title
    /// that is already recording is not started twice, but still reports
    /// true so the caller force-collects a sample for it.
    pub fn start_profiling(&self, title: &str, record_samples: bool) -> bool {
        let mut current = self.current_profiles.lock().unwrap();
        if current.len() >= MAX_SIMULTANEOUS_PROFILES {
            return false;
        }
        if current.iter().any(|profile| profile.title() == title) {
            debug!("profile {:?} is already being recorded", title);
            return true;
        }
        let id = self.next_profile_id.fetch_add(1, Ordering::Relaxed);
        current.push(CpuProfile::new(
            id,
            title,
            record_samples,
            self.clock.now_micros(),
            self.sink.clone(),
        ));
        true
    }

    /// Stops the newest session matching `title` (an empty title matches
    /// any session). The finished profile stays owned by the collection
    /// until [`CpuProfilesCollection::remove_profile`]; the caller gets a
    /// shared handle to read it.
    pub fn stop_profiling(&self, title: &str) -> Option<Arc<CpuProfile>> {
        let mut current = self.current_profiles.lock().unwrap();
        let index = current
            .iter()
            .rposition(|profile| title.is_empty() || profile.title() == title)?;
        let mut profile = current.remove(index);
        profile.finish(self.clock.now_micros());
        debug!("finished profile {:?}", profile.title());
        let profile = Arc::new(profile);
        self.finished_profiles.lock().unwrap().push(profile.clone());
        Some(profile)
    }

    /// True when exactly one session is running and it matches `title`.
    pub fn is_last_profile(&self, title: &str) -> bool {
        let current = self.current_profiles.lock().unwrap();
        current.len() == 1 && (title.is_empty() || current[0].title() == title)
    }

    /// Releases a finished profile. Passing a profile this collection does
    /// not hold is a bug in the caller.
    pub fn remove_profile(&self, profile: &Arc<CpuProfile>) {
        let mut finished = self.finished_profiles.lock().unwrap();
        let position = finished.iter().position(|p| Arc::ptr_eq(p, profile));
        debug_assert!(position.is_some(), "profile is not held as finished");
        if let Some(position) = position {
            finished.remove(position);
        }
    }

    /// Broadcasts one symbolized sample into every running session. Starting
    /// and stopping sessions is rare next to this, so holding the lock for
    /// the whole broadcast is fine.
    pub fn add_path_to_current_profiles(
        &self,
        timestamp: Option<Micros>,
        path: &[Option<Arc<CodeEntry>>],
        src_line: u32,
        update_stats: bool,
    ) {
        let mut current = self.current_profiles.lock().unwrap();
        for profile in current.iter_mut() {
            profile.add_path(timestamp, path, src_line, update_stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ManualClock;
    use crate::test_utils::{drain_events, function_entry};
    use crate::trace::MemorySink;

    fn collection() -> (
        CpuProfilesCollection,
        Arc<Mutex<MemorySink>>,
        Arc<ManualClock>,
    ) {
        let sink = Arc::new(Mutex::new(MemorySink::new()));
        let clock = Arc::new(ManualClock::new(0));
        let collection = CpuProfilesCollection::with_clock(sink.clone(), clock.clone());
        (collection, sink, clock)
    }

    #[test]
    fn start_and_stop_round_trip() {
        let (collection, _sink, clock) = collection();
        clock.set(100);
        assert!(collection.start_profiling("p", true));
        clock.set(900);

        let profile = collection.stop_profiling("p").expect("profile");
        assert_eq!(profile.title(), "p");
        assert_eq!(profile.start_time(), 100);
        assert_eq!(profile.end_time(), Some(900));
        assert!(collection.stop_profiling("p").is_none());
    }

    #[test]
    fn duplicate_title_reports_true_without_starting() {
        let (collection, _sink, _clock) = collection();
        assert!(collection.start_profiling("p", true));
        assert!(collection.start_profiling("p", true));
        assert_eq!(collection.current_profiles.lock().unwrap().len(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let (collection, _sink, _clock) = collection();
        for i in 0..MAX_SIMULTANEOUS_PROFILES {
            assert!(collection.start_profiling(&format!("p{}", i), false));
        }
        assert!(!collection.start_profiling("one too many", false));
    }

    #[test]
    fn stop_matches_newest_first_and_empty_title_matches_any() {
        let (collection, _sink, _clock) = collection();
        collection.start_profiling("a", false);
        collection.start_profiling("b", false);
        collection.start_profiling("a2", false);

        let newest = collection.stop_profiling("").expect("some profile");
        assert_eq!(newest.title(), "a2");
        let by_title = collection.stop_profiling("a").expect("a");
        assert_eq!(by_title.title(), "a");
        assert!(collection.stop_profiling("nope").is_none());
    }

    #[test]
    fn is_last_profile_wants_exactly_one() {
        let (collection, _sink, _clock) = collection();
        assert!(!collection.is_last_profile(""));
        collection.start_profiling("p", false);
        assert!(collection.is_last_profile(""));
        assert!(collection.is_last_profile("p"));
        assert!(!collection.is_last_profile("q"));
        collection.start_profiling("q", false);
        assert!(!collection.is_last_profile(""));
    }

    #[test]
    fn remove_profile_releases_a_finished_profile() {
        let (collection, _sink, _clock) = collection();
        collection.start_profiling("p", false);
        let profile = collection.stop_profiling("p").unwrap();
        assert_eq!(collection.finished_profiles.lock().unwrap().len(), 1);
        collection.remove_profile(&profile);
        assert!(collection.finished_profiles.lock().unwrap().is_empty());
    }

    #[test]
    fn samples_are_broadcast_to_every_running_profile() {
        let (collection, _sink, _clock) = collection();
        collection.start_profiling("a", true);
        collection.start_profiling("b", true);

        let path = vec![Some(function_entry("f"))];
        collection.add_path_to_current_profiles(Some(10), &path, 0, true);

        let a = collection.stop_profiling("a").unwrap();
        let b = collection.stop_profiling("b").unwrap();
        for profile in [&a, &b] {
            assert_eq!(profile.samples().len(), 1);
            let leaf = profile.top_down().node(profile.samples()[0]);
            assert_eq!(leaf.entry().name(), "f");
            assert_eq!(leaf.self_ticks(), 1);
        }
    }

    #[test]
    fn each_profile_gets_its_own_event_stream_id() {
        let (collection, sink, _clock) = collection();
        collection.start_profiling("a", true);
        collection.start_profiling("b", true);

        let events = drain_events(&sink);
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].id, events[1].id);
    }
}

//! In-flight version tracking
//!
//! A mutation holds its version from allocation until its commit or abort.
//! Readers that anchor on a version ("everything up to here was seen") must
//! not pass a version that could still commit, so they anchor on the
//! [`VersionTracker::stable_version`]: the newest version with no mutation
//! at or below it still in flight.
//!
//! Before asking the clock, an allocation registers a lower bound of the
//! version it will receive. The registration and the stable read share one
//! lock, so a stable version never runs ahead of an allocation that has not
//! reached the clock yet.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use vellum_core::{Clock, Version};

/// Versions handed out and not yet committed or aborted
#[derive(Debug, Default)]
pub struct VersionTracker {
    /// Lower bounds of in-flight versions, with their multiplicity
    in_flight: Mutex<BTreeMap<Version, usize>>,
}

impl VersionTracker {
    /// Create a tracker with nothing in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a version that stays in flight until the ticket drops
    pub fn allocate<'t>(&'t self, clock: &dyn Clock) -> VersionTicket<'t> {
        let bound = {
            let mut in_flight = self.in_flight.lock();
            let bound = clock.last_version().next();
            *in_flight.entry(bound).or_insert(0) += 1;
            bound
        };
        let version = clock.next_version();
        VersionTicket {
            tracker: self,
            bound,
            version,
        }
    }

    /// Newest version such that nothing at or below it is still in flight
    pub fn stable_version(&self, clock: &dyn Clock) -> Version {
        let in_flight = self.in_flight.lock();
        match in_flight.keys().next() {
            Some(oldest) => oldest.prev(),
            None => clock.last_version(),
        }
    }

    fn release(&self, bound: Version) {
        let mut in_flight = self.in_flight.lock();
        if let Some(count) = in_flight.get_mut(&bound) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&bound);
            }
        }
    }
}

/// A version held by one mutation
#[derive(Debug)]
pub struct VersionTicket<'t> {
    tracker: &'t VersionTracker,
    bound: Version,
    version: Version,
}

impl VersionTicket<'_> {
    /// The allocated version
    pub fn version(&self) -> Version {
        self.version
    }
}

impl Drop for VersionTicket<'_> {
    fn drop(&mut self) {
        self.tracker.release(self.bound);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::LogicalClock;

    #[test]
    fn test_stable_version_waits_for_oldest_ticket() {
        let clock = LogicalClock::new();
        let tracker = VersionTracker::new();
        let first = tracker.allocate(&clock);
        let second = tracker.allocate(&clock);
        assert_eq!(first.version(), Version::new(1));
        assert_eq!(second.version(), Version::new(2));
        assert_eq!(tracker.stable_version(&clock), Version::ZERO);

        drop(second);
        assert_eq!(tracker.stable_version(&clock), Version::ZERO);
        drop(first);
        assert_eq!(tracker.stable_version(&clock), Version::new(2));
        assert!(tracker.in_flight.lock().is_empty());
    }

    #[test]
    fn test_idle_tracker_follows_clock() {
        let clock = LogicalClock::new();
        let tracker = VersionTracker::new();
        assert_eq!(tracker.stable_version(&clock), Version::ZERO);
        clock.observe(Version::new(9));
        assert_eq!(tracker.stable_version(&clock), Version::new(9));
    }
}

use std::collections::HashMap;

use crate::config::LIVENESS_RESET;
use crate::station::Station;

/// An active/inactive edge for one station. Emitted at most once per
/// crossing in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub station: Station,
    pub active: bool,
}

/// Per-station liveness without timestamps: any attributed traffic refreshes
/// the counter to a constant, and every heartbeat tick ages all counters by
/// one. A station is active while its counter is above zero.
pub struct PresenceTracker {
    counters: HashMap<Station, i32>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        let counters = Station::ALL.iter().map(|&s| (s, 0)).collect();
        Self { counters }
    }

    /// Refresh a station on any received frame, regardless of kind.
    /// Returns the inactive→active edge if this traffic caused one.
    pub fn record_traffic(&mut self, station: Station) -> Option<StatusChange> {
        let counter = self.counters.entry(station).or_insert(0);
        let was_active = *counter > 0;
        *counter = LIVENESS_RESET;

        if was_active {
            None
        } else {
            Some(StatusChange {
                station,
                active: true,
            })
        }
    }

    /// One heartbeat-interval tick: decrement every active counter and
    /// report the stations that just went inactive. A counter at zero stays
    /// at zero until traffic refreshes it.
    pub fn age_all(&mut self) -> Vec<StatusChange> {
        let mut changes = Vec::new();

        for (&station, counter) in self.counters.iter_mut() {
            if *counter > 0 {
                *counter -= 1;
                if *counter == 0 {
                    changes.push(StatusChange {
                        station,
                        active: false,
                    });
                }
            }
        }

        changes
    }

    pub fn is_active(&self, station: Station) -> bool {
        self.counters.get(&station).copied().unwrap_or(0) > 0
    }

    #[cfg(test)]
    fn counter(&self, station: Station) -> i32 {
        self.counters.get(&station).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_stations_start_inactive() {
        let tracker = PresenceTracker::new();
        for station in Station::ALL {
            assert!(!tracker.is_active(station));
        }
    }

    #[test]
    fn traffic_refreshes_to_reset_constant_never_higher() {
        let mut tracker = PresenceTracker::new();
        tracker.record_traffic(Station::Balloon);
        tracker.record_traffic(Station::Balloon);
        tracker.record_traffic(Station::Balloon);
        assert_eq!(tracker.counter(Station::Balloon), LIVENESS_RESET);
    }

    #[test]
    fn first_traffic_reports_activation_edge_once() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(
            tracker.record_traffic(Station::Chase2),
            Some(StatusChange {
                station: Station::Chase2,
                active: true
            })
        );
        assert_eq!(tracker.record_traffic(Station::Chase2), None);
    }

    #[test]
    fn aging_fires_deactivation_exactly_once_per_crossing() {
        let mut tracker = PresenceTracker::new();
        tracker.record_traffic(Station::Balloon);

        let mut deactivations = 0;
        for _ in 0..LIVENESS_RESET + 3 {
            deactivations += tracker
                .age_all()
                .iter()
                .filter(|c| c.station == Station::Balloon && !c.active)
                .count();
        }
        assert_eq!(deactivations, 1);
    }

    #[test]
    fn counter_stays_at_zero_until_new_traffic() {
        let mut tracker = PresenceTracker::new();
        tracker.record_traffic(Station::Chase3);
        for _ in 0..10 {
            tracker.age_all();
        }
        assert_eq!(tracker.counter(Station::Chase3), 0);

        tracker.record_traffic(Station::Chase3);
        assert_eq!(tracker.counter(Station::Chase3), LIVENESS_RESET);
    }

    #[test]
    fn aging_leaves_other_stations_untouched() {
        let mut tracker = PresenceTracker::new();
        tracker.record_traffic(Station::Balloon);
        tracker.record_traffic(Station::Chase1);

        let changes = tracker.age_all();
        assert!(changes.is_empty());
        assert!(tracker.is_active(Station::Balloon));
        assert!(tracker.is_active(Station::Chase1));
        assert!(!tracker.is_active(Station::Chase2));
    }
}

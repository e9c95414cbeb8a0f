use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use crate::axle::AxleConfig;
use crate::camera::{CameraProfile, LaneId, WrongWayRule};
use crate::circular_queue::CircularQueue;
use crate::class::VehicleClass;
use crate::logfmt::FinalCounts;
use crate::track::{Track, TrackId};

/// Counting progress of a track through its class's interval.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CountState {
    NotEntered,
    Entered,
    Exited,
}

impl CountState {
    pub fn of(track: &Track) -> Self {
        match (track.start_time, track.end_time) {
            (None, _) => CountState::NotEntered,
            (Some(_), None) => CountState::Entered,
            (Some(_), Some(_)) => CountState::Exited,
        }
    }
}

/// One counted vehicle, as written to the hourly vehicle log.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRecord {
    pub id: TrackId,
    pub class: VehicleClass,
    pub started_at: NaiveDateTime,
    pub lane: LaneId,
    pub axle_config: Option<AxleConfig>,
    pub wrong_direction: bool,
}

impl VehicleRecord {
    pub fn from_track(track: &Track, started_at: NaiveDateTime) -> Self {
        // only multi-axle trucks report their layout
        let axle_config = match track.class.canonical_axles() {
            Some(_) => track.axle_config,
            None => None,
        };

        Self {
            id: track.id,
            class: track.class,
            started_at,
            lane: track.lane,
            axle_config,
            wrong_direction: !track.direction,
        }
    }

    pub fn time(&self) -> String {
        self.started_at.format("%H:%M:%S").to_string()
    }
}

/// Row of the on-screen log panel.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRow {
    pub class: VehicleClass,
    pub time: String,
    pub lane: String,
    pub axle: String,
}

impl From<&VehicleRecord> for DisplayRow {
    fn from(r: &VehicleRecord) -> Self {
        Self {
            class: r.class,
            time: r.time(),
            lane: format!("lane {}", r.lane),
            axle: r.axle_config.map(|c| c.to_string()).unwrap_or_else(|| "_".into()),
        }
    }
}

pub struct CountingLedger {
    class_counts: BTreeMap<LaneId, BTreeMap<VehicleClass, u64>>,
    wrong_direction: u64,
    display: CircularQueue<DisplayRow>,
    wrong_way_rule: Option<WrongWayRule>,
}

impl CountingLedger {
    pub fn new(profile: &CameraProfile, display_depth: usize) -> Self {
        let class_counts = profile
            .lanes
            .iter()
            .map(|l| (l.id, VehicleClass::ALL.iter().map(|&c| (c, 0)).collect()))
            .collect();

        Self {
            class_counts,
            wrong_direction: 0,
            display: CircularQueue::with_capacity(display_depth),
            wrong_way_rule: profile.wrong_way_rule.clone(),
        }
    }

    /// Runs the interval state machine over the live tracks.
    pub fn observe(&mut self, tracks: &mut [Track], profile: &CameraProfile, now: NaiveDateTime) {
        for t in tracks.iter_mut() {
            let p = t.reference_point();
            let (ref1, ref2) = profile.count_interval(t.class);
            let inside = ref1 < p.x && p.x < ref2;
            let outside = p.x < ref1 || p.x > ref2;

            match CountState::of(t) {
                CountState::NotEntered if inside => {
                    t.start_time = Some(now);
                }
                CountState::Entered if outside => {
                    t.end_time = Some(now);

                    if t.direction {
                        self.count(t.lane, t.class);
                    } else {
                        self.wrong_direction += 1;
                    }
                }
                CountState::Entered if self.flags_immediately(t) => {
                    t.end_time = Some(now);
                    self.wrong_direction += 1;
                }
                _ => (),
            }
        }
    }

    /// Restricted rule: listed classes reversing in the listed lane are
    /// flagged without waiting for the interval exit.
    fn flags_immediately(&self, t: &Track) -> bool {
        match &self.wrong_way_rule {
            Some(rule) => {
                !t.direction
                    && rule.lane == t.lane
                    && rule.classes.contains(&t.class)
                    && !t.logged
            }
            None => false,
        }
    }

    fn count(&mut self, lane: LaneId, class: VehicleClass) {
        *self
            .class_counts
            .entry(lane)
            .or_default()
            .entry(class)
            .or_insert(0) += 1;
    }

    /// Turns every finished, not yet logged track into a record. Each track is
    /// reported once over its whole life, whatever windows it spans.
    pub fn collect(&mut self, tracks: &mut [Track]) -> Vec<VehicleRecord> {
        let mut records = Vec::new();

        for t in tracks {
            let started_at = match (t.start_time, t.end_time) {
                (Some(s), Some(_)) => s,
                _ => continue,
            };

            if t.logged {
                continue;
            }
            t.logged = true;

            let record = VehicleRecord::from_track(t, started_at);
            self.display.push(DisplayRow::from(&record));
            records.push(record);
        }

        records
    }

    /// Final counts since the previous flush. Class counters start over.
    pub fn flush(&mut self) -> FinalCounts {
        let mut rows = Vec::with_capacity(VehicleClass::ALL.len());

        for class in VehicleClass::ALL {
            let n: u64 = self
                .class_counts
                .values()
                .map(|per_class| per_class.get(&class).copied().unwrap_or(0))
                .sum();

            rows.push((class, n));
        }

        for per_class in self.class_counts.values_mut() {
            per_class.values_mut().for_each(|v| *v = 0);
        }

        FinalCounts::new(rows, self.wrong_direction)
    }

    pub fn reset_wrong_direction(&mut self) {
        self.wrong_direction = 0;
    }

    #[inline]
    pub fn wrong_direction(&self) -> u64 {
        self.wrong_direction
    }

    pub fn count_of(&self, lane: LaneId, class: VehicleClass) -> u64 {
        self.class_counts
            .get(&lane)
            .and_then(|m| m.get(&class))
            .copied()
            .unwrap_or(0)
    }

    pub fn lane_total(&self, lane: LaneId) -> u64 {
        self.class_counts
            .get(&lane)
            .map(|m| m.values().sum())
            .unwrap_or(0)
    }

    pub fn lanes(&self) -> impl Iterator<Item = LaneId> + '_ {
        self.class_counts.keys().copied()
    }

    #[inline]
    pub fn display(&self) -> &CircularQueue<DisplayRow> {
        &self.display
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::Rect;
    use crate::detection::Detection;
    use crate::gate::{EllipseGate, GateParams};
    use crate::geometry::Point;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    fn track(id: TrackId, class: VehicleClass, lane: LaneId, x: i32) -> Track {
        let det = Detection::new(Rect::new(x - 50, 400, x, 450), Point::new(x, 450), class, 0.9, lane);
        let gate = EllipseGate::initial(det.bottom, class, lane, &CameraProfile::datlcam1(), &GateParams::default());
        Track::new(id, &det, gate, false)
    }

    fn step(ledger: &mut CountingLedger, t: &mut Track, x: i32, direction: bool, now: NaiveDateTime) -> Vec<VehicleRecord> {
        t.bottom = Point::new(x, t.bottom.y);
        t.direction = direction;

        let mut tracks = vec![t.clone()];
        ledger.observe(&mut tracks, &CameraProfile::datlcam1(), now);
        *t = tracks.pop().unwrap();

        ledger.collect(std::slice::from_mut(t))
    }

    #[test]
    fn forward_crossing_counts_once() {
        let cam = CameraProfile::datlcam1();
        let mut ledger = CountingLedger::new(&cam, 18);
        let mut t = track(1, VehicleClass::Car, LaneId(1), 200);

        assert!(step(&mut ledger, &mut t, 250, true, at(10, 0, 0)).is_empty());
        assert!(step(&mut ledger, &mut t, 300, true, at(10, 0, 1)).is_empty());
        assert_eq!(CountState::of(&t), CountState::Entered);
        assert!(step(&mut ledger, &mut t, 600, true, at(10, 0, 2)).is_empty());

        let records = step(&mut ledger, &mut t, 660, true, at(10, 0, 3));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].started_at, at(10, 0, 1));
        assert!(!records[0].wrong_direction);

        assert!(step(&mut ledger, &mut t, 700, true, at(10, 0, 4)).is_empty());
        assert_eq!(ledger.count_of(LaneId(1), VehicleClass::Car), 1);
        assert_eq!(ledger.wrong_direction(), 0);
        assert_eq!(ledger.display().len(), 1);
    }

    #[test]
    fn reverse_crossing_is_wrong_direction() {
        let cam = CameraProfile::datlcam1();
        let mut ledger = CountingLedger::new(&cam, 18);
        let mut t = track(1, VehicleClass::Truck3, LaneId(1), 700);

        step(&mut ledger, &mut t, 600, false, at(10, 0, 0));
        let records = step(&mut ledger, &mut t, 390, false, at(10, 0, 1));

        assert_eq!(records.len(), 1);
        assert!(records[0].wrong_direction);
        assert_eq!(ledger.wrong_direction(), 1);
        assert_eq!(ledger.lane_total(LaneId(1)), 0);
    }

    #[test]
    fn restricted_rule_flags_without_exit() {
        let cam = CameraProfile::datlcam1();
        let mut ledger = CountingLedger::new(&cam, 18);

        let mut car = track(1, VehicleClass::Car, LaneId(2), 400);
        step(&mut ledger, &mut car, 410, true, at(9, 0, 0));
        let records = step(&mut ledger, &mut car, 405, false, at(9, 0, 1));
        assert_eq!(records.len(), 1);
        assert_eq!(ledger.wrong_direction(), 1);

        // a truck in the same lane waits for the exit
        let mut truck = track(2, VehicleClass::Truck2, LaneId(2), 500);
        step(&mut ledger, &mut truck, 510, true, at(9, 0, 2));
        assert!(step(&mut ledger, &mut truck, 505, false, at(9, 0, 3)).is_empty());
        assert_eq!(ledger.wrong_direction(), 1);
    }

    #[test]
    fn flush_sums_lanes_and_resets() {
        let cam = CameraProfile::datlcam1();
        let mut ledger = CountingLedger::new(&cam, 14);

        ledger.count(LaneId(1), VehicleClass::Bus);
        ledger.count(LaneId(2), VehicleClass::Bus);
        ledger.count(LaneId(2), VehicleClass::TwoWheeler);
        ledger.wrong_direction = 2;

        let counts = ledger.flush();
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.wrong_direction, 2);
        assert!(counts.rows.contains(&(VehicleClass::Bus, 2)));
        assert_eq!(counts.rows[0], (VehicleClass::TwoWheeler, 1));

        assert_eq!(ledger.lane_total(LaneId(2)), 0);
        assert_eq!(ledger.wrong_direction(), 2);
    }

    #[test]
    fn display_keeps_latest_rows() {
        let cam = CameraProfile::datlcam1();
        let mut ledger = CountingLedger::new(&cam, 2);

        let mut tracks: Vec<Track> = (1..=3).map(|id| track(id, VehicleClass::Car, LaneId(1), 300)).collect();
        for t in &mut tracks {
            t.start_time = Some(at(8, 0, t.id as u32));
            t.end_time = Some(at(8, 1, 0));
        }

        assert_eq!(ledger.collect(&mut tracks).len(), 3);
        assert!(ledger.collect(&mut tracks).is_empty());
        assert!(tracks.iter().all(|t| t.logged));

        let times: Vec<_> = ledger.display().iter().map(|r| r.time.clone()).collect();
        assert_eq!(times, vec!["08:00:02", "08:00:03"]);
    }
}

use log::debug;
use serde_derive::{Deserialize, Serialize};

use crate::camera::CameraProfile;
use crate::detection::Detection;
use crate::gate::{EllipseGate, GateMode, GateParams};
use crate::geometry::{self, Point};
use crate::track::{Track, TrackId};

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackerVariant {
    Centroid,
    Kalman,
}

impl Default for TrackerVariant {
    fn default() -> Self {
        TrackerVariant::Kalman
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerParams {
    pub variant: TrackerVariant,
    /// A track unmatched for more than this many consecutive frames is dropped.
    pub max_absent: u32,
    pub gate: GateParams,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            variant: TrackerVariant::default(),
            max_absent: 2,
            gate: GateParams::default(),
        }
    }
}

/// Result of gating one frame's detections against the live tracks.
#[derive(Debug, Default)]
pub struct Association {
    /// `(track index, detection index)`
    pub matched: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub missed: Vec<usize>,
}

/// Why a track left the table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Removal {
    Absent,
    LeftCorridor,
}

pub struct Tracker {
    profile: CameraProfile,
    params: TrackerParams,
    next_id: TrackId,
    tracks: Vec<Track>,
}

impl Tracker {
    pub fn new(profile: CameraProfile, params: TrackerParams) -> Self {
        Self {
            profile,
            params,
            next_id: 0,
            tracks: Vec::with_capacity(64),
        }
    }

    #[inline]
    pub fn profile(&self) -> &CameraProfile {
        &self.profile
    }

    #[inline]
    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Live tracks in registration order.
    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[inline]
    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    #[inline]
    pub fn next_id(&self) -> TrackId {
        self.next_id + 1
    }

    /// Restarts id numbering for a new day. Tracks still alive keep their ids
    /// and logged state.
    pub fn reset(&mut self) {
        self.next_id = 0;
    }

    /// Nearest neighbour gating. A detection is a candidate for a track when
    /// it falls inside the track's gate and belongs to the same heavy/light
    /// bucket; every detection goes to at most one track.
    pub fn associate(&self, detections: &[Detection]) -> Association {
        let mut claimed = vec![false; detections.len()];
        let mut assoc = Association::default();

        for (ti, track) in self.tracks.iter().enumerate() {
            let last = track.path.last().copied().unwrap_or(track.bottom);
            let mut best: Option<(usize, f32)> = None;

            for (di, det) in detections.iter().enumerate() {
                if claimed[di]
                    || det.class.is_heavy() != track.class.is_heavy()
                    || !track.gate.contains(det.bottom)
                {
                    continue;
                }

                let dist = geometry::distance(last, det.bottom);
                if best.map_or(true, |(_, d)| dist < d) {
                    best = Some((di, dist));
                }
            }

            match best {
                Some((di, _)) => {
                    claimed[di] = true;
                    assoc.matched.push((ti, di));
                }
                None => assoc.unmatched_tracks.push(ti),
            }
        }

        assoc.missed = (0..detections.len()).filter(|&i| !claimed[i]).collect();
        assoc
    }

    /// Advances the table by one frame. Returns the tracks removed during the
    /// update so their history can be written out.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<(Track, Removal)> {
        for t in &mut self.tracks {
            if let Some(kf) = &mut t.kalman {
                kf.predict();
            }
        }

        let assoc = self.associate(detections);

        for &(ti, di) in &assoc.matched {
            self.apply_match(ti, &detections[di]);
        }

        for &ti in &assoc.unmatched_tracks {
            let t = &mut self.tracks[ti];
            t.absent_count += 1;
            t.axles.clear();
            t.gate.update(&t.path, t.class, t.lane, GateMode::Lost, &self.profile, &self.params.gate);
        }

        let mut removed = Vec::new();
        let max_absent = self.params.max_absent;
        let profile = &self.profile;

        let mut i = 0;
        while i < self.tracks.len() {
            let reason = if self.tracks[i].absent_count > max_absent {
                Some(Removal::Absent)
            } else if profile.left_corridor(self.tracks[i].reference_point()) {
                Some(Removal::LeftCorridor)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    let t = self.tracks.remove(i);
                    debug!("track {} ({}) removed: {:?}", t.id, t.class, reason);
                    removed.push((t, reason));
                }
                None => i += 1,
            }
        }

        for &di in &assoc.missed {
            self.register(&detections[di]);
        }

        removed
    }

    fn apply_match(&mut self, ti: usize, det: &Detection) {
        let profile = &self.profile;
        let params = &self.params.gate;
        let t = &mut self.tracks[ti];

        let prev: Point = t.path.last().copied().unwrap_or(t.bottom);

        t.rect = det.rect;
        t.bottom = det.bottom;
        t.lane = det.lane;
        t.class = det.class;
        t.confidence = det.confidence;
        t.path.push(det.bottom);
        t.direction = profile.direction_of(det.lane, prev, det.bottom);
        t.absent_count = 0;
        t.axles.clear();

        if let Some(kf) = &mut t.kalman {
            kf.correct(geometry::to_f32(det.bottom));
        }

        t.gate.update(&t.path, t.class, t.lane, GateMode::Matched, profile, params);
    }

    fn register(&mut self, det: &Detection) -> TrackId {
        self.next_id += 1;

        let gate = EllipseGate::initial(det.bottom, det.class, det.lane, &self.profile, &self.params.gate);
        let kalman = self.params.variant == TrackerVariant::Kalman;

        self.tracks.push(Track::new(self.next_id, det, gate, kalman));
        self.next_id
    }
}

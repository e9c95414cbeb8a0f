//! Text formats of the hourly output files.
//!
//! * track paths: `{id} : {class} : [(x, y), (x, y), ...]`
//! * vehicle log: `{id},{class},{YYYY:MM:DD},{HH:MM:SS},lane {n},{axles|_},{_|WRONG_DIRECTION}`
//! * final counts: `{class} : {n}` per class, then `Total : {n}` and
//!   `Wrong direction : {n}`

use chrono::{NaiveDate, NaiveTime};
use std::fmt;
use std::str::FromStr;

use crate::axle::AxleConfig;
use crate::camera::LaneId;
use crate::class::VehicleClass;
use crate::counting::VehicleRecord;
use crate::error::Error;
use crate::geometry::Point;
use crate::track::{Track, TrackId};

pub const WRONG_DIRECTION: &str = "WRONG_DIRECTION";
const DATE_FORMAT: &str = "%Y:%m:%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct TrackPathLine {
    pub id: TrackId,
    pub class: VehicleClass,
    pub points: Vec<Point>,
}

impl TrackPathLine {
    /// `None` when the track is too short to be worth recording.
    pub fn from_track(track: &Track) -> Option<Self> {
        if !track.has_useful_trace() {
            return None;
        }

        Some(Self {
            id: track.id,
            class: track.class,
            points: track.trace(),
        })
    }
}

impl fmt::Display for TrackPathLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {} : [", self.id, self.class)?;

        for (i, p) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "({}, {})", p.x, p.y)?;
        }

        f.write_str("]")
    }
}

impl FromStr for TrackPathLine {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.trim_end().splitn(3, " : ");

        let id = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::parse(line, "bad track id"))?;
        let class = parts
            .next()
            .ok_or_else(|| Error::parse(line, "missing class"))?
            .trim()
            .parse()?;
        let list = parts
            .next()
            .ok_or_else(|| Error::parse(line, "missing point list"))?
            .trim();

        if !(list.starts_with('[') && list.ends_with(']')) {
            return Err(Error::parse(line, "point list must be bracketed"));
        }

        let numbers = integers(&list[1..list.len() - 1]).map_err(|r| Error::parse(line, r))?;
        if numbers.len() % 2 != 0 {
            return Err(Error::parse(line, "odd number of coordinates"));
        }

        let points = numbers.chunks(2).map(|c| Point::new(c[0], c[1])).collect();

        Ok(Self { id, class, points })
    }
}

/// Signed integers of a `(x, y), (x, y)` list, in order.
fn integers(s: &str) -> Result<Vec<i32>, String> {
    s.split(|c: char| c == '(' || c == ')' || c == ',' || c.is_whitespace())
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.parse::<i32>().map_err(|e| format!("`{}`: {}", tok, e)))
        .collect()
}

impl fmt::Display for VehicleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},lane {},{},{}",
            self.id,
            self.class,
            self.started_at.format(DATE_FORMAT),
            self.started_at.format(TIME_FORMAT),
            self.lane,
            self.axle_config.map(|c| c.code()).unwrap_or("_"),
            if self.wrong_direction { WRONG_DIRECTION } else { "_" },
        )
    }
}

impl FromStr for VehicleRecord {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() != 7 {
            return Err(Error::parse(line, "expected 7 fields"));
        }

        let id = fields[0]
            .parse()
            .map_err(|_| Error::parse(line, "bad track id"))?;
        let class = fields[1].parse()?;

        let date = NaiveDate::parse_from_str(fields[2], DATE_FORMAT)
            .map_err(|e| Error::parse(line, e.to_string()))?;
        let time = NaiveTime::parse_from_str(fields[3], TIME_FORMAT)
            .map_err(|e| Error::parse(line, e.to_string()))?;

        let lane = fields[4]
            .strip_prefix("lane ")
            .and_then(|n| n.parse().ok())
            .map(LaneId)
            .ok_or_else(|| Error::parse(line, "bad lane"))?;

        let axle_config = match fields[5] {
            "_" => None,
            code => Some(code.parse::<AxleConfig>()?),
        };

        let wrong_direction = match fields[6] {
            "_" => false,
            WRONG_DIRECTION => true,
            _ => return Err(Error::parse(line, "bad direction marker")),
        };

        Ok(Self {
            id,
            class,
            started_at: date.and_time(time),
            lane,
            axle_config,
            wrong_direction,
        })
    }
}

/// Per-class totals written at each flush.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FinalCounts {
    pub rows: Vec<(VehicleClass, u64)>,
    pub wrong_direction: u64,
}

impl FinalCounts {
    pub fn new(rows: Vec<(VehicleClass, u64)>, wrong_direction: u64) -> Self {
        Self {
            rows,
            wrong_direction,
        }
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().map(|(_, n)| n).sum()
    }

    pub fn get(&self, class: VehicleClass) -> u64 {
        self.rows
            .iter()
            .filter(|(c, _)| *c == class)
            .map(|(_, n)| n)
            .sum()
    }

    /// Adds `other` into `self`, keeping the fixed class order.
    pub fn merge(&mut self, other: &FinalCounts) {
        let rows = VehicleClass::ALL
            .iter()
            .map(|&c| (c, self.get(c) + other.get(c)))
            .collect();

        self.rows = rows;
        self.wrong_direction += other.wrong_direction;
    }

    /// Reads a counts file that may hold several consecutive flushes.
    pub fn parse_all(text: &str) -> Result<Self, Error> {
        let mut acc = FinalCounts::new(VehicleClass::ALL.iter().map(|&c| (c, 0)).collect(), 0);

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let (key, value) = line
                .split_once(" : ")
                .ok_or_else(|| Error::parse(line, "expected `key : value`"))?;
            let value: u64 = value
                .trim()
                .parse()
                .map_err(|_| Error::parse(line, "bad count"))?;

            match key.trim() {
                "Total" => (),
                "Wrong direction" => acc.wrong_direction += value,
                label => {
                    let class: VehicleClass = label.parse()?;
                    for row in acc.rows.iter_mut().filter(|(c, _)| *c == class) {
                        row.1 += value;
                    }
                }
            }
        }

        Ok(acc)
    }
}

impl fmt::Display for FinalCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (class, n) in &self.rows {
            writeln!(f, "{} : {}", class, n)?;
        }

        writeln!(f, "Total : {}", self.total())?;
        writeln!(f, "Wrong direction : {}", self.wrong_direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn track_path_line_format() {
        let line = TrackPathLine {
            id: 12,
            class: VehicleClass::Car,
            points: vec![Point::new(100, 200), Point::new(-3, 205)],
        };

        assert_eq!(line.to_string(), "12 : car : [(100, 200), (-3, 205)]");
        assert_eq!("12 : car : [(100, 200), (-3, 205)]".parse::<TrackPathLine>().unwrap(), line);
    }

    #[test]
    fn malformed_track_path_lines() {
        assert!("x : car : []".parse::<TrackPathLine>().is_err());
        assert!("1 : boat : []".parse::<TrackPathLine>().is_err());
        assert!("1 : car : (1, 2)".parse::<TrackPathLine>().is_err());
        assert!("1 : car : [(1, 2), (3)]".parse::<TrackPathLine>().is_err());
    }

    #[test]
    fn vehicle_line_format() {
        let rec = VehicleRecord {
            id: 41,
            class: VehicleClass::Truck5,
            started_at: NaiveDate::from_ymd_opt(2024, 1, 31)
                .and_then(|d| d.and_hms_opt(7, 5, 9))
                .unwrap(),
            lane: LaneId(2),
            axle_config: Some(AxleConfig::Tandem122),
            wrong_direction: false,
        };

        let text = rec.to_string();
        assert_eq!(text, "41,5t,2024:01:31,07:05:09,lane 2,122,_");
        assert_eq!(text.parse::<VehicleRecord>().unwrap(), rec);

        let wrong = "7,car,2024:01:31,23:59:59,lane 1,_,WRONG_DIRECTION"
            .parse::<VehicleRecord>()
            .unwrap();
        assert!(wrong.wrong_direction);
        assert!(wrong.axle_config.is_none());
    }

    #[test]
    fn final_counts_format_and_merge() {
        let mut counts = FinalCounts::new(vec![(VehicleClass::TwoWheeler, 3), (VehicleClass::Bus, 1)], 2);
        assert_eq!(counts.to_string(), "tw : 3\nbus : 1\nTotal : 4\nWrong direction : 2\n");

        let parsed = FinalCounts::parse_all(&format!("{}{}", counts, counts)).unwrap();
        assert_eq!(parsed.get(VehicleClass::TwoWheeler), 6);
        assert_eq!(parsed.wrong_direction, 4);
        assert_eq!(parsed.rows.len(), VehicleClass::ALL.len());

        counts.merge(&parsed);
        assert_eq!(counts.total(), 12);
    }

    proptest! {
        #[test]
        fn track_path_round_trip(
            id in 1u64..1_000_000,
            class_idx in 0usize..13,
            pts in proptest::collection::vec((-2000i32..4000, -2000i32..4000), 0..40),
        ) {
            let line = TrackPathLine {
                id,
                class: VehicleClass::ALL[class_idx],
                points: pts.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            };

            let parsed: TrackPathLine = line.to_string().parse().unwrap();
            prop_assert_eq!(parsed, line);
        }
    }
}

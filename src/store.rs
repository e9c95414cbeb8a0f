use serde_derive::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::counting::VehicleRecord;
use crate::error::Error;

/// Best effort persistence of counted vehicles. The text vehicle log stays
/// the source of truth; a failing store only produces an error-file line.
pub trait CountStore: Send {
    fn insert(&mut self, record: &VehicleRecord) -> Result<(), Error>;
}

/// Row layout shared by the stores: id, class, date, time, lane, axles.
#[derive(Serialize, Debug, PartialEq)]
pub struct StoredVehicle {
    pub id: String,
    pub class: String,
    pub date: String,
    pub time: String,
    pub lane: String,
    pub axle_config: String,
}

impl From<&VehicleRecord> for StoredVehicle {
    fn from(r: &VehicleRecord) -> Self {
        Self {
            id: r.id.to_string(),
            class: r.class.to_string(),
            date: r.started_at.format("%Y:%m:%d").to_string(),
            time: r.time(),
            lane: format!("lane {}", r.lane),
            axle_config: r.axle_config.map(|c| c.to_string()).unwrap_or_else(|| "_".into()),
        }
    }
}

/// Appends one JSON object per vehicle.
pub struct JsonLinesStore {
    out: BufWriter<File>,
}

impl JsonLinesStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl CountStore for JsonLinesStore {
    fn insert(&mut self, record: &VehicleRecord) -> Result<(), Error> {
        serde_json::to_writer(&mut self.out, &StoredVehicle::from(record))?;
        self.out
            .write_all(b"\n")
            .and_then(|_| self.out.flush())
            .map_err(|e| Error::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::LaneId;
    use crate::class::VehicleClass;
    use chrono::NaiveDate;

    #[test]
    fn json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vehicles.jsonl");
        let mut store = JsonLinesStore::open(&path).unwrap();

        let rec = VehicleRecord {
            id: 3,
            class: VehicleClass::Auto,
            started_at: NaiveDate::from_ymd_opt(2024, 6, 1)
                .and_then(|d| d.and_hms_opt(12, 0, 5))
                .unwrap(),
            lane: LaneId(1),
            axle_config: None,
            wrong_direction: false,
        };
        store.insert(&rec).unwrap();
        store.insert(&rec).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();

        assert_eq!(text.lines().count(), 2);
        assert_eq!(first["time"], "12:00:05");
        assert_eq!(first["lane"], "lane 1");
        assert_eq!(first["axle_config"], "_");
    }
}

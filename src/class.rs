use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Vehicle categories the detector reports, in the fixed order counts are
/// written in.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VehicleClass {
    #[serde(rename = "tw")]
    TwoWheeler,
    #[serde(rename = "car")]
    Car,
    #[serde(rename = "lgv")]
    Lgv,
    #[serde(rename = "2t")]
    Truck2,
    #[serde(rename = "3t")]
    Truck3,
    #[serde(rename = "4t")]
    Truck4,
    #[serde(rename = "5t")]
    Truck5,
    #[serde(rename = "6t")]
    Truck6,
    #[serde(rename = "bus")]
    Bus,
    #[serde(rename = "ml")]
    MiniLgv,
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "mb")]
    MiniBus,
    #[serde(rename = "tractr")]
    Tractor,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 13] = [
        VehicleClass::TwoWheeler,
        VehicleClass::Car,
        VehicleClass::Lgv,
        VehicleClass::Truck2,
        VehicleClass::Truck3,
        VehicleClass::Truck4,
        VehicleClass::Truck5,
        VehicleClass::Truck6,
        VehicleClass::Bus,
        VehicleClass::MiniLgv,
        VehicleClass::Auto,
        VehicleClass::MiniBus,
        VehicleClass::Tractor,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            VehicleClass::TwoWheeler => "tw",
            VehicleClass::Car => "car",
            VehicleClass::Lgv => "lgv",
            VehicleClass::Truck2 => "2t",
            VehicleClass::Truck3 => "3t",
            VehicleClass::Truck4 => "4t",
            VehicleClass::Truck5 => "5t",
            VehicleClass::Truck6 => "6t",
            VehicleClass::Bus => "bus",
            VehicleClass::MiniLgv => "ml",
            VehicleClass::Auto => "auto",
            VehicleClass::MiniBus => "mb",
            VehicleClass::Tractor => "tractr",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VehicleClass::TwoWheeler => "Two wheeler",
            VehicleClass::Car => "Car",
            VehicleClass::Lgv => "LGV",
            VehicleClass::Truck2 => "2-axle Truck",
            VehicleClass::Truck3 => "3-axle Truck",
            VehicleClass::Truck4 => "4-axle Truck",
            VehicleClass::Truck5 => "5-axle Truck",
            VehicleClass::Truck6 => "6-axle Truck",
            VehicleClass::Bus => "Bus",
            VehicleClass::MiniLgv => "Mini LGV",
            VehicleClass::Auto => "Auto",
            VehicleClass::MiniBus => "Mini Bus",
            VehicleClass::Tractor => "Tractor",
        }
    }

    /// Heavy vehicles get rounder gates, a shifted count interval and a longer
    /// heading baseline.
    pub fn is_heavy(&self) -> bool {
        !matches!(
            self,
            VehicleClass::TwoWheeler | VehicleClass::Car | VehicleClass::MiniLgv | VehicleClass::Auto
        )
    }

    /// Classes whose axles are matched and whose track-path log records axles.
    pub fn is_axled(&self) -> bool {
        matches!(
            self,
            VehicleClass::Truck2
                | VehicleClass::Truck3
                | VehicleClass::Truck4
                | VehicleClass::Truck5
                | VehicleClass::Truck6
                | VehicleClass::Bus
                | VehicleClass::Lgv
        )
    }

    /// Number of axles a multi-axle truck is expected to show. Only these
    /// classes get an inferred axle configuration.
    pub fn canonical_axles(&self) -> Option<usize> {
        match self {
            VehicleClass::Truck3 => Some(3),
            VehicleClass::Truck4 => Some(4),
            VehicleClass::Truck5 => Some(5),
            VehicleClass::Truck6 => Some(6),
            _ => None,
        }
    }

    /// Iteration priority when several tracks compete for axle boxes; lower
    /// goes first.
    pub fn axle_priority(&self) -> u8 {
        match self {
            VehicleClass::Truck6 => 0,
            VehicleClass::Truck5 => 1,
            VehicleClass::Truck4 => 2,
            VehicleClass::Truck3 => 3,
            VehicleClass::Truck2 => 4,
            VehicleClass::Bus => 5,
            VehicleClass::Lgv => 6,
            _ => u8::MAX,
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VehicleClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VehicleClass::ALL
            .iter()
            .copied()
            .find(|c| c.label() == s)
            .ok_or_else(|| Error::parse(s, "unknown vehicle class"))
    }
}

/// A value shared by a group of classes, e.g. one count interval for all
/// heavy vehicles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClassGroup<T> {
    pub classes: Vec<VehicleClass>,
    pub value: T,
}

/// Ordered list of class groups; the first group naming a class wins.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct ClassTable<T> {
    pub groups: Vec<ClassGroup<T>>,
}

impl<T> ClassTable<T> {
    pub fn new() -> Self {
        Self { groups: Vec::new() }
    }

    pub fn with(mut self, classes: &[VehicleClass], value: T) -> Self {
        self.groups.push(ClassGroup {
            classes: classes.to_vec(),
            value,
        });
        self
    }

    pub fn get(&self, class: VehicleClass) -> Option<&T> {
        self.groups
            .iter()
            .find(|g| g.classes.contains(&class))
            .map(|g| &g.value)
    }

    /// Every class must resolve, otherwise a track of that class could never
    /// be sized or counted.
    pub fn validate(&self, name: &str) -> Result<(), Error> {
        for class in VehicleClass::ALL {
            if self.get(class).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "`{}` has no entry for class `{}`",
                    name, class
                )));
            }
        }
        Ok(())
    }
}

impl<T> Default for ClassTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

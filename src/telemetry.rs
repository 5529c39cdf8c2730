use crate::protocol::BasicInfo;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

/// Keys of the telemetry result set. The string names are fixed and stable
/// across serialization and the simple MQTT output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    NumTemp,
    Voltage,
    Current,
    BatteryLevel,
    CycleCharge,
    Cycles,
    Temperature,
    CycleCapacity,
    Power,
    BatteryCharging,
    Runtime,
}

impl Metric {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Metric::NumTemp => "numTemp",
            Metric::Voltage => "voltage",
            Metric::Current => "current",
            Metric::BatteryLevel => "battery_level",
            Metric::CycleCharge => "cycle_charge",
            Metric::Cycles => "cycles",
            Metric::Temperature => "temperature",
            Metric::CycleCapacity => "cycle_capacity",
            Metric::Power => "power",
            Metric::BatteryCharging => "battery_charging",
            Metric::Runtime => "runtime",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Metric {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A single telemetry value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Float(f64),
    Int(u32),
    Bool(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Float(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Float(value) => serializer.serialize_f64(*value),
            Value::Int(value) => serializer.serialize_u32(*value),
            Value::Bool(value) => serializer.serialize_bool(*value),
        }
    }
}

/// One update cycle's result set, ordered by [`Metric`].
///
/// An empty set is the data-level failure signal: a cycle either yields
/// every metric or none of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry(BTreeMap<Metric, Value>);

impl Deref for Telemetry {
    type Target = BTreeMap<Metric, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (metric, value) in &self.0 {
            writeln!(f, "{metric}: {value}")?;
        }
        Ok(())
    }
}

impl FromIterator<(Metric, Value)> for Telemetry {
    fn from_iter<I: IntoIterator<Item = (Metric, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Telemetry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter())
    }
}

/// Extend the decoded measurement with the derived metrics.
///
/// `cycle_capacity` and `power` multiply out unrounded. `battery_charging`
/// is true only for strictly positive current. `runtime` carries the
/// remaining discharge time in whole seconds, truncated, and is present
/// only while discharging.
impl From<BasicInfo> for Telemetry {
    fn from(info: BasicInfo) -> Self {
        let mut values = BTreeMap::new();
        values.insert(Metric::NumTemp, Value::Int(u32::from(info.num_temp)));
        values.insert(Metric::Voltage, Value::Float(info.voltage));
        values.insert(Metric::Current, Value::Float(info.current));
        values.insert(
            Metric::BatteryLevel,
            Value::Int(u32::from(info.battery_level)),
        );
        values.insert(Metric::CycleCharge, Value::Float(info.cycle_charge));
        values.insert(Metric::Cycles, Value::Int(u32::from(info.cycles)));
        values.insert(Metric::Temperature, Value::Float(info.temperature));
        values.insert(
            Metric::CycleCapacity,
            Value::Float(info.voltage * info.cycle_charge),
        );
        values.insert(Metric::Power, Value::Float(info.voltage * info.current));
        values.insert(Metric::BatteryCharging, Value::Bool(info.current > 0.0));
        if info.current < 0.0 {
            values.insert(
                Metric::Runtime,
                Value::Int((info.cycle_charge / info.current.abs() * 3600.0) as u32),
            );
        }
        Self(values)
    }
}

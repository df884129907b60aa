//! Channel identifiers and the live channel store
//!
//! Every value the driver reads, derives or publishes is addressed by a
//! [`ChannelId`]. Register bindings write decoded values into the
//! [`ChannelStore`]; the protection engine and the coordinator read a
//! snapshot from it once per cycle.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::alarms;

/// Engineering unit of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    Volt,
    Millivolt,
    Ampere,
    Milliampere,
    Percent,
    DegreeCelsius,
    DeziDegreeCelsius,
    KilowattHour,
    None,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Volt => "V",
            Unit::Millivolt => "mV",
            Unit::Ampere => "A",
            Unit::Milliampere => "mA",
            Unit::Percent => "%",
            Unit::DegreeCelsius => "°C",
            Unit::DeziDegreeCelsius => "d°C",
            Unit::KilowattHour => "kWh",
            Unit::None => "",
        }
    }
}

/// Identifier of a telemetry, command or status channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ChannelId {
    // Battery-level telemetry
    Voltage,
    Current,
    Soc,
    Soh,
    MinCellVoltage,
    MaxCellVoltage,
    MinCellTemperature,
    MaxCellTemperature,
    ChargeMaxVoltage,
    DischargeMinVoltage,
    Capacity,

    // Cluster telemetry
    PowerCircuitControl,
    BatteryWorkState,
    ClusterRunState,
    Cluster1Voltage,
    Cluster1Current,
    Cluster1Soh,
    Cluster1MaxCellVoltageId,
    Cluster1MaxCellVoltage,
    Cluster1MinCellVoltageId,
    Cluster1MinCellVoltage,
    Cluster1MaxCellTemperatureId,
    Cluster1MaxCellTemperature,
    Cluster1MinCellTemperatureId,
    Cluster1MinCellTemperature,
    NeedCharge,
    ModuleQty,
    TotalVoltageOfSingleModule,

    // Limits reported by the BMS itself
    BpChargeBms,
    BpDischargeBms,

    /// Single cell voltage, zero-based cell index
    CellVoltage(u8),
    /// Single temperature sensor, zero-based sensor index
    CellTemperature(u8),
    /// One bit of an alarm word
    Alarm { address: u16, bit: u8 },

    // Published by the driver
    ChargeMaxCurrent,
    DischargeMaxCurrent,
    StartStop,
    StateMachine,
    RunFailed,
    MaxStartAttempts,
    MaxStopAttempts,
}

impl ChannelId {
    /// Unit of the channel's engineering value
    pub fn unit(&self) -> Unit {
        match self {
            Self::Voltage | Self::ChargeMaxVoltage | Self::DischargeMinVoltage => Unit::Volt,
            Self::Current
            | Self::BpChargeBms
            | Self::BpDischargeBms
            | Self::ChargeMaxCurrent
            | Self::DischargeMaxCurrent => Unit::Ampere,
            Self::MinCellVoltage
            | Self::MaxCellVoltage
            | Self::Cluster1Voltage
            | Self::Cluster1MaxCellVoltage
            | Self::Cluster1MinCellVoltage
            | Self::TotalVoltageOfSingleModule
            | Self::CellVoltage(_) => Unit::Millivolt,
            Self::Cluster1Current => Unit::Milliampere,
            Self::Soc | Self::Soh | Self::Cluster1Soh => Unit::Percent,
            Self::MinCellTemperature | Self::MaxCellTemperature | Self::CellTemperature(_) => {
                Unit::DegreeCelsius
            },
            Self::Cluster1MaxCellTemperature | Self::Cluster1MinCellTemperature => {
                Unit::DeziDegreeCelsius
            },
            Self::Capacity => Unit::KilowattHour,
            _ => Unit::None,
        }
    }

    pub fn is_alarm(&self) -> bool {
        matches!(self, Self::Alarm { .. })
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CellVoltage(i) => write!(f, "CLUSTER_1_BATTERY_{:03}_VOLTAGE", u16::from(*i) + 1),
            Self::CellTemperature(i) => {
                write!(f, "CLUSTER_1_BATTERY_{:03}_TEMPERATURE", u16::from(*i) + 1)
            },
            Self::Alarm { address, bit } => match alarms::catalog().get(*address, *bit) {
                Some(def) => write!(f, "{}", def.name),
                None => write!(f, "ALARM_{:04X}_{}", address, bit),
            },
            other => {
                // Debug names are CamelCase; emit SCREAMING_SNAKE_CASE
                let name = format!("{:?}", other);
                let mut out = String::with_capacity(name.len() + 8);
                for (i, ch) in name.chars().enumerate() {
                    if ch.is_ascii_uppercase() && i > 0 {
                        out.push('_');
                    }
                    if ch.is_ascii_digit() && i > 0 && !out.ends_with('_') {
                        out.push('_');
                    }
                    out.push(ch.to_ascii_uppercase());
                }
                write!(f, "{}", out)
            },
        }
    }
}

/// Stored channel value with its update time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelValue {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Concurrent channel store
///
/// Written by the transport (decoded reads), by the hardware prober (legacy
/// defaults) and by the driver (published outputs).
#[derive(Debug, Default)]
pub struct ChannelStore {
    values: DashMap<ChannelId, ChannelValue>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: ChannelId, value: f64) {
        self.values.insert(
            id,
            ChannelValue {
                value,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn set_bool(&self, id: ChannelId, value: bool) {
        self.set(id, if value { 1.0 } else { 0.0 });
    }

    /// Set or clear a channel
    pub fn set_opt(&self, id: ChannelId, value: Option<f64>) {
        match value {
            Some(v) => self.set(id, v),
            None => self.invalidate(id),
        }
    }

    /// Drop the value of a channel (no data)
    pub fn invalidate(&self, id: ChannelId) {
        self.values.remove(&id);
    }

    pub fn get(&self, id: ChannelId) -> Option<f64> {
        self.values.get(&id).map(|v| v.value)
    }

    pub fn get_bool(&self, id: ChannelId) -> Option<bool> {
        self.get(id).map(|v| v != 0.0)
    }

    pub fn entry(&self, id: ChannelId) -> Option<ChannelValue> {
        self.values.get(&id).map(|v| *v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All active alarm channels, sorted by address and bit
    pub fn active_alarms(&self) -> Vec<ChannelId> {
        let mut active: Vec<ChannelId> = self
            .values
            .iter()
            .filter(|e| e.key().is_alarm() && e.value().value != 0.0)
            .map(|e| *e.key())
            .collect();
        active.sort();
        active
    }

    /// Sorted copy of every stored value
    pub fn snapshot(&self) -> Vec<(ChannelId, f64)> {
        let mut all: Vec<(ChannelId, f64)> =
            self.values.iter().map(|e| (*e.key(), e.value().value)).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(ChannelId::MaxCellVoltage.to_string(), "MAX_CELL_VOLTAGE");
        assert_eq!(ChannelId::Cluster1Voltage.to_string(), "CLUSTER_1_VOLTAGE");
        assert_eq!(ChannelId::BpChargeBms.to_string(), "BP_CHARGE_BMS");
        assert_eq!(
            ChannelId::CellVoltage(0).to_string(),
            "CLUSTER_1_BATTERY_001_VOLTAGE"
        );
        assert_eq!(
            ChannelId::Alarm {
                address: 0x2140,
                bit: 0
            }
            .to_string(),
            "PRE_ALARM_CELL_VOLTAGE_HIGH"
        );
        assert_eq!(
            ChannelId::Alarm {
                address: 0x3000,
                bit: 2
            }
            .to_string(),
            "ALARM_3000_2"
        );
    }

    #[test]
    fn test_units() {
        assert_eq!(ChannelId::Voltage.unit(), Unit::Volt);
        assert_eq!(ChannelId::Cluster1Voltage.unit(), Unit::Millivolt);
        assert_eq!(ChannelId::CellTemperature(3).unit(), Unit::DegreeCelsius);
        assert_eq!(ChannelId::Capacity.unit().symbol(), "kWh");
    }

    #[test]
    fn test_store_set_get_invalidate() {
        let store = ChannelStore::new();
        assert!(store.is_empty());

        store.set(ChannelId::Soc, 55.0);
        store.set_bool(ChannelId::NeedCharge, true);
        assert_eq!(store.get(ChannelId::Soc), Some(55.0));
        assert_eq!(store.get_bool(ChannelId::NeedCharge), Some(true));

        store.set_opt(ChannelId::Soc, None);
        assert_eq!(store.get(ChannelId::Soc), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_active_alarms_sorted() {
        let store = ChannelStore::new();
        let a = ChannelId::Alarm {
            address: 0x2143,
            bit: 1,
        };
        let b = ChannelId::Alarm {
            address: 0x2140,
            bit: 3,
        };
        let c = ChannelId::Alarm {
            address: 0x2141,
            bit: 0,
        };
        store.set_bool(a, true);
        store.set_bool(b, true);
        store.set_bool(c, false);
        assert_eq!(store.active_alarms(), vec![b, a]);
    }
}

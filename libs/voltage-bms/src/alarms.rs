//! Alarm catalog for the BYD-style battery cluster
//!
//! Maps each (register, bit) pair to a named alarm with a severity level.
//! The register map builds its bit bindings from this table, so the
//! catalog is the single source of alarm names.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use serde::Serialize;

use crate::channel::{ChannelId, ChannelStore};

/// Alarm severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AlarmLevel {
    Info,
    Warning,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmDefinition {
    pub address: u16,
    pub bit: u8,
    pub level: AlarmLevel,
    pub name: String,
}

impl AlarmDefinition {
    pub fn channel(&self) -> ChannelId {
        ChannelId::Alarm {
            address: self.address,
            bit: self.bit,
        }
    }
}

// ============================================================================
// Register layout
// ============================================================================

const CELL_ALARM_BITS: &[(u8, &str)] = &[
    (0, "CELL_VOLTAGE_HIGH"),
    (1, "CELL_VOLTAGE_LOW"),
    (2, "CELL_VOLTAGE_DIFF_TOO_BIG"),
    (3, "DISCHARGE_TEMP_HIGH"),
    (4, "DISCHARGE_TEMP_LOW"),
    (5, "CHARGE_TEMP_HIGH"),
    (6, "CHARGE_TEMP_LOW"),
    (7, "TEMP_DIFF_TOO_BIG"),
    (9, "POWER_POLE_HIGH"),
    (10, "DISCHARGE_CURRENT_HIGH"),
    (11, "CHARGE_CURRENT_HIGH"),
];

const SYSTEM_ALARM_BITS: &[(u8, &str)] = &[
    (0, "SYSTEM_VOLTAGE_HIGH"),
    (1, "SYSTEM_VOLTAGE_LOW"),
    (2, "SYSTEM_VOLTAGE_UNBALANCED"),
    (3, "INSULATION_RESISTANCE_LOWER"),
    (4, "POS_INSULATION_RESISTANCE_LOWER"),
    (5, "NEG_INSULATION_RESISTANCE_LOWER"),
    (6, "SYSTEM_SOC_LOWER"),
    (7, "SYSTEM_SOC_HIGH"),
    (8, "SOH_LOWER"),
    (9, "PACK_TEMP_HIGH"),
];

/// (address, name prefix, level) for the three-stage alarm words
const STAGED_GROUPS: &[(u16, &str, AlarmLevel, &[(u8, &str)])] = &[
    (0x2140, "PRE_ALARM", AlarmLevel::Info, CELL_ALARM_BITS),
    (0x2141, "LEVEL1", AlarmLevel::Warning, CELL_ALARM_BITS),
    (0x2143, "LEVEL2", AlarmLevel::Fault, CELL_ALARM_BITS),
    (0x2145, "PRE_ALARM", AlarmLevel::Info, SYSTEM_ALARM_BITS),
    (0x2146, "LEVEL1", AlarmLevel::Warning, SYSTEM_ALARM_BITS),
    (0x2147, "LEVEL2", AlarmLevel::Fault, SYSTEM_ALARM_BITS),
];

const BCU_ALARM_WORD: u16 = 0x2144;
const BCU_ALARM_BITS: &[(u8, &str, AlarmLevel)] = &[
    (0, "ALARM_SLAVE_CONTROL_SUMMARY", AlarmLevel::Warning),
    (1, "ALARM_BCU_NTC", AlarmLevel::Warning),
    (2, "ALARM_CONTACTOR_ADHESION", AlarmLevel::Fault),
    (3, "ALARM_BCU_BMU_COMMUNICATION", AlarmLevel::Warning),
    (4, "FAILURE_EEPROM2", AlarmLevel::Fault),
    (5, "ALARM_CURRENT_SENSOR", AlarmLevel::Warning),
    (6, "ALARM_INSULATION_CHECK", AlarmLevel::Warning),
    (7, "ALARM_BAU_COMMUNICATION", AlarmLevel::Warning),
    (8, "SHIELDED_SWITCH_STATE", AlarmLevel::Info),
    (9, "ALARM_FUSE", AlarmLevel::Fault),
];

/// Slave communication words: (address, bit count, first slave number)
const SLAVE_COMMUNICATION_WORDS: &[(u16, u8, u16)] = &[(0x2183, 16, 17), (0x2184, 6, 11)];

const FAILURE_WORD: u16 = 0x2185;
const FAILURE_BITS: &[(u8, &str, AlarmLevel)] = &[
    (0, "FAILURE_SLAVE_UNIT_INITIALIZATION", AlarmLevel::Fault),
    (1, "FAILURE_VOLTAGE_SAMPLING_LINE", AlarmLevel::Fault),
    (2, "FAILURE_CONNECTING_LINE", AlarmLevel::Fault),
    (3, "FAILURE_SAMPLING_CHIP", AlarmLevel::Fault),
    (4, "FAILURE_VOLTAGE_SAMPLING", AlarmLevel::Fault),
    (5, "FAILURE_TEMP_SAMPLING", AlarmLevel::Fault),
    (6, "FAILURE_TEMP_SENSOR", AlarmLevel::Fault),
    (7, "FAILURE_CONTACTOR", AlarmLevel::Fault),
    (8, "FAILURE_EEPROM", AlarmLevel::Fault),
    (9, "FAILURE_PASSIVE_BALANCE", AlarmLevel::Warning),
    (10, "FAILURE_PASSIVE_BALANCE_TEMP", AlarmLevel::Warning),
    (11, "FAILURE_ACTIVE_BALANCE", AlarmLevel::Warning),
];

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug)]
pub struct AlarmCatalog {
    by_address: BTreeMap<u16, Vec<AlarmDefinition>>,
    index: HashMap<(u16, u8), (u16, usize)>,
}

impl AlarmCatalog {
    fn build() -> Self {
        let mut by_address: BTreeMap<u16, Vec<AlarmDefinition>> = BTreeMap::new();
        let mut push = |address: u16, bit: u8, level: AlarmLevel, name: String| {
            by_address.entry(address).or_default().push(AlarmDefinition {
                address,
                bit,
                level,
                name,
            });
        };

        for (address, prefix, level, bits) in STAGED_GROUPS {
            for (bit, name) in bits.iter() {
                push(*address, *bit, *level, format!("{}_{}", prefix, name));
            }
        }
        for (bit, name, level) in BCU_ALARM_BITS {
            push(BCU_ALARM_WORD, *bit, *level, (*name).to_string());
        }
        for (address, count, first_slave) in SLAVE_COMMUNICATION_WORDS {
            for bit in 0..*count {
                push(
                    *address,
                    bit,
                    AlarmLevel::Warning,
                    format!("SLAVE_{}_COMMUNICATION_ERROR", first_slave + u16::from(bit)),
                );
            }
        }
        for (bit, name, level) in FAILURE_BITS {
            push(FAILURE_WORD, *bit, *level, (*name).to_string());
        }

        let mut index = HashMap::new();
        for (address, defs) in &by_address {
            for (pos, def) in defs.iter().enumerate() {
                index.insert((def.address, def.bit), (*address, pos));
            }
        }

        Self { by_address, index }
    }

    pub fn get(&self, address: u16, bit: u8) -> Option<&AlarmDefinition> {
        let (word, pos) = self.index.get(&(address, bit))?;
        self.by_address.get(word).and_then(|defs| defs.get(*pos))
    }

    /// Alarm words in ascending address order
    pub fn addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.by_address.keys().copied()
    }

    pub fn for_address(&self, address: u16) -> &[AlarmDefinition] {
        self.by_address
            .get(&address)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlarmDefinition> {
        self.by_address.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Active alarms at or above `level`
    pub fn active<'a>(
        &'a self,
        store: &'a ChannelStore,
        level: AlarmLevel,
    ) -> impl Iterator<Item = &'a AlarmDefinition> + 'a {
        self.iter()
            .filter(move |def| def.level >= level)
            .filter(move |def| store.get_bool(def.channel()).unwrap_or(false))
    }

    /// True when any fault-level alarm bit is set
    pub fn has_active_fault(&self, store: &ChannelStore) -> bool {
        self.active(store, AlarmLevel::Fault).next().is_some()
    }
}

static CATALOG: OnceLock<AlarmCatalog> = OnceLock::new();

pub fn catalog() -> &'static AlarmCatalog {
    CATALOG.get_or_init(AlarmCatalog::build)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_catalog_size() {
        // 3 x 11 cell + 3 x 10 system + 10 BCU + 22 slave + 12 failure
        assert_eq!(catalog().len(), 33 + 30 + 10 + 22 + 12);
        assert_eq!(
            catalog().addresses().collect::<Vec<_>>(),
            vec![0x2140, 0x2141, 0x2143, 0x2144, 0x2145, 0x2146, 0x2147, 0x2183, 0x2184, 0x2185]
        );
    }

    #[test]
    fn test_lookup() {
        let def = catalog().get(0x2143, 11).unwrap();
        assert_eq!(def.name, "LEVEL2_CHARGE_CURRENT_HIGH");
        assert_eq!(def.level, AlarmLevel::Fault);

        assert!(catalog().get(0x2140, 8).is_none());
        assert_eq!(
            catalog().get(0x2183, 0).unwrap().name,
            "SLAVE_17_COMMUNICATION_ERROR"
        );
        assert_eq!(
            catalog().get(0x2184, 5).unwrap().name,
            "SLAVE_16_COMMUNICATION_ERROR"
        );
        assert_eq!(catalog().get(0x2144, 9).unwrap().name, "ALARM_FUSE");
    }

    #[test]
    fn test_fault_detection() {
        let store = ChannelStore::new();
        let pre = catalog().get(0x2140, 0).unwrap().channel();
        store.set_bool(pre, true);
        assert!(!catalog().has_active_fault(&store));
        assert_eq!(catalog().active(&store, AlarmLevel::Info).count(), 1);

        let contactor = catalog().get(0x2185, 7).unwrap().channel();
        store.set_bool(contactor, true);
        assert!(catalog().has_active_fault(&store));
    }
}

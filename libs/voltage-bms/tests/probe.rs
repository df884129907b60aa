//! Hardware revision probe driven by pack-voltage reads
#![allow(clippy::disallowed_methods)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing_test::traced_test;
use voltage_bms::config::ProbeConfig;
use voltage_bms::protocol::{PACK_VOLTAGE_REGISTER, VOLTAGE_LIMITS_REGISTER};
use voltage_bms::{
    BatteryConfig, BatteryDriver, BmsError, ChannelId, OneShotReader, ProbeOutcome, ProbeState,
    Result,
};

/// Fails the first `failures` reads, then answers with `answer`
struct ScriptedReader {
    failures: usize,
    answer: Option<u16>,
    calls: AtomicUsize,
}

impl ScriptedReader {
    fn new(failures: usize, answer: Option<u16>) -> Arc<Self> {
        Arc::new(Self {
            failures,
            answer,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl OneShotReader for ScriptedReader {
    async fn read_once(&self, _address: u16) -> Result<Option<u16>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(BmsError::transport("no response"));
        }
        Ok(self.answer)
    }
}

const PACK_WORDS: [u16; 13] = [7000, 0, 3, 50, 98, 1, 3300, 2, 3280, 3, 250, 4, 240];

#[tokio::test]
#[traced_test]
async fn test_current_revision_adds_voltage_limit_registers() {
    let reader = ScriptedReader::new(0, Some(20));
    let driver = BatteryDriver::new(BatteryConfig::default(), reader.clone()).unwrap();
    driver.activate();
    assert!(driver.read_task(VOLTAGE_LIMITS_REGISTER).is_none());

    let pack = driver.read_task(PACK_VOLTAGE_REGISTER).unwrap();
    let outcome = driver
        .apply_read(&pack, Some(&PACK_WORDS))
        .unwrap()
        .unwrap()
        .await
        .unwrap();

    assert_eq!(outcome, ProbeOutcome::Extended);
    assert_eq!(driver.prober().state(), ProbeState::Completed);
    let limits = driver.read_task(VOLTAGE_LIMITS_REGISTER).unwrap();
    driver.apply_read(&limits, Some(&[8300, 6500])).unwrap();
    assert_eq!(driver.store().get(ChannelId::ChargeMaxVoltage), Some(830.0));
    assert_eq!(driver.store().get(ChannelId::DischargeMinVoltage), Some(650.0));
    assert!(logs_contain("Detected current hardware version"));
}

#[tokio::test]
#[traced_test]
async fn test_legacy_revision_installs_defaults() {
    let driver = BatteryDriver::new(BatteryConfig::default(), ScriptedReader::new(0, None)).unwrap();
    driver.activate();
    let pack = driver.read_task(PACK_VOLTAGE_REGISTER).unwrap();
    let outcome = driver
        .apply_read(&pack, Some(&PACK_WORDS))
        .unwrap()
        .unwrap()
        .await
        .unwrap();

    assert_eq!(outcome, ProbeOutcome::Legacy);
    assert_eq!(driver.tasks().len(), 11);
    assert_eq!(driver.store().get(ChannelId::ChargeMaxVoltage), Some(820.0));
    assert_eq!(driver.store().get(ChannelId::DischargeMinVoltage), Some(638.0));
    assert!(logs_contain("Detected old hardware version"));
}

#[tokio::test]
async fn test_absent_pack_reading_keeps_probe_waiting() {
    let reader = ScriptedReader::new(0, Some(1));
    let driver = BatteryDriver::new(BatteryConfig::default(), reader.clone()).unwrap();
    driver.activate();
    let pack = driver.read_task(PACK_VOLTAGE_REGISTER).unwrap();

    assert!(driver.apply_read(&pack, None).unwrap().is_none());
    assert_eq!(driver.prober().state(), ProbeState::InFlight);
    assert_eq!(reader.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_probe_waits_for_activation() {
    let driver = BatteryDriver::new(BatteryConfig::default(), ScriptedReader::new(0, Some(1))).unwrap();
    let pack = driver.read_task(PACK_VOLTAGE_REGISTER).unwrap();
    assert!(driver.apply_read(&pack, Some(&PACK_WORDS)).unwrap().is_none());
    assert_eq!(driver.prober().state(), ProbeState::NotStarted);
}

#[tokio::test]
#[traced_test]
async fn test_failed_probe_retries_after_reconnect_when_enabled() {
    let reader = ScriptedReader::new(1, Some(7));
    let config = BatteryConfig {
        probe: ProbeConfig {
            rearm_on_reconnect: true,
        },
        ..Default::default()
    };
    let driver = BatteryDriver::new(config, reader.clone()).unwrap();
    driver.activate();
    let pack = driver.read_task(PACK_VOLTAGE_REGISTER).unwrap();

    let outcome = driver
        .apply_read(&pack, Some(&PACK_WORDS))
        .unwrap()
        .unwrap()
        .await
        .unwrap();
    assert_eq!(outcome, ProbeOutcome::ReadFailed);
    assert!(logs_contain("Unable to detect hardware version"));

    // claimed: no second attempt without a re-arm
    assert!(driver.apply_read(&pack, Some(&PACK_WORDS)).unwrap().is_none());

    assert!(driver.on_transport_reconnected());
    let outcome = driver
        .apply_read(&pack, Some(&PACK_WORDS))
        .unwrap()
        .unwrap()
        .await
        .unwrap();
    assert_eq!(outcome, ProbeOutcome::Extended);
    assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
}

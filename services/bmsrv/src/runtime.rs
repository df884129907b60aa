//! Fixed-period cycle runtime
//!
//! One cycle: poll read tasks (HIGH every cycle, LOW every N cycles), apply
//! protection, run the coordinator, then flush queued writes once.

use std::sync::Arc;

use errors::{VoltageErrorTrait, VoltageResult};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voltage_bms::{
    BatteryDriver, CoordinatorReport, Limits, OneShotReader, Priority, RegisterTransport,
};

use crate::config::{AppConfig, ServiceConfig};

/// Outcome of one cycle
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub cycle: u64,
    pub reads_ok: usize,
    pub reads_failed: usize,
    pub writes: usize,
    pub limits: Arc<Limits>,
    pub report: Arc<CoordinatorReport>,
}

pub struct BatteryService {
    driver: Arc<BatteryDriver>,
    transport: Arc<dyn RegisterTransport>,
    service: ServiceConfig,
    cycle: u64,
    was_connected: bool,
}

impl BatteryService {
    pub fn new<T>(config: &AppConfig, transport: Arc<T>) -> VoltageResult<Self>
    where
        T: RegisterTransport + OneShotReader + 'static,
    {
        let reader: Arc<dyn OneShotReader> = transport.clone();
        let driver = BatteryDriver::new(config.battery.clone(), reader)?;
        Ok(Self {
            driver: Arc::new(driver),
            transport,
            service: config.service.clone(),
            cycle: 0,
            was_connected: true,
        })
    }

    pub fn driver(&self) -> &Arc<BatteryDriver> {
        &self.driver
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycle
    }

    pub fn activate(&self) {
        self.driver.activate();
    }

    fn poll_low_priority(&self) -> bool {
        self.cycle % u64::from(self.service.low_priority_every.max(1)) == 0
    }

    /// Execute one cycle
    pub async fn run_cycle(&mut self) -> CycleSummary {
        let connected = self.transport.is_connected();
        if connected && !self.was_connected {
            info!("Transport reconnected");
            if self.driver.on_transport_reconnected() {
                debug!("Hardware probe re-armed after reconnect");
            }
        }
        self.was_connected = connected;

        let low = self.poll_low_priority();
        let mut reads_ok = 0;
        let mut reads_failed = 0;
        for task in self.driver.tasks().snapshot().iter() {
            if !task.function().is_read() || (task.priority() == Priority::Low && !low) {
                continue;
            }
            let words = match self
                .transport
                .read_holding(task.start(), task.register_count())
                .await
            {
                Ok(words) => words,
                Err(e) => {
                    let start = format!("0x{:04X}", task.start());
                    if e.is_retryable() {
                        info!(start = %start, code = e.error_code(), "Read failed: {}", e);
                    } else {
                        warn!(start = %start, code = e.error_code(), "Read failed: {}", e);
                    }
                    None
                },
            };
            if words.is_some() {
                reads_ok += 1;
            } else {
                reads_failed += 1;
            }
            if let Err(e) = self.driver.apply_read(task, words.as_deref()) {
                warn!(start = format!("0x{:04X}", task.start()), "Decode failed: {}", e);
                if let Err(e) = self.driver.apply_read(task, None) {
                    warn!(start = format!("0x{:04X}", task.start()), "Invalidate failed: {}", e);
                }
            }
        }

        let limits = self.driver.on_before_cycle(self.service.cycle_seconds());
        let report = self.driver.on_after_cycle();

        let pending = self.driver.take_writes();
        let writes = pending.len();
        for request in &pending {
            if let Err(e) = self.transport.write(request).await {
                warn!(
                    address = format!("0x{:04X}", request.address),
                    "Write failed: {}", e
                );
            }
        }

        debug!("{}", self.driver.debug_log());
        self.cycle += 1;

        CycleSummary {
            cycle: self.cycle,
            reads_ok,
            reads_failed,
            writes,
            limits,
            report,
        }
    }

    /// Cycle until cancelled or `max_cycles` have run
    pub async fn run(mut self, token: CancellationToken, max_cycles: Option<u64>) -> VoltageResult<()> {
        self.activate();
        let mut interval = tokio::time::interval(self.service.cycle());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            cycle_ms = self.service.cycle_ms,
            low_priority_every = self.service.low_priority_every,
            "Battery service started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let summary = self.run_cycle().await;
                    if summary.report.run_failed {
                        warn!(cycle = summary.cycle, "Coordinator run failed");
                    }
                    if max_cycles.is_some_and(|max| summary.cycle >= max) {
                        info!(cycles = summary.cycle, "Cycle limit reached");
                        break;
                    }
                }
                () = token.cancelled() => {
                    info!("Battery service received cancellation signal, shutting down");
                    break;
                }
            }
        }

        info!(
            cycles = self.cycle,
            state = %self.driver.report().state,
            "Battery service stopped"
        );
        Ok(())
    }
}

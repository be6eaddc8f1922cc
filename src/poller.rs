//! Poll cycle driver
//!
//! One cycle: build the query, send it, wait, read, classify, report.
//! Cycles repeat at a fixed interval with no retry or backoff; a device that
//! stays silent is simply polled again on schedule.
//!
//! ```text
//!        send ok                read done
//!  Idle ─────────▶ AwaitingResponse ─────────▶ Idle ─ sleep(interval) ─▶ ...
//! ```
//!
//! Only transport failures (serial I/O, direction line) stop the loop.
//! Malformed frames and exception replies are logged and dropped.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{PollerConfig, QueryConfig};
use crate::direction::DirectionControl;
use crate::error::{exception_description, ModbusError, ModbusResult};
use crate::frame::{build_query, decode_read_response, format_hex, QueryFrame, RegisterResponse};
use crate::transport::RtuLink;

/// Where the poller is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    AwaitingResponse,
}

/// Result of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Valid response with decoded registers
    Registers {
        response: RegisterResponse,
        raw: Vec<u8>,
    },
    /// Nothing arrived within the read timeout
    NoResponse,
    /// Bytes arrived but did not form a usable frame
    Discarded { raw: Vec<u8>, reason: String },
    /// Device answered with an exception code
    Exception { raw: Vec<u8>, code: u8 },
}

impl CycleOutcome {
    /// Classify the bytes read after `query`.
    pub fn classify(raw: Vec<u8>, query: &QueryFrame) -> Self {
        if raw.is_empty() {
            return CycleOutcome::NoResponse;
        }
        match decode_read_response(&raw, query.slave_id(), query.register_count()) {
            Ok(response) => CycleOutcome::Registers { response, raw },
            Err(ModbusError::Exception { code, .. }) => CycleOutcome::Exception { raw, code },
            Err(e) => CycleOutcome::Discarded {
                raw,
                reason: e.to_string(),
            },
        }
    }

    /// Raw bytes received this cycle
    pub fn raw(&self) -> &[u8] {
        match self {
            CycleOutcome::Registers { raw, .. }
            | CycleOutcome::Discarded { raw, .. }
            | CycleOutcome::Exception { raw, .. } => raw,
            CycleOutcome::NoResponse => &[],
        }
    }
}

/// Record of one completed cycle
#[derive(Debug, Clone)]
pub struct PollReport {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub query: QueryFrame,
    pub outcome: CycleOutcome,
}

/// Outcome counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub readings: u64,
    pub no_response: u64,
    pub discarded: u64,
    pub exceptions: u64,
}

impl PollStats {
    fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Registers { .. } => self.readings += 1,
            CycleOutcome::NoResponse => self.no_response += 1,
            CycleOutcome::Discarded { .. } => self.discarded += 1,
            CycleOutcome::Exception { .. } => self.exceptions += 1,
        }
    }
}

/// Drives poll cycles over an [`RtuLink`]
pub struct Poller<S, D: DirectionControl> {
    link: RtuLink<S, D>,
    query: QueryConfig,
    interval: Duration,
    max_cycles: Option<u64>,
    state: PollState,
    stats: PollStats,
}

impl<S, D> Poller<S, D>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    D: DirectionControl,
{
    pub fn new(mut link: RtuLink<S, D>, config: &PollerConfig) -> Self {
        link.set_packet_logging(config.packet_logging);
        Self {
            link,
            query: config.query.clone(),
            interval: config.poll_interval(),
            max_cycles: config.max_cycles,
            state: PollState::Idle,
            stats: PollStats::default(),
        }
    }

    /// Run a single cycle.
    ///
    /// Returns `Err` only for transport failures; every other outcome is a
    /// [`PollReport`].
    pub async fn poll_once(&mut self) -> ModbusResult<PollReport> {
        let query = build_query(
            self.query.slave_id,
            self.query.start_register,
            self.query.register_count,
        );
        self.stats.cycles += 1;
        let cycle = self.stats.cycles;

        self.link.send(query.as_bytes()).await?;
        self.state = PollState::AwaitingResponse;

        let raw = self
            .link
            .read_reply(&query, self.query.max_response_bytes)
            .await;
        self.state = PollState::Idle;

        let outcome = CycleOutcome::classify(raw?, &query);
        self.stats.record(&outcome);

        Ok(PollReport {
            cycle,
            timestamp: Utc::now(),
            query,
            outcome,
        })
    }

    /// Poll until `shutdown` resolves, the cycle limit is reached, or the
    /// transport fails.
    ///
    /// The link is closed on every exit path, leaving the transceiver in
    /// receive mode.
    pub async fn run<F>(&mut self, shutdown: F) -> ModbusResult<PollStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Polling slave {} registers 0x{:04X}+{} every {:?}",
            self.query.slave_id, self.query.start_register, self.query.register_count, self.interval
        );

        let result = 'poll: loop {
            let report = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break 'poll Ok(());
                }
                report = self.poll_once() => report,
            };

            match report {
                Ok(report) => self.log_report(&report),
                Err(e) => {
                    error!("Transport failure, stopping poll loop: {}", e);
                    break 'poll Err(e);
                }
            }

            if self.max_cycles.is_some_and(|max| self.stats.cycles >= max) {
                break 'poll Ok(());
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break 'poll Ok(());
                }
                _ = sleep(self.interval) => {}
            }
        };

        self.state = PollState::Idle;
        if let Err(e) = self.link.close() {
            warn!("Failed to close RTU link cleanly: {}", e);
        }
        info!(
            "Poller stopped after {} cycles ({} readings, {} without response, {} discarded, {} exceptions)",
            self.stats.cycles,
            self.stats.readings,
            self.stats.no_response,
            self.stats.discarded,
            self.stats.exceptions
        );

        result.map(|_| self.stats.clone())
    }

    /// Log a cycle outcome
    pub fn log_report(&self, report: &PollReport) {
        match &report.outcome {
            CycleOutcome::Registers { response, raw } => {
                info!(
                    cycle = report.cycle,
                    "Raw response: {} | {}",
                    format_hex(raw),
                    self.describe_registers(response)
                );
            }
            CycleOutcome::NoResponse => {
                warn!(cycle = report.cycle, "No response from slave {}", report.query.slave_id());
            }
            CycleOutcome::Discarded { raw, reason } => {
                warn!(
                    cycle = report.cycle,
                    "Discarded response [{}]: {}",
                    format_hex(raw),
                    reason
                );
            }
            CycleOutcome::Exception { raw, code } => {
                warn!(
                    cycle = report.cycle,
                    "Exception 0x{:02X} ({}) from slave {} [{}]",
                    code,
                    exception_description(*code),
                    report.query.slave_id(),
                    format_hex(raw)
                );
            }
        }
    }

    /// `name=value` pairs, falling back to register addresses for unnamed ones
    pub fn describe_registers(&self, response: &RegisterResponse) -> String {
        response
            .registers
            .iter()
            .enumerate()
            .map(|(i, value)| match self.query.register_names.get(i) {
                Some(name) => format!("{}={}", name, value),
                None => format!(
                    "0x{:04X}={}",
                    self.query.start_register.wrapping_add(i as u16),
                    value
                ),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn stats(&self) -> PollStats {
        self.stats.clone()
    }

    pub fn link(&self) -> &RtuLink<S, D> {
        &self.link
    }
}

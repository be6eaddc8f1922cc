//! RS485 link: transport gate and response reader
//!
//! [`RtuLink`] owns the serial channel and the direction line for the whole
//! life of the poller. It is generic over the byte channel so the same code
//! runs against a `tokio_serial::SerialStream` or an in-memory mock.
//!
//! ## Transmit sequence
//!
//! ```text
//! DE/RE ──┐ transmit ┌─ settle ─┬─ write + flush ─┬─ settle ─┐ receive
//!         └──────────┘          └─────────────────┘          └────────
//! ```
//!
//! The line goes back to receive on every path out of [`RtuLink::send`],
//! including write failures and cancellation.
//!
//! ## Reading
//!
//! After a settle delay the reader collects bytes until the buffer is full,
//! the read timeout expires or the stream ends. [`RtuLink::read_reply`] also
//! stops as soon as the reply to a known query is complete: the expected
//! length for a register read, or five bytes for an exception. USB adapters
//! hand bytes over in bursts several milliseconds apart, so silence alone
//! never ends a frame unless an idle gap is configured explicitly.
//! Whatever arrived is returned; an empty result means the device did not
//! answer.
//!
//! Bytes still buffered when the next request goes out belong to an earlier
//! exchange and are discarded before transmitting.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::constants::{
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_RESPONSE_DELAY_MS, DEFAULT_TX_SETTLE_MS,
    DEFAULT_WRITE_TIMEOUT_MS, EXCEPTION_FLAG, EXCEPTION_RESPONSE_LEN, MAX_RTU_FRAME_SIZE,
    MIN_FRAME_GAP_US,
};
use crate::direction::{DirectionControl, DirectionPin};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{format_hex, QueryFrame};

/// Upper bound on reads spent draining stale input before a send
const STALE_DRAIN_ROUNDS: usize = 16;

/// Log packet with direction
fn log_packet(enabled: bool, direction: &str, data: &[u8]) {
    if enabled {
        info!("[MODBUS-RTU] {} {}", direction, format_hex(data));
    } else {
        debug!("[MODBUS-RTU] {} {}", direction, format_hex(data));
    }
}

/// Whether `frame` already holds the whole reply to a query whose normal
/// response is `expected_len` bytes long.
fn reply_complete(frame: &[u8], expected_len: usize) -> bool {
    if frame.len() >= expected_len {
        return true;
    }
    frame.len() >= EXCEPTION_RESPONSE_LEN && frame[1] & EXCEPTION_FLAG != 0
}

/// RTU inter-frame gap: 3.5 character times (11 bits each), at least 1.75 ms.
pub fn frame_gap_for_baud(baud_rate: u32) -> Duration {
    let char_time_us = 11_000_000 / u64::from(baud_rate.max(1));
    let gap_us = (char_time_us * 35 / 10).max(MIN_FRAME_GAP_US);
    Duration::from_micros(gap_us)
}

/// Fixed delays of one request/response exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    /// Wait after switching to transmit and after flushing
    pub tx_settle: Duration,
    /// Wait after transmission before reading
    pub response_delay: Duration,
    /// Bound on the whole read
    pub read_timeout: Duration,
    /// Bound on write + flush
    pub write_timeout: Duration,
    /// Idle time that ends a frame once bytes have arrived; zero (the
    /// default) disables the cutoff
    pub frame_gap: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            tx_settle: Duration::from_millis(DEFAULT_TX_SETTLE_MS),
            response_delay: Duration::from_millis(DEFAULT_RESPONSE_DELAY_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            frame_gap: Duration::ZERO,
        }
    }
}

impl LinkTiming {
    pub fn with_tx_settle(mut self, settle: Duration) -> Self {
        self.tx_settle = settle;
        self
    }

    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn with_frame_gap(mut self, gap: Duration) -> Self {
        self.frame_gap = gap;
        self
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub empty_reads: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Leftover bytes dropped before a send
    pub stale_bytes: u64,
}

/// Serial channel plus direction line of one RS485 bus
pub struct RtuLink<S, D: DirectionControl> {
    stream: Option<S>,
    direction: DirectionPin<D>,
    timing: LinkTiming,
    stats: TransportStats,
    /// Enable packet logging at info level
    packet_logging: bool,
}

impl<S, D> RtuLink<S, D>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    D: DirectionControl,
{
    pub fn new(stream: S, direction: DirectionPin<D>, timing: LinkTiming) -> Self {
        Self {
            stream: Some(stream),
            direction,
            timing,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Transmit `frame` with the direction line held in transmit mode.
    ///
    /// Write and flush failures end the exchange with [`ModbusError::Io`];
    /// the line is back in receive mode either way.
    pub async fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
        if self.stream.is_none() {
            return Err(ModbusError::connection("Serial port not open"));
        }
        self.discard_stale_input().await?;

        let port = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("Serial port not open"))?;

        let guard = self.direction.begin_transmit()?;
        sleep(self.timing.tx_settle).await;

        log_packet(self.packet_logging, "send", frame);
        let write_result = timeout(self.timing.write_timeout, async {
            port.write_all(frame).await?;
            port.flush().await
        })
        .await;

        match write_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                drop(guard);
                self.stats.errors += 1;
                return Err(ModbusError::io(format!("Failed to send RTU frame: {}", e)));
            }
            Err(_) => {
                drop(guard);
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                return Err(ModbusError::timeout(
                    "send request",
                    self.timing.write_timeout.as_millis() as u64,
                ));
            }
        }

        sleep(self.timing.tx_settle).await;
        guard.release()?;

        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    /// Drop whatever is already buffered on the channel.
    async fn discard_stale_input(&mut self) -> ModbusResult<()> {
        let Some(port) = self.stream.as_mut() else {
            return Ok(());
        };

        let mut scratch = [0u8; MAX_RTU_FRAME_SIZE];
        let mut discarded = Vec::new();
        for _ in 0..STALE_DRAIN_ROUNDS {
            // A zero timeout still polls the read once
            match timeout(Duration::ZERO, port.read(&mut scratch)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => discarded.extend_from_slice(&scratch[..n]),
                Ok(Err(e)) => {
                    self.stats.errors += 1;
                    return Err(ModbusError::io(format!("Serial read error: {}", e)));
                }
            }
        }

        if !discarded.is_empty() {
            warn!(
                "Discarding {} stale bytes before send: {}",
                discarded.len(),
                format_hex(&discarded)
            );
            self.stats.stale_bytes += discarded.len() as u64;
        }
        Ok(())
    }

    /// Read up to `max_bytes` after the response settle delay.
    ///
    /// Keeps reading until `max_bytes` arrived or the read timeout expires.
    /// Returns an empty vector when nothing arrives in time.
    pub async fn read_response(&mut self, max_bytes: usize) -> ModbusResult<Vec<u8>> {
        self.read_frame(max_bytes, None).await
    }

    /// Read the reply to `query`, stopping as soon as it is complete.
    pub async fn read_reply(
        &mut self,
        query: &QueryFrame,
        max_bytes: usize,
    ) -> ModbusResult<Vec<u8>> {
        self.read_frame(max_bytes, Some(query.expected_response_len()))
            .await
    }

    async fn read_frame(
        &mut self,
        max_bytes: usize,
        expected_len: Option<usize>,
    ) -> ModbusResult<Vec<u8>> {
        let port = self
            .stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("Serial port not open"))?;

        sleep(self.timing.response_delay).await;

        let mut buffer = vec![0u8; max_bytes];
        let mut received = 0;
        let deadline = Instant::now() + self.timing.read_timeout;

        while received < max_bytes {
            if expected_len.is_some_and(|len| reply_complete(&buffer[..received], len)) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let mut wait = deadline - now;
            if received > 0 && !self.timing.frame_gap.is_zero() {
                wait = wait.min(self.timing.frame_gap);
            }

            match timeout(wait, port.read(&mut buffer[received..])).await {
                // End of stream
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => received += n,
                Ok(Err(e)) => {
                    self.stats.errors += 1;
                    return Err(ModbusError::io(format!("Serial read error: {}", e)));
                }
                Err(_) => {
                    if received == 0 {
                        self.stats.timeouts += 1;
                    }
                    break;
                }
            }
        }

        buffer.truncate(received);
        if buffer.is_empty() {
            self.stats.empty_reads += 1;
            debug!("No bytes received within {:?}", self.timing.read_timeout);
        } else {
            self.stats.responses_received += 1;
            self.stats.bytes_received += buffer.len() as u64;
            log_packet(self.packet_logging, "receive", &buffer);
        }
        Ok(buffer)
    }

    /// Return the line to receive mode and drop the serial channel.
    pub fn close(&mut self) -> ModbusResult<()> {
        let result = self.direction.receive();
        if self.stream.take().is_some() {
            debug!("Closed RTU link on {}", self.direction.line().describe());
        }
        result
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    pub fn timing(&self) -> LinkTiming {
        self.timing
    }

    pub fn direction(&self) -> &DirectionPin<D> {
        &self.direction
    }
}

#[cfg(feature = "rtu")]
mod serial {
    use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};
    use tracing::warn;

    use crate::config::{DataBits, Parity, SerialConfig, StopBits};
    use crate::error::{ModbusError, ModbusResult};

    impl From<DataBits> for tokio_serial::DataBits {
        fn from(bits: DataBits) -> Self {
            match bits {
                DataBits::Seven => tokio_serial::DataBits::Seven,
                DataBits::Eight => tokio_serial::DataBits::Eight,
            }
        }
    }

    impl From<StopBits> for tokio_serial::StopBits {
        fn from(bits: StopBits) -> Self {
            match bits {
                StopBits::One => tokio_serial::StopBits::One,
                StopBits::Two => tokio_serial::StopBits::Two,
            }
        }
    }

    impl From<Parity> for tokio_serial::Parity {
        fn from(parity: Parity) -> Self {
            match parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Odd => tokio_serial::Parity::Odd,
                Parity::Even => tokio_serial::Parity::Even,
            }
        }
    }

    /// Open the serial port described by `config` with empty buffers.
    pub fn open_serial(config: &SerialConfig) -> ModbusResult<tokio_serial::SerialStream> {
        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .timeout(config.read_timeout())
            .open_native_async()
            .map_err(|e| {
                ModbusError::connection(format!(
                    "Failed to open serial port {}: {}",
                    config.port, e
                ))
            })?;

        if let Err(e) = port.clear(ClearBuffer::All) {
            warn!("Failed to clear buffers of {}: {}", config.port, e);
        }
        Ok(port)
    }
}

#[cfg(feature = "rtu")]
pub use serial::open_serial;

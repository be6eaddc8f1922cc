//! Direction control for half-duplex RS485 transceivers
//!
//! A MAX485-style transceiver shares one differential pair for both
//! directions; the DE/RE pins select which way the bus is driven. This
//! module provides:
//!
//! - [`DirectionControl`]: a single digital output line
//! - [`SysfsDirectionLine`]: Linux sysfs GPIO implementation
//! - [`AutoDirection`]: no-op for adapters that switch direction by themselves
//! - [`DirectionPin`]: applies the wiring [`Polarity`] and tracks the mode
//! - [`TransmitGuard`]: scoped transmit mode, released on drop

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ModbusError, ModbusResult};

/// A single binary output line
pub trait DirectionControl: Send {
    /// Drive the line to `high`
    fn set_level(&mut self, high: bool) -> ModbusResult<()>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// Which line level enables the transmitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Logical 1 = transmit, 0 = receive
    #[default]
    ActiveHigh,
    /// Logical 0 = transmit, 1 = receive
    ActiveLow,
}

impl Polarity {
    /// Line level for transmit (`true`) or receive (`false`) mode
    #[inline]
    pub fn level_for(self, transmit: bool) -> bool {
        match self {
            Polarity::ActiveHigh => transmit,
            Polarity::ActiveLow => !transmit,
        }
    }
}

/// Transceiver mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Transmit,
    Receive,
}

/// Linux sysfs GPIO output line
pub struct SysfsDirectionLine {
    base_path: PathBuf,
    gpio_number: u32,
}

impl SysfsDirectionLine {
    /// Export `gpio_number` under `base_path` and configure it as an output.
    pub fn open(base_path: impl AsRef<Path>, gpio_number: u32) -> ModbusResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.exists() {
            return Err(ModbusError::direction(format!(
                "GPIO sysfs root {} not found",
                base_path.display()
            )));
        }

        let gpio_path = base_path.join(format!("gpio{}", gpio_number));
        if !gpio_path.exists() {
            if let Err(e) = std::fs::write(base_path.join("export"), gpio_number.to_string()) {
                // EBUSY: already exported by another process
                if e.kind() != std::io::ErrorKind::ResourceBusy {
                    return Err(ModbusError::direction(format!(
                        "Failed to export GPIO {}: {}",
                        gpio_number, e
                    )));
                }
            }
        }

        std::fs::write(gpio_path.join("direction"), "out").map_err(|e| {
            ModbusError::direction(format!(
                "Failed to set GPIO {} direction to out: {}",
                gpio_number, e
            ))
        })?;

        debug!("GPIO {} configured as output", gpio_number);
        Ok(Self {
            base_path,
            gpio_number,
        })
    }

    /// Open line `offset` of GPIO chip `chip` (the `/dev/gpiochipN` index).
    pub fn open_chip_line(
        base_path: impl AsRef<Path>,
        chip: u32,
        offset: u32,
    ) -> ModbusResult<Self> {
        let base_path = base_path.as_ref();
        let gpio_number = resolve_line_number(base_path, chip, offset)?;
        debug!(
            "gpiochip{} line {} is sysfs GPIO {}",
            chip, offset, gpio_number
        );
        Self::open(base_path, gpio_number)
    }

    pub fn gpio_number(&self) -> u32 {
        self.gpio_number
    }

    fn value_path(&self) -> PathBuf {
        self.base_path
            .join(format!("gpio{}", self.gpio_number))
            .join("value")
    }
}

/// Global sysfs number of line `offset` on GPIO chip `chip`.
///
/// Sysfs names chip directories after their base number, which the kernel
/// allocates dynamically (`gpiochip512` for chip 0 on recent Raspberry Pi
/// kernels). The entry for chip `chip` is the one whose parent device also
/// carries the `gpiochip{chip}` character device.
pub fn resolve_line_number(base_path: &Path, chip: u32, offset: u32) -> ModbusResult<u32> {
    let entries = std::fs::read_dir(base_path).map_err(|e| {
        ModbusError::direction(format!(
            "Failed to list GPIO sysfs root {}: {}",
            base_path.display(),
            e
        ))
    })?;

    let chip_name = format!("gpiochip{}", chip);
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("gpiochip") {
            continue;
        }
        let chip_dir = entry.path();
        if !chip_dir.join("device").join(&chip_name).exists() {
            continue;
        }

        let base = read_chip_attr(&chip_dir, "base")?;
        if let Ok(ngpio) = read_chip_attr(&chip_dir, "ngpio") {
            if offset >= ngpio {
                return Err(ModbusError::direction(format!(
                    "{} has {} lines, offset {} is out of range",
                    chip_name, ngpio, offset
                )));
            }
        }
        return base.checked_add(offset).ok_or_else(|| {
            ModbusError::direction(format!("GPIO offset {} overflows base {}", offset, base))
        });
    }

    Err(ModbusError::direction(format!(
        "{} not found under {}",
        chip_name,
        base_path.display()
    )))
}

fn read_chip_attr(chip_dir: &Path, attr: &str) -> ModbusResult<u32> {
    let path = chip_dir.join(attr);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        ModbusError::direction(format!("Failed to read {}: {}", path.display(), e))
    })?;
    content.trim().parse().map_err(|e| {
        ModbusError::direction(format!("Invalid value in {}: {}", path.display(), e))
    })
}

impl DirectionControl for SysfsDirectionLine {
    fn set_level(&mut self, high: bool) -> ModbusResult<()> {
        let content = if high { "1" } else { "0" };
        std::fs::write(self.value_path(), content).map_err(|e| {
            ModbusError::direction(format!("GPIO {} write failed: {}", self.gpio_number, e))
        })
    }

    fn describe(&self) -> String {
        format!("gpio{}", self.gpio_number)
    }
}

/// Transceiver with automatic direction switching; nothing to drive.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDirection;

impl DirectionControl for AutoDirection {
    fn set_level(&mut self, _high: bool) -> ModbusResult<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "auto".to_string()
    }
}

impl DirectionControl for Box<dyn DirectionControl> {
    fn set_level(&mut self, high: bool) -> ModbusResult<()> {
        (**self).set_level(high)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Direction line with wiring polarity applied
pub struct DirectionPin<D: DirectionControl> {
    line: D,
    polarity: Polarity,
    mode: Mode,
}

impl<D: DirectionControl> DirectionPin<D> {
    /// Wrap `line` and put the transceiver in receive mode.
    pub fn new(line: D, polarity: Polarity) -> ModbusResult<Self> {
        let mut pin = Self {
            line,
            polarity,
            mode: Mode::Receive,
        };
        pin.receive()?;
        Ok(pin)
    }

    /// Enable the transmitter
    pub fn transmit(&mut self) -> ModbusResult<()> {
        self.line.set_level(self.polarity.level_for(true))?;
        self.mode = Mode::Transmit;
        Ok(())
    }

    /// Release the bus and enable the receiver
    pub fn receive(&mut self) -> ModbusResult<()> {
        self.line.set_level(self.polarity.level_for(false))?;
        self.mode = Mode::Receive;
        Ok(())
    }

    /// Switch to transmit for the lifetime of the returned guard
    pub fn begin_transmit(&mut self) -> ModbusResult<TransmitGuard<'_, D>> {
        self.transmit()?;
        Ok(TransmitGuard {
            pin: self,
            released: false,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn line(&self) -> &D {
        &self.line
    }
}

impl<D: DirectionControl> Drop for DirectionPin<D> {
    fn drop(&mut self) {
        // Never leave the bus driven after the owner is gone
        if let Err(e) = self.receive() {
            warn!(
                "Failed to release {} on shutdown: {}",
                self.line.describe(),
                e
            );
        }
    }
}

/// Keeps the transceiver in transmit mode until released or dropped
pub struct TransmitGuard<'a, D: DirectionControl> {
    pin: &'a mut DirectionPin<D>,
    released: bool,
}

impl<D: DirectionControl> TransmitGuard<'_, D> {
    /// Return to receive mode, reporting line errors
    pub fn release(mut self) -> ModbusResult<()> {
        self.released = true;
        self.pin.receive()
    }
}

impl<D: DirectionControl> Drop for TransmitGuard<'_, D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.pin.receive() {
            warn!(
                "Failed to return {} to receive mode: {}",
                self.pin.line.describe(),
                e
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every level written to the line
    #[derive(Clone, Default)]
    pub(crate) struct RecordingLine {
        pub levels: Arc<Mutex<Vec<bool>>>,
        pub fail: Arc<Mutex<bool>>,
    }

    impl RecordingLine {
        pub fn history(&self) -> Vec<bool> {
            self.levels.lock().unwrap().clone()
        }

        pub fn last(&self) -> Option<bool> {
            self.levels.lock().unwrap().last().copied()
        }
    }

    impl DirectionControl for RecordingLine {
        fn set_level(&mut self, high: bool) -> ModbusResult<()> {
            if *self.fail.lock().unwrap() {
                return Err(ModbusError::direction("line unavailable"));
            }
            self.levels.lock().unwrap().push(high);
            Ok(())
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }

    #[test]
    fn test_polarity_levels() {
        assert!(Polarity::ActiveHigh.level_for(true));
        assert!(!Polarity::ActiveHigh.level_for(false));
        assert!(!Polarity::ActiveLow.level_for(true));
        assert!(Polarity::ActiveLow.level_for(false));
    }

    #[test]
    fn test_new_pin_starts_in_receive() {
        let line = RecordingLine::default();
        let pin = DirectionPin::new(line.clone(), Polarity::ActiveHigh).unwrap();
        assert_eq!(pin.mode(), Mode::Receive);
        assert_eq!(line.history(), vec![false]);
    }

    #[test]
    fn test_guard_release() {
        let line = RecordingLine::default();
        let mut pin = DirectionPin::new(line.clone(), Polarity::ActiveLow).unwrap();

        let guard = pin.begin_transmit().unwrap();
        guard.release().unwrap();

        assert_eq!(pin.mode(), Mode::Receive);
        // receive, transmit, receive with active-low wiring
        assert_eq!(line.history(), vec![true, false, true]);
    }

    #[test]
    fn test_guard_drop_returns_to_receive() {
        let line = RecordingLine::default();
        let mut pin = DirectionPin::new(line.clone(), Polarity::ActiveHigh).unwrap();

        {
            let _guard = pin.begin_transmit().unwrap();
            assert_eq!(line.last(), Some(true));
        }

        assert_eq!(pin.mode(), Mode::Receive);
        assert_eq!(line.last(), Some(false));
    }

    #[test]
    fn test_dropping_pin_releases_line() {
        let line = RecordingLine::default();
        let mut pin = DirectionPin::new(line.clone(), Polarity::ActiveHigh).unwrap();
        pin.transmit().unwrap();
        drop(pin);

        assert_eq!(line.history(), vec![false, true, false]);
    }

    #[test]
    fn test_line_failure_is_reported() {
        let line = RecordingLine::default();
        let mut pin = DirectionPin::new(line.clone(), Polarity::ActiveHigh).unwrap();
        *line.fail.lock().unwrap() = true;

        let err = pin.transmit().unwrap_err();
        assert!(matches!(err, ModbusError::Direction { .. }));
    }

    #[test]
    fn test_sysfs_line_writes_value() {
        let root = tempfile::tempdir().unwrap();
        let gpio_dir = root.path().join("gpio16");
        std::fs::create_dir(&gpio_dir).unwrap();

        let mut line = SysfsDirectionLine::open(root.path(), 16).unwrap();
        assert_eq!(
            std::fs::read_to_string(gpio_dir.join("direction")).unwrap(),
            "out"
        );

        line.set_level(true).unwrap();
        assert_eq!(std::fs::read_to_string(gpio_dir.join("value")).unwrap(), "1");
        line.set_level(false).unwrap();
        assert_eq!(std::fs::read_to_string(gpio_dir.join("value")).unwrap(), "0");
        assert_eq!(line.describe(), "gpio16");
    }

    /// Fake sysfs tree with chip 0 at base 512 and chip 1 at base 570
    pub(crate) fn fake_gpio_root() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for (sysfs_name, chip, base, ngpio) in
            [("gpiochip512", 0, 512, 58), ("gpiochip570", 1, 570, 8)]
        {
            let chip_dir = root.path().join(sysfs_name);
            std::fs::create_dir_all(chip_dir.join("device").join(format!("gpiochip{}", chip)))
                .unwrap();
            std::fs::write(chip_dir.join("base"), format!("{}\n", base)).unwrap();
            std::fs::write(chip_dir.join("ngpio"), format!("{}\n", ngpio)).unwrap();
        }
        root
    }

    #[test]
    fn test_resolve_line_number_uses_chip_base() {
        let root = fake_gpio_root();
        assert_eq!(resolve_line_number(root.path(), 0, 16).unwrap(), 528);
        assert_eq!(resolve_line_number(root.path(), 1, 3).unwrap(), 573);

        let err = resolve_line_number(root.path(), 0, 58).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        let err = resolve_line_number(root.path(), 2, 0).unwrap_err();
        assert!(err.to_string().contains("gpiochip2 not found"));
    }

    #[test]
    fn test_open_chip_line_drives_global_number() {
        let root = fake_gpio_root();
        let gpio_dir = root.path().join("gpio528");
        std::fs::create_dir(&gpio_dir).unwrap();

        let mut line = SysfsDirectionLine::open_chip_line(root.path(), 0, 16).unwrap();
        assert_eq!(line.gpio_number(), 528);
        assert_eq!(line.describe(), "gpio528");

        line.set_level(true).unwrap();
        assert_eq!(std::fs::read_to_string(gpio_dir.join("value")).unwrap(), "1");
        assert!(!root.path().join("gpio16").exists());
    }

    #[test]
    fn test_sysfs_export_failure_is_reported() {
        // Only EBUSY counts as already exported; other failures surface
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("export")).unwrap();

        let err = SysfsDirectionLine::open(root.path(), 16).err().unwrap();
        assert!(matches!(err, ModbusError::Direction { .. }));
        assert!(err.to_string().contains("Failed to export GPIO 16"));
    }

    #[test]
    fn test_sysfs_missing_root() {
        let result = SysfsDirectionLine::open("/nonexistent/gpio/root", 16);
        assert!(matches!(result, Err(ModbusError::Direction { .. })));
    }
}

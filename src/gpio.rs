//! The [`Gpio`] context: channel state table, lifecycle management, and the
//! public channel-operation surface.
//!
//! All process-wide mutable state of the classic GPIO libraries (numbering
//! mode, revision, register mapping, per-channel direction table) lives in
//! one explicit context object instead of globals. That makes the paths to
//! the memory device and the revision source injectable, and lets several
//! independent contexts coexist in one test process when backed by
//! [`Simulated`](crate::registers::Simulated) registers.

use std::array;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::channel::{self, NumberingMode};
use crate::pwm::{self, Pwm, PwmShared, PwmTask};
use crate::registers::{
    Direction, GPIO_LINES, Level, MemMapped, PinFunction, Pull, Registers,
};
use crate::revision::{self, BoardRevision, ChannelMap};
use crate::{Error, Result, lock};

// ============================================================================
// Channel state table
// ============================================================================

/// Per-GPIO bookkeeping: configured direction (`None` = unconfigured), pull
/// setting, and the active PWM binding if any.
pub(crate) struct ChannelState {
    direction: Option<Direction>,
    pull: Pull,
    pub(crate) active_pwm: Option<PwmTask>,
}

impl ChannelState {
    const fn unconfigured() -> Self {
        Self {
            direction: None,
            pull: Pull::Off,
            active_pwm: None,
        }
    }

    fn is_touched(&self) -> bool {
        self.direction.is_some() || self.pull != Pull::Off || self.active_pwm.is_some()
    }
}

pub(crate) struct ChannelTable {
    entries: [ChannelState; GPIO_LINES as usize],
}

impl ChannelTable {
    fn new() -> Self {
        Self {
            entries: array::from_fn(|_| ChannelState::unconfigured()),
        }
    }

    fn entry(&self, gpio: u8) -> &ChannelState {
        &self.entries[usize::from(gpio)]
    }

    pub(crate) fn entry_mut(&mut self, gpio: u8) -> &mut ChannelState {
        &mut self.entries[usize::from(gpio)]
    }
}

// ============================================================================
// Shared context internals
// ============================================================================

/// Context internals shared with PWM worker threads and pin handles.
pub(crate) struct Shared {
    pub(crate) registers: Arc<dyn Registers>,
    pub(crate) channels: Mutex<ChannelTable>,
    revision: BoardRevision,
    map: &'static ChannelMap,
    mode: Mutex<NumberingMode>,
    warnings: AtomicBool,
}

impl Shared {
    /// Stop a PWM task and free its binding, if `shared` still owns it.
    ///
    /// The identity check keeps a stale handle (stopped earlier, or raced by
    /// cleanup) from killing a newer task bound to the same channel.
    pub(crate) fn release_pwm(&self, gpio: u8, shared: &Arc<PwmShared>) {
        shared.halt();
        let task = {
            let mut table = lock(&self.channels);
            let entry = table.entry_mut(gpio);
            match &entry.active_pwm {
                Some(task) if Arc::ptr_eq(&task.shared, shared) => entry.active_pwm.take(),
                _ => None,
            }
        };
        if let Some(task) = task {
            if let Some(worker) = task.worker {
                let _ = worker.join();
            }
            self.registers.write_level(gpio, Level::Low);
        }
    }

    /// Restore one channel to input with pull off and clear its entry.
    /// Returns whether the channel had been touched at all.
    fn teardown_channel(&self, gpio: u8) -> bool {
        let (was_output, task) = {
            let mut table = lock(&self.channels);
            let entry = table.entry_mut(gpio);
            if !entry.is_touched() {
                return false;
            }
            let was_output = entry.direction == Some(Direction::Output);
            entry.direction = None;
            entry.pull = Pull::Off;
            (was_output, entry.active_pwm.take())
        };
        if let Some(task) = task {
            task.shared.halt();
            if let Some(worker) = task.worker {
                let _ = worker.join();
            }
        }
        // Deassert before the direction switch so the pin cannot come back
        // up driven high on a later configure.
        if was_output {
            self.registers.write_level(gpio, Level::Low);
        }
        self.registers.set_pull(gpio, Pull::Off);
        self.registers.configure(gpio, Direction::Input);
        true
    }

    fn teardown_all(&self) -> bool {
        let mut any = false;
        for gpio in 0..GPIO_LINES {
            any |= self.teardown_channel(gpio);
        }
        *lock(&self.mode) = NumberingMode::Unset;
        any
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures and opens a [`Gpio`] context.
///
/// Both environment dependencies, the privileged memory device and the
/// revision source, are plain paths here so tests can substitute them; the
/// register backend and the revision can also be injected outright.
///
/// # Example
///
/// ```no_run
/// use rpi_gpio::Gpio;
///
/// # fn main() -> rpi_gpio::Result<()> {
/// let gpio = Gpio::builder()
///     .mem_device("/dev/gpiomem")
///     .cpuinfo("/proc/cpuinfo")
///     .open()?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct GpioBuilder {
    mem_device: Option<PathBuf>,
    cpuinfo: PathBuf,
    warnings: bool,
    registers: Option<Arc<dyn Registers>>,
    revision: Option<BoardRevision>,
}

impl Default for GpioBuilder {
    fn default() -> Self {
        Self {
            mem_device: None,
            cpuinfo: PathBuf::from("/proc/cpuinfo"),
            warnings: true,
            registers: None,
            revision: None,
        }
    }
}

impl GpioBuilder {
    /// Memory device to map the register block from. Without this the
    /// builder tries `/dev/gpiomem`, then `/dev/mem`.
    pub fn mem_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.mem_device = Some(path.into());
        self
    }

    /// Revision source in cpuinfo format (default `/proc/cpuinfo`).
    pub fn cpuinfo(mut self, path: impl Into<PathBuf>) -> Self {
        self.cpuinfo = path.into();
        self
    }

    /// Enable or disable usage warnings (default enabled).
    pub fn warnings(mut self, enabled: bool) -> Self {
        self.warnings = enabled;
        self
    }

    /// Inject a register backend instead of mapping a device.
    pub fn registers(mut self, registers: Arc<dyn Registers>) -> Self {
        self.registers = Some(registers);
        self
    }

    /// Skip revision detection and use `revision` directly.
    pub fn revision(mut self, revision: BoardRevision) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Resolve the revision, map the registers (exactly once per context),
    /// and hand back the context.
    ///
    /// Platform failures here are fatal and not retried; since they abort
    /// construction, no half-initialized context can leak out.
    pub fn open(self) -> Result<Gpio> {
        let revision = match self.revision {
            Some(BoardRevision::Unknown) => return Err(Error::UnsupportedPlatform),
            Some(revision) => revision,
            None => revision::detect(&self.cpuinfo)?,
        };
        let registers = match self.registers {
            Some(registers) => registers,
            None => Arc::new(MemMapped::open_default(self.mem_device.as_deref())?),
        };
        debug!("GPIO context opened for {revision}");
        Ok(Gpio {
            shared: Arc::new(Shared {
                registers,
                channels: Mutex::new(ChannelTable::new()),
                revision,
                map: revision.channel_map(),
                mode: Mutex::new(NumberingMode::Unset),
                warnings: AtomicBool::new(self.warnings),
            }),
        })
    }
}

// ============================================================================
// Gpio context
// ============================================================================

/// Handle to the board's GPIO controller.
///
/// Construct one per process with [`Gpio::open`] (or [`Gpio::builder`] to
/// inject paths and backends). Dropping the context restores every touched
/// channel to input with the pull disabled and stops all PWM tasks, so
/// outputs are never left asserted after the process exits.
///
/// # Example
///
/// ```
/// use rpi_gpio::{Direction, Gpio, Level, NumberingMode, Pull};
///
/// # fn main() -> rpi_gpio::Result<()> {
/// // Simulated registers; use `Gpio::open()` on a real Pi.
/// let gpio = Gpio::simulated()?;
/// gpio.set_mode(NumberingMode::Board)?;
///
/// gpio.setup(11, Direction::Output, Pull::Off, None)?;
/// gpio.output(11, Level::High)?;
/// assert_eq!(gpio.input(11)?, Level::High);
///
/// gpio.cleanup();
/// # Ok(())
/// # }
/// ```
pub struct Gpio {
    pub(crate) shared: Arc<Shared>,
}

impl Gpio {
    /// Open the real controller with default paths.
    pub fn open() -> Result<Self> {
        Self::builder().open()
    }

    /// A builder for injecting paths, a register backend, or a revision.
    pub fn builder() -> GpioBuilder {
        GpioBuilder::default()
    }

    /// A context over [`Simulated`](crate::registers::Simulated) registers
    /// and a 40-pin revision; useful for development off the Pi.
    pub fn simulated() -> Result<Self> {
        Self::builder()
            .registers(Arc::new(crate::registers::Simulated::new()))
            .revision(BoardRevision::Rev3Plus)
            .open()
    }

    /// The board revision this context resolved at construction.
    #[must_use]
    pub fn revision(&self) -> BoardRevision {
        self.shared.revision
    }

    /// The pin map active for the resolved revision.
    #[must_use]
    pub fn channel_map(&self) -> &'static ChannelMap {
        self.shared.map
    }

    /// The numbering mode currently in force.
    #[must_use]
    pub fn mode(&self) -> NumberingMode {
        *lock(&self.shared.mode)
    }

    /// Choose the numbering scheme for this context.
    ///
    /// Setting the same mode again is an idempotent no-op; switching between
    /// `Board` and `Bcm` without an intervening [`cleanup`](Self::cleanup)
    /// fails with [`Error::ModeAlreadySet`]. Passing
    /// [`Unset`](NumberingMode::Unset) fails with [`Error::InvalidMode`].
    pub fn set_mode(&self, mode: NumberingMode) -> Result<()> {
        if mode == NumberingMode::Unset {
            return Err(Error::InvalidMode);
        }
        let mut current = lock(&self.shared.mode);
        match *current {
            NumberingMode::Unset => {
                *current = mode;
                Ok(())
            }
            set if set == mode => Ok(()),
            set => Err(Error::ModeAlreadySet { current: set }),
        }
    }

    /// Enable or disable usage warnings at runtime.
    pub fn set_warnings(&self, enabled: bool) {
        self.shared.warnings.store(enabled, Ordering::Relaxed);
    }

    /// Translate a channel in the current numbering mode to its BCM GPIO
    /// number.
    pub fn translate(&self, channel: u32) -> Result<u8> {
        channel::to_bcm(channel, self.mode(), self.shared.map)
    }

    /// Configure a channel's direction and pull, optionally writing an
    /// initial output level before the direction switch so the pin never
    /// glitches through the wrong level.
    ///
    /// Outputs always get their pull disabled; an initial level on an input
    /// is ignored with a warning. Reconfiguring a channel that carries a
    /// live PWM task fails with [`Error::PwmAlreadyBound`]; stop the task
    /// first.
    pub fn setup(
        &self,
        channel: u32,
        direction: Direction,
        pull: Pull,
        initial: Option<Level>,
    ) -> Result<()> {
        let gpio = self.translate(channel)?;
        let mut table = lock(&self.shared.channels);
        let entry = table.entry_mut(gpio);
        if entry.active_pwm.is_some() {
            return Err(Error::PwmAlreadyBound { gpio });
        }

        if self.shared.warnings.load(Ordering::Relaxed) {
            let function = self.shared.registers.function_of(gpio);
            let in_use = !matches!(function, PinFunction::Input | PinFunction::Output)
                || (entry.direction.is_none() && function == PinFunction::Output);
            if in_use {
                warn!("channel {channel} is already in use, continuing anyway");
            }
        }

        let pull = match direction {
            Direction::Output => Pull::Off,
            Direction::Input => pull,
        };
        match (direction, initial) {
            (Direction::Output, Some(level)) => {
                self.shared.registers.write_level(gpio, level);
            }
            (Direction::Input, Some(_)) => {
                warn!("channel {channel}: initial level ignored for an input");
            }
            _ => {}
        }
        self.shared.registers.set_pull(gpio, pull);
        self.shared.registers.configure(gpio, direction);
        entry.direction = Some(direction);
        entry.pull = pull;
        Ok(())
    }

    /// Drive an output channel's level.
    ///
    /// The channel must have been [`setup`](Self::setup) as an output:
    /// unconfigured channels fail [`Error::NotConfigured`], inputs fail
    /// [`Error::DirectionMismatch`].
    pub fn output(&self, channel: u32, level: Level) -> Result<()> {
        let gpio = self.translate(channel)?;
        match lock(&self.shared.channels).entry(gpio).direction {
            Some(Direction::Output) => {}
            Some(Direction::Input) => return Err(Error::DirectionMismatch { gpio }),
            None => return Err(Error::NotConfigured { gpio }),
        }
        self.shared.registers.write_level(gpio, level);
        Ok(())
    }

    /// Read a configured channel's level (inputs and outputs both allowed).
    pub fn input(&self, channel: u32) -> Result<Level> {
        let gpio = self.translate(channel)?;
        if lock(&self.shared.channels).entry(gpio).direction.is_none() {
            return Err(Error::NotConfigured { gpio });
        }
        Ok(self.shared.registers.read_level(gpio))
    }

    /// Drive a channel without the direction check. Translation and range
    /// validation still apply.
    pub fn force_output(&self, channel: u32, level: Level) -> Result<()> {
        let gpio = self.translate(channel)?;
        self.shared.registers.write_level(gpio, level);
        Ok(())
    }

    /// Read a channel without the direction check.
    pub fn force_input(&self, channel: u32) -> Result<Level> {
        let gpio = self.translate(channel)?;
        Ok(self.shared.registers.read_level(gpio))
    }

    /// Change a channel's pull resistor without touching its direction.
    pub fn set_pull(&self, channel: u32, pull: Pull) -> Result<()> {
        let gpio = self.translate(channel)?;
        self.shared.registers.set_pull(gpio, pull);
        lock(&self.shared.channels).entry_mut(gpio).pull = pull;
        Ok(())
    }

    /// The function a channel's function-select field currently encodes,
    /// which may be an alternate peripheral function some other software
    /// configured.
    pub fn function_of(&self, channel: u32) -> Result<PinFunction> {
        let gpio = self.translate(channel)?;
        Ok(self.shared.registers.function_of(gpio))
    }

    /// Bind a software PWM task to an output channel.
    ///
    /// Requires the channel [`setup`](Self::setup) as an output and free of
    /// any live task. The returned [`Pwm`] handle starts, retunes, and stops
    /// the task; see its docs for the state machine.
    pub fn pwm(&self, channel: u32, frequency_hz: f64) -> Result<Pwm> {
        let gpio = self.translate(channel)?;
        pwm::validate_frequency(frequency_hz)?;
        let mut table = lock(&self.shared.channels);
        let entry = table.entry_mut(gpio);
        match entry.direction {
            Some(Direction::Output) => {}
            _ => return Err(Error::DirectionMismatch { gpio }),
        }
        if entry.active_pwm.is_some() {
            return Err(Error::PwmAlreadyBound { gpio });
        }
        let (handle, task) = Pwm::bind(Arc::clone(&self.shared), gpio, frequency_hz);
        entry.active_pwm = Some(task);
        Ok(handle)
    }

    /// Restore one channel: stop any PWM task bound to it, drive it back to
    /// input with the pull disabled, and mark it unconfigured.
    pub fn cleanup_channel(&self, channel: u32) -> Result<()> {
        let gpio = self.translate(channel)?;
        if !self.shared.teardown_channel(gpio) {
            warn!("channel {channel} was not configured; nothing to clean up");
        }
        Ok(())
    }

    /// Restore every touched channel and reset the numbering mode to
    /// [`Unset`](NumberingMode::Unset).
    ///
    /// Warns (but succeeds) when nothing was configured. Also runs
    /// automatically when the context is dropped.
    pub fn cleanup(&self) {
        if !self.shared.teardown_all() {
            warn!("cleanup called without any configured channels");
        }
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        // Teardown must run even if the caller never asked for it, so the
        // process cannot exit with outputs still asserted.
        self.shared.teardown_all();
    }
}

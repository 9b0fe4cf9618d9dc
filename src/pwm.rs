//! Software PWM: one background toggling task per bound channel.
//!
//! No hardware PWM peripheral is used. Each started [`Pwm`] owns a worker
//! thread that drives the pin high for `duty_cycle% * period`, low for the
//! remainder, and re-reads its parameters once per cycle, so
//! [`change_duty_cycle`](Pwm::change_duty_cycle) and
//! [`change_frequency`](Pwm::change_frequency) take effect at the next cycle
//! boundary without any further synchronization. Timing is best-effort under
//! a non-realtime scheduler; edges land within normal sleep jitter of their
//! targets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use crate::gpio::Shared;
use crate::registers::{Level, Registers};
use crate::{Error, Result, lock};

/// Parameters shared between a [`Pwm`] handle and its worker thread.
///
/// Frequency and duty cycle are stored as `f64` bit patterns so the worker
/// can pick them up with plain atomic loads at each cycle boundary.
pub(crate) struct PwmShared {
    gpio: u8,
    frequency_bits: AtomicU64,
    duty_cycle_bits: AtomicU64,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl PwmShared {
    fn new(gpio: u8, frequency_hz: f64) -> Self {
        Self {
            gpio,
            frequency_bits: AtomicU64::new(frequency_hz.to_bits()),
            duty_cycle_bits: AtomicU64::new(0.0_f64.to_bits()),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    fn frequency_hz(&self) -> f64 {
        f64::from_bits(self.frequency_bits.load(Ordering::Relaxed))
    }

    fn duty_cycle(&self) -> f64 {
        f64::from_bits(self.duty_cycle_bits.load(Ordering::Relaxed))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Flag the task as terminally stopped. The worker observes this within
    /// one period.
    pub(crate) fn halt(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.stopped.store(true, Ordering::Relaxed);
    }
}

/// The per-channel state-table entry's owning half of a PWM binding.
pub(crate) struct PwmTask {
    pub(crate) shared: Arc<PwmShared>,
    pub(crate) worker: Option<JoinHandle<()>>,
}

/// Handle to a software PWM task bound to one output channel.
///
/// Created with [`Gpio::pwm`](crate::Gpio::pwm); the channel must already be
/// configured as an output and carry no other live task. The task moves
/// through `Created -> Running -> Stopped`; `Stopped` is terminal, and after
/// [`stop`](Self::stop) the channel is immediately free for a fresh task.
/// Dropping the handle stops the task.
///
/// # Example
///
/// ```
/// use rpi_gpio::{Direction, Gpio, NumberingMode, Pull};
///
/// # fn main() -> rpi_gpio::Result<()> {
/// let gpio = Gpio::simulated()?;
/// gpio.set_mode(NumberingMode::Bcm)?;
/// gpio.setup(18, Direction::Output, Pull::Off, None)?;
///
/// let pwm = gpio.pwm(18, 100.0)?;
/// pwm.start(50.0)?;
/// pwm.change_duty_cycle(75.0)?;
/// pwm.change_frequency(200.0)?;
/// pwm.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct Pwm {
    ctx: Arc<Shared>,
    shared: Arc<PwmShared>,
}

impl Pwm {
    /// Bind a new task. Called by [`Gpio::pwm`](crate::Gpio::pwm) with the
    /// channel table locked and the exclusivity checks already done.
    pub(crate) fn bind(ctx: Arc<Shared>, gpio: u8, frequency_hz: f64) -> (Self, PwmTask) {
        let shared = Arc::new(PwmShared::new(gpio, frequency_hz));
        let task = PwmTask {
            shared: Arc::clone(&shared),
            worker: None,
        };
        (Self { ctx, shared }, task)
    }

    /// Begin toggling at `duty_cycle` percent (0.0..=100.0).
    ///
    /// Calling `start` on an already-running task just updates the duty
    /// cycle. Restarting a stopped task fails with [`Error::PwmStopped`].
    pub fn start(&self, duty_cycle: f64) -> Result<()> {
        validate_duty_cycle(duty_cycle)?;
        if self.shared.stopped.load(Ordering::Relaxed) {
            return Err(Error::PwmStopped);
        }
        self.shared
            .duty_cycle_bits
            .store(duty_cycle.to_bits(), Ordering::Relaxed);
        if self.shared.running.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        let registers = Arc::clone(&self.ctx.registers);
        let shared = Arc::clone(&self.shared);
        let gpio = self.shared.gpio;
        let worker = std::thread::Builder::new()
            .name(format!("soft-pwm-{gpio}"))
            .spawn(move || run(&*registers, &shared))
            .map_err(|_| Error::AllocationFailed)?;

        let mut table = lock(&self.ctx.channels);
        match table.entry_mut(gpio).active_pwm.as_mut() {
            Some(task) => task.worker = Some(worker),
            // The binding disappeared between bind() and start(): a cleanup
            // raced us. Halt the fresh worker and report the task stopped.
            None => {
                self.shared.halt();
                drop(table);
                let _ = worker.join();
                return Err(Error::PwmStopped);
            }
        }
        debug!(
            "gpio {gpio} PWM started at {} Hz, {duty_cycle}% duty",
            self.shared.frequency_hz()
        );
        Ok(())
    }

    /// Replace the duty cycle; the worker picks it up at the next cycle
    /// boundary.
    pub fn change_duty_cycle(&self, duty_cycle: f64) -> Result<()> {
        validate_duty_cycle(duty_cycle)?;
        if self.shared.stopped.load(Ordering::Relaxed) {
            return Err(Error::PwmStopped);
        }
        self.shared
            .duty_cycle_bits
            .store(duty_cycle.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Replace the frequency; the worker picks it up at the next cycle
    /// boundary.
    pub fn change_frequency(&self, frequency_hz: f64) -> Result<()> {
        validate_frequency(frequency_hz)?;
        if self.shared.stopped.load(Ordering::Relaxed) {
            return Err(Error::PwmStopped);
        }
        self.shared
            .frequency_bits
            .store(frequency_hz.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    /// Stop the task: the worker observes the flag within one period, the
    /// channel is driven low, and the binding is released so the channel can
    /// carry a new task immediately. Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.ctx.release_pwm(self.shared.gpio, &self.shared);
        Ok(())
    }
}

impl Drop for Pwm {
    fn drop(&mut self) {
        if !self.shared.stopped.load(Ordering::Relaxed) {
            warn!(
                "gpio {} PWM handle dropped while live; stopping it",
                self.shared.gpio
            );
        }
        self.ctx.release_pwm(self.shared.gpio, &self.shared);
    }
}

fn validate_duty_cycle(duty_cycle: f64) -> Result<()> {
    if (0.0..=100.0).contains(&duty_cycle) {
        Ok(())
    } else {
        Err(Error::InvalidDutyCycle { duty_cycle })
    }
}

pub(crate) fn validate_frequency(frequency_hz: f64) -> Result<()> {
    if frequency_hz > 0.0 {
        Ok(())
    } else {
        Err(Error::FrequencyNotPositive { frequency_hz })
    }
}

/// High and low phase durations for one cycle at the given parameters.
pub(crate) fn cycle_durations(frequency_hz: f64, duty_cycle: f64) -> (Duration, Duration) {
    let period = 1.0 / frequency_hz;
    let high = period * duty_cycle / 100.0;
    let low = (period - high).max(0.0);
    (Duration::from_secs_f64(high), Duration::from_secs_f64(low))
}

/// Worker loop: toggle, sleep, re-check the running flag at each boundary.
///
/// Degenerate duty cycles (0% and 100%) hold the line steady instead of
/// issuing no-op register writes every period.
fn run(registers: &dyn Registers, shared: &PwmShared) {
    let gpio = shared.gpio;
    while shared.is_running() {
        let (high, low) = cycle_durations(shared.frequency_hz(), shared.duty_cycle());
        if !high.is_zero() {
            registers.write_level(gpio, Level::High);
            std::thread::sleep(high);
            if !shared.is_running() {
                break;
            }
        }
        if !low.is_zero() {
            registers.write_level(gpio, Level::Low);
            std::thread::sleep(low);
        }
    }
    registers.write_level(gpio, Level::Low);
}

//! Memory-mapped Raspberry Pi GPIO with revision-aware pin mapping and
//! software PWM.
//!
//! # Glossary
//!
//! - **BCM GPIO number:** the SoC vendor's native signal number, distinct
//!   from the physical header position.
//! - **Board numbering:** pin position on the physical header connector;
//!   the layout depends on the board revision.
//! - **Soft PWM:** pulse-width modulation generated by software-timed
//!   toggling rather than a dedicated PWM peripheral. Best-effort timing
//!   only; do not expect microsecond-accurate edges under a non-realtime
//!   scheduler.
//!
//! # Overview
//!
//! Everything hangs off a [`Gpio`] context: it resolves the board revision
//! once (selecting the pin map), maps the controller's register block once,
//! and tracks per-channel configuration so teardown can restore every
//! touched pin to a safe input state, even when the context is just dropped.
//!
//! ```
//! use rpi_gpio::{Direction, Gpio, Level, NumberingMode, Pull};
//!
//! # fn main() -> rpi_gpio::Result<()> {
//! // `Gpio::open()` maps /dev/gpiomem on a real Pi; the simulated backend
//! // runs anywhere.
//! let gpio = Gpio::simulated()?;
//! gpio.set_mode(NumberingMode::Board)?;
//!
//! gpio.setup(12, Direction::Output, Pull::Off, Some(Level::Low))?;
//! let pwm = gpio.pwm(12, 1000.0)?;
//! pwm.start(50.0)?;
//! pwm.stop()?;
//!
//! gpio.cleanup();
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Each started PWM task runs on its own worker thread, sharing the register
//! block with the context. The set/clear register banks are write-1-to-act,
//! so concurrent workers cannot clobber each other; the read-modify-write
//! registers (function select, pull control) are only touched while no PWM
//! task is bound to the channel, which the context enforces.

use std::sync::{Mutex, MutexGuard};

pub mod channel;
mod error;
pub mod gpio;
pub mod pins;
pub mod pwm;
pub mod registers;
pub mod revision;

pub use crate::channel::NumberingMode;
pub use crate::error::{Error, Result};
pub use crate::gpio::{Gpio, GpioBuilder};
pub use crate::pins::{InputPin, OutputPin};
pub use crate::pwm::Pwm;
pub use crate::registers::{Direction, Level, MemMapped, PinFunction, Pull, Registers, Simulated};
pub use crate::revision::{BoardRevision, ChannelMap};

/// Lock a mutex, recovering from poisoning.
///
/// Every structure guarded here stays structurally valid across a panic, so
/// continuing with the inner value is safe and keeps teardown working even
/// when a worker panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

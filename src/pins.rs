//! Typed pin handles implementing the `embedded-hal` digital traits.
//!
//! The channel-number API on [`Gpio`] is the full surface; these handles are
//! a thin typed layer over it so drivers written against
//! [`embedded_hal::digital`] can run on top of this crate. A handle borrows
//! its context, so pins cannot outlive the register mapping.

use embedded_hal::digital;

use crate::gpio::{Gpio, Shared};
use crate::registers::{Direction, Level, Pull};
use crate::{Error, Result};

impl digital::Error for Error {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

/// An output channel as an [`embedded_hal::digital::OutputPin`].
///
/// # Example
///
/// ```
/// use embedded_hal::digital::OutputPin as _;
/// use rpi_gpio::{Gpio, Level, NumberingMode};
///
/// # fn main() -> rpi_gpio::Result<()> {
/// let gpio = Gpio::simulated()?;
/// gpio.set_mode(NumberingMode::Bcm)?;
/// let mut led = gpio.output_pin(17, Some(Level::Low))?;
/// led.set_high()?;
/// # Ok(())
/// # }
/// ```
pub struct OutputPin<'g> {
    shared: &'g Shared,
    gpio: u8,
}

impl digital::ErrorType for OutputPin<'_> {
    type Error = Error;
}

impl digital::OutputPin for OutputPin<'_> {
    fn set_low(&mut self) -> Result<()> {
        self.shared.registers.write_level(self.gpio, Level::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<()> {
        self.shared.registers.write_level(self.gpio, Level::High);
        Ok(())
    }
}

impl digital::StatefulOutputPin for OutputPin<'_> {
    fn is_set_high(&mut self) -> Result<bool> {
        Ok(self.shared.registers.read_level(self.gpio) == Level::High)
    }

    fn is_set_low(&mut self) -> Result<bool> {
        Ok(self.shared.registers.read_level(self.gpio) == Level::Low)
    }
}

/// An input channel as an [`embedded_hal::digital::InputPin`].
pub struct InputPin<'g> {
    shared: &'g Shared,
    gpio: u8,
}

impl digital::ErrorType for InputPin<'_> {
    type Error = Error;
}

impl digital::InputPin for InputPin<'_> {
    fn is_high(&mut self) -> Result<bool> {
        Ok(self.shared.registers.read_level(self.gpio) == Level::High)
    }

    fn is_low(&mut self) -> Result<bool> {
        Ok(self.shared.registers.read_level(self.gpio) == Level::Low)
    }
}

impl Gpio {
    /// Configure `channel` as an output and hand back a typed handle.
    ///
    /// Equivalent to [`setup`](Self::setup) with [`Direction::Output`]
    /// followed by wrapping the channel.
    pub fn output_pin(&self, channel: u32, initial: Option<Level>) -> Result<OutputPin<'_>> {
        self.setup(channel, Direction::Output, Pull::Off, initial)?;
        let gpio = self.translate(channel)?;
        Ok(OutputPin {
            shared: &self.shared,
            gpio,
        })
    }

    /// Configure `channel` as an input with the given pull and hand back a
    /// typed handle.
    pub fn input_pin(&self, channel: u32, pull: Pull) -> Result<InputPin<'_>> {
        self.setup(channel, Direction::Input, pull, None)?;
        let gpio = self.translate(channel)?;
        Ok(InputPin {
            shared: &self.shared,
            gpio,
        })
    }
}

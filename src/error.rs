//! Crate-wide error type and result alias.

use std::path::PathBuf;

use derive_more::{Display, Error};

use crate::channel::NumberingMode;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong while talking to the GPIO controller.
///
/// Variants fall into two classes. Platform failures ([`UnsupportedPlatform`],
/// [`PermissionDenied`], [`AllocationFailed`], [`MapFailed`]) are fatal: they
/// can only occur while constructing a [`Gpio`](crate::Gpio) context, so no
/// half-initialized context ever exists and no retry is attempted. The
/// remaining variants are per-call configuration errors; they leave the
/// context fully usable.
///
/// Use [`is_platform`](Self::is_platform) to distinguish the classes.
///
/// [`UnsupportedPlatform`]: Self::UnsupportedPlatform
/// [`PermissionDenied`]: Self::PermissionDenied
/// [`AllocationFailed`]: Self::AllocationFailed
/// [`MapFailed`]: Self::MapFailed
#[derive(Debug, Display, Error)]
#[non_exhaustive]
pub enum Error {
    /// The revision source could not be read or names a board this crate
    /// does not know the register layout for.
    #[display("this board is not a recognized Raspberry Pi")]
    UnsupportedPlatform,

    /// The memory device exists but the process may not open it.
    #[display("no access to {}; try running as root", path.display())]
    PermissionDenied {
        /// Device path that was refused.
        path: PathBuf,
    },

    /// The kernel could not find memory to back the register mapping.
    #[display("out of memory while mapping GPIO registers")]
    AllocationFailed,

    /// `mmap` of the GPIO register block failed.
    #[display("mapping GPIO registers failed (errno {errno})")]
    MapFailed {
        /// Raw OS error code from the failed call.
        errno: i32,
    },

    /// A channel operation was attempted before choosing a numbering mode.
    #[display("pin numbering mode not set; call set_mode(Board) or set_mode(Bcm) first")]
    ModeNotSet,

    /// The numbering mode was already chosen and differs from the requested
    /// one. Mixing schemes mid-run would corrupt the channel table, so this
    /// is an error rather than a silent switch; `cleanup()` resets the mode.
    #[display("pin numbering mode is already set to {current}")]
    ModeAlreadySet {
        /// Mode the context is currently locked to.
        current: NumberingMode,
    },

    /// Something other than `Board` or `Bcm` was passed to `set_mode`.
    #[display("an invalid mode was passed to set_mode()")]
    InvalidMode,

    /// The channel number lies outside the numbering scheme's range for the
    /// detected board revision.
    #[display("channel {channel} is out of range for this Raspberry Pi")]
    ChannelOutOfRange {
        /// Channel as supplied by the caller.
        channel: u32,
    },

    /// The channel number is in range but has no physical header pin on the
    /// detected board revision.
    #[display("channel {channel} is not a usable pin on this Raspberry Pi")]
    ChannelNotMapped {
        /// Channel as supplied by the caller.
        channel: u32,
    },

    /// The channel was never configured with `setup`.
    #[display("GPIO {gpio} has not been set up")]
    NotConfigured {
        /// BCM GPIO number of the offending channel.
        gpio: u8,
    },

    /// The channel is configured, but not in the direction the operation
    /// requires (e.g. writing to an input).
    #[display("GPIO {gpio} is not set up in the required direction")]
    DirectionMismatch {
        /// BCM GPIO number of the offending channel.
        gpio: u8,
    },

    /// Duty cycle outside `0.0..=100.0`.
    #[display("duty cycle must be between 0.0 and 100.0, got {duty_cycle}")]
    InvalidDutyCycle {
        /// Rejected value.
        duty_cycle: f64,
    },

    /// PWM frequency must be strictly positive.
    #[display("frequency must be greater than 0.0, got {frequency_hz}")]
    FrequencyNotPositive {
        /// Rejected value.
        frequency_hz: f64,
    },

    /// A live PWM task is already bound to the channel. Stop it before
    /// binding a new one or reconfiguring the channel's direction.
    #[display("GPIO {gpio} already has a PWM task bound to it")]
    PwmAlreadyBound {
        /// BCM GPIO number of the offending channel.
        gpio: u8,
    },

    /// The PWM task was stopped; stopped tasks are terminal and a new one
    /// must be created.
    #[display("this PWM task has been stopped; create a new one")]
    PwmStopped,
}

impl Error {
    /// `true` for the fatal platform-level failures that prevent a context
    /// from being constructed at all.
    #[must_use]
    pub fn is_platform(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform
                | Self::PermissionDenied { .. }
                | Self::AllocationFailed
                | Self::MapFailed { .. }
        )
    }
}

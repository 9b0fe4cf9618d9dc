//! Channel numbering and translation to controller signals.
//!
//! Callers may address pins either by physical header position (`Board`) or
//! by the SoC's native GPIO number (`Bcm`). Everything below the translation
//! layer works exclusively in BCM numbers; this module is the only place the
//! two schemes meet.

use crate::registers::GPIO_LINES;
use crate::revision::ChannelMap;
use crate::{Error, Result};

/// Pin numbering scheme selected for a [`Gpio`](crate::Gpio) context.
///
/// The mode starts [`Unset`](Self::Unset) and must be chosen before any
/// channel translation succeeds. Once chosen it is locked in until
/// `cleanup()` resets it; switching schemes mid-run is an error because the
/// channel table is indexed by the translated numbers.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, PartialEq)]
pub enum NumberingMode {
    /// Physical header position (1-based, revision-dependent layout).
    #[display("Board")]
    Board,
    /// BCM GPIO number as used by the SoC (0..=53).
    #[display("Bcm")]
    Bcm,
    /// No scheme chosen yet.
    #[display("Unset")]
    Unset,
}

/// Translate a caller-supplied channel into a BCM GPIO number.
///
/// Range checks depend on the mode and the active revision's map: `Bcm`
/// accepts the controller's full signal space (0..=53), `Board` accepts
/// 1..=26 or 1..=40 depending on the header. `Board` positions without a
/// GPIO fail [`Error::ChannelNotMapped`]; so do `Bcm` identifiers with no
/// physical pin on this revision, which keeps translation and its inverse
/// consistent in both directions.
pub fn to_bcm(channel: u32, mode: NumberingMode, map: &ChannelMap) -> Result<u8> {
    match mode {
        NumberingMode::Unset => Err(Error::ModeNotSet),
        NumberingMode::Bcm => {
            let gpio =
                u8::try_from(channel).map_err(|_| Error::ChannelOutOfRange { channel })?;
            if gpio >= GPIO_LINES {
                return Err(Error::ChannelOutOfRange { channel });
            }
            if !map.accepts_bcm(gpio) {
                return Err(Error::ChannelNotMapped { channel });
            }
            Ok(gpio)
        }
        NumberingMode::Board => {
            let position =
                u8::try_from(channel).map_err(|_| Error::ChannelOutOfRange { channel })?;
            if position < 1 || position > map.positions() {
                return Err(Error::ChannelOutOfRange { channel });
            }
            map.bcm_of(position).ok_or(Error::ChannelNotMapped { channel })
        }
    }
}

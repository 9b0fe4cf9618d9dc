//! Board revision detection and the revision-specific pin maps.
//!
//! The physical header layout changed across Raspberry Pi revisions, so the
//! board-position-to-BCM-GPIO table has to be chosen at runtime. The revision
//! is read once per [`Gpio`](crate::Gpio) context from a cpuinfo-format file
//! (normally `/proc/cpuinfo`, injectable for tests) and is immutable
//! afterwards.

use std::fs;
use std::path::Path;

use derive_more::Display;
use log::debug;

use crate::{Error, Result};

/// Hardware revision of the board, as derived from the cpuinfo revision code.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum BoardRevision {
    /// Original Model B (revision codes 0002/0003), 26-pin header.
    #[display("Rev1")]
    Rev1,
    /// Revision 2 boards (26-pin header, I2C bus swapped to GPIO 2/3).
    #[display("Rev2")]
    Rev2,
    /// Every 40-pin board: B+/A+ and everything with a new-style code.
    #[display("Rev3+")]
    Rev3Plus,
    /// Compute Modules: no standard header, all BCM GPIOs exposed.
    #[display("ComputeModule")]
    ComputeModule,
    /// Revision code not recognized. Never stored in a live context;
    /// resolution turns it into [`Error::UnsupportedPlatform`].
    #[display("Unknown")]
    Unknown,
}

/// Number of slots in a board-position table (positions 1..=40, slot 0 unused).
const BOARD_SLOTS: usize = 41;

/// Maps physical header positions to BCM GPIO numbers for one revision.
///
/// `-1` marks positions with no GPIO (power, ground, or absent on this
/// revision). Tables are read-only statics selected via
/// [`BoardRevision::channel_map`].
pub struct ChannelMap {
    board_to_bcm: [i8; BOARD_SLOTS],
    positions: u8,
    all_bcm: bool,
}

// Table data matches the classic RPi.GPIO pin_to_gpio tables.
static REV1_MAP: ChannelMap = ChannelMap {
    board_to_bcm: [
        -1, -1, -1, 0, -1, 1, -1, 4, 14, -1, 15, 17, 18, 21, -1, 22, 23, -1, 24, 10, -1, 9, 25,
        11, 8, -1, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1,
    ],
    positions: 26,
    all_bcm: false,
};

static REV2_MAP: ChannelMap = ChannelMap {
    board_to_bcm: [
        -1, -1, -1, 2, -1, 3, -1, 4, 14, -1, 15, 17, 18, 27, -1, 22, 23, -1, 24, 10, -1, 9, 25,
        11, 8, -1, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1,
    ],
    positions: 26,
    all_bcm: false,
};

static REV3_MAP: ChannelMap = ChannelMap {
    board_to_bcm: [
        -1, -1, -1, 2, -1, 3, -1, 4, 14, -1, 15, 17, 18, 27, -1, 22, 23, -1, 24, 10, -1, 9, 25,
        11, 8, -1, 7, -1, -1, 5, -1, 6, 12, 13, -1, 19, 16, 26, 20, -1, 21,
    ],
    positions: 40,
    all_bcm: false,
};

// Compute Modules route every GPIO to the SODIMM edge instead of a header,
// so board numbering is unavailable but the whole BCM space is usable.
static CM_MAP: ChannelMap = ChannelMap {
    board_to_bcm: [-1; BOARD_SLOTS],
    positions: 0,
    all_bcm: true,
};

impl ChannelMap {
    /// Highest valid board position for this revision (26 or 40, 0 on
    /// Compute Modules).
    #[must_use]
    pub fn positions(&self) -> u8 {
        self.positions
    }

    /// BCM GPIO number at physical header `position`, if any.
    #[must_use]
    pub fn bcm_of(&self, position: u8) -> Option<u8> {
        let entry = *self.board_to_bcm.get(usize::from(position))?;
        u8::try_from(entry).ok()
    }

    /// Physical header position carrying BCM GPIO `gpio`, if any.
    #[must_use]
    pub fn board_of(&self, gpio: u8) -> Option<u8> {
        let target = i8::try_from(gpio).ok()?;
        self.board_to_bcm
            .iter()
            .position(|&entry| entry == target)
            .map(|position| position as u8)
    }

    /// Whether `gpio` is addressable in BCM mode on this revision.
    ///
    /// On headered boards a GPIO is only usable if some header position
    /// carries it, which keeps board-to-BCM translation and its inverse
    /// consistent. Compute Modules accept the whole signal range.
    #[must_use]
    pub fn accepts_bcm(&self, gpio: u8) -> bool {
        self.all_bcm || self.board_of(gpio).is_some()
    }
}

impl BoardRevision {
    /// The pin map active for this revision.
    #[must_use]
    pub fn channel_map(&self) -> &'static ChannelMap {
        match self {
            Self::Rev1 => &REV1_MAP,
            Self::Rev2 => &REV2_MAP,
            Self::Rev3Plus | Self::Unknown => &REV3_MAP,
            Self::ComputeModule => &CM_MAP,
        }
    }

    /// Classify a raw cpuinfo revision code.
    ///
    /// Over-volt and warranty bits above bit 23 are masked off. New-style
    /// codes (bit 23 set) carry the board type in bits 4..=11; the Compute
    /// Module types map to [`ComputeModule`](Self::ComputeModule) and every
    /// other new-style board has the 40-pin header.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        let code = code & 0x00ff_ffff;
        if code & (1 << 23) != 0 {
            return match (code >> 4) & 0xff {
                // CM1, CM3, CM3+, CM4, CM4S, CM5
                0x06 | 0x0a | 0x10 | 0x14 | 0x15 | 0x18 => Self::ComputeModule,
                _ => Self::Rev3Plus,
            };
        }
        match code {
            0x02 | 0x03 => Self::Rev1,
            0x04..=0x09 | 0x0d..=0x0f => Self::Rev2,
            0x10 | 0x12 | 0x13 | 0x15 => Self::Rev3Plus,
            0x11 | 0x14 => Self::ComputeModule,
            _ => Self::Unknown,
        }
    }
}

/// Determine the board revision from a cpuinfo-format file.
///
/// Fails with [`Error::UnsupportedPlatform`] if the file cannot be read, has
/// no `Revision` line, or carries a code [`from_code`](BoardRevision::from_code)
/// does not recognize. A failure here is fatal to the whole context: no
/// channel operation may proceed without a pin map.
pub fn detect(cpuinfo: &Path) -> Result<BoardRevision> {
    let text = fs::read_to_string(cpuinfo).map_err(|_| Error::UnsupportedPlatform)?;
    let code = parse_revision_code(&text).ok_or(Error::UnsupportedPlatform)?;
    let revision = BoardRevision::from_code(code);
    debug!("cpuinfo revision code {code:#08x} -> {revision}");
    if revision == BoardRevision::Unknown {
        return Err(Error::UnsupportedPlatform);
    }
    Ok(revision)
}

/// Pull the hex revision code out of cpuinfo text.
fn parse_revision_code(text: &str) -> Option<u32> {
    let line = text.lines().find(|line| line.starts_with("Revision"))?;
    let value = line.split(':').nth(1)?.trim();
    u32::from_str_radix(value, 16).ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn cpuinfo_with(revision_line: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "processor\t: 0").expect("write");
        writeln!(file, "model name\t: ARMv7 Processor rev 4 (v7l)").expect("write");
        writeln!(file, "{revision_line}").expect("write");
        file
    }

    #[test]
    fn old_style_codes_classify() {
        assert_eq!(BoardRevision::from_code(0x0002), BoardRevision::Rev1);
        assert_eq!(BoardRevision::from_code(0x0003), BoardRevision::Rev1);
        assert_eq!(BoardRevision::from_code(0x0004), BoardRevision::Rev2);
        assert_eq!(BoardRevision::from_code(0x000e), BoardRevision::Rev2);
        assert_eq!(BoardRevision::from_code(0x0010), BoardRevision::Rev3Plus);
        assert_eq!(BoardRevision::from_code(0x0011), BoardRevision::ComputeModule);
        assert_eq!(BoardRevision::from_code(0xbeef), BoardRevision::Unknown);
    }

    #[test]
    fn over_volt_prefix_is_masked() {
        // 1000000f is an over-volted revision-2 Model B.
        assert_eq!(BoardRevision::from_code(0x1000_000f), BoardRevision::Rev2);
    }

    #[test]
    fn new_style_codes_classify() {
        // a02082: Pi 3 Model B (type 0x08).
        assert_eq!(BoardRevision::from_code(0x00a0_2082), BoardRevision::Rev3Plus);
        // a020a0: CM3 (type 0x0a).
        assert_eq!(
            BoardRevision::from_code(0x00a0_20a0),
            BoardRevision::ComputeModule
        );
        // c03111: Pi 4 Model B (type 0x11) stays a 40-pin board.
        assert_eq!(BoardRevision::from_code(0x00c0_3111), BoardRevision::Rev3Plus);
    }

    #[test]
    fn detect_reads_revision_line() {
        let file = cpuinfo_with("Revision\t: a02082");
        assert_eq!(detect(file.path()).expect("detect"), BoardRevision::Rev3Plus);
    }

    #[test]
    fn detect_rejects_missing_and_garbage() {
        let missing = Path::new("/nonexistent/cpuinfo");
        assert!(matches!(detect(missing), Err(Error::UnsupportedPlatform)));

        let garbage = cpuinfo_with("Revision\t: zzzz");
        assert!(matches!(
            detect(garbage.path()),
            Err(Error::UnsupportedPlatform)
        ));

        let absent = cpuinfo_with("Serial\t: 00000000deadbeef");
        assert!(matches!(
            detect(absent.path()),
            Err(Error::UnsupportedPlatform)
        ));
    }

    #[test]
    fn rev1_map_swaps_i2c_pins() {
        let map = BoardRevision::Rev1.channel_map();
        assert_eq!(map.bcm_of(3), Some(0));
        assert_eq!(map.bcm_of(5), Some(1));
        assert_eq!(map.bcm_of(13), Some(21));
        let map = BoardRevision::Rev2.channel_map();
        assert_eq!(map.bcm_of(3), Some(2));
        assert_eq!(map.bcm_of(5), Some(3));
        assert_eq!(map.bcm_of(13), Some(27));
    }

    #[test]
    fn reverse_lookup_matches_forward() {
        for revision in [
            BoardRevision::Rev1,
            BoardRevision::Rev2,
            BoardRevision::Rev3Plus,
        ] {
            let map = revision.channel_map();
            for position in 1..=map.positions() {
                if let Some(gpio) = map.bcm_of(position) {
                    assert_eq!(map.board_of(gpio), Some(position), "{revision} pin {position}");
                }
            }
        }
    }

    #[test]
    fn compute_module_accepts_all_bcm_but_no_board_pins() {
        let map = BoardRevision::ComputeModule.channel_map();
        assert_eq!(map.positions(), 0);
        assert!(map.accepts_bcm(0));
        assert!(map.accepts_bcm(53));
        assert_eq!(map.bcm_of(3), None);
    }
}

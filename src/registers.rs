//! Register access layer for the BCM283x GPIO block.
//!
//! The controller is driven through a 4 KiB block of 32-bit registers. This
//! module defines the word-level [`Registers`] seam plus the register
//! protocol on top of it: function-select fields, set/clear/level banks, and
//! the two-phase pull-resistor sequence. Two backends implement the seam:
//! [`MemMapped`] (the real thing, via `/dev/gpiomem` or `/dev/mem`) and
//! [`Simulated`] (a plain word array with loopback, for tests and non-Pi
//! hosts).

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, trace};

use crate::{Error, Result, lock};

/// Number of GPIO lines the controller exposes.
pub const GPIO_LINES: u8 = 54;

/// Size of the mapped register block.
const BLOCK_BYTES: usize = 4096;
const BLOCK_WORDS: usize = BLOCK_BYTES / 4;

// Word indices within the GPIO block (BCM2835 ARM Peripherals §6.1).
const GPFSEL0: usize = 0; // 6 words, 10 three-bit fields each
const GPSET0: usize = 7; // 2 words, write-1-to-set
const GPCLR0: usize = 10; // 2 words, write-1-to-clear
const GPLEV0: usize = 13; // 2 words, input levels
const GPPUD: usize = 37; // pull control code
const GPPUDCLK0: usize = 38; // 2 words, pull clock

/// Function-select field width and count per GPFSEL word.
const FSEL_BITS: usize = 3;
const FSEL_FIELDS_PER_WORD: u8 = 10;

// ============================================================================
// Pin-level types
// ============================================================================

/// Direction a channel is configured in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    /// Channel senses its level.
    Input,
    /// Channel drives its level.
    Output,
}

/// Internal pull resistor applied to a pin.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Pull {
    /// No bias; the pin floats when undriven.
    #[default]
    Off,
    /// Bias towards ground.
    Down,
    /// Bias towards the supply rail.
    Up,
}

impl Pull {
    fn code(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Down => 1,
            Self::Up => 2,
        }
    }

    fn from_code(code: u32) -> Self {
        match code & 0b11 {
            1 => Self::Down,
            2 => Self::Up,
            _ => Self::Off,
        }
    }
}

/// Logic level of a pin.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Level {
    /// Logic 0.
    Low,
    /// Logic 1.
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Self::High } else { Self::Low }
    }
}

/// Function a pin's function-select field currently encodes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PinFunction {
    /// Configured as input.
    Input,
    /// Configured as output.
    Output,
    /// One of the alternate peripheral functions ALT0..=ALT5.
    Alt(u8),
    /// Not something this crate recognizes.
    Unknown,
}

impl PinFunction {
    fn from_fsel(code: u32) -> Self {
        match code & 0b111 {
            0b000 => Self::Input,
            0b001 => Self::Output,
            0b100 => Self::Alt(0),
            0b101 => Self::Alt(1),
            0b110 => Self::Alt(2),
            0b111 => Self::Alt(3),
            0b011 => Self::Alt(4),
            0b010 => Self::Alt(5),
            _ => Self::Unknown,
        }
    }
}

fn fsel_slot(gpio: u8) -> (usize, usize) {
    let index = GPFSEL0 + usize::from(gpio / FSEL_FIELDS_PER_WORD);
    let shift = usize::from(gpio % FSEL_FIELDS_PER_WORD) * FSEL_BITS;
    (index, shift)
}

fn bank_and_bit(gpio: u8) -> (usize, u32) {
    (usize::from(gpio / 32), 1 << (gpio % 32))
}

// ============================================================================
// Registers seam
// ============================================================================

/// Word-level access to the GPIO register block.
///
/// Implementations provide volatile 32-bit reads and writes; the register
/// protocol is shared as provided methods so every backend behaves
/// identically. The trait object is shared between a
/// [`Gpio`](crate::Gpio) context and its PWM worker threads, so
/// implementations must be `Send + Sync`; the provided methods only ever use
/// read-modify-write on words that the concurrency rules in the crate docs
/// reserve to a single writer (function select, pull), while the set/clear
/// banks written from PWM workers are write-only by design.
pub trait Registers: Send + Sync {
    /// Read the 32-bit word at `index` (in words from the block base).
    fn read_word(&self, index: usize) -> u32;

    /// Write the 32-bit word at `index`.
    fn write_word(&self, index: usize, value: u32);

    /// Wait long enough for the pull-control sequence to latch.
    fn settle(&self) {}

    /// Program the function-select field for `gpio`.
    fn configure(&self, gpio: u8, direction: Direction) {
        let (index, shift) = fsel_slot(gpio);
        let code = match direction {
            Direction::Input => 0b000,
            Direction::Output => 0b001,
        };
        let word = self.read_word(index);
        self.write_word(index, (word & !(0b111 << shift)) | (code << shift));
        trace!("gpio {gpio} configured as {direction:?}");
    }

    /// Read back the function the pin is currently selected for.
    fn function_of(&self, gpio: u8) -> PinFunction {
        let (index, shift) = fsel_slot(gpio);
        PinFunction::from_fsel(self.read_word(index) >> shift)
    }

    /// Drive an output pin. Set/clear banks are write-1-to-act, so no
    /// read-modify-write is needed and concurrent writers cannot clobber
    /// each other's pins.
    fn write_level(&self, gpio: u8, level: Level) {
        let (bank, bit) = bank_and_bit(gpio);
        let base = match level {
            Level::High => GPSET0,
            Level::Low => GPCLR0,
        };
        self.write_word(base + bank, bit);
    }

    /// Sense a pin's current level.
    fn read_level(&self, gpio: u8) -> Level {
        let (bank, bit) = bank_and_bit(gpio);
        Level::from(self.read_word(GPLEV0 + bank) & bit != 0)
    }

    /// Apply a pull resistor setting via the two-phase GPPUD/GPPUDCLK
    /// sequence: latch the control code, clock it into the pin, then clear
    /// both registers.
    fn set_pull(&self, gpio: u8, pull: Pull) {
        let (bank, bit) = bank_and_bit(gpio);
        let control = self.read_word(GPPUD);
        self.write_word(GPPUD, (control & !0b11) | pull.code());
        self.settle();
        self.write_word(GPPUDCLK0 + bank, bit);
        self.settle();
        self.write_word(GPPUD, control & !0b11);
        self.write_word(GPPUDCLK0 + bank, 0);
        trace!("gpio {gpio} pull set to {pull:?}");
    }
}

// ============================================================================
// MemMapped - the real register block
// ============================================================================

/// The GPIO register block mapped from a privileged memory device.
///
/// Prefer `/dev/gpiomem`, which exposes exactly the GPIO block and does not
/// require root. `/dev/mem` works too; the peripheral base is then read from
/// the device tree with a fallback to the BCM2708 constant.
pub struct MemMapped {
    base: *mut u32,
}

// The mapping is a fixed block of device memory; all access goes through
// volatile reads/writes of independent words.
#[expect(unsafe_code)]
unsafe impl Send for MemMapped {}
#[expect(unsafe_code)]
unsafe impl Sync for MemMapped {}

impl MemMapped {
    /// Map the GPIO block from `path`.
    #[expect(unsafe_code)]
    pub fn open(path: &Path) -> Result<Self> {
        let device = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::MapFailed { errno: libc::EINVAL })?;
        let fd = unsafe {
            libc::open(device.as_ptr(), libc::O_RDWR | libc::O_SYNC | libc::O_CLOEXEC)
        };
        if fd < 0 {
            let errno = last_errno();
            return Err(match errno {
                libc::EACCES | libc::EPERM => Error::PermissionDenied {
                    path: path.to_path_buf(),
                },
                _ => Error::MapFailed { errno },
            });
        }

        let offset = gpio_block_offset(path);
        let mapping = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                BLOCK_BYTES,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset,
            )
        };
        let errno = last_errno();
        unsafe {
            libc::close(fd);
        }
        if mapping == libc::MAP_FAILED {
            return Err(match errno {
                libc::ENOMEM => Error::AllocationFailed,
                libc::EACCES | libc::EPERM => Error::PermissionDenied {
                    path: path.to_path_buf(),
                },
                _ => Error::MapFailed { errno },
            });
        }
        debug!("mapped GPIO block from {} at offset {offset:#x}", path.display());
        Ok(Self {
            base: mapping.cast(),
        })
    }

    /// Map from the explicit device if given, otherwise try `/dev/gpiomem`
    /// and fall back to `/dev/mem`.
    pub fn open_default(device: Option<&Path>) -> Result<Self> {
        if let Some(path) = device {
            return Self::open(path);
        }
        match Self::open(Path::new("/dev/gpiomem")) {
            Ok(mapped) => Ok(mapped),
            Err(_) => Self::open(Path::new("/dev/mem")),
        }
    }
}

impl Registers for MemMapped {
    #[expect(unsafe_code)]
    fn read_word(&self, index: usize) -> u32 {
        assert!(index < BLOCK_WORDS, "register index out of block");
        unsafe { self.base.add(index).read_volatile() }
    }

    #[expect(unsafe_code)]
    fn write_word(&self, index: usize, value: u32) {
        assert!(index < BLOCK_WORDS, "register index out of block");
        unsafe {
            self.base.add(index).write_volatile(value);
        }
    }

    fn settle(&self) {
        // The datasheet asks for 150 core cycles between the GPPUD phases; a
        // short sleep is comfortably past that on any clock.
        std::thread::sleep(std::time::Duration::from_micros(5));
    }
}

impl Drop for MemMapped {
    #[expect(unsafe_code)]
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.cast(), BLOCK_BYTES);
        }
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Byte offset of the GPIO block within the opened device.
///
/// `gpiomem`-style devices expose the block at offset zero. For `/dev/mem`
/// the SoC peripheral base is read from the device tree (`soc/ranges` second
/// cell, or third on BCM2711-era trees), falling back to the BCM2708 base.
fn gpio_block_offset(path: &Path) -> libc::off_t {
    let is_gpiomem = path
        .file_name()
        .is_some_and(|name| name.to_string_lossy().contains("gpiomem"));
    if is_gpiomem {
        0
    } else {
        (peripheral_base() + 0x0020_0000) as libc::off_t
    }
}

fn peripheral_base() -> u64 {
    if let Ok(ranges) = std::fs::read("/proc/device-tree/soc/ranges") {
        for cell in [ranges.get(4..8), ranges.get(8..12)] {
            if let Some(&[a, b, c, d]) = cell {
                let base = u64::from(u32::from_be_bytes([a, b, c, d]));
                if base != 0 {
                    return base;
                }
            }
        }
    }
    0x2000_0000
}

// ============================================================================
// Simulated - loopback backend for tests and non-Pi hosts
// ============================================================================

/// A level transition observed by [`Simulated`] while recording.
pub type LevelEvent = (Instant, u8, Level);

struct SimState {
    words: [u32; BLOCK_WORDS],
    pulls: [Pull; GPIO_LINES as usize],
    events: Vec<LevelEvent>,
    recording: bool,
}

/// In-memory stand-in for the register block.
///
/// Writes to the set/clear banks loop back into the level bank, so a
/// configure-write-read sequence behaves like a scoped-off output pin. Pull
/// sequences are decoded and the most recent setting per pin is observable
/// through [`pull_of`](Self::pull_of). Level transitions can be recorded
/// with timestamps for PWM timing assertions.
pub struct Simulated {
    state: Mutex<SimState>,
}

impl Default for Simulated {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulated {
    /// A fresh block: every word zero, every pull off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                words: [0; BLOCK_WORDS],
                pulls: [Pull::Off; GPIO_LINES as usize],
                events: Vec::new(),
                recording: false,
            }),
        }
    }

    /// Start recording level transitions (with timestamps).
    pub fn start_recording(&self) {
        lock(&self.state).recording = true;
    }

    /// Stop recording and drain the captured transitions.
    pub fn take_events(&self) -> Vec<LevelEvent> {
        let mut state = lock(&self.state);
        state.recording = false;
        std::mem::take(&mut state.events)
    }

    /// Most recent pull setting clocked into `gpio`.
    #[must_use]
    pub fn pull_of(&self, gpio: u8) -> Pull {
        lock(&self.state).pulls[usize::from(gpio)]
    }

    /// Force a level into the input bank, as if an external circuit drove
    /// the pin.
    pub fn set_input_level(&self, gpio: u8, level: Level) {
        let (bank, bit) = bank_and_bit(gpio);
        let mut state = lock(&self.state);
        apply_level(&mut state, bank, bit, level);
    }
}

fn apply_level(state: &mut SimState, bank: usize, mask: u32, level: Level) {
    let index = GPLEV0 + bank;
    let old = state.words[index];
    let new = match level {
        Level::High => old | mask,
        Level::Low => old & !mask,
    };
    if state.recording {
        let changed = old ^ new;
        let now = Instant::now();
        for bit in 0..32u8 {
            if changed & (1 << bit) != 0 {
                let gpio = bank as u8 * 32 + bit;
                state.events.push((now, gpio, level));
            }
        }
    }
    state.words[index] = new;
}

impl Registers for Simulated {
    fn read_word(&self, index: usize) -> u32 {
        lock(&self.state).words[index]
    }

    fn write_word(&self, index: usize, value: u32) {
        let mut state = lock(&self.state);
        match index {
            GPSET0 | 8 => apply_level(&mut state, index - GPSET0, value, Level::High),
            GPCLR0 | 11 => apply_level(&mut state, index - GPCLR0, value, Level::Low),
            GPPUDCLK0 | 39 => {
                if value != 0 {
                    let pull = Pull::from_code(state.words[GPPUD]);
                    let bank = index - GPPUDCLK0;
                    for bit in 0..32u8 {
                        if value & (1 << bit) != 0 {
                            let gpio = bank * 32 + usize::from(bit);
                            if gpio < usize::from(GPIO_LINES) {
                                state.pulls[gpio] = pull;
                            }
                        }
                    }
                }
                state.words[index] = value;
            }
            _ => state.words[index] = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsel_fields_pack_ten_per_word() {
        assert_eq!(fsel_slot(0), (0, 0));
        assert_eq!(fsel_slot(9), (0, 27));
        assert_eq!(fsel_slot(10), (1, 0));
        assert_eq!(fsel_slot(53), (5, 9));
    }

    #[test]
    fn configure_touches_only_its_field() {
        let sim = Simulated::new();
        sim.configure(11, Direction::Output);
        sim.configure(12, Direction::Output);
        assert_eq!(sim.function_of(11), PinFunction::Output);
        assert_eq!(sim.function_of(12), PinFunction::Output);
        assert_eq!(sim.function_of(10), PinFunction::Input);
        sim.configure(11, Direction::Input);
        assert_eq!(sim.function_of(11), PinFunction::Input);
        assert_eq!(sim.function_of(12), PinFunction::Output);
    }

    #[test]
    fn alternate_functions_decode() {
        assert_eq!(PinFunction::from_fsel(0b100), PinFunction::Alt(0));
        assert_eq!(PinFunction::from_fsel(0b010), PinFunction::Alt(5));
        assert_eq!(PinFunction::from_fsel(0b011), PinFunction::Alt(4));
    }

    #[test]
    fn levels_loop_back_across_banks() {
        let sim = Simulated::new();
        sim.write_level(17, Level::High);
        sim.write_level(47, Level::High);
        assert_eq!(sim.read_level(17), Level::High);
        assert_eq!(sim.read_level(47), Level::High);
        sim.write_level(17, Level::Low);
        assert_eq!(sim.read_level(17), Level::Low);
        assert_eq!(sim.read_level(47), Level::High);
    }

    #[test]
    fn pull_sequence_latches_per_pin() {
        let sim = Simulated::new();
        sim.set_pull(4, Pull::Up);
        sim.set_pull(35, Pull::Down);
        assert_eq!(sim.pull_of(4), Pull::Up);
        assert_eq!(sim.pull_of(35), Pull::Down);
        assert_eq!(sim.pull_of(5), Pull::Off);
        sim.set_pull(4, Pull::Off);
        assert_eq!(sim.pull_of(4), Pull::Off);
    }

    #[test]
    fn recording_captures_transitions_only() {
        let sim = Simulated::new();
        sim.start_recording();
        sim.write_level(9, Level::High);
        sim.write_level(9, Level::High); // no transition
        sim.write_level(9, Level::Low);
        let events = sim.take_events();
        let levels: Vec<Level> = events.iter().map(|&(_, _, level)| level).collect();
        assert_eq!(levels, [Level::High, Level::Low]);
        assert!(events.iter().all(|&(_, gpio, _)| gpio == 9));
    }
}

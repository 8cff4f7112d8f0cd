//! Host-side driver for the Nordic Secure DFU bootloader's serial
//! transport: SLIP framing, the opcode request/response protocol, the
//! resumable object transfer engine, and the multi-image sequencer.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use log::LevelFilter;

mod client;
mod manifest;
mod messages;
mod object;
mod sequencer;
mod slip;
mod transport;
mod wire;

pub use manifest::{Image, ImageKind};

pub type Result<T> = std::result::Result<T, DfuError>;

/// The error taxonomy surfaced to callers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DfuError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for a response from the device")]
    Timeout,

    #[error("SLIP framing error: {0}")]
    Framing(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("device returned error code 0x{code:02x} (extended: {ext:?})")]
    Remote { code: u8, ext: Option<u8> },

    #[error("CRC or offset mismatch against device-reported state")]
    CrcMismatch,

    #[error("device MTU ({0} bytes) is too small to carry any payload")]
    MtuTooSmall(u16),

    #[error("payload of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("device reported offset {offset} beyond the {len}-byte payload")]
    InvalidRemoteState { offset: u32, len: usize },

    #[error("invalid update package: {0}")]
    InvalidPackage(String),
}

/// Host-side knobs with no protocol-level equivalent; these are CLI-only.
#[derive(Debug, Clone)]
pub struct Config {
    /// Lower bound on the pause inserted between images that trigger a
    /// device reboot. The device gives no signal that it has finished
    /// rebooting, so this is a fixed sleep, not a poll.
    pub settle_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1000),
        }
    }
}

/// Verbosity level as selected by repeating `-v` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Info,
    Debug,
    Trace,
}

impl Verbosity {
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Quiet,
            1 => Verbosity::Info,
            2 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }

    fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }
}

/// Initialize the logger at the given verbosity, honoring `RUST_LOG` as an
/// override.
pub fn init_logging(verbosity: Verbosity) {
    env_logger::builder()
        .filter_level(verbosity.level_filter())
        .parse_default_env()
        .init();
}

/// Run a full firmware update: read `package_path`, then drive `port`
/// through the handshake and every declared image in order.
///
/// `port` is the already-opened serial link; configuring its line
/// settings (baud rate, parity, flow control) is the caller's
/// responsibility.
pub fn run<T: Read + Write>(package_path: &Path, port: T, config: &Config) -> Result<()> {
    let images = manifest::load_package(package_path)?;

    let images = images
        .into_iter()
        .map(pad_firmware_to_word_boundary)
        .collect();

    let mut client = client::Client::new(port);
    sequencer::run(&mut client, images, config.settle_delay)
}

/// The nRF bootloader requires the firmware image to be padded with 0xFF
/// to a multiple of 4 bytes; this applies to every image, not just the
/// application.
fn pad_firmware_to_word_boundary(mut image: Image) -> Image {
    while image.firmware.len() % 4 != 0 {
        image.firmware.push(0xFF);
    }
    image
}

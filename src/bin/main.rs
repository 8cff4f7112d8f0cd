use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serialport::{DataBits, FlowControl, Parity, StopBits};

use nrfdfu::{init_logging, Config, Result, Verbosity};

/// Per-read timeout the serial driver is configured with.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Flash a firmware update package onto a device running the Nordic
/// Secure DFU bootloader, over a serial link.
#[derive(Parser)]
#[command(name = "nrfdfu", version)]
struct Args {
    /// Serial port the device is attached to (e.g. ttyUSB0, COM3).
    serial_port: String,

    /// Path to the firmware update package (a .zip containing
    /// manifest.json plus each image's .dat/.bin files).
    package: PathBuf,

    /// Increase verbosity; repeat up to 3 times for byte-level SLIP traces.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Minimum pause between images that trigger a device reboot.
    #[arg(long, default_value_t = 1000)]
    settle_delay_ms: u64,
}

fn main() {
    let args = Args::parse();
    init_logging(Verbosity::from_count(args.verbose));

    if let Err(e) = main_body(args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn main_body(args: Args) -> Result<()> {
    let mut port = serialport::new(&args.serial_port, 115_200)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::Hardware)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(to_io_error)?;

    // On Windows, this is required, otherwise communication fails with
    // timeouts (or just hangs forever).
    port.write_data_terminal_ready(true).map_err(to_io_error)?;

    let config = Config {
        settle_delay: Duration::from_millis(args.settle_delay_ms),
    };

    nrfdfu::run(&args.package, port, &config)
}

fn to_io_error(e: serialport::Error) -> nrfdfu::DfuError {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()).into()
}

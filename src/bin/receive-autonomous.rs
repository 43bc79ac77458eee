//! Print the tag stream of a reader that was left reading autonomously.
//!
//! No commands are sent; the port is opened at the saved baud rate and the
//! stream decoded as it arrives.

use std::process;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use failure::ResultExt;

use mercury_autoread::hex::bytes_to_hex;
use mercury_autoread::{Reader, ReaderStats, SerialPrinter, StatsFlags, TagReadData, DEFAULT_BAUD_RATE};

/// How often the stream thread is checked while waiting.
const POLL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "receive-autonomous",
    version,
    about = "Print the autonomous read stream of a Mercury reader",
    after_help = "Please provide the streaming port, such as /COM12 or /dev/ttyS0, \
                  or --trace /COM12 to print the raw frames as well"
)]
struct Cli {
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::WarnLevel>,

    /// Print every frame received from the reader
    #[arg(long)]
    trace: bool,

    /// Serial port the reader streams on, such as /COM12 or /dev/ttyS0
    #[arg(value_parser = parse_port)]
    port: String,

    /// Baud rate the reader was saved with
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Stop after this many seconds instead of running until interrupted
    #[arg(long)]
    duration: Option<u64>,
}

fn parse_port(port: &str) -> Result<String, String> {
    if port.starts_with('/') {
        Ok(port.to_string())
    } else {
        Err(format!("{:?} is not a port path; expected e.g. /COM12 or /dev/ttyS0", port))
    }
}

fn print_read(read: &TagReadData) {
    println!("Background read: {}", read);
    if !read.data.is_empty() {
        println!("Data({}): {}", read.data.len(), bytes_to_hex(&read.data));
    }
}

fn print_stats(stats: &ReaderStats) {
    if stats.valid.contains(StatsFlags::TEMPERATURE) {
        println!("Temperature {}(C)", stats.temperature);
    }
}

/// Wait until `duration` has passed, or forever without one, checking
/// `is_reading` every `poll`. Fails as soon as the stream has stopped.
fn watch<F: FnMut() -> bool>(mut is_reading: F, duration: Option<Duration>, poll: Duration) -> Result<(), failure::Error> {
    let deadline = duration.map(|d| Instant::now() + d);
    loop {
        if !is_reading() {
            return Err(failure::err_msg("autonomous read stream stopped"));
        }
        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(());
                }
                poll.min(deadline - now)
            }
            None => poll,
        };
        thread::sleep(wait);
    }
}

fn run(cli: &Cli) -> Result<(), failure::Error> {
    let mut reader = Reader::create_with_baud(&cli.port, cli.baud).context("opening streaming port")?;
    if cli.trace {
        reader.add_transport_listener(SerialPrinter::new(std::io::stdout()));
    }
    reader.add_read_listener(print_read);
    reader.add_stats_listener(print_stats);
    reader.receive_autonomous_reading().context("receiving autonomous reads")?;

    watch(|| reader.is_reading(), cli.duration.map(Duration::from_secs), POLL)?;
    reader.destroy().context("destroying reader")?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    if let Err(e) = run(&cli) {
        let mut message = format!("Error {}", e);
        for cause in e.iter_causes() {
            message.push_str(&format!(": {}", cause));
        }
        eprintln!("{}", message);
        process::exit(1);
    }
}

//! Enable or disable autonomous reading on a Mercury reader.
//!
//! `--enable` configures the radio, saves a read plan the reader runs on its
//! own after power-up and starts it. `--disable` clears the saved
//! configuration.

use std::ffi::OsString;
use std::process;
use std::thread;
use std::time::Duration;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{ArgGroup, Parser};
use failure::ResultExt;

use mercury_autoread::gen2::{Bank, LinkFrequency, Session, TagEncoding, Target};
use mercury_autoread::hex::bytes_to_hex;
use mercury_autoread::{AutonomousConfig, Param, Reader, ReaderStats, Region, SerialPrinter, StatsFlags, TagReadData};

const USAGE: &str = "Please provide reader URL, such as:\n\
                     tmr:///com4 --enable  to enable autonomous read (or) \n\
                     tmr:///com4 --disable to disable autonomous read\n";

#[derive(Parser, Debug)]
#[command(name = "autonomous-config", version, about = "Enable or disable autonomous reading on a Mercury reader")]
#[command(group(ArgGroup::new("mode").required(true).args(["enable", "disable"])))]
struct Cli {
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::WarnLevel>,

    /// Reader URI, such as tmr:///com4 or tmr:///dev/ttyUSB0
    uri: String,

    /// Save a read plan the reader runs by itself and start it
    #[arg(long)]
    enable: bool,

    /// Clear the saved configuration, stopping autonomous reads
    #[arg(long)]
    disable: bool,

    /// Print every frame sent to and received from the reader
    #[arg(long)]
    trace: bool,

    /// Seconds to print the autonomous stream after enabling, 0 to skip
    #[arg(long, default_value_t = 2)]
    listen: u64,

    /// Report the reader temperature in the stream
    #[arg(long)]
    stats: bool,

    #[arg(long, default_value = "NA3")]
    region: Region,

    #[arg(long, default_value_t = 115200)]
    baud: u32,

    /// Read power in centi-dBm
    #[arg(long, default_value_t = 2700)]
    power: u16,

    /// Gen2 backscatter link frequency in kHz
    #[arg(long, default_value = "250")]
    blf: LinkFrequency,

    #[arg(long, default_value = "S0")]
    session: Session,

    #[arg(long, default_value = "A")]
    target: Target,

    #[arg(long, default_value = "M8")]
    encoding: TagEncoding,

    /// Milliseconds per search cycle
    #[arg(long, default_value_t = 1000)]
    async_on_time: u32,

    /// Report the same EPC again when its embedded read data differs
    #[arg(long)]
    unique_by_data: bool,

    /// Antenna ports to read on, comma separated
    #[arg(long = "antenna", value_delimiter = ',', default_value = "1")]
    antennas: Vec<u8>,

    /// Memory bank of the embedded read
    #[arg(long, default_value = "TID")]
    read_bank: Bank,

    /// First word of the embedded read
    #[arg(long, default_value_t = 3)]
    read_address: u32,

    /// Words to read with each tag, 0 for EPC only
    #[arg(long, default_value_t = 3)]
    read_words: u8,
}

impl Cli {
    fn config(&self) -> AutonomousConfig {
        AutonomousConfig {
            region: self.region,
            baud_rate: self.baud,
            read_power: self.power,
            link_frequency: self.blf,
            session: self.session,
            target: self.target,
            tag_encoding: self.encoding,
            async_on_time: self.async_on_time,
            unique_by_data: self.unique_by_data,
            antennas: self.antennas.clone(),
            read_data: if self.read_words == 0 {
                None
            } else {
                Some((self.read_bank, self.read_address, self.read_words))
            },
            stats: if self.stats { StatsFlags::TEMPERATURE } else { StatsFlags::empty() },
            ..AutonomousConfig::default()
        }
    }
}

#[derive(Debug)]
enum ArgError {
    /// Print the message if any, then the usage text, and exit 1
    Usage(Option<String>),
    /// Help or version output, which clap prints and exits 0 for
    Clap(clap::Error),
}

fn parse_args(args: Vec<OsString>) -> Result<Cli, ArgError> {
    if args.len() < 2 {
        return Err(ArgError::Usage(None));
    }
    Cli::try_parse_from(args).map_err(|err| match err.kind() {
        ErrorKind::ArgumentConflict => ArgError::Usage(Some(
            "Duplicate argument: --enable or --disable specified more than once".to_string(),
        )),
        ErrorKind::UnknownArgument => {
            let arg = match err.get(ContextKind::InvalidArg) {
                Some(ContextValue::String(arg)) => arg.clone(),
                _ => "?".to_string(),
            };
            ArgError::Usage(Some(format!("Argument {} is not recognized", arg)))
        }
        ErrorKind::MissingRequiredArgument => {
            ArgError::Usage(Some("Not Providing any Autonomous Read Option".to_string()))
        }
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ArgError::Clap(err),
        _ => ArgError::Usage(Some(err.to_string().trim_end().to_string())),
    })
}

fn print_read(read: &TagReadData) {
    println!("Background read: {}", read);
    if !read.data.is_empty() {
        println!("TID data({}): {}", read.data.len(), bytes_to_hex(&read.data));
    }
}

fn print_stats(stats: &ReaderStats) {
    if stats.valid.contains(StatsFlags::TEMPERATURE) {
        println!("Temperature {}(C)", stats.temperature);
    }
}

/// One confirmation line per setting; the read plan commit has none.
fn print_step(param: &Param) {
    if let Param::ReadPlan(_) = param {
        return;
    }
    println!("{}", param);
}

fn enable(reader: &mut Reader<serial::SystemPort>, cli: &Cli) -> Result<(), failure::Error> {
    cli.config().enable(reader, print_step)?;
    println!("Autonomous read is started ...");

    if cli.listen > 0 {
        let reads = reader.add_read_listener(print_read);
        let stats = reader.add_stats_listener(print_stats);
        reader.receive_autonomous_reading().context("receiving autonomous reads")?;
        thread::sleep(Duration::from_secs(cli.listen));
        reader.stop_reading().context("stopping autonomous reads")?;
        reader.remove_read_listener(reads).context("removing read listener")?;
        reader.remove_stats_listener(stats).context("removing stats listener")?;
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), failure::Error> {
    let mut reader = Reader::create(&cli.uri).context("creating reader")?;
    if cli.trace {
        reader.add_transport_listener(SerialPrinter::new(std::io::stdout()));
    }
    let version = reader.connect().context("connecting reader")?;
    log::info!("Connected: {}", version);

    if cli.disable {
        AutonomousConfig::disable(&mut reader, |param| {
            println!("{} - autonomous read is disabled..", param)
        })?;
    } else {
        enable(&mut reader, cli)?;
    }
    reader.destroy().context("destroying reader")?;
    Ok(())
}

fn main() {
    let cli = match parse_args(std::env::args_os().collect()) {
        Ok(cli) => cli,
        Err(ArgError::Clap(err)) => err.exit(),
        Err(ArgError::Usage(message)) => {
            if let Some(message) = message {
                println!("{}", message);
            }
            eprint!("{}", USAGE);
            process::exit(1);
        }
    };

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

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, ArgError> {
        parse_args(args.iter().map(OsString::from).collect())
    }

    fn usage_message(args: &[&str]) -> Option<String> {
        match parse(args) {
            Err(ArgError::Usage(message)) => message,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_enable_disable() {
        let cli = parse(&["autonomous-config", "tmr:///com4", "--enable"]).unwrap();
        assert!(cli.enable && !cli.disable);
        assert_eq!(cli.uri, "tmr:///com4");
        let cli = parse(&["autonomous-config", "tmr:///dev/ttyUSB0", "--disable"]).unwrap();
        assert!(cli.disable && !cli.enable);
    }

    #[test]
    fn test_usage_errors() {
        assert_eq!(usage_message(&["autonomous-config"]), None);
        assert_eq!(
            usage_message(&["autonomous-config", "tmr:///com4"]).unwrap(),
            "Not Providing any Autonomous Read Option"
        );
        assert_eq!(
            usage_message(&["autonomous-config", "tmr:///com4", "--enable", "--disable"]).unwrap(),
            "Duplicate argument: --enable or --disable specified more than once"
        );
        assert_eq!(
            usage_message(&["autonomous-config", "tmr:///com4", "--enable", "--enable"]).unwrap(),
            "Duplicate argument: --enable or --disable specified more than once"
        );
        assert_eq!(
            usage_message(&["autonomous-config", "tmr:///com4", "--enable", "--bogus"]).unwrap(),
            "Argument --bogus is not recognized"
        );
    }

    #[test]
    fn test_bad_value_prints_usage() {
        let message = usage_message(&["autonomous-config", "tmr:///com4", "--enable", "--region", "MARS"]).unwrap();
        assert!(message.contains("MARS"));
        let message = usage_message(&["autonomous-config", "tmr:///com4", "--enable", "--baud", "fast"]).unwrap();
        assert!(message.contains("fast"));
    }

    #[test]
    fn test_help_is_left_to_clap() {
        match parse(&["autonomous-config", "--help"]) {
            Err(ArgError::Clap(err)) => assert_eq!(err.kind(), ErrorKind::DisplayHelp),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_config() {
        let cli = parse(&["autonomous-config", "tmr:///com4", "--enable"]).unwrap();
        assert_eq!(cli.config(), AutonomousConfig::default());
        assert_eq!(cli.listen, 2);
    }

    #[test]
    fn test_config_overrides() {
        let cli = parse(&[
            "autonomous-config",
            "tmr:///com4",
            "--enable",
            "--region",
            "eu3",
            "--blf",
            "640",
            "--antenna",
            "1,2",
            "--read-words",
            "0",
            "--stats",
        ])
        .unwrap();
        let config = cli.config();
        assert_eq!(config.region, Region::Eu3);
        assert_eq!(config.link_frequency, LinkFrequency::Khz640);
        assert_eq!(config.antennas, vec![1, 2]);
        assert_eq!(config.read_data, None);
        assert_eq!(config.stats, StatsFlags::TEMPERATURE);
    }
}

//! Driver for ThingMagic Mercury UHF RFID reader modules over their serial
//! protocol, centred on configuring and receiving autonomous reads.

extern crate bincode;
extern crate bitflags;
extern crate crc16;
extern crate failure;
extern crate log;
extern crate num_enum;
extern crate serde;
extern crate serial;

pub mod config;
pub mod error;
pub mod gen2;
pub mod hex;
pub mod params;
pub mod protocol;
pub mod read_plan;
pub mod stats;
pub mod stream;
pub mod tag;
pub mod transport;

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

pub use crate::config::{AutonomousConfig, StepError};
pub use crate::error::{Error, ResponseStatus, Result};
pub use crate::params::{Param, Region, UserConfigOp};
pub use crate::read_plan::{SimpleReadPlan, TagOp};
pub use crate::stats::{ReaderStats, StatsFlags};
pub use crate::stream::{ListenerId, StreamEvent};
pub use crate::tag::{MetadataFlags, TagData, TagProtocol, TagReadData};
pub use crate::transport::{ReaderUri, SerialPrinter, StringPrinter, Transport, TransportListener};

use crate::gen2::Q;
use crate::params::BAUD_RATES;
use crate::protocol::{decode, encode, read_frame, Command, Opcode, Response};
use crate::stream::{lock, receive_event, Background, Listeners, SharedListeners};

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Port timeout while streaming, which bounds how long stopping takes.
const STREAM_POLL: Duration = Duration::from_millis(200);

/// Order in which baud rates are tried when connecting.
const FALLBACK_BAUD_RATES: [u32; 8] = [115200, 9600, 921600, 19200, 38400, 57600, 230400, 460800];

/// Stream responses tolerated while waiting for a command's response.
const MAX_SKIPPED_FRAMES: usize = 32;

const PROGRAM_BOOTLOADER: u8 = 0x01;

const GEN2_SESSION: u8 = 0x00;
const GEN2_TARGET: u8 = 0x01;
const GEN2_TAG_ENCODING: u8 = 0x02;
const GEN2_LINK_FREQUENCY: u8 = 0x10;
const GEN2_Q: u8 = 0x12;

const OPTION_UNIQUE_BY_DATA: u8 = 0x08;

/// Firmware and hardware identification from GET_VERSION.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
pub struct VersionInfo {
    pub bootloader: [u8; 4],
    pub hardware: [u8; 4],
    pub firmware_date: [u8; 4],
    pub firmware: [u8; 4],
    pub protocols: u32,
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dotted = |b: &[u8; 4]| format!("{:02X}.{:02X}.{:02X}.{:02X}", b[0], b[1], b[2], b[3]);
        write!(
            f,
            "hardware {} firmware {} ({:02X}{:02X}-{:02X}-{:02X}) bootloader {}",
            dotted(&self.hardware),
            dotted(&self.firmware),
            self.firmware_date[0],
            self.firmware_date[1],
            self.firmware_date[2],
            self.firmware_date[3],
            dotted(&self.bootloader)
        )
    }
}

pub struct Reader<T: Transport> {
    port: Option<T>,
    timeout: Duration,
    baud_rate: u32,
    listeners: SharedListeners,
    background: Option<Background<T>>,
    read_plan: Option<SimpleReadPlan>,
    async_on_time: u32,
    metadata: MetadataFlags,
    stats: StatsFlags,
    version: Option<VersionInfo>,
}

impl Reader<serial::SystemPort> {
    /// Open the serial port named by `uri` at the default baud rate.
    /// Nothing is sent to the reader until [`Reader::connect`].
    pub fn create(uri: &str) -> Result<Reader<serial::SystemPort>> {
        Reader::create_with_baud(uri, DEFAULT_BAUD_RATE)
    }

    pub fn create_with_baud(uri: &str, baud: u32) -> Result<Reader<serial::SystemPort>> {
        let uri = ReaderUri::parse(uri)?;
        let port = uri.open(baud, DEFAULT_TIMEOUT)?;
        let mut reader = Reader::with_transport(port);
        reader.baud_rate = baud;
        Ok(reader)
    }
}

impl<T: Transport> Reader<T> {
    pub fn with_transport(port: T) -> Reader<T> {
        Reader {
            port: Some(port),
            timeout: DEFAULT_TIMEOUT,
            baud_rate: DEFAULT_BAUD_RATE,
            listeners: Arc::new(Mutex::new(Listeners::default())),
            background: None,
            read_plan: None,
            async_on_time: 250,
            metadata: MetadataFlags::READCOUNT
                | MetadataFlags::RSSI
                | MetadataFlags::ANTENNAID
                | MetadataFlags::FREQUENCY
                | MetadataFlags::TIMESTAMP
                | MetadataFlags::PROTOCOL
                | MetadataFlags::DATA,
            stats: StatsFlags::empty(),
            version: None,
        }
    }

    fn port(&mut self) -> Result<&mut T> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Program("Reader is busy receiving autonomous reads".to_string()))
    }

    fn send(&mut self, cmd: &Command) -> Result<()> {
        let bytes = cmd.to_bytes()?;
        debug!("Send: {:02X?}", bytes);
        lock(&self.listeners).notify_transport(true, &bytes, self.timeout);
        let port = self.port()?;
        port.write_all(&bytes)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&mut self, opcode: Opcode) -> Result<Response> {
        let timeout = self.timeout;
        for _ in 0..MAX_SKIPPED_FRAMES {
            let frame = read_frame(self.port()?)?;
            debug!("Receive: {:02X?}", frame);
            lock(&self.listeners).notify_transport(false, &frame, timeout);
            let response = Response::from_bytes(&frame)?;
            if response.opcode == u8::from(Opcode::ReadTagIdMultiple) && opcode != Opcode::ReadTagIdMultiple {
                debug!("Skipping streamed read while waiting for {:?}", opcode);
                continue;
            }
            if response.opcode != u8::from(opcode) {
                return Err(Error::Parse(format!(
                    "Expected response to {:?}, got opcode {:#04x}",
                    opcode, response.opcode
                )));
            }
            if !response.is_success() {
                debug!("{:?} failed with status {:#06x}", opcode, response.status);
                return Err(Error::from(response.status()));
            }
            return Ok(response);
        }
        Err(Error::Program(format!("No response to {:?} within the read stream", opcode)))
    }

    fn exchange(&mut self, command: Command) -> Result<Response> {
        let opcode = command.opcode;
        self.send(&command)?;
        self.receive(opcode)
    }

    /// Send a command with no parameters and receive a response
    fn exchange_simple(&mut self, opcode: Opcode) -> Result<Response> {
        self.exchange(Command::new(opcode, Vec::new()))
    }

    /// Find the reader's baud rate, start the application firmware if the
    /// bootloader is running, and select Gen2.
    pub fn connect(&mut self) -> Result<VersionInfo> {
        let mut bauds = vec![self.baud_rate];
        bauds.extend(FALLBACK_BAUD_RATES.iter().filter(|b| **b != self.baud_rate));

        let mut found = None;
        for baud in bauds {
            self.port()?.set_baud_rate(baud)?;
            match self.version() {
                Ok(v) => {
                    self.baud_rate = baud;
                    found = Some(v);
                    break;
                }
                Err(Error::Io(e)) => debug!("No answer at {} baud: {}", baud, e),
                Err(Error::Parse(e)) => debug!("Garbled answer at {} baud: {}", baud, e),
                Err(e) => return Err(e),
            }
        }
        let mut version = found.ok_or_else(|| Error::Program("No reader responded at any baud rate".to_string()))?;

        let program = self.exchange_simple(Opcode::GetCurrentProgram)?;
        if program.data.first().map(|p| p & 0x03) == Some(PROGRAM_BOOTLOADER) {
            info!("Reader is in its bootloader, starting application firmware");
            self.exchange_simple(Opcode::BootFirmware)?;
            version = self.version()?;
        }

        self.exchange(Command::new(Opcode::SetTagProtocol, encode(&u16::from(u8::from(TagProtocol::Gen2)))?))?;
        info!("Connected at {} baud: {}", self.baud_rate, version);
        Ok(version)
    }

    pub fn version(&mut self) -> Result<VersionInfo> {
        let response = self.exchange_simple(Opcode::GetVersion)?;
        let version: VersionInfo = decode(&response.data)?;
        self.version = Some(version);
        Ok(version)
    }

    /// Version reported by the last successful [`Reader::version`] call.
    pub fn cached_version(&self) -> Option<VersionInfo> {
        self.version
    }

    /// Module temperature in degrees Celsius.
    pub fn temperature(&mut self) -> Result<i8> {
        let response = self.exchange_simple(Opcode::GetTemperature)?;
        response
            .data
            .first()
            .map(|t| *t as i8)
            .ok_or_else(|| Error::Parse("Empty temperature response".to_string()))
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn read_plan(&self) -> Option<&SimpleReadPlan> {
        self.read_plan.as_ref()
    }

    /// Metadata fields requested with each tag read.
    pub fn set_metadata(&mut self, metadata: MetadataFlags) {
        self.metadata = metadata;
    }

    fn set_gen2(&mut self, key: u8, value: &[u8]) -> Result<()> {
        let mut data = vec![u8::from(TagProtocol::Gen2), key];
        data.extend_from_slice(value);
        self.exchange(Command::new(Opcode::SetProtocolParam, data))?;
        Ok(())
    }

    pub fn param_set(&mut self, param: &Param) -> Result<()> {
        match param {
            Param::Region(region) => {
                self.exchange(Command::new(Opcode::SetRegion, vec![u8::from(*region)]))?;
            }
            Param::BaudRate(baud) => {
                if !BAUD_RATES.contains(baud) {
                    return Err(Error::Program(format!("Unsupported baud rate {}", baud)));
                }
                self.exchange(Command::new(Opcode::SetBaudRate, encode(baud)?))?;
                self.port()?.set_baud_rate(*baud)?;
                self.baud_rate = *baud;
            }
            Param::ReadPower(power) => {
                self.exchange(Command::new(Opcode::SetReadTxPower, encode(power)?))?;
            }
            Param::Gen2LinkFrequency(lf) => self.set_gen2(GEN2_LINK_FREQUENCY, &[lf.code()])?,
            Param::Gen2Session(session) => self.set_gen2(GEN2_SESSION, &[u8::from(*session)])?,
            Param::Gen2Target(target) => self.set_gen2(GEN2_TARGET, &[u8::from(*target)])?,
            Param::Gen2TagEncoding(encoding) => self.set_gen2(GEN2_TAG_ENCODING, &[u8::from(*encoding)])?,
            Param::Gen2Q(q) => {
                if let Q::Static { initial_q } = q {
                    if *initial_q > Q::MAX_INITIAL_Q {
                        return Err(Error::Program(format!("Initial Q {} out of range", initial_q)));
                    }
                }
                self.set_gen2(GEN2_Q, &q.to_bytes())?;
            }
            Param::AsyncOnTime(ms) => self.async_on_time = *ms,
            Param::UniqueByData(unique) => {
                let data = vec![0x01, OPTION_UNIQUE_BY_DATA, *unique as u8];
                self.exchange(Command::new(Opcode::SetReaderOptionalParams, data))?;
            }
            Param::ReadPlan(plan) => {
                plan.validate()?;
                self.read_plan = Some(plan.clone());
            }
            Param::UserConfig(op) => self.user_config(*op)?,
            Param::StatsEnable(flags) => self.stats = *flags,
        }
        info!("{}", param);
        Ok(())
    }

    fn user_config(&mut self, op: UserConfigOp) -> Result<()> {
        // all categories, custom configuration
        let mut data = vec![u8::from(op), 0x01, 0x02];
        if op == UserConfigOp::SaveWithReadPlan {
            let plan = self
                .read_plan
                .as_ref()
                .ok_or_else(|| Error::Program("No read plan committed to save".to_string()))?;
            let cmd = plan.read_command(self.async_on_time, self.metadata, self.stats)?;
            data.push(cmd.opcode.into());
            data.extend(cmd.data);
        }
        self.exchange(Command::new(Opcode::SetUserProfile, data))?;
        Ok(())
    }

    pub fn add_read_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&TagReadData) + Send + Sync + 'static,
    {
        lock(&self.listeners).add_read(Arc::new(listener))
    }

    pub fn remove_read_listener(&mut self, id: ListenerId) -> Result<()> {
        lock(&self.listeners).remove_read(id)
    }

    pub fn add_stats_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&ReaderStats) + Send + Sync + 'static,
    {
        lock(&self.listeners).add_stats(Arc::new(listener))
    }

    pub fn remove_stats_listener(&mut self, id: ListenerId) -> Result<()> {
        lock(&self.listeners).remove_stats(id)
    }

    pub fn add_transport_listener<L: TransportListener + 'static>(&mut self, listener: L) -> ListenerId {
        lock(&self.listeners).add_transport(Box::new(listener))
    }

    pub fn remove_transport_listener(&mut self, id: ListenerId) -> Result<()> {
        lock(&self.listeners).remove_transport(id)
    }

    /// Start decoding the autonomous stream on a background thread, passing
    /// tag reads and stats to the registered listeners. Commands fail until
    /// [`Reader::stop_reading`].
    pub fn receive_autonomous_reading(&mut self) -> Result<()> {
        if self.background.is_some() {
            return Err(Error::Program("Already receiving autonomous reads".to_string()));
        }
        let mut port = self
            .port
            .take()
            .ok_or_else(|| Error::Program("Reader has no open transport".to_string()))?;
        if let Err(e) = port.set_timeout(STREAM_POLL) {
            self.port = Some(port);
            return Err(e);
        }
        let bank = self.read_plan.as_ref().and_then(|p| p.tag_op).and_then(|op| op.bank());
        self.background = Some(Background::spawn(port, self.listeners.clone(), self.timeout, bank)?);
        info!("Receiving autonomous reads");
        Ok(())
    }

    /// Whether the background thread is still decoding the stream. It
    /// exits on its own when the port fails.
    pub fn is_reading(&self) -> bool {
        self.background.as_ref().map_or(false, |b| !b.is_finished())
    }

    pub fn stop_reading(&mut self) -> Result<()> {
        if let Some(background) = self.background.take() {
            let mut port = background.join()?;
            port.set_timeout(self.timeout)?;
            self.port = Some(port);
            info!("Stopped receiving autonomous reads");
        }
        Ok(())
    }

    /// Receive one message of the autonomous stream on the calling thread.
    /// `None` if nothing arrived within the port timeout.
    pub fn next_stream_event(&mut self) -> Result<Option<StreamEvent>> {
        let bank = self.read_plan.as_ref().and_then(|p| p.tag_op).and_then(|op| op.bank());
        let timeout = self.timeout;
        let listeners = self.listeners.clone();
        let port = self.port()?;
        receive_event(port, &listeners, timeout, stream::now_millis(), bank)
    }

    pub fn destroy(mut self) -> Result<()> {
        self.stop_reading()
    }
}

impl<T: Transport> Drop for Reader<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_reading() {
            log::warn!("Failed to stop autonomous reading: {}", e);
        }
    }
}

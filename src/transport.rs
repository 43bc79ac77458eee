//! Byte channels to a reader, reader URIs and transport tracing.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::warn;
use serial::core::prelude::*;

use crate::error::{Error, Result};

/// A bidirectional byte channel to a reader.
pub trait Transport: Read + Write + Send + 'static {
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
}

impl Transport for serial::SystemPort {
    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.reconfigure(&|settings| {
            settings.set_baud_rate(serial::BaudRate::from_speed(baud as usize))?;
            settings.set_char_size(serial::Bits8);
            settings.set_parity(serial::ParityNone);
            settings.set_stop_bits(serial::Stop1);
            settings.set_flow_control(serial::FlowNone);
            Ok(())
        })
        .map_err(|e| format!("Failed to configure serial port at {} baud: {}", baud, e))?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        SerialPort::set_timeout(self, timeout)
            .map_err(|e| format!("Failed to set serial port timeout: {}", e))?;
        Ok(())
    }
}

/// Location of a serial reader, parsed from `tmr:///dev/ttyUSB0`,
/// `tmr:///com4`, `eapi:///com4` or a bare `/dev/ttyS0`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReaderUri {
    pub path: String,
}

impl ReaderUri {
    pub fn parse(uri: &str) -> Result<ReaderUri> {
        let rest = if let Some(i) = uri.find("://") {
            let scheme = &uri[..i];
            if scheme != "tmr" && scheme != "eapi" {
                return Err(Error::Unsupported(format!("reader URI scheme {:?}", scheme)));
            }
            let rest = &uri[i + 3..];
            if !rest.starts_with('/') {
                return Err(Error::Unsupported(format!("network reader {:?}", uri)));
            }
            rest
        } else {
            uri
        };
        if !rest.starts_with('/') || rest.len() < 2 {
            return Err(Error::Program(format!("Invalid reader URI {:?}", uri)));
        }
        let name = &rest[1..];
        let is_com = name.len() > 3
            && name[..3].eq_ignore_ascii_case("com")
            && name[3..].chars().all(|c| c.is_ascii_digit());
        let path = if is_com { name.to_uppercase() } else { rest.to_string() };
        Ok(ReaderUri { path })
    }

    pub fn open(&self, baud: u32, timeout: Duration) -> Result<serial::SystemPort> {
        let mut port = serial::open(&self.path)
            .map_err(|e| format!("Unable to connect to serial port {}: {}", self.path, e))?;
        Transport::set_baud_rate(&mut port, baud)?;
        Transport::set_timeout(&mut port, timeout)?;
        Ok(port)
    }
}

/// Observer of raw bytes crossing the transport.
pub trait TransportListener: Send {
    fn on_transport(&mut self, tx: bool, data: &[u8], timeout: Duration);
}

/// Hex dump of each frame, 16 bytes per line.
pub struct SerialPrinter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> SerialPrinter<W> {
    pub fn new(out: W) -> SerialPrinter<W> {
        SerialPrinter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print(&mut self, tx: bool, data: &[u8]) -> io::Result<()> {
        write!(self.out, "{}", if tx { "Sending: " } else { "Received:" })?;
        for (i, b) in data.iter().enumerate() {
            if i > 0 && i % 16 == 0 {
                write!(self.out, "\n         ")?;
            }
            write!(self.out, " {:02x}", b)?;
        }
        writeln!(self.out)
    }
}

impl<W: Write + Send> TransportListener for SerialPrinter<W> {
    fn on_transport(&mut self, tx: bool, data: &[u8], _timeout: Duration) {
        if let Err(e) = self.print(tx, data) {
            warn!("Transport trace failed: {}", e);
        }
    }
}

/// Prints frames as text, for transports that carry strings.
pub struct StringPrinter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> StringPrinter<W> {
    pub fn new(out: W) -> StringPrinter<W> {
        StringPrinter { out }
    }
}

impl<W: Write + Send> TransportListener for StringPrinter<W> {
    fn on_transport(&mut self, tx: bool, data: &[u8], _timeout: Duration) {
        let prefix = if tx { "Sending: " } else { "Received:" };
        if let Err(e) = writeln!(self.out, "{}{}", prefix, String::from_utf8_lossy(data)) {
            warn!("Transport trace failed: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uris() {
        assert_eq!(ReaderUri::parse("tmr:///com4").unwrap().path, "COM4");
        assert_eq!(ReaderUri::parse("eapi:///COM12").unwrap().path, "COM12");
        assert_eq!(ReaderUri::parse("tmr:///dev/ttyUSB0").unwrap().path, "/dev/ttyUSB0");
        assert_eq!(ReaderUri::parse("/dev/ttyS0").unwrap().path, "/dev/ttyS0");
        assert_eq!(ReaderUri::parse("/COM12").unwrap().path, "COM12");
    }

    #[test]
    fn test_rejected_uris() {
        match ReaderUri::parse("tmr://192.168.1.100/") {
            Err(Error::Unsupported(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        match ReaderUri::parse("llrp://reader/") {
            Err(Error::Unsupported(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(ReaderUri::parse("com4").is_err());
        assert!(ReaderUri::parse("tmr:///").is_err());
    }

    #[test]
    fn test_serial_printer() {
        let mut printer = SerialPrinter::new(Vec::new());
        printer.on_transport(true, &[0xFF, 0x00, 0x03, 0x1D, 0x0C], Duration::from_millis(0));
        let data: Vec<u8> = (0..18).collect();
        printer.on_transport(false, &data, Duration::from_millis(0));
        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(
            out,
            "Sending:  ff 00 03 1d 0c\n\
             Received: 00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f\n          10 11\n"
        );
    }

    #[test]
    fn test_string_printer() {
        let mut out = Vec::new();
        StringPrinter::new(&mut out).on_transport(false, b"OK", Duration::from_millis(0));
        assert_eq!(out, b"Received:OK\n");
    }
}

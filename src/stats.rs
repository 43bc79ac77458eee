use bitflags::bitflags;

use crate::error::{Error, Result};

bitflags! {
    /// Reader statistics fields. Only temperature is decoded.
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct StatsFlags: u16 {
        const RF_ON_TIME = 0x0001;
        const NOISE_FLOOR = 0x0002;
        const FREQUENCY = 0x0008;
        const TEMPERATURE = 0x0010;
        const ANTENNA_PORTS = 0x0020;
        const PROTOCOL = 0x0040;
        const CONNECTED_ANTENNAS = 0x0080;
    }
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct ReaderStats {
    /// Fields present in this report
    pub valid: StatsFlags,
    /// Degrees Celsius
    pub temperature: i8,
}

impl ReaderStats {
    /// Decode a stats report: the requested flags followed by one
    /// `[flag, length, value..]` entry per reported field.
    pub fn parse(bytes: &[u8]) -> Result<ReaderStats> {
        if bytes.len() < 2 {
            return Err(Error::Parse("Stats report without flags".to_string()));
        }
        let mut stats = ReaderStats::default();
        let mut pos = 2;
        while pos + 2 <= bytes.len() {
            let key = bytes[pos];
            let len = bytes[pos + 1] as usize;
            let value = bytes
                .get(pos + 2..pos + 2 + len)
                .ok_or_else(|| Error::Parse(format!("Stats entry {:#04x} runs past the report", key)))?;
            if key as u16 == StatsFlags::TEMPERATURE.bits() && len == 1 {
                stats.temperature = value[0] as i8;
                stats.valid |= StatsFlags::TEMPERATURE;
            }
            pos += 2 + len;
        }
        Ok(stats)
    }
}

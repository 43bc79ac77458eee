//! Tags and tag reads.

use std::convert::TryFrom;
use std::fmt;

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};
use crate::gen2::{Bank, Gen2ReadData, LinkFrequency, Target, Q};
use crate::hex::bytes_to_hex;

pub const MAX_EPC_BYTE_COUNT: usize = 62;

#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TagProtocol {
    None = 0x00,
    Iso180006b = 0x03,
    Gen2 = 0x05,
    Iso180006bUcode = 0x06,
    Ipx64 = 0x07,
    Ipx256 = 0x08,
    Ata = 0x1D,
}

impl TagProtocol {
    pub fn name(self) -> &'static str {
        match self {
            TagProtocol::None => "NONE",
            TagProtocol::Iso180006b => "ISO180006B",
            TagProtocol::Gen2 => "GEN2",
            TagProtocol::Iso180006bUcode => "ISO180006B_UCODE",
            TagProtocol::Ipx64 => "IPX64",
            TagProtocol::Ipx256 => "IPX256",
            TagProtocol::Ata => "ATA",
        }
    }

    /// Name for a raw protocol code, `"unknown"` if the code isn't one of ours.
    pub fn name_of(code: u8) -> &'static str {
        TagProtocol::try_from(code).map(TagProtocol::name).unwrap_or("unknown")
    }
}

impl fmt::Display for TagProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Gen2 protocol control bits: 2 bytes, 4 or 6 with extended PC words.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Gen2TagData {
    pub pc: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TagData {
    pub epc: Vec<u8>,
    pub protocol: TagProtocol,
    pub crc: u16,
    pub gen2: Option<Gen2TagData>,
}

impl TagData {
    /// A Gen2 tag with the PC word derived from the EPC length.
    pub fn gen2(epc: &[u8]) -> Result<TagData> {
        if epc.len() > MAX_EPC_BYTE_COUNT || epc.len() % 2 != 0 {
            return Err(Error::Program(format!(
                "Gen2 EPC must be an even number of bytes up to {}, got {}",
                MAX_EPC_BYTE_COUNT,
                epc.len()
            )));
        }
        Ok(TagData {
            epc: epc.to_vec(),
            protocol: TagProtocol::Gen2,
            crc: 0,
            gen2: Some(Gen2TagData {
                pc: vec![((epc.len() / 2) << 3) as u8, 0],
            }),
        })
    }

    pub fn epc_hex(&self) -> String {
        bytes_to_hex(&self.epc)
    }
}

impl fmt::Display for TagData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.epc_hex())
    }
}

bitflags! {
    /// Which optional fields of a tag read are populated.
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct MetadataFlags: u16 {
        const READCOUNT = 0x0001;
        const RSSI = 0x0002;
        const ANTENNAID = 0x0004;
        const FREQUENCY = 0x0008;
        const TIMESTAMP = 0x0010;
        const PHASE = 0x0020;
        const PROTOCOL = 0x0040;
        const DATA = 0x0080;
        const GPIO_STATUS = 0x0100;
        const GEN2_Q = 0x0200;
        const GEN2_LF = 0x0400;
        const GEN2_TARGET = 0x0800;
        const ALL = 0x0FFF;
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct GpioPin {
    pub id: u8,
    pub high: bool,
    pub output: bool,
}

#[derive(Clone, PartialEq, Debug)]
pub struct TagReadData {
    pub tag: TagData,
    pub gen2: Option<Gen2ReadData>,
    pub metadata: MetadataFlags,
    pub phase: u16,
    pub antenna: u8,
    pub gpio: Vec<GpioPin>,
    pub read_count: u32,
    pub rssi: i32,
    /// Carrier frequency in kHz
    pub frequency: u32,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub data: Vec<u8>,
    pub epc_mem_data: Vec<u8>,
    pub tid_mem_data: Vec<u8>,
    pub user_mem_data: Vec<u8>,
    pub reserved_mem_data: Vec<u8>,
    pub is_async_read: bool,
}

impl fmt::Display for TagReadData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}\t antenna:{}\t readCount:{}\t rssi:{}\t frequency:{}",
            self.tag.epc_hex(),
            self.antenna,
            self.read_count,
            self.rssi,
            self.frequency
        )
    }
}

/// Sequential big-endian field reader over a response payload.
struct Fields<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(bytes: &'a [u8]) -> Fields<'a> {
        Fields { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::Parse(format!(
                "Tag record ends at {} bytes, needed {} more at offset {}",
                self.bytes.len(),
                n,
                self.pos
            )));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn uint(&mut self, n: usize) -> Result<u32> {
        Ok(self.take(n)?.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(self.uint(2)? as u16)
    }
}

impl TagReadData {
    pub fn new(tag: TagData) -> TagReadData {
        TagReadData {
            tag,
            gen2: None,
            metadata: MetadataFlags::empty(),
            phase: 0,
            antenna: 0,
            gpio: Vec::new(),
            read_count: 0,
            rssi: 0,
            frequency: 0,
            timestamp: 0,
            data: Vec::new(),
            epc_mem_data: Vec::new(),
            tid_mem_data: Vec::new(),
            user_mem_data: Vec::new(),
            reserved_mem_data: Vec::new(),
            is_async_read: false,
        }
    }

    pub fn timestamp_low(&self) -> u32 {
        (self.timestamp & 0xFFFF_FFFF) as u32
    }

    pub fn timestamp_high(&self) -> u32 {
        (self.timestamp >> 32) as u32
    }

    /// Decode a streamed tag record.
    ///
    /// `base_timestamp` is the host time (ms since epoch) the read offsets are
    /// relative to. `bank` says which memory bank embedded read data came
    /// from, if the read plan carried a read operation.
    pub fn parse(bytes: &[u8], base_timestamp: u64, bank: Option<Bank>) -> Result<TagReadData> {
        let mut f = Fields::new(bytes);
        let metadata = MetadataFlags::from_bits_truncate(f.u16()?);
        let mut read = TagReadData::new(TagData {
            epc: Vec::new(),
            protocol: TagProtocol::Gen2,
            crc: 0,
            gen2: None,
        });
        read.metadata = metadata;
        read.is_async_read = true;
        read.timestamp = base_timestamp;

        if metadata.contains(MetadataFlags::READCOUNT) {
            read.read_count = f.u8()? as u32;
        }
        if metadata.contains(MetadataFlags::RSSI) {
            read.rssi = f.u8()? as i8 as i32;
        }
        if metadata.contains(MetadataFlags::ANTENNAID) {
            read.antenna = f.u8()?;
        }
        if metadata.contains(MetadataFlags::FREQUENCY) {
            read.frequency = f.uint(3)?;
        }
        if metadata.contains(MetadataFlags::TIMESTAMP) {
            read.timestamp = base_timestamp + f.uint(4)? as u64;
        }
        if metadata.contains(MetadataFlags::PHASE) {
            read.phase = f.u16()?;
        }
        if metadata.contains(MetadataFlags::PROTOCOL) {
            let code = f.u8()?;
            read.tag.protocol = TagProtocol::try_from(code)
                .map_err(|_| Error::Parse(format!("Unknown tag protocol {:#04x}", code)))?;
        }
        if metadata.contains(MetadataFlags::DATA) {
            let bits = f.u16()? as usize;
            read.data = f.take((bits + 7) / 8)?.to_vec();
        }
        if metadata.contains(MetadataFlags::GPIO_STATUS) {
            let count = f.u8()?;
            for _ in 0..count {
                let pin = f.take(2)?;
                read.gpio.push(GpioPin {
                    id: pin[0],
                    high: pin[1] & 0x01 != 0,
                    output: pin[1] & 0x02 != 0,
                });
            }
        }
        if metadata.intersects(MetadataFlags::GEN2_Q | MetadataFlags::GEN2_LF | MetadataFlags::GEN2_TARGET) {
            let mut gen2 = Gen2ReadData::default();
            if metadata.contains(MetadataFlags::GEN2_Q) {
                gen2.q = Some(Q::Static { initial_q: f.u8()? });
            }
            if metadata.contains(MetadataFlags::GEN2_LF) {
                gen2.lf = Some(LinkFrequency::from_code(f.u8()?)?);
            }
            if metadata.contains(MetadataFlags::GEN2_TARGET) {
                let code = f.u8()?;
                gen2.target = Some(
                    Target::try_from(code)
                        .map_err(|_| Error::Parse(format!("Unknown Gen2 target {}", code)))?,
                );
            }
            read.gen2 = Some(gen2);
        }

        let epc_bits = f.u16()? as usize;
        let epc_block = f.take(epc_bits / 8)?;
        read.tag = parse_epc_block(epc_block, read.tag.protocol)?;

        match bank {
            Some(Bank::Reserved) => read.reserved_mem_data = read.data.clone(),
            Some(Bank::Epc) => read.epc_mem_data = read.data.clone(),
            Some(Bank::Tid) => read.tid_mem_data = read.data.clone(),
            Some(Bank::User) => read.user_mem_data = read.data.clone(),
            None => {}
        }
        Ok(read)
    }
}

/// Split PC words, EPC and CRC out of the EPC block of a tag record.
fn parse_epc_block(block: &[u8], protocol: TagProtocol) -> Result<TagData> {
    let mut pc_len = 0;
    if protocol == TagProtocol::Gen2 {
        pc_len = 2;
        // XI bit: one extended PC word follows, and XEB in that word adds one more
        if block.len() >= 2 && block[0] & 0x02 != 0 {
            pc_len += 2;
            if block.len() >= 4 && block[2] & 0x80 != 0 {
                pc_len += 2;
            }
        }
    }
    if block.len() < pc_len + 2 {
        return Err(Error::Parse(format!("EPC block of {} bytes is too short", block.len())));
    }
    let epc = &block[pc_len..block.len() - 2];
    if epc.len() > MAX_EPC_BYTE_COUNT {
        return Err(Error::Parse(format!("EPC of {} bytes exceeds {}", epc.len(), MAX_EPC_BYTE_COUNT)));
    }
    let crc_bytes = &block[block.len() - 2..];
    Ok(TagData {
        epc: epc.to_vec(),
        protocol,
        crc: ((crc_bytes[0] as u16) << 8) | crc_bytes[1] as u16,
        gen2: if pc_len > 0 {
            Some(Gen2TagData { pc: block[..pc_len].to_vec() })
        } else {
            None
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPC: [u8; 12] = [0xE2, 0x00, 0x34, 0x12, 0x01, 0x3C, 0xF9, 0x00, 0x0A, 0x5E, 0x2B, 0x71];

    fn epc_block(pc: &[u8]) -> Vec<u8> {
        let mut block = Vec::new();
        let bits = ((pc.len() + EPC.len() + 2) * 8) as u16;
        block.extend_from_slice(&bits.to_be_bytes());
        block.extend_from_slice(pc);
        block.extend_from_slice(&EPC);
        block.extend_from_slice(&[0x9A, 0x3F]);
        block
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(TagProtocol::Gen2.name(), "GEN2");
        assert_eq!(TagProtocol::name_of(0x06), "ISO180006B_UCODE");
        assert_eq!(TagProtocol::name_of(0x42), "unknown");
    }

    #[test]
    fn test_gen2_tag_pc() {
        let tag = TagData::gen2(&EPC).unwrap();
        assert_eq!(tag.gen2.unwrap().pc, vec![0x30, 0x00]);
        assert!(TagData::gen2(&[1, 2, 3]).is_err());
        assert_eq!(TagData::gen2(&EPC).unwrap().to_string(), "GEN2:E2003412013CF9000A5E2B71");
    }

    #[test]
    fn test_parse_epc_only() {
        let mut record = vec![0x00, 0x00];
        record.extend(epc_block(&[0x30, 0x00]));
        let read = TagReadData::parse(&record, 1000, None).unwrap();
        assert_eq!(read.tag.epc, EPC.to_vec());
        assert_eq!(read.tag.crc, 0x9A3F);
        assert_eq!(read.tag.gen2.as_ref().unwrap().pc, vec![0x30, 0x00]);
        assert_eq!(read.timestamp, 1000);
        assert_eq!(read.metadata, MetadataFlags::empty());
        assert!(read.is_async_read);
    }

    #[test]
    fn test_parse_full_metadata() {
        let flags = MetadataFlags::READCOUNT
            | MetadataFlags::RSSI
            | MetadataFlags::ANTENNAID
            | MetadataFlags::FREQUENCY
            | MetadataFlags::TIMESTAMP
            | MetadataFlags::PROTOCOL
            | MetadataFlags::DATA
            | MetadataFlags::GEN2_LF;
        let mut record = flags.bits().to_be_bytes().to_vec();
        record.push(3); // read count
        record.push(0xC4); // rssi -60
        record.push(1); // antenna
        record.extend_from_slice(&[0x0E, 0x1A, 0x68]); // 924264 kHz
        record.extend_from_slice(&[0x00, 0x00, 0x01, 0xF4]); // +500 ms
        record.push(0x05);
        record.extend_from_slice(&[0x00, 0x30]); // 48 bits of data
        record.extend_from_slice(&[0xE2, 0x80, 0x11, 0x60, 0x60, 0x00]);
        record.push(4); // 640 kHz
        record.extend(epc_block(&[0x30, 0x00]));

        let base = 0x1_0000_0000u64;
        let read = TagReadData::parse(&record, base, Some(Bank::Tid)).unwrap();
        assert_eq!(read.read_count, 3);
        assert_eq!(read.rssi, -60);
        assert_eq!(read.antenna, 1);
        assert_eq!(read.frequency, 924_264);
        assert_eq!(read.timestamp, base + 500);
        assert_eq!(read.timestamp_high(), 1);
        assert_eq!(read.timestamp_low(), 500);
        assert_eq!(read.tag.protocol, TagProtocol::Gen2);
        assert_eq!(read.data, vec![0xE2, 0x80, 0x11, 0x60, 0x60, 0x00]);
        assert_eq!(read.tid_mem_data, read.data);
        assert!(read.user_mem_data.is_empty());
        assert_eq!(read.gen2.as_ref().unwrap().lf, Some(LinkFrequency::Khz640));
        assert_eq!(read.tag.epc_hex(), "E2003412013CF9000A5E2B71");
        assert_eq!(
            read.to_string(),
            "E2003412013CF9000A5E2B71\t antenna:1\t readCount:3\t rssi:-60\t frequency:924264"
        );
    }

    #[test]
    fn test_parse_extended_pc() {
        let mut record = vec![0x00, 0x00];
        record.extend(epc_block(&[0x32, 0x00, 0x80, 0x00, 0x00, 0x01]));
        let read = TagReadData::parse(&record, 0, None).unwrap();
        assert_eq!(read.tag.gen2.unwrap().pc.len(), 6);
        assert_eq!(read.tag.epc, EPC.to_vec());
    }

    #[test]
    fn test_parse_gpio() {
        let mut record = MetadataFlags::GPIO_STATUS.bits().to_be_bytes().to_vec();
        record.extend_from_slice(&[2, 1, 0x01, 2, 0x02]);
        record.extend(epc_block(&[0x30, 0x00]));
        let read = TagReadData::parse(&record, 0, None).unwrap();
        assert_eq!(
            read.gpio,
            vec![
                GpioPin { id: 1, high: true, output: false },
                GpioPin { id: 2, high: false, output: true },
            ]
        );
    }

    #[test]
    fn test_parse_truncated() {
        let record = [0x00, 0x01];
        match TagReadData::parse(&record, 0, None) {
            Err(Error::Parse(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}

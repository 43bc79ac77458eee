use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::gen2::Bank;
use crate::protocol::{encode, Command, Opcode};
use crate::stats::StatsFlags;
use crate::tag::{MetadataFlags, TagProtocol};

pub const MAX_ANTENNA: u8 = 64;

bitflags! {
    /// Search flags of a multi-tag read command, echoed in streamed responses.
    #[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
    pub struct SearchFlags: u16 {
        const ANTENNA_LIST = 0x0001;
        const TAG_STREAMING = 0x0004;
        const STATS_REPORT = 0x0100;
        const AUTONOMOUS = 0x1000;
    }
}

const OPTION_EMBEDDED: u8 = 0x04;
const OPTION_METADATA: u8 = 0x10;

/// Operation run against every tag found by a read plan.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TagOp {
    Gen2ReadData { bank: Bank, word_address: u32, len: u8 },
}

impl TagOp {
    pub fn bank(&self) -> Option<Bank> {
        match self {
            TagOp::Gen2ReadData { bank, .. } => Some(*bank),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            TagOp::Gen2ReadData { bank, word_address, len } => {
                let mut bytes: Vec<u8> = vec![Opcode::ReadTagData.into()];
                // timeout, option, bank, address, word count
                bytes.extend(encode(&(0u16, 0u8, u8::from(*bank), *word_address, *len))?);
                Ok(bytes)
            }
        }
    }
}

#[derive(Serialize)]
struct ReadHeader {
    option: u8,
    search_flags: u16,
    timeout: u16,
    metadata: u16,
}

/// A search on a fixed set of antennas with one protocol.
#[derive(Clone, PartialEq, Debug)]
pub struct SimpleReadPlan {
    pub antennas: Vec<u8>,
    pub protocol: TagProtocol,
    /// Relative share of search time within a multi-plan
    pub weight: u32,
    pub tag_op: Option<TagOp>,
    pub enable_autonomous_read: bool,
}

impl SimpleReadPlan {
    pub fn new(antennas: &[u8], protocol: TagProtocol, weight: u32) -> SimpleReadPlan {
        SimpleReadPlan {
            antennas: antennas.to_vec(),
            protocol,
            weight,
            tag_op: None,
            enable_autonomous_read: false,
        }
    }

    pub fn set_tag_op(&mut self, op: TagOp) {
        self.tag_op = Some(op);
    }

    pub fn set_enable_autonomous_read(&mut self, enable: bool) {
        self.enable_autonomous_read = enable;
    }

    pub fn validate(&self) -> Result<()> {
        if self.antennas.is_empty() {
            return Err(Error::Program("Read plan has no antennas".to_string()));
        }
        for (i, a) in self.antennas.iter().enumerate() {
            if *a == 0 || *a > MAX_ANTENNA {
                return Err(Error::Program(format!("Invalid antenna {} in read plan", a)));
            }
            if self.antennas[..i].contains(a) {
                return Err(Error::Program(format!("Antenna {} listed twice in read plan", a)));
            }
        }
        if self.protocol == TagProtocol::None {
            return Err(Error::Program("Read plan has no tag protocol".to_string()));
        }
        if let Some(TagOp::Gen2ReadData { len, .. }) = self.tag_op {
            if self.protocol != TagProtocol::Gen2 {
                return Err(Error::Program("Gen2 tag operation in a non-Gen2 read plan".to_string()));
            }
            if len == 0 {
                return Err(Error::Program("Gen2 read of zero words".to_string()));
            }
        }
        Ok(())
    }

    pub fn search_flags(&self, stats: StatsFlags) -> SearchFlags {
        let mut flags = SearchFlags::ANTENNA_LIST | SearchFlags::TAG_STREAMING;
        if self.enable_autonomous_read {
            flags |= SearchFlags::AUTONOMOUS;
        }
        if !stats.is_empty() {
            flags |= SearchFlags::STATS_REPORT;
        }
        flags
    }

    /// The streaming read command this plan runs as.
    ///
    /// Layout: header, stats flags if requested, antenna count and tx/rx
    /// pairs, protocol, then the embedded operation if any.
    pub fn read_command(&self, on_time_ms: u32, metadata: MetadataFlags, stats: StatsFlags) -> Result<Command> {
        self.validate()?;
        let mut option = OPTION_METADATA;
        if self.tag_op.is_some() {
            option |= OPTION_EMBEDDED;
        }
        let header = ReadHeader {
            option,
            search_flags: self.search_flags(stats).bits(),
            timeout: on_time_ms.min(u16::MAX as u32) as u16,
            metadata: metadata.bits(),
        };
        let mut data = encode(&header)?;
        if !stats.is_empty() {
            data.extend(encode(&stats.bits())?);
        }
        data.push(self.antennas.len() as u8);
        for a in &self.antennas {
            data.push(*a);
            data.push(*a);
        }
        data.push(self.protocol.into());
        if let Some(op) = &self.tag_op {
            let op = op.to_bytes()?;
            data.push(1);
            data.push(op.len() as u8);
            data.extend(op);
        }
        Ok(Command::new(Opcode::ReadTagIdMultiple, data))
    }
}

impl fmt::Display for SimpleReadPlan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SimpleReadPlan:[Ant:{:?},{},weight={}", self.antennas, self.protocol, self.weight)?;
        if let Some(op) = &self.tag_op {
            write!(f, ",{:?}", op)?;
        }
        if self.enable_autonomous_read {
            write!(f, ",autonomous")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid_plan() -> SimpleReadPlan {
        let mut plan = SimpleReadPlan::new(&[1], TagProtocol::Gen2, 1000);
        plan.set_tag_op(TagOp::Gen2ReadData { bank: Bank::Tid, word_address: 3, len: 3 });
        plan.set_enable_autonomous_read(true);
        plan
    }

    #[test]
    fn test_validate() {
        assert!(tid_plan().validate().is_ok());
        assert!(SimpleReadPlan::new(&[], TagProtocol::Gen2, 1000).validate().is_err());
        assert!(SimpleReadPlan::new(&[0], TagProtocol::Gen2, 1000).validate().is_err());
        assert!(SimpleReadPlan::new(&[1, 1], TagProtocol::Gen2, 1000).validate().is_err());
        assert!(SimpleReadPlan::new(&[1], TagProtocol::None, 1000).validate().is_err());
        let mut plan = SimpleReadPlan::new(&[1], TagProtocol::Iso180006b, 1000);
        plan.set_tag_op(TagOp::Gen2ReadData { bank: Bank::Tid, word_address: 0, len: 1 });
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_autonomous_read_command() {
        let metadata = MetadataFlags::READCOUNT | MetadataFlags::RSSI | MetadataFlags::DATA;
        let cmd = tid_plan().read_command(1000, metadata, StatsFlags::empty()).unwrap();
        assert_eq!(cmd.opcode, Opcode::ReadTagIdMultiple);
        assert_eq!(
            cmd.data,
            vec![
                0x14, // metadata + embedded
                0x10, 0x05, // autonomous | streaming | antenna list
                0x03, 0xE8, // 1000 ms
                0x00, 0x83, // metadata
                0x01, 0x01, 0x01, // one antenna, tx 1 rx 1
                0x05, // Gen2
                0x01, 0x0A, // one op of 10 bytes
                0x28, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x03,
            ]
        );
    }

    #[test]
    fn test_stats_in_read_command() {
        let plan = SimpleReadPlan::new(&[1, 2], TagProtocol::Gen2, 1000);
        let cmd = plan
            .read_command(70_000, MetadataFlags::empty(), StatsFlags::TEMPERATURE)
            .unwrap();
        assert_eq!(
            cmd.data,
            vec![0x10, 0x01, 0x05, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x10, 0x02, 1, 1, 2, 2, 0x05]
        );
    }
}

//! Reader parameters and user configuration operations.

use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::gen2::{LinkFrequency, Session, TagEncoding, Target, Q};
use crate::read_plan::SimpleReadPlan;
use crate::stats::StatsFlags;

/// Baud rates the reader's serial port can be switched to.
pub const BAUD_RATES: [u32; 8] = [9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// Regulatory region, which sets the hop table and power limits.
#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Region {
    Na = 0x01,
    Eu = 0x02,
    Kr = 0x03,
    In = 0x04,
    Jp = 0x05,
    Prc = 0x06,
    Eu2 = 0x07,
    Eu3 = 0x08,
    Kr2 = 0x09,
    Prc2 = 0x0A,
    Au = 0x0B,
    Nz = 0x0C,
    Na2 = 0x0D,
    Na3 = 0x0E,
    Open = 0xFF,
}

const REGION_NAMES: [(Region, &str); 15] = [
    (Region::Na, "NA"),
    (Region::Eu, "EU"),
    (Region::Kr, "KR"),
    (Region::In, "IN"),
    (Region::Jp, "JP"),
    (Region::Prc, "PRC"),
    (Region::Eu2, "EU2"),
    (Region::Eu3, "EU3"),
    (Region::Kr2, "KR2"),
    (Region::Prc2, "PRC2"),
    (Region::Au, "AU"),
    (Region::Nz, "NZ"),
    (Region::Na2, "NA2"),
    (Region::Na3, "NA3"),
    (Region::Open, "OPEN"),
];

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = REGION_NAMES
            .iter()
            .find(|(r, _)| r == self)
            .map(|(_, n)| *n)
            .unwrap_or("UNKNOWN");
        f.write_str(name)
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Region, String> {
        REGION_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(s))
            .map(|(r, _)| *r)
            .ok_or_else(|| format!("unknown region {:?}", s))
    }
}

/// Operations on the configuration the reader keeps in flash.
#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive)]
#[repr(u8)]
pub enum UserConfigOp {
    Save = 0x01,
    Restore = 0x02,
    Verify = 0x03,
    Clear = 0x04,
    /// Save, and store the committed read plan so the reader runs it by itself
    SaveWithReadPlan = 0x06,
}

impl fmt::Display for UserConfigOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            UserConfigOp::Save => "save all configuration params",
            UserConfigOp::Restore => "restore all saved configuration params",
            UserConfigOp::Verify => "verify all saved configuration params",
            UserConfigOp::Clear => "reset all configuration parameters",
            UserConfigOp::SaveWithReadPlan => "save read plan configuration",
        })
    }
}

/// A settable reader parameter with its value.
#[derive(Clone, PartialEq, Debug)]
pub enum Param {
    Region(Region),
    BaudRate(u32),
    /// Read power in centi-dBm
    ReadPower(u16),
    Gen2LinkFrequency(LinkFrequency),
    Gen2Session(Session),
    Gen2Target(Target),
    Gen2TagEncoding(TagEncoding),
    Gen2Q(Q),
    /// Milliseconds the reader spends searching per read cycle
    AsyncOnTime(u32),
    UniqueByData(bool),
    ReadPlan(SimpleReadPlan),
    UserConfig(UserConfigOp),
    StatsEnable(StatsFlags),
}

impl Param {
    /// Short name of the parameter, for error context.
    pub fn name(&self) -> &'static str {
        match self {
            Param::Region(_) => "region",
            Param::BaudRate(_) => "baud rate",
            Param::ReadPower(_) => "read power",
            Param::Gen2LinkFrequency(_) => "Gen2 BLF",
            Param::Gen2Session(_) => "Gen2 session",
            Param::Gen2Target(_) => "Gen2 target",
            Param::Gen2TagEncoding(_) => "Gen2 tag encoding",
            Param::Gen2Q(_) => "Gen2 Q",
            Param::AsyncOnTime(_) => "async on time",
            Param::UniqueByData(_) => "unique by data",
            Param::ReadPlan(_) => "read plan",
            Param::UserConfig(_) => "user configuration",
            Param::StatsEnable(_) => "reader stats",
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Param::Region(r) => write!(f, "region set to {}", r),
            Param::BaudRate(b) => write!(f, "baudrate set to {}", b),
            Param::ReadPower(p) => write!(f, "readpower set to {}", p),
            Param::Gen2LinkFrequency(lf) => write!(f, "Gen2 BLF set to {}", lf),
            Param::Gen2Session(s) => write!(f, "Gen2 Session set to {}", s),
            Param::Gen2Target(t) => write!(f, "Gen2 Target set to {}", t),
            Param::Gen2TagEncoding(e) => write!(f, "Gen2 TagEncoding set to {}", e),
            Param::Gen2Q(q) => write!(f, "Gen2 Q set to {}", q),
            Param::AsyncOnTime(ms) => write!(f, "AsyncOnTime set to {}ms", ms),
            Param::UniqueByData(u) => write!(f, "UniqueByData set to {}", u),
            Param::ReadPlan(plan) => write!(f, "read plan set to {}", plan),
            Param::UserConfig(op) => write!(f, "User config set option:{}", op),
            Param::StatsEnable(flags) => write!(f, "reader stats set to {:?}", flags),
        }
    }
}

//! Gen2 (EPC Class 1 Generation 2) air-interface parameters.

use std::fmt;
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::Error;

/// Backscatter link frequency.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LinkFrequency {
    Khz250,
    Khz320,
    Khz640,
}

impl LinkFrequency {
    pub fn khz(self) -> u32 {
        match self {
            LinkFrequency::Khz250 => 250,
            LinkFrequency::Khz320 => 320,
            LinkFrequency::Khz640 => 640,
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            LinkFrequency::Khz250 => 0,
            LinkFrequency::Khz320 => 2,
            LinkFrequency::Khz640 => 4,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<LinkFrequency, Error> {
        match code {
            0 => Ok(LinkFrequency::Khz250),
            2 => Ok(LinkFrequency::Khz320),
            4 => Ok(LinkFrequency::Khz640),
            _ => Err(Error::Parse(format!("Invalid Gen2 link frequency code {}", code))),
        }
    }
}

impl fmt::Display for LinkFrequency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}KHz", self.khz())
    }
}

impl FromStr for LinkFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<LinkFrequency, String> {
        match s.trim_end_matches(|c| c == 'k' || c == 'K' || c == 'h' || c == 'H' || c == 'z') {
            "250" => Ok(LinkFrequency::Khz250),
            "320" => Ok(LinkFrequency::Khz320),
            "640" => Ok(LinkFrequency::Khz640),
            _ => Err(format!("unknown link frequency {:?} (250, 320 or 640)", s)),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Session {
    S0 = 0,
    S1 = 1,
    S2 = 2,
    S3 = 3,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "S{}", u8::from(*self))
    }
}

impl FromStr for Session {
    type Err = String;

    fn from_str(s: &str) -> Result<Session, String> {
        match s.to_uppercase().as_str() {
            "S0" | "0" => Ok(Session::S0),
            "S1" | "1" => Ok(Session::S1),
            "S2" | "2" => Ok(Session::S2),
            "S3" | "3" => Ok(Session::S3),
            _ => Err(format!("unknown session {:?} (S0..S3)", s)),
        }
    }
}

/// Inventory target. Discriminants are the air-protocol codes.
#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Target {
    /// Search target A until exhausted, then search target B
    AB = 0,
    /// Search target B until exhausted, then search target A
    BA = 1,
    A = 2,
    B = 3,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Target, String> {
        match s.to_uppercase().as_str() {
            "A" => Ok(Target::A),
            "B" => Ok(Target::B),
            "AB" => Ok(Target::AB),
            "BA" => Ok(Target::BA),
            _ => Err(format!("unknown target {:?} (A, B, AB or BA)", s)),
        }
    }
}

/// Tag-to-reader encoding: FM0 or Miller with M subcarrier cycles.
#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TagEncoding {
    Fm0 = 0,
    M2 = 1,
    M4 = 2,
    M8 = 3,
}

impl fmt::Display for TagEncoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            TagEncoding::Fm0 => "FM0",
            TagEncoding::M2 => "M2",
            TagEncoding::M4 => "M4",
            TagEncoding::M8 => "M8",
        })
    }
}

impl FromStr for TagEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<TagEncoding, String> {
        match s.to_uppercase().as_str() {
            "FM0" => Ok(TagEncoding::Fm0),
            "M2" => Ok(TagEncoding::M2),
            "M4" => Ok(TagEncoding::M4),
            "M8" => Ok(TagEncoding::M8),
            _ => Err(format!("unknown tag encoding {:?} (FM0, M2, M4 or M8)", s)),
        }
    }
}

/// Anti-collision slot-count algorithm.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Q {
    Dynamic,
    Static { initial_q: u8 },
}

impl Q {
    pub const MAX_INITIAL_Q: u8 = 15;

    pub(crate) fn to_bytes(self) -> Vec<u8> {
        match self {
            Q::Dynamic => vec![0x00],
            Q::Static { initial_q } => vec![0x01, initial_q],
        }
    }
}

impl fmt::Display for Q {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Q::Dynamic => f.write_str("DynamicQ"),
            Q::Static { initial_q } => write!(f, "{}", initial_q),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Bank {
    Reserved = 0,
    Epc = 1,
    Tid = 2,
    User = 3,
}

impl FromStr for Bank {
    type Err = String;

    fn from_str(s: &str) -> Result<Bank, String> {
        match s.to_uppercase().as_str() {
            "RESERVED" => Ok(Bank::Reserved),
            "EPC" => Ok(Bank::Epc),
            "TID" => Ok(Bank::Tid),
            "USER" => Ok(Bank::User),
            _ => Err(format!("unknown memory bank {:?}", s)),
        }
    }
}

/// Gen2 parameters the reader reports alongside a tag read.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Gen2ReadData {
    pub q: Option<Q>,
    pub lf: Option<LinkFrequency>,
    pub target: Option<Target>,
}

use std::io::Read;

use bincode::Options;
use crc16::{State, AUG_CCITT};
use log::warn;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ResponseStatus};

pub const START_BYTE: u8 = 0xFF;

/// Largest data section a single frame can carry.
pub const MAX_DATA_LEN: usize = 250;

#[derive(Copy, Clone, PartialEq, Eq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    GetVersion = 0x03,
    BootFirmware = 0x04,
    SetBaudRate = 0x06,
    GetCurrentProgram = 0x0C,
    ReadTagIdMultiple = 0x22,
    ReadTagData = 0x28,
    GetTemperature = 0x72,
    SetReadTxPower = 0x92,
    SetTagProtocol = 0x93,
    SetRegion = 0x97,
    SetReaderOptionalParams = 0x9A,
    SetProtocolParam = 0x9B,
    SetUserProfile = 0x9D,
}

#[derive(PartialEq, Debug)]
pub struct Command {
    pub opcode: Opcode,
    pub data: Vec<u8>,
}

impl Command {
    pub fn new(opcode: Opcode, data: Vec<u8>) -> Command {
        Command { opcode, data }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.data.len() > MAX_DATA_LEN {
            return Err(Error::Program(format!(
                "Command {:?} carries {} bytes, at most {} fit in a frame",
                self.opcode,
                self.data.len(),
                MAX_DATA_LEN
            )));
        }
        let mut pkt: Vec<u8> = Vec::with_capacity(self.data.len() + 5);
        pkt.push(START_BYTE);
        pkt.push(self.data.len() as u8);
        pkt.push(self.opcode.into());
        pkt.extend_from_slice(&self.data);
        let crc = crc(&pkt[1..]);
        pkt.push((crc >> 8) as u8);
        pkt.push((crc & 0xFF) as u8);
        Ok(pkt)
    }
}

#[derive(PartialEq, Debug)]
pub struct Response {
    pub opcode: u8,
    pub status: u16,
    pub data: Vec<u8>,
}

impl Response {
    pub fn from_bytes(bytes: &[u8]) -> Result<Response> {
        if bytes.len() < 7 || bytes[0] != START_BYTE {
            return Err(Error::Parse(format!("Truncated frame: {:02X?}", bytes)));
        }
        let len = bytes[1] as usize;
        if bytes.len() != len + 7 {
            return Err(Error::Parse(format!(
                "Frame length byte {} does not match {} received bytes",
                len,
                bytes.len()
            )));
        }
        let body = &bytes[1..bytes.len() - 2];
        let expected = ((bytes[bytes.len() - 2] as u16) << 8) | bytes[bytes.len() - 1] as u16;
        let actual = crc(body);
        if expected != actual {
            return Err(Error::Parse(format!(
                "CRC mismatch: frame says {:04X}, computed {:04X}",
                expected, actual
            )));
        }
        Ok(Response {
            opcode: bytes[2],
            status: ((bytes[3] as u16) << 8) | bytes[4] as u16,
            data: bytes[5..5 + len].to_vec(),
        })
    }

    pub fn status(&self) -> ResponseStatus {
        ResponseStatus::from(self.status)
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Frame checksum over length, opcode and data.
///
/// Readers clock the CCITT polynomial through a shift register seeded with
/// 0xFFFF and never flush the final 16 bits. That equals AUG-CCITT over all
/// but the last two bytes with those two bytes XORed into the result.
/// Every frame body holds at least the length and opcode bytes.
pub fn crc(data: &[u8]) -> u16 {
    let (head, tail) = data.split_at(data.len().saturating_sub(2));
    let folded = tail.iter().fold(0u16, |acc, b| (acc << 8) | *b as u16);
    State::<AUG_CCITT>::calculate(head) ^ folded
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Big-endian, fixed-width encoding of a command payload.
pub fn encode<S: Serialize>(value: &S) -> Result<Vec<u8>> {
    codec()
        .serialize(value)
        .map_err(|e| Error::Program(format!("Failed to encode payload: {}", e)))
}

/// Big-endian, fixed-width decoding of a response payload prefix.
pub fn decode<'a, D: Deserialize<'a>>(bytes: &'a [u8]) -> Result<D> {
    codec()
        .allow_trailing_bytes()
        .deserialize(bytes)
        .map_err(|e| Error::Parse(format!("Failed to decode payload: {}", e)))
}

/// Read one response frame, discarding anything before the start byte.
pub fn read_frame<R: Read>(port: &mut R) -> Result<Vec<u8>> {
    let mut byte = [0u8; 1];
    let mut skipped = 0usize;
    loop {
        port.read_exact(&mut byte)?;
        if byte[0] == START_BYTE {
            break;
        }
        skipped += 1;
    }
    if skipped > 0 {
        warn!("Discarded {} bytes before frame start", skipped);
    }
    let mut len = [0u8; 1];
    port.read_exact(&mut len)?;
    // opcode + status + data + crc
    let mut rest = vec![0u8; len[0] as usize + 5];
    port.read_exact(&mut rest)?;

    let mut frame = Vec::with_capacity(rest.len() + 2);
    frame.push(START_BYTE);
    frame.push(len[0]);
    frame.extend_from_slice(&rest);
    Ok(frame)
}

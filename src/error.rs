use std::fmt;
use std::io;

use failure::Fail;
use num_enum::FromPrimitive;

use crate::hex::HexError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] io::Error),
    #[fail(display = "communication error: {}", _0)]
    Communication(ResponseStatus),
    #[fail(display = "reader reported: {}", _0)]
    Protocol(ResponseStatus),
    #[fail(display = "{}", _0)]
    Program(String),
    #[fail(display = "malformed response: {}", _0)]
    Parse(String),
    #[fail(display = "{}", _0)]
    Hex(#[cause] HexError),
    #[fail(display = "unsupported: {}", _0)]
    Unsupported(String),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<String> for Error {
    fn from(e: String) -> Error {
        Error::Program(e)
    }
}

impl From<HexError> for Error {
    fn from(e: HexError) -> Error {
        Error::Hex(e)
    }
}

impl From<ResponseStatus> for Error {
    fn from(e: ResponseStatus) -> Error {
        match e {
            ResponseStatus::NoTagsFound
            | ResponseStatus::ProtocolNoDataRead
            | ResponseStatus::GeneralTagError
            | ResponseStatus::ProtocolBitDecodingFailed
            | ResponseStatus::ChannelOccupied
            | ResponseStatus::AntennaNotConnected
            | ResponseStatus::TemperatureExceedLimits
            | ResponseStatus::HighReturnLoss => Error::Communication(e),

            ResponseStatus::WrongNumberOfData => Error::Program("Wrong command length".to_string()),
            ResponseStatus::InvalidOpcode => Error::Program("Illegal command".to_string()),
            ResponseStatus::InvalidParameterValue => Error::Program("Parameter error".to_string()),

            other => Error::Protocol(other),
        }
    }
}

/// Status word carried by every reader response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum ResponseStatus {
    Success = 0x0000,

    WrongNumberOfData = 0x0100,
    InvalidOpcode = 0x0101,
    UnimplementedOpcode = 0x0102,
    PowerTooHigh = 0x0103,
    InvalidFrequency = 0x0104,
    InvalidParameterValue = 0x0105,
    PowerTooLow = 0x0106,
    UnimplementedFeature = 0x0109,
    InvalidBaudRate = 0x010A,
    InvalidRegion = 0x010B,

    InvalidImageCrc = 0x0200,
    InvalidAppEndAddress = 0x0201,

    FlashBadErasePassword = 0x0300,
    FlashBadWritePassword = 0x0301,
    FlashUndefinedError = 0x0302,

    NoTagsFound = 0x0400,
    NoProtocolDefined = 0x0401,
    InvalidProtocolSpecified = 0x0402,
    WritePassedLockFailed = 0x0403,
    ProtocolNoDataRead = 0x0404,
    AfeNotOn = 0x0405,
    ProtocolWriteFailed = 0x0406,
    NotImplementedForProtocol = 0x0407,
    ProtocolInvalidWriteData = 0x0408,
    ProtocolInvalidAddress = 0x0409,
    GeneralTagError = 0x040A,
    DataTooLarge = 0x040B,
    ProtocolBitDecodingFailed = 0x040F,
    ProtocolInvalidEpc = 0x0410,

    InvalidFrequencyRange = 0x0500,
    ChannelOccupied = 0x0501,
    TransmitterOn = 0x0502,
    AntennaNotConnected = 0x0503,
    TemperatureExceedLimits = 0x0504,
    HighReturnLoss = 0x0505,
    InvalidAntennaConfig = 0x0507,

    TagIdBufferNotEnoughTags = 0x0600,
    TagIdBufferFull = 0x0601,

    SystemUnknownError = 0x7F00,
    AssertFailed = 0x7F01,

    #[num_enum(default)]
    Unknown = 0xFFFF,
}

impl ResponseStatus {
    pub fn is_success(self) -> bool {
        self == ResponseStatus::Success
    }

    /// Human-readable text for a status, in the wording readers document.
    pub fn description(self) -> &'static str {
        use self::ResponseStatus::*;
        match self {
            Success => "Success",
            WrongNumberOfData => "Invalid number of arguments",
            InvalidOpcode => "Unrecognized opcode",
            UnimplementedOpcode => "Unimplemented opcode",
            PowerTooHigh => "Power too high",
            InvalidFrequency => "Invalid frequency",
            InvalidParameterValue => "Invalid parameter value",
            PowerTooLow => "Power too low",
            UnimplementedFeature => "Unimplemented feature",
            InvalidBaudRate => "Invalid baud rate",
            InvalidRegion => "Invalid region",
            InvalidImageCrc => "Application image failed CRC check",
            InvalidAppEndAddress => "Application image has invalid end address",
            FlashBadErasePassword => "Incorrect flash erase password",
            FlashBadWritePassword => "Incorrect flash write password",
            FlashUndefinedError => "Internal flash error",
            NoTagsFound => "No tags found",
            NoProtocolDefined => "No protocol defined",
            InvalidProtocolSpecified => "Invalid protocol specified",
            WritePassedLockFailed => "Write succeeded but lock failed",
            ProtocolNoDataRead => "No data read from tag",
            AfeNotOn => "RF front end is not powered",
            ProtocolWriteFailed => "Tag write failed",
            NotImplementedForProtocol => "Command not implemented for this protocol",
            ProtocolInvalidWriteData => "Invalid write data",
            ProtocolInvalidAddress => "Invalid tag memory address",
            GeneralTagError => "General tag error",
            DataTooLarge => "Data too large",
            ProtocolBitDecodingFailed => "Bit decoding failed",
            ProtocolInvalidEpc => "Invalid EPC",
            InvalidFrequencyRange => "Frequency out of range",
            ChannelOccupied => "Channel occupied",
            TransmitterOn => "Transmitter already on",
            AntennaNotConnected => "Antenna not connected",
            TemperatureExceedLimits => "Temperature exceeds limits",
            HighReturnLoss => "High return loss detected",
            InvalidAntennaConfig => "Invalid antenna configuration",
            TagIdBufferNotEnoughTags => "Not enough tags in tag buffer",
            TagIdBufferFull => "Tag buffer full",
            SystemUnknownError => "Unknown system error",
            AssertFailed => "Firmware assertion failed",
            Unknown => "Unknown status",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_code() {
        assert_eq!(ResponseStatus::from(0x0000u16), ResponseStatus::Success);
        assert_eq!(ResponseStatus::from(0x0105u16), ResponseStatus::InvalidParameterValue);
        assert_eq!(ResponseStatus::from(0x1234u16), ResponseStatus::Unknown);
    }

    #[test]
    fn test_status_classification() {
        match Error::from(ResponseStatus::NoTagsFound) {
            Error::Communication(ResponseStatus::NoTagsFound) => {}
            other => panic!("unexpected {:?}", other),
        }
        match Error::from(ResponseStatus::InvalidOpcode) {
            Error::Program(msg) => assert_eq!(msg, "Illegal command"),
            other => panic!("unexpected {:?}", other),
        }
        match Error::from(ResponseStatus::InvalidRegion) {
            Error::Protocol(ResponseStatus::InvalidRegion) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let e = Error::from(ResponseStatus::InvalidBaudRate);
        assert_eq!(e.to_string(), "reader reported: Invalid baud rate");
    }
}

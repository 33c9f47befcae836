use scursor::ReadCursor;

use crate::common::bits::unpack_bits;
use crate::common::function::{FunctionCode, ERROR_DELIMITER};
use crate::common::traits::Parse;
use crate::decode::PduDecodeLevel;
use crate::error::AduParseError;
use crate::exception::ExceptionCode;
use crate::types::{coil_from_u16, AddressRange, Indexed};

/// Typed payload of a successful response
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseData {
    /// Coil or discrete input values, every bit of every byte in the payload
    Bits(Vec<bool>),
    /// Holding or input register values
    Registers(Vec<u16>),
    /// Echo of a single coil write
    SingleCoil(Indexed<bool>),
    /// Echo of a single register write
    SingleRegister(Indexed<u16>),
    /// Echo of the start and quantity of a multiple write
    WriteMultiple(AddressRange),
}

/// A successfully decoded response PDU
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// function code of the response
    pub function: FunctionCode,
    /// payload interpreted according to the function code
    pub data: ResponseData,
}

/// A device explicitly rejected a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolException {
    /// function code of the rejected request
    pub function: FunctionCode,
    /// reason given by the device
    pub exception: ExceptionCode,
}

impl ProtocolException {
    /// Function code as it appears on the wire, i.e. with the high bit set
    pub fn exception_function_code(&self) -> u8 {
        self.function.as_error()
    }
}

/// Outcome of decoding a response PDU
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// a normal response
    Response(Response),
    /// an exception response
    Exception(ProtocolException),
}

/// Decode a response PDU
pub fn decode(pdu: &[u8]) -> Result<Decoded, AduParseError> {
    let mut cursor = ReadCursor::new(pdu);
    let raw = cursor.read_u8()?;

    if raw & ERROR_DELIMITER != 0 {
        let original = raw & !ERROR_DELIMITER;
        let function =
            FunctionCode::get(original).ok_or(AduParseError::UnknownFunctionCode(raw))?;
        let exception = ExceptionCode::from(cursor.read_u8()?);
        expect_empty(&cursor)?;
        return Ok(Decoded::Exception(ProtocolException {
            function,
            exception,
        }));
    }

    let function = FunctionCode::get(raw).ok_or(AduParseError::UnknownFunctionCode(raw))?;
    let data = match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            ResponseData::Bits(unpack_bits(read_byte_count_payload(&mut cursor)?))
        }
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            ResponseData::Registers(parse_registers(read_byte_count_payload(&mut cursor)?)?)
        }
        FunctionCode::WriteSingleCoil => ResponseData::SingleCoil(Indexed::<bool>::parse(&mut cursor)?),
        FunctionCode::WriteSingleRegister => {
            ResponseData::SingleRegister(Indexed::<u16>::parse(&mut cursor)?)
        }
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
            ResponseData::WriteMultiple(AddressRange::parse(&mut cursor)?)
        }
    };
    expect_empty(&cursor)?;

    Ok(Decoded::Response(Response { function, data }))
}

fn expect_empty(cursor: &ReadCursor) -> Result<(), AduParseError> {
    match cursor.remaining() {
        0 => Ok(()),
        x => Err(AduParseError::TrailingBytes(x)),
    }
}

fn read_byte_count_payload<'a>(cursor: &mut ReadCursor<'a>) -> Result<&'a [u8], AduParseError> {
    let count = usize::from(cursor.read_u8()?);
    let remaining = cursor.remaining();
    if count > remaining {
        return Err(AduParseError::InsufficientBytesForByteCount(count, remaining));
    }
    Ok(cursor.read_bytes(count)?)
}

fn parse_registers(bytes: &[u8]) -> Result<Vec<u16>, AduParseError> {
    if bytes.len() % 2 != 0 {
        return Err(AduParseError::OddRegisterByteCount(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

impl Parse for AddressRange {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, AduParseError> {
        // the echo is compared to the request, so no range validation here
        Ok(AddressRange {
            start: cursor.read_u16_be()?,
            count: cursor.read_u16_be()?,
        })
    }
}

impl Parse for Indexed<bool> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, AduParseError> {
        Ok(Indexed::new(
            cursor.read_u16_be()?,
            coil_from_u16(cursor.read_u16_be()?)?,
        ))
    }
}

impl Parse for Indexed<u16> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, AduParseError> {
        Ok(Indexed::new(cursor.read_u16_be()?, cursor.read_u16_be()?))
    }
}

impl Response {
    pub(crate) fn display(&self, level: PduDecodeLevel) -> ResponseDisplay<'_> {
        ResponseDisplay {
            response: self,
            level,
        }
    }
}

pub(crate) struct ResponseDisplay<'a> {
    response: &'a Response,
    level: PduDecodeLevel,
}

impl std::fmt::Display for ResponseDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.response.function)?;
        if !self.level.data_headers() {
            return Ok(());
        }
        match &self.response.data {
            ResponseData::Bits(bits) => {
                write!(f, " bits: {}", bits.len())?;
                if self.level.data_values() {
                    for (i, bit) in bits.iter().enumerate() {
                        write!(f, "\n{i}: {}", u8::from(*bit))?;
                    }
                }
            }
            ResponseData::Registers(registers) => {
                write!(f, " registers: {}", registers.len())?;
                if self.level.data_values() {
                    for (i, value) in registers.iter().enumerate() {
                        write!(f, "\n{i}: {value:#06X}")?;
                    }
                }
            }
            ResponseData::SingleCoil(x) => write!(f, " {x}")?,
            ResponseData::SingleRegister(x) => write!(f, " {x}")?,
            ResponseData::WriteMultiple(range) => write!(f, " {range}")?,
        }
        Ok(())
    }
}

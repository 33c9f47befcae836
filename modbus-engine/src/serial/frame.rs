use scursor::{ReadCursor, WriteCursor};

use crate::common::frame::{Frame, FrameHeader, Unwrap};
use crate::common::function::{FunctionCode, ERROR_DELIMITER};
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::pdu;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::pdu::MAX_PDU_LENGTH + CRC_LENGTH;
}

/// CRC-16/MODBUS: reflected polynomial 0xA001, initial value 0xFFFF
pub(crate) const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LengthMode {
    /// The body length is fixed for this function code
    Fixed(usize),
    /// A byte count at this offset in the body gives the remaining length
    Offset(usize),
    /// Not a response this engine can receive
    Unknown,
}

/// RTU has no length field, so the length of a response is implied by its function code
fn response_length_mode(function_code: u8) -> LengthMode {
    if function_code & ERROR_DELIMITER != 0 {
        return match FunctionCode::get(function_code & !ERROR_DELIMITER) {
            Some(_) => LengthMode::Fixed(1),
            None => LengthMode::Unknown,
        };
    }

    match FunctionCode::get(function_code) {
        Some(FunctionCode::ReadCoils)
        | Some(FunctionCode::ReadDiscreteInputs)
        | Some(FunctionCode::ReadHoldingRegisters)
        | Some(FunctionCode::ReadInputRegisters) => LengthMode::Offset(1),
        Some(FunctionCode::WriteSingleCoil)
        | Some(FunctionCode::WriteSingleRegister)
        | Some(FunctionCode::WriteMultipleCoils)
        | Some(FunctionCode::WriteMultipleRegisters) => LengthMode::Fixed(4),
        None => LengthMode::Unknown,
    }
}

/// Examine the front of `bytes` for a complete RTU response frame
pub(crate) fn try_unwrap(bytes: &[u8]) -> Unwrap {
    match parse_frame(bytes) {
        Ok(Some((frame, consumed))) => Unwrap::Frame(frame, consumed),
        Ok(None) => Unwrap::Incomplete,
        Err(err) => Unwrap::Corrupt(err),
    }
}

fn parse_frame(bytes: &[u8]) -> Result<Option<(Frame, usize)>, FrameParseError> {
    let function_code = match bytes.get(constants::HEADER_LENGTH) {
        Some(x) => *x,
        None => return Ok(None),
    };

    let body_length = match response_length_mode(function_code) {
        LengthMode::Fixed(length) => length,
        LengthMode::Offset(offset) => {
            let position = constants::HEADER_LENGTH + constants::FUNCTION_CODE_LENGTH + offset - 1;
            match bytes.get(position) {
                Some(count) => offset + usize::from(*count),
                None => return Ok(None),
            }
        }
        LengthMode::Unknown => return Err(FrameParseError::UnknownFunctionCode(function_code)),
    };

    let pdu_length = constants::FUNCTION_CODE_LENGTH + body_length;
    if pdu_length > pdu::MAX_PDU_LENGTH {
        return Err(FrameParseError::FrameLengthTooBig(
            pdu_length,
            pdu::MAX_PDU_LENGTH,
        ));
    }

    let frame_length = constants::HEADER_LENGTH + pdu_length + constants::CRC_LENGTH;
    if bytes.len() < frame_length {
        return Ok(None);
    }

    let mut cursor = ReadCursor::new(bytes);
    let unit_id = UnitId::new(cursor.read_u8()?);
    let pdu = cursor.read_bytes(pdu_length)?;
    let received_crc = cursor.read_u16_le()?;

    let checked = bytes
        .get(..constants::HEADER_LENGTH + pdu_length)
        .ok_or(FrameParseError::InsufficientBytes)?;
    let expected_crc = CRC.checksum(checked);
    if received_crc != expected_crc {
        return Err(FrameParseError::CrcValidationFailure(
            received_crc,
            expected_crc,
        ));
    }

    let mut frame = Frame::new(FrameHeader::new_rtu_header(unit_id));
    if !frame.set(pdu) {
        return Err(FrameParseError::FrameLengthTooBig(
            pdu_length,
            pdu::MAX_PDU_LENGTH,
        ));
    }

    Ok(Some((frame, frame_length)))
}

pub(crate) fn format_rtu(
    cursor: &mut WriteCursor,
    header: FrameHeader,
    request: &pdu::Request,
    level: FrameDecodeLevel,
) -> Result<(), RequestError> {
    let start_frame = cursor.position();
    cursor.write_u8(header.unit_id.value)?;
    let start_pdu = cursor.position();
    request.serialize(cursor)?;
    let end_pdu = cursor.position();

    let crc = match cursor.get(start_frame..end_pdu) {
        Some(bytes) => CRC.checksum(bytes),
        None => return Err(crate::error::InternalError::InsufficientWriteSpace.into()),
    };
    cursor.write_u16_le(crc)?;

    if level.enabled() {
        if let Some(pdu) = cursor.get(start_pdu..end_pdu) {
            tracing::info!("RTU TX - {}", RtuDisplay::new(level, header, pdu, crc));
        }
    }

    Ok(())
}

pub(crate) struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    header: FrameHeader,
    payload: &'a [u8],
    crc: u16,
}

impl<'a> RtuDisplay<'a> {
    pub(crate) fn new(
        level: FrameDecodeLevel,
        header: FrameHeader,
        payload: &'a [u8],
        crc: u16,
    ) -> Self {
        RtuDisplay {
            level,
            header,
            payload,
            crc,
        }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} crc: {:#06X} (payload len = {})",
            self.header,
            self.crc,
            self.payload.len(),
        )?;
        if self.level.payload_enabled() {
            crate::decode::format_bytes(f, self.payload)?;
        }
        Ok(())
    }
}

use scursor::{ReadCursor, WriteCursor};

use crate::common::frame::{Frame, FrameHeader, TxId, Unwrap};
use crate::common::traits::Serialize;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::pdu::{self, MAX_PDU_LENGTH};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    pub(crate) const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + crate::pdu::MAX_PDU_LENGTH;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize = crate::pdu::MAX_PDU_LENGTH + 1;
}

#[derive(Clone, Copy)]
struct MbapHeader {
    tx_id: TxId,
    length: usize,
    unit_id: UnitId,
}

/// Examine the front of `bytes` for a complete MBAP frame
pub(crate) fn try_unwrap(bytes: &[u8]) -> Unwrap {
    match parse_frame(bytes) {
        Ok(Some((frame, consumed))) => Unwrap::Frame(frame, consumed),
        Ok(None) => Unwrap::Incomplete,
        Err(err) => Unwrap::Corrupt(err),
    }
}

fn parse_frame(bytes: &[u8]) -> Result<Option<(Frame, usize)>, FrameParseError> {
    if bytes.len() < constants::HEADER_LENGTH {
        return Ok(None);
    }

    let mut cursor = ReadCursor::new(bytes);
    let header = parse_header(&mut cursor)?;

    // the unit id was already read from the body counted by the length field
    let pdu_length = header.length - 1;
    if cursor.remaining() < pdu_length {
        return Ok(None);
    }

    let mut frame = Frame::new(FrameHeader::new_tcp_header(header.unit_id, header.tx_id));
    if !frame.set(cursor.read_bytes(pdu_length)?) {
        return Err(FrameParseError::MbapLengthTooBig(
            header.length,
            constants::MAX_LENGTH_FIELD,
        ));
    }

    Ok(Some((frame, constants::HEADER_LENGTH + pdu_length)))
}

fn parse_header(cursor: &mut ReadCursor) -> Result<MbapHeader, FrameParseError> {
    let tx_id = TxId::new(cursor.read_u16_be()?);
    let protocol_id = cursor.read_u16_be()?;
    let length = usize::from(cursor.read_u16_be()?);
    let unit_id = UnitId::new(cursor.read_u8()?);

    if protocol_id != 0 {
        return Err(FrameParseError::UnknownProtocolId(protocol_id));
    }

    // must be > 0 b/c the 1-byte unit identifier counts towards length
    if length == 0 {
        return Err(FrameParseError::MbapLengthZero);
    }

    if length > constants::MAX_LENGTH_FIELD {
        return Err(FrameParseError::MbapLengthTooBig(
            length,
            constants::MAX_LENGTH_FIELD,
        ));
    }

    Ok(MbapHeader {
        tx_id,
        length,
        unit_id,
    })
}

pub(crate) fn format_mbap(
    cursor: &mut WriteCursor,
    header: FrameHeader,
    request: &pdu::Request,
    level: FrameDecodeLevel,
) -> Result<(), RequestError> {
    let tx_id = header.tx_id.unwrap_or_default();
    let pdu_length = request.len();
    if pdu_length > MAX_PDU_LENGTH {
        return Err(InternalError::AduTooBig(pdu_length).into());
    }
    let length_field =
        u16::try_from(pdu_length + 1).map_err(|_| InternalError::AduTooBig(pdu_length))?;

    cursor.write_u16_be(tx_id.to_u16())?;
    cursor.write_u16_be(0)?;
    cursor.write_u16_be(length_field)?;
    cursor.write_u8(header.unit_id.value)?;
    let start_pdu = cursor.position();
    request.serialize(cursor)?;
    let end_pdu = cursor.position();

    if level.enabled() {
        if let Some(pdu) = cursor.get(start_pdu..end_pdu) {
            tracing::info!("MBAP TX - {}", MbapDisplay::new(level, header, pdu));
        }
    }

    Ok(())
}

pub(crate) struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: FrameHeader,
    bytes: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    pub(crate) fn new(level: FrameDecodeLevel, header: FrameHeader, bytes: &'a [u8]) -> Self {
        MbapDisplay {
            level,
            header,
            bytes,
        }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} (len = {})",
            self.header,
            self.bytes.len()
        )?;
        if self.level.payload_enabled() {
            crate::decode::format_bytes(f, self.bytes)?;
        }
        Ok(())
    }
}

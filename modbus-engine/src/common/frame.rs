use scursor::WriteCursor;

use crate::common::buffer::ReadBuffer;
use crate::common::phys::PhysLayer;
use crate::decode::{FrameDecodeLevel, PhysDecodeLevel};
use crate::error::{FrameParseError, RequestError};
use crate::pdu::{self, MAX_PDU_LENGTH};
use crate::types::UnitId;

/// Largest transaction id handed out before the counter wraps to zero
const MAX_TX_ID: u16 = 0xFFFE;

#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }

    /// returns the current id and advances the counter modulo 0xFFFF
    pub(crate) fn next(&mut self) -> TxId {
        let ret = self.value;
        self.value = if self.value >= MAX_TX_ID {
            0
        } else {
            self.value + 1
        };
        TxId::new(ret)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) unit_id: UnitId,
    /// only present in TCP frames
    pub(crate) tx_id: Option<TxId>,
}

impl FrameHeader {
    pub(crate) fn new_tcp_header(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: Some(tx_id),
        }
    }

    pub(crate) fn new_rtu_header(unit_id: UnitId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: None,
        }
    }
}

impl std::fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.tx_id {
            Some(tx_id) => write!(f, "tx_id: {} unit: {}", tx_id, self.unit_id),
            None => write!(f, "unit: {}", self.unit_id),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; MAX_PDU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; MAX_PDU_LENGTH],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        match self.pdu.get_mut(..src.len()) {
            Some(dest) => {
                dest.copy_from_slice(src);
                self.length = src.len();
                true
            }
            None => false,
        }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[..self.length]
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("header", &self.header)
            .field("pdu", &self.payload())
            .finish()
    }
}

/// Result of examining the bytes at the front of the reassembly buffer
#[derive(Debug)]
pub(crate) enum Unwrap {
    /// more bytes are required before a frame can be extracted
    Incomplete,
    /// a complete frame and the number of bytes it occupied
    Frame(Frame, usize),
    /// the buffer cannot be resynchronized
    Corrupt(FrameParseError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum FrameType {
    Tcp,
    Rtu,
}

impl FrameType {
    pub(crate) fn max_frame_length(self) -> usize {
        match self {
            FrameType::Tcp => crate::tcp::frame::constants::MAX_FRAME_LENGTH,
            FrameType::Rtu => crate::serial::frame::constants::MAX_FRAME_LENGTH,
        }
    }

    pub(crate) fn try_unwrap(self, bytes: &[u8]) -> Unwrap {
        match self {
            FrameType::Tcp => crate::tcp::frame::try_unwrap(bytes),
            FrameType::Rtu => crate::serial::frame::try_unwrap(bytes),
        }
    }
}

pub(crate) struct FrameWriter {
    frame_type: FrameType,
    buffer: [u8; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
}

impl FrameWriter {
    pub(crate) fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            buffer: [0; crate::tcp::frame::constants::MAX_FRAME_LENGTH],
        }
    }

    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        request: &pdu::Request,
        level: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        let mut cursor = WriteCursor::new(self.buffer.as_mut());
        match self.frame_type {
            FrameType::Tcp => crate::tcp::frame::format_mbap(&mut cursor, header, request, level)?,
            FrameType::Rtu => crate::serial::frame::format_rtu(&mut cursor, header, request, level)?,
        }
        let length = cursor.position();
        let max = self.frame_type.max_frame_length();
        if length > max {
            return Err(crate::error::InternalError::FrameTooBig(length, max).into());
        }
        Ok(&self.buffer[..length])
    }
}

pub(crate) struct FramedReader {
    frame_type: FrameType,
    buffer: ReadBuffer,
}

impl FramedReader {
    pub(crate) fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            buffer: ReadBuffer::new(frame_type.max_frame_length()),
        }
    }

    pub(crate) async fn read_some(
        &mut self,
        io: &mut PhysLayer,
        level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        self.buffer.read_some(io, level).await
    }

    /// extract the next frame from the buffered bytes, if one is complete
    ///
    /// a corrupt frame clears the whole buffer, requests in flight keep their deadlines
    pub(crate) fn next_frame(
        &mut self,
        level: FrameDecodeLevel,
    ) -> Option<Result<Frame, FrameParseError>> {
        if self.buffer.is_empty() {
            return None;
        }
        match self.frame_type.try_unwrap(self.buffer.readable()) {
            Unwrap::Incomplete => None,
            Unwrap::Frame(frame, consumed) => {
                if level.enabled() {
                    self.log_frame(&frame, consumed, level);
                }
                self.buffer.consume(consumed);
                Some(Ok(frame))
            }
            Unwrap::Corrupt(err) => {
                self.buffer.clear();
                Some(Err(err))
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
    }

    fn log_frame(&self, frame: &Frame, consumed: usize, level: FrameDecodeLevel) {
        match self.frame_type {
            FrameType::Tcp => tracing::info!(
                "MBAP RX - {}",
                crate::tcp::frame::MbapDisplay::new(level, frame.header, frame.payload())
            ),
            FrameType::Rtu => {
                let crc = self
                    .buffer
                    .readable()
                    .get(consumed.saturating_sub(2)..consumed)
                    .map(|x| u16::from_le_bytes([x[0], x[1]]))
                    .unwrap_or_default();
                tracing::info!(
                    "RTU RX - {}",
                    crate::serial::frame::RtuDisplay::new(level, frame.header, frame.payload(), crc)
                )
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.push(bytes);
    }
}

use std::time::Duration;

use crate::exception::ExceptionCode;

/// The task processing requests has terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shutdown;

impl std::error::Error for Shutdown {}

impl std::fmt::Display for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("channel task has shut down")
    }
}

/// Top level error type for the client API
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestError {
    /// An I/O error occurred on the transport
    Io(std::io::ErrorKind),
    /// The remote device returned a Modbus exception
    Exception(ExceptionCode),
    /// The request was invalid and nothing was transmitted
    BadRequest(InvalidRequest),
    /// Received frame could not be parsed
    BadFrame(FrameParseError),
    /// Received response could not be parsed
    BadResponse(AduParseError),
    /// An internal error occurred in the library itself
    Internal(InternalError),
    /// No matching response was received before the timeout elapsed
    ResponseTimeout,
    /// The channel is not connected
    NoConnection,
    /// A request could not be started because the correlation slot is occupied
    Busy,
    /// Connect was called while already connecting or connected
    AlreadyConnected,
    /// The request was pending when the connection was closed
    Aborted,
    /// The task processing requests has terminated
    Shutdown,
}

impl std::error::Error for RequestError {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "I/O error: {kind}"),
            RequestError::Exception(ex) => write!(f, "Modbus exception: {ex}"),
            RequestError::BadRequest(err) => write!(f, "bad request: {err}"),
            RequestError::BadFrame(err) => write!(f, "bad frame: {err}"),
            RequestError::BadResponse(err) => write!(f, "bad response: {err}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::ResponseTimeout => f.write_str("response timeout"),
            RequestError::NoConnection => f.write_str("no connection"),
            RequestError::Busy => f.write_str("no correlation slot available"),
            RequestError::AlreadyConnected => {
                f.write_str("channel is already connecting or connected")
            }
            RequestError::Aborted => f.write_str("request aborted by disconnect"),
            RequestError::Shutdown => f.write_str("channel task has shut down"),
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(ex: ExceptionCode) -> Self {
        RequestError::Exception(ex)
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<InvalidRange> for RequestError {
    fn from(err: InvalidRange) -> Self {
        RequestError::BadRequest(err.into())
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<Shutdown> for RequestError {
    fn from(_: Shutdown) -> Self {
        RequestError::Shutdown
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Shutdown {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Shutdown
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Shutdown {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Shutdown
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RequestError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RequestError::Shutdown
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RequestError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RequestError::Shutdown
    }
}

/// Errors that occur while parsing a frame off a stream (TCP or serial)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Received TCP frame with the length field set to zero
    MbapLengthZero,
    /// Received TCP frame with a length that exceeds the maximum allowed size
    MbapLengthTooBig(usize, usize),
    /// Received TCP frame within non-Modbus protocol id
    UnknownProtocolId(u16),
    /// Received serial frame with an unknown response function code
    UnknownFunctionCode(u8),
    /// Serial frame would exceed the maximum allowed length
    FrameLengthTooBig(usize, usize),
    /// Received serial frame with a CRC that does not match the computed one
    CrcValidationFailure(u16, u16),
    /// Header could not be read from the buffered bytes
    InsufficientBytes,
}

impl std::error::Error for FrameParseError {}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received TCP frame with the length field set to zero")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received TCP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::UnknownFunctionCode(code) => {
                write!(f, "received serial frame with unknown function code: {code:#04X}")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "serial frame length ({size}) exceeds max allowed size ({max})"
            ),
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received serial frame with CRC {received:#06X} but expected {expected:#06X}"
            ),
            FrameParseError::InsufficientBytes => {
                f.write_str("insufficient bytes to read the frame header")
            }
        }
    }
}

impl From<scursor::ReadError> for FrameParseError {
    fn from(_: scursor::ReadError) -> Self {
        FrameParseError::InsufficientBytes
    }
}

/// Errors that result because of bad request parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// Request contained an invalid range
    BadRange(InvalidRange),
    /// Count is too big to fit in a u16
    CountTooBigForU16(usize),
    /// Count too big for specific request
    CountTooBigForType(u16, u16),
    /// Response timeout outside of the allowed window
    BadResponseTimeout(Duration),
    /// Retry count larger than the allowed maximum
    BadRetryCount(u32),
    /// Unit id 0 is reserved for broadcast and never answers
    BadUnitId(u8),
}

impl std::error::Error for InvalidRequest {}

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRequest::BadRange(err) => write!(f, "{err}"),
            InvalidRequest::CountTooBigForU16(count) => write!(
                f,
                "the requested count of objects exceeds the maximum value of u16: {count}"
            ),
            InvalidRequest::CountTooBigForType(count, max) => write!(
                f,
                "the requested count of objects ({count}) exceeds the maximum allowed count for this type ({max})"
            ),
            InvalidRequest::BadResponseTimeout(timeout) => write!(
                f,
                "response timeout of {} ms is outside of [{}, {}] seconds",
                timeout.as_millis(),
                crate::constants::limits::MIN_RESPONSE_TIMEOUT.as_secs(),
                crate::constants::limits::MAX_RESPONSE_TIMEOUT.as_secs()
            ),
            InvalidRequest::BadRetryCount(count) => write!(
                f,
                "retry count ({count}) exceeds the maximum of {}",
                crate::constants::limits::MAX_RETRIES
            ),
            InvalidRequest::BadUnitId(id) => write!(f, "unit id {id} is not addressable"),
        }
    }
}

impl From<InvalidRange> for InvalidRequest {
    fn from(x: InvalidRange) -> Self {
        InvalidRequest::BadRange(x)
    }
}

/// Errors that occur while parsing requests and responses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// PDU is too short to be valid
    InsufficientBytes,
    /// Byte count would exceed the bytes remaining in the PDU
    InsufficientBytesForByteCount(usize, usize),
    /// PDU contains more bytes than expected
    TrailingBytes(usize),
    /// Parameters in the response do not match the request
    ReplyEchoMismatch,
    /// Byte count does not match the quantity that was requested
    RequestByteCountMismatch(usize, usize),
    /// Register payload with an odd number of bytes
    OddRegisterByteCount(usize),
    /// Response function code matches neither the request nor its exception code
    UnknownResponseFunction(u8, u8, u8),
    /// Unknown or unsupported function code
    UnknownFunctionCode(u8),
    /// Bad value for the coil state
    UnknownCoilState(u16),
}

impl std::error::Error for AduParseError {}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("response is too short to be valid"),
            AduParseError::InsufficientBytesForByteCount(count, remaining) => write!(
                f,
                "byte count ({count}) doesn't match the actual number of bytes remaining ({remaining})"
            ),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "response contains {remaining} extra trailing bytes")
            }
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::RequestByteCountMismatch(request, reply) => write!(
                f,
                "byte count ({reply}) doesn't match the expected byte count ({request})"
            ),
            AduParseError::OddRegisterByteCount(count) => {
                write!(f, "register byte count ({count}) is not a multiple of two")
            }
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual}. Expected {expected} or {error}"
            ),
            AduParseError::UnknownFunctionCode(code) => {
                write!(f, "unknown function code: {code:#04X}")
            }
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
        }
    }
}

impl From<scursor::ReadError> for AduParseError {
    fn from(_: scursor::ReadError) -> Self {
        AduParseError::InsufficientBytes
    }
}

/// Errors that indicate faulty logic in the library itself if they occur
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Insufficient space for write operation
    InsufficientWriteSpace,
    /// ADU size is larger than the maximum allowed size
    AduTooBig(usize),
    /// The calculated frame size exceeds the maximum for the framing
    FrameTooBig(usize, usize),
}

impl std::error::Error for InternalError {}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace => {
                f.write_str("insufficient space for write operation")
            }
            InternalError::AduTooBig(size) => {
                write!(f, "ADU length of {size} exceeds the maximum allowed length")
            }
            InternalError::FrameTooBig(size, max) => write!(
                f,
                "frame length of {size} exceeds the maximum allowed length of {max}"
            ),
        }
    }
}

impl From<scursor::WriteError> for InternalError {
    fn from(_: scursor::WriteError) -> Self {
        InternalError::InsufficientWriteSpace
    }
}

impl From<scursor::WriteError> for RequestError {
    fn from(err: scursor::WriteError) -> Self {
        RequestError::Internal(err.into())
    }
}

/// Errors that can be produced when validating start/count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRange {
    /// Count of zero not allowed
    CountOfZero,
    /// Address in range overflows u16
    AddressOverflow(u16, u16),
    /// Count too large for type
    CountTooLargeForType(u16, u16),
}

impl std::error::Error for InvalidRange {}

impl std::fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRange::CountOfZero => f.write_str("range contains count == 0"),
            InvalidRange::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count = {count} would overflow the representation of u16"
            ),
            InvalidRange::CountTooLargeForType(x, y) => write!(
                f,
                "the request count of {x} exceeds maximum allowed count of {y} for this type"
            ),
        }
    }
}

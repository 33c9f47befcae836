use std::time::Duration;

use tokio::sync::oneshot;

use crate::client::listener::{ConnectionState, Counters};
use crate::common::bits::num_bytes_for_bits;
use crate::common::function::FunctionCode;
use crate::decode::{DecodeLevel, PduDecodeLevel};
use crate::error::{AduParseError, RequestError};
use crate::pdu::{self, Decoded, ResponseData};
use crate::types::{AddressRange, Indexed, UnitId, WriteMultiple};

/// Messages processed by the client task, one at a time
pub(crate) enum Command {
    Connect(Promise<()>),
    Disconnect(oneshot::Sender<()>),
    Request(Request),
    GetState(oneshot::Sender<ConnectionState>),
    GetCounters(oneshot::Sender<Counters>),
    Setting(Setting),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Setting {
    DecodeLevel(DecodeLevel),
}

/// Everything the task needs to transmit a request and resolve its promise
pub(crate) struct Request {
    pub(crate) id: UnitId,
    pub(crate) timeout: Duration,
    pub(crate) retries: u32,
    pub(crate) pdu: pdu::Request,
    pub(crate) details: RequestDetails,
}

impl Request {
    pub(crate) fn new(
        id: UnitId,
        timeout: Duration,
        retries: u32,
        pdu: pdu::Request,
        details: RequestDetails,
    ) -> Self {
        Self {
            id,
            timeout,
            retries,
            pdu,
            details,
        }
    }
}

pub(crate) struct Promise<T>(oneshot::Sender<Result<T, RequestError>>);

impl<T> Promise<T> {
    pub(crate) fn new(sender: oneshot::Sender<Result<T, RequestError>>) -> Self {
        Self(sender)
    }

    pub(crate) fn failure(self, err: RequestError) {
        self.complete(Err(err))
    }

    pub(crate) fn success(self, value: T) {
        self.complete(Ok(value))
    }

    fn complete(self, result: Result<T, RequestError>) {
        // the caller may have stopped waiting
        self.0.send(result).ok();
    }
}

/// Checks a decoded response against the request that produced it
pub(crate) trait Operation {
    type Output;

    fn extract(&self, data: ResponseData) -> Result<Self::Output, AduParseError>;
}

pub(crate) struct ReadBits(pub(crate) AddressRange);

pub(crate) struct ReadRegisters(pub(crate) AddressRange);

impl Operation for ReadBits {
    type Output = Vec<Indexed<bool>>;

    fn extract(&self, data: ResponseData) -> Result<Self::Output, AduParseError> {
        let bits = match data {
            ResponseData::Bits(bits) => bits,
            _ => return Err(AduParseError::ReplyEchoMismatch),
        };
        let expected = num_bytes_for_bits(self.0.count);
        let received = bits.len() / 8;
        if expected != received {
            return Err(AduParseError::RequestByteCountMismatch(expected, received));
        }
        // padding bits in the last byte are dropped by the zip
        Ok(self
            .0
            .iter()
            .zip(bits)
            .map(|(index, value)| Indexed::new(index, value))
            .collect())
    }
}

impl Operation for ReadRegisters {
    type Output = Vec<Indexed<u16>>;

    fn extract(&self, data: ResponseData) -> Result<Self::Output, AduParseError> {
        let values = match data {
            ResponseData::Registers(values) => values,
            _ => return Err(AduParseError::ReplyEchoMismatch),
        };
        if values.len() != usize::from(self.0.count) {
            return Err(AduParseError::RequestByteCountMismatch(
                2 * usize::from(self.0.count),
                2 * values.len(),
            ));
        }
        Ok(self
            .0
            .iter()
            .zip(values)
            .map(|(index, value)| Indexed::new(index, value))
            .collect())
    }
}

impl Operation for Indexed<bool> {
    type Output = Indexed<bool>;

    fn extract(&self, data: ResponseData) -> Result<Self::Output, AduParseError> {
        match data {
            ResponseData::SingleCoil(echo) if echo == *self => Ok(echo),
            _ => Err(AduParseError::ReplyEchoMismatch),
        }
    }
}

impl Operation for Indexed<u16> {
    type Output = Indexed<u16>;

    fn extract(&self, data: ResponseData) -> Result<Self::Output, AduParseError> {
        match data {
            ResponseData::SingleRegister(echo) if echo == *self => Ok(echo),
            _ => Err(AduParseError::ReplyEchoMismatch),
        }
    }
}

impl<T> Operation for WriteMultiple<T> {
    type Output = AddressRange;

    fn extract(&self, data: ResponseData) -> Result<Self::Output, AduParseError> {
        match data {
            ResponseData::WriteMultiple(range) if range == self.range => Ok(range),
            _ => Err(AduParseError::ReplyEchoMismatch),
        }
    }
}

pub(crate) struct Transaction<T: Operation> {
    function: FunctionCode,
    operation: T,
    promise: Promise<T::Output>,
}

impl<T: Operation> Transaction<T> {
    pub(crate) fn new(function: FunctionCode, operation: T, promise: Promise<T::Output>) -> Self {
        Self {
            function,
            operation,
            promise,
        }
    }

    fn fail(self, err: RequestError) {
        self.promise.failure(err)
    }

    /// resolve the promise, or hand the transaction back if the response does not belong to it
    fn complete(self, decoded: Decoded, level: PduDecodeLevel) -> Result<(), (Self, AduParseError)> {
        match decoded {
            Decoded::Exception(ex) => {
                if ex.function != self.function {
                    let err = self.unexpected_function(ex.exception_function_code());
                    return Err((self, err));
                }
                if level.enabled() {
                    tracing::info!("PDU RX - {} exception: {}", ex.function, ex.exception);
                }
                self.promise.failure(RequestError::Exception(ex.exception));
                Ok(())
            }
            Decoded::Response(response) => {
                if response.function != self.function {
                    let err = self.unexpected_function(response.function.get_value());
                    return Err((self, err));
                }
                if level.enabled() {
                    tracing::info!("PDU RX - {}", response.display(level));
                }
                match self.operation.extract(response.data) {
                    Ok(value) => {
                        self.promise.success(value);
                        Ok(())
                    }
                    Err(err) => Err((self, err)),
                }
            }
        }
    }

    fn unexpected_function(&self, actual: u8) -> AduParseError {
        AduParseError::UnknownResponseFunction(
            actual,
            self.function.get_value(),
            self.function.as_error(),
        )
    }
}

pub(crate) enum RequestDetails {
    ReadBits(Transaction<ReadBits>),
    ReadRegisters(Transaction<ReadRegisters>),
    WriteSingleCoil(Transaction<Indexed<bool>>),
    WriteSingleRegister(Transaction<Indexed<u16>>),
    WriteMultipleCoils(Transaction<WriteMultiple<bool>>),
    WriteMultipleRegisters(Transaction<WriteMultiple<u16>>),
}

impl RequestDetails {
    pub(crate) fn function(&self) -> FunctionCode {
        match self {
            RequestDetails::ReadBits(x) => x.function,
            RequestDetails::ReadRegisters(x) => x.function,
            RequestDetails::WriteSingleCoil(x) => x.function,
            RequestDetails::WriteSingleRegister(x) => x.function,
            RequestDetails::WriteMultipleCoils(x) => x.function,
            RequestDetails::WriteMultipleRegisters(x) => x.function,
        }
    }

    pub(crate) fn fail(self, err: RequestError) {
        match self {
            RequestDetails::ReadBits(x) => x.fail(err),
            RequestDetails::ReadRegisters(x) => x.fail(err),
            RequestDetails::WriteSingleCoil(x) => x.fail(err),
            RequestDetails::WriteSingleRegister(x) => x.fail(err),
            RequestDetails::WriteMultipleCoils(x) => x.fail(err),
            RequestDetails::WriteMultipleRegisters(x) => x.fail(err),
        }
    }

    pub(crate) fn complete(
        self,
        decoded: Decoded,
        level: PduDecodeLevel,
    ) -> Result<(), (Self, AduParseError)> {
        match self {
            RequestDetails::ReadBits(x) => x
                .complete(decoded, level)
                .map_err(|(x, err)| (RequestDetails::ReadBits(x), err)),
            RequestDetails::ReadRegisters(x) => x
                .complete(decoded, level)
                .map_err(|(x, err)| (RequestDetails::ReadRegisters(x), err)),
            RequestDetails::WriteSingleCoil(x) => x
                .complete(decoded, level)
                .map_err(|(x, err)| (RequestDetails::WriteSingleCoil(x), err)),
            RequestDetails::WriteSingleRegister(x) => x
                .complete(decoded, level)
                .map_err(|(x, err)| (RequestDetails::WriteSingleRegister(x), err)),
            RequestDetails::WriteMultipleCoils(x) => x
                .complete(decoded, level)
                .map_err(|(x, err)| (RequestDetails::WriteMultipleCoils(x), err)),
            RequestDetails::WriteMultipleRegisters(x) => x
                .complete(decoded, level)
                .map_err(|(x, err)| (RequestDetails::WriteMultipleRegisters(x), err)),
        }
    }
}

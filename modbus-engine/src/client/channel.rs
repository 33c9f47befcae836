use tokio::sync::{mpsc, oneshot};

use crate::client::listener::{ConnectionState, Counters};
use crate::client::message::{
    Command, Promise, ReadBits, ReadRegisters, Request, RequestDetails, Setting, Transaction,
};
use crate::client::RequestParam;
use crate::common::function::FunctionCode;
use crate::decode::DecodeLevel;
use crate::error::{RequestError, Shutdown};
use crate::pdu;
use crate::types::{AddressRange, Indexed, WriteMultiple};

/// Async handle used to make requests against a channel task
///
/// Handles are cheap to clone and all of them talk to the same task. The task
/// exits once every handle has been dropped.
#[derive(Clone, Debug)]
pub struct Channel {
    tx: mpsc::Sender<Command>,
}

impl Channel {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Open the transport
    ///
    /// Completes once the channel is connected. Fails with [`RequestError::AlreadyConnected`]
    /// if the channel is already connecting or connected.
    pub async fn connect(&mut self) -> Result<(), RequestError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Connect(Promise::new(tx))).await?;
        rx.await?
    }

    /// Close the transport, failing every pending request with [`RequestError::Aborted`]
    ///
    /// Completes once the channel is disconnected, and succeeds immediately if it already is.
    pub async fn disconnect(&mut self) -> Result<(), Shutdown> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Disconnect(tx)).await?;
        rx.await?;
        Ok(())
    }

    /// Current connection state
    pub async fn state(&mut self) -> Result<ConnectionState, Shutdown> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::GetState(tx)).await?;
        Ok(rx.await?)
    }

    /// Snapshot of the traffic counters
    pub async fn counters(&mut self) -> Result<Counters, Shutdown> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::GetCounters(tx)).await?;
        Ok(rx.await?)
    }

    /// Change the decoding level used for logging
    pub async fn set_decode_level(&mut self, level: DecodeLevel) -> Result<(), Shutdown> {
        self.tx
            .send(Command::Setting(Setting::DecodeLevel(level)))
            .await?;
        Ok(())
    }

    /// Read coils (0x01) from the server
    pub async fn read_coils(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<Vec<Indexed<bool>>, RequestError> {
        param.validate()?;
        let pdu = pdu::Request::read_coils(range)?;
        self.send(param, pdu, |promise| {
            RequestDetails::ReadBits(Transaction::new(
                FunctionCode::ReadCoils,
                ReadBits(range),
                promise,
            ))
        })
        .await
    }

    /// Read discrete inputs (0x02) from the server
    pub async fn read_discrete_inputs(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<Vec<Indexed<bool>>, RequestError> {
        param.validate()?;
        let pdu = pdu::Request::read_discrete_inputs(range)?;
        self.send(param, pdu, |promise| {
            RequestDetails::ReadBits(Transaction::new(
                FunctionCode::ReadDiscreteInputs,
                ReadBits(range),
                promise,
            ))
        })
        .await
    }

    /// Read holding registers (0x03) from the server
    pub async fn read_holding_registers(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        param.validate()?;
        let pdu = pdu::Request::read_holding_registers(range)?;
        self.send(param, pdu, |promise| {
            RequestDetails::ReadRegisters(Transaction::new(
                FunctionCode::ReadHoldingRegisters,
                ReadRegisters(range),
                promise,
            ))
        })
        .await
    }

    /// Read input registers (0x04) from the server
    pub async fn read_input_registers(
        &mut self,
        param: RequestParam,
        range: AddressRange,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        param.validate()?;
        let pdu = pdu::Request::read_input_registers(range)?;
        self.send(param, pdu, |promise| {
            RequestDetails::ReadRegisters(Transaction::new(
                FunctionCode::ReadInputRegisters,
                ReadRegisters(range),
                promise,
            ))
        })
        .await
    }

    /// Write a single coil (0x05) on the server, returning the echoed value
    pub async fn write_single_coil(
        &mut self,
        param: RequestParam,
        request: Indexed<bool>,
    ) -> Result<Indexed<bool>, RequestError> {
        param.validate()?;
        let pdu = pdu::Request::write_single_coil(request)?;
        self.send(param, pdu, |promise| {
            RequestDetails::WriteSingleCoil(Transaction::new(
                FunctionCode::WriteSingleCoil,
                request,
                promise,
            ))
        })
        .await
    }

    /// Write a single register (0x06) on the server, returning the echoed value
    pub async fn write_single_register(
        &mut self,
        param: RequestParam,
        request: Indexed<u16>,
    ) -> Result<Indexed<u16>, RequestError> {
        param.validate()?;
        let pdu = pdu::Request::write_single_register(request)?;
        self.send(param, pdu, |promise| {
            RequestDetails::WriteSingleRegister(Transaction::new(
                FunctionCode::WriteSingleRegister,
                request,
                promise,
            ))
        })
        .await
    }

    /// Write multiple contiguous coils (0x0F) on the server, returning the echoed range
    pub async fn write_multiple_coils(
        &mut self,
        param: RequestParam,
        request: WriteMultiple<bool>,
    ) -> Result<AddressRange, RequestError> {
        param.validate()?;
        let pdu = pdu::Request::write_multiple_coils(&request)?;
        self.send(param, pdu, |promise| {
            RequestDetails::WriteMultipleCoils(Transaction::new(
                FunctionCode::WriteMultipleCoils,
                request,
                promise,
            ))
        })
        .await
    }

    /// Write multiple contiguous registers (0x10) on the server, returning the echoed range
    pub async fn write_multiple_registers(
        &mut self,
        param: RequestParam,
        request: WriteMultiple<u16>,
    ) -> Result<AddressRange, RequestError> {
        param.validate()?;
        let pdu = pdu::Request::write_multiple_registers(&request)?;
        self.send(param, pdu, |promise| {
            RequestDetails::WriteMultipleRegisters(Transaction::new(
                FunctionCode::WriteMultipleRegisters,
                request,
                promise,
            ))
        })
        .await
    }

    async fn send<T, F>(
        &mut self,
        param: RequestParam,
        pdu: pdu::Request,
        details: F,
    ) -> Result<T, RequestError>
    where
        F: FnOnce(Promise<T>) -> RequestDetails,
    {
        let (tx, rx) = oneshot::channel::<Result<T, RequestError>>();
        let request = Request::new(
            param.id,
            param.response_timeout,
            param.retries,
            pdu,
            details(Promise::new(tx)),
        );
        self.tx.send(Command::Request(request)).await?;
        rx.await?
    }
}

use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::client::connector::Connector;
use crate::client::listener::{ConnectionState, Counters, Listener};
use crate::client::message::{Command, Promise, Request, Setting};
use crate::client::pending::{PendingRequest, PendingTable};
use crate::client::ChannelConfig;
use crate::common::frame::{Frame, FrameHeader, FrameType, FrameWriter, FramedReader, TxId};
use crate::common::phys::PhysLayer;
use crate::error::*;
use crate::pdu;
use crate::DecodeLevel;

/// A connected session runs until one of the following occurs
#[derive(Debug)]
pub(crate) enum SessionEnd {
    /// the transport failed or was closed by the remote end
    Io(std::io::ErrorKind),
    /// nothing was transmitted or received within the inactivity timeout
    Inactive,
    /// the user asked to disconnect
    Disconnect(tokio::sync::oneshot::Sender<()>),
    /// every channel handle was dropped
    Shutdown,
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SessionEnd::Io(kind) => write!(f, "I/O error: {kind}"),
            SessionEnd::Inactive => f.write_str("inactivity timeout"),
            SessionEnd::Disconnect(_) => f.write_str("disconnect requested"),
            SessionEnd::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

pub(crate) struct ClientLoop {
    rx: crate::channel::Receiver<Command>,
    connector: Connector,
    writer: FrameWriter,
    reader: FramedReader,
    pending: PendingTable,
    tx_id: TxId,
    counters: Counters,
    state: ConnectionState,
    connect_timeout: Duration,
    inactivity_timeout: Option<Duration>,
    last_activity: Instant,
    decode: DecodeLevel,
    listener: Box<dyn Listener<ConnectionState>>,
}

impl ClientLoop {
    pub(crate) fn new(
        rx: crate::channel::Receiver<Command>,
        connector: Connector,
        config: &ChannelConfig,
        listener: Box<dyn Listener<ConnectionState>>,
    ) -> Self {
        let frame_type = connector.frame_type();
        let pending = match frame_type {
            FrameType::Tcp => PendingTable::multiplexed(),
            FrameType::Rtu => PendingTable::single(),
        };
        Self {
            rx,
            connector,
            writer: FrameWriter::new(frame_type),
            reader: FramedReader::new(frame_type),
            pending,
            tx_id: TxId::default(),
            counters: Counters::default(),
            state: ConnectionState::Disconnected,
            connect_timeout: config.connect_timeout,
            inactivity_timeout: config.inactivity_timeout,
            last_activity: Instant::now(),
            decode: config.decode,
            listener,
        }
    }

    /// run until every channel handle has been dropped
    pub(crate) async fn run(&mut self) -> Shutdown {
        loop {
            let promise = match self.wait_for_connect().await {
                Ok(promise) => promise,
                Err(Shutdown) => return Shutdown,
            };

            let mut io = match self.connect(promise).await {
                Ok(Some(io)) => io,
                Ok(None) => continue,
                Err(Shutdown) => return Shutdown,
            };

            let end = self.run_session(&mut io).await;
            if let Err(Shutdown) = self.close(&mut io, end).await {
                return Shutdown;
            }
        }
    }

    async fn wait_for_connect(&mut self) -> Result<Promise<()>, Shutdown> {
        loop {
            match self.rx.recv().await? {
                Command::Connect(promise) => return Ok(promise),
                Command::Disconnect(reply) => {
                    reply.send(()).ok();
                }
                Command::Request(request) => request.details.fail(RequestError::NoConnection),
                cmd => self.run_query(cmd),
            }
        }
    }

    async fn connect(&mut self, promise: Promise<()>) -> Result<Option<PhysLayer>, Shutdown> {
        self.set_state(ConnectionState::Connecting).await;
        tracing::info!("connecting to {}", self.connector);

        let attempt = tokio::time::timeout(self.connect_timeout, self.connector.clone().open());
        tokio::pin!(attempt);

        let result = loop {
            tokio::select! {
                result = &mut attempt => break result,
                cmd = self.rx.recv() => match cmd? {
                    Command::Connect(other) => other.failure(RequestError::AlreadyConnected),
                    Command::Disconnect(reply) => {
                        tracing::info!("connection attempt aborted");
                        promise.failure(RequestError::Aborted);
                        self.set_state(ConnectionState::Disconnected).await;
                        reply.send(()).ok();
                        return Ok(None);
                    }
                    Command::Request(request) => request.details.fail(RequestError::NoConnection),
                    cmd => self.run_query(cmd),
                }
            }
        };

        let err = match result {
            Ok(Ok(io)) => {
                self.reader.clear();
                self.last_activity = Instant::now();
                self.set_state(ConnectionState::Connected).await;
                promise.success(());
                return Ok(Some(io));
            }
            Ok(Err(err)) => {
                tracing::warn!("failed to connect to {}: {}", self.connector, err);
                err.kind()
            }
            Err(_) => {
                tracing::warn!(
                    "failed to connect to {} within {:?}",
                    self.connector,
                    self.connect_timeout
                );
                std::io::ErrorKind::TimedOut
            }
        };

        self.set_state(ConnectionState::Disconnected).await;
        promise.failure(RequestError::Io(err));
        Ok(None)
    }

    async fn run_session(&mut self, io: &mut PhysLayer) -> SessionEnd {
        loop {
            if let Err(end) = self.poll(io).await {
                tracing::info!("ending session: {}", end);
                return end;
            }
        }
    }

    async fn poll(&mut self, io: &mut PhysLayer) -> Result<(), SessionEnd> {
        let response_deadline = self.pending.next_deadline();
        // a timeout too large to represent never fires
        let watchdog = self
            .inactivity_timeout
            .and_then(|x| self.last_activity.checked_add(x));

        tokio::select! {
            result = self.reader.read_some(io, self.decode.physical) => {
                let count = result.map_err(|err| SessionEnd::Io(err.kind()))?;
                self.counters.bytes_received += count as u64;
                self.last_activity = Instant::now();
                self.process_frames();
                Ok(())
            }
            cmd = self.rx.recv() => {
                match cmd {
                    Ok(cmd) => self.run_cmd(io, cmd).await,
                    Err(Shutdown) => Err(SessionEnd::Shutdown),
                }
            }
            _ = sleep_until(response_deadline) => {
                self.on_response_deadline(io).await
            }
            _ = sleep_until(watchdog) => {
                Err(SessionEnd::Inactive)
            }
        }
    }

    async fn run_cmd(&mut self, io: &mut PhysLayer, cmd: Command) -> Result<(), SessionEnd> {
        match cmd {
            Command::Connect(promise) => promise.failure(RequestError::AlreadyConnected),
            Command::Disconnect(reply) => return Err(SessionEnd::Disconnect(reply)),
            Command::Request(request) => self.start_request(io, request).await?,
            cmd => self.run_query(cmd),
        }
        Ok(())
    }

    /// commands answered the same way in every state
    fn run_query(&mut self, cmd: Command) {
        match cmd {
            Command::GetState(reply) => {
                reply.send(self.state).ok();
            }
            Command::GetCounters(reply) => {
                reply.send(self.counters).ok();
            }
            Command::Setting(setting) => self.change_setting(setting),
            Command::Connect(_) | Command::Disconnect(_) | Command::Request(_) => {
                tracing::error!("state dependent command dispatched as a query");
            }
        }
    }

    fn change_setting(&mut self, setting: Setting) {
        match setting {
            Setting::DecodeLevel(level) => {
                tracing::info!("decode level changed: {:?}", level);
                self.decode = level;
            }
        }
    }

    async fn start_request(
        &mut self,
        io: &mut PhysLayer,
        request: Request,
    ) -> Result<(), SessionEnd> {
        let header = match self.pending.next_header(request.id, &mut self.tx_id) {
            Ok(header) => header,
            Err(err) => {
                tracing::warn!("unable to start {}: {}", request.details.function(), err);
                request.details.fail(err);
                return Ok(());
            }
        };

        self.transmit_request(io, header, request)
            .instrument(transaction_span(header))
            .await
    }

    async fn transmit_request(
        &mut self,
        io: &mut PhysLayer,
        header: FrameHeader,
        request: Request,
    ) -> Result<(), SessionEnd> {
        if self.decode.pdu.enabled() {
            tracing::info!("PDU TX - {}", request.pdu.display(self.decode.pdu));
        }

        let bytes = match self.writer.format(header, &request.pdu, self.decode.frame) {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                tracing::warn!("unable to format request: {}", err);
                request.details.fail(err);
                return Ok(());
            }
        };

        if let Err(kind) = self.transmit(io, &bytes).await {
            request.details.fail(RequestError::Io(kind));
            return Err(SessionEnd::Io(kind));
        }

        self.pending.insert(PendingRequest {
            header,
            deadline: Instant::now() + request.timeout,
            timeout: request.timeout,
            retries_remaining: request.retries,
            frame: bytes,
            details: request.details,
        });

        Ok(())
    }

    async fn transmit(
        &mut self,
        io: &mut PhysLayer,
        bytes: &[u8],
    ) -> Result<(), std::io::ErrorKind> {
        io.write(bytes, self.decode.physical)
            .await
            .map_err(|err| err.kind())?;
        self.counters.bytes_sent += bytes.len() as u64;
        self.counters.frames_sent += 1;
        self.last_activity = Instant::now();
        Ok(())
    }

    fn process_frames(&mut self) {
        while let Some(result) = self.reader.next_frame(self.decode.frame) {
            match result {
                Ok(frame) => {
                    self.counters.frames_received += 1;
                    self.handle_frame(frame);
                }
                Err(err) => tracing::warn!("discarding received data: {}", err),
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        let pending = match self.pending.take_match(&frame.header) {
            Some(pending) => pending,
            None => {
                tracing::debug!("discarding unmatched frame ({})", frame.header);
                return;
            }
        };

        let _guard = transaction_span(pending.header).entered();

        let decoded = match pdu::decode(frame.payload()) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!("discarding malformed response: {}", err);
                self.pending.insert(pending);
                return;
            }
        };

        let PendingRequest {
            header,
            deadline,
            timeout,
            retries_remaining,
            frame: bytes,
            details,
        } = pending;

        if let Err((details, err)) = details.complete(decoded, self.decode.pdu) {
            tracing::warn!("discarding unexpected response: {}", err);
            self.pending.insert(PendingRequest {
                header,
                deadline,
                timeout,
                retries_remaining,
                frame: bytes,
                details,
            });
        }
    }

    async fn on_response_deadline(&mut self, io: &mut PhysLayer) -> Result<(), SessionEnd> {
        let now = Instant::now();
        for key in self.pending.expired(now) {
            let retry = match self.pending.get_mut(key) {
                Some(pending) if pending.retries_remaining > 0 => {
                    pending.retries_remaining -= 1;
                    pending.deadline = now + pending.timeout;
                    Some((pending.header, pending.frame.clone()))
                }
                Some(_) => None,
                None => continue,
            };

            match retry {
                Some((header, bytes)) => {
                    let span = transaction_span(header);
                    span.in_scope(|| tracing::warn!("response timeout, retransmitting"));
                    self.counters.retries += 1;
                    self.transmit(io, &bytes)
                        .instrument(span)
                        .await
                        .map_err(SessionEnd::Io)?;
                }
                None => {
                    if let Some(pending) = self.pending.remove(key) {
                        transaction_span(pending.header)
                            .in_scope(|| tracing::warn!("response timeout"));
                        pending.details.fail(RequestError::ResponseTimeout);
                    }
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self, io: &mut PhysLayer, end: SessionEnd) -> Result<(), Shutdown> {
        self.set_state(ConnectionState::Closing).await;

        let err = match end {
            SessionEnd::Inactive => RequestError::ResponseTimeout,
            _ => RequestError::Aborted,
        };
        for pending in self.pending.drain() {
            pending.details.fail(err);
        }
        self.reader.clear();

        if let Err(err) = io.shutdown().await {
            tracing::debug!("error shutting down the transport: {}", err);
        }

        self.set_state(ConnectionState::Disconnected).await;

        match end {
            SessionEnd::Disconnect(reply) => {
                reply.send(()).ok();
                Ok(())
            }
            SessionEnd::Shutdown => Err(Shutdown),
            SessionEnd::Io(_) | SessionEnd::Inactive => Ok(()),
        }
    }

    async fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::info!("connection state: {} -> {}", self.state, state);
            self.state = state;
            self.listener.update(state).get().await;
        }
    }
}

fn transaction_span(header: FrameHeader) -> tracing::Span {
    match header.tx_id {
        Some(tx_id) => tracing::info_span!("Transaction", tx_id = %tx_id, unit = %header.unit_id),
        None => tracing::info_span!("Transaction", unit = %header.unit_id),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::client::listener::NullListener;
    use crate::client::{Channel, RequestParam};
    use crate::serial::frame::CRC;
    use crate::types::{AddressRange, Indexed, UnitId};
    use crate::ExceptionCode;

    fn spawn_client(
        frame_type: FrameType,
        config: ChannelConfig,
        connections: usize,
    ) -> (
        Channel,
        tokio::task::JoinHandle<Shutdown>,
        VecDeque<DuplexStream>,
    ) {
        let mut client_ends = VecDeque::new();
        let mut device_ends = VecDeque::new();
        for _ in 0..connections {
            let (client, device) = tokio::io::duplex(1024);
            client_ends.push_back(client);
            device_ends.push_back(device);
        }
        let connector = Connector::Mock(Arc::new(Mutex::new(client_ends)), frame_type);
        let (channel, handle) = spawn_with(connector, config);
        (channel, handle, device_ends)
    }

    fn spawn_with(
        connector: Connector,
        config: ChannelConfig,
    ) -> (Channel, tokio::task::JoinHandle<Shutdown>) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let mut task = ClientLoop::new(rx.into(), connector, &config, NullListener::create());
        let handle = tokio::spawn(async move { task.run().await });
        (Channel::new(tx), handle)
    }

    async fn wait_for_state(channel: &mut Channel, state: ConnectionState) {
        while channel.state().await.unwrap() != state {
            tokio::task::yield_now().await;
        }
    }

    async fn connected_tcp(config: ChannelConfig) -> (Channel, DuplexStream) {
        let (mut channel, _task, mut devices) = spawn_client(FrameType::Tcp, config, 1);
        channel.connect().await.unwrap();
        (channel, devices.pop_front().unwrap())
    }

    fn param() -> RequestParam {
        RequestParam::new(UnitId::new(1), Duration::from_secs(1))
    }

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange::try_from(start, count).unwrap()
    }

    async fn read_frame(device: &mut DuplexStream, length: usize) -> Vec<u8> {
        let mut buffer = vec![0; length];
        device.read_exact(&mut buffer).await.unwrap();
        buffer
    }

    /// MBAP response echoing the transaction id and unit of a request
    fn tcp_response(request: &[u8], pdu: &[u8]) -> Vec<u8> {
        let length = (pdu.len() + 1) as u16;
        let mut frame = vec![request[0], request[1], 0x00, 0x00];
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(request[6]);
        frame.extend_from_slice(pdu);
        frame
    }

    fn rtu_frame(unit: u8, pdu: &[u8]) -> Vec<u8> {
        let mut frame = vec![unit];
        frame.extend_from_slice(pdu);
        let crc = CRC.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    const REGISTERS_PDU: &[u8] = &[0x03, 0x04, 0x00, 0x0A, 0x00, 0x0B];

    #[tokio::test(start_paused = true)]
    async fn task_exits_with_shutdown_when_all_handles_dropped() {
        let (channel, task, _devices) = spawn_client(FrameType::Tcp, ChannelConfig::default(), 0);
        drop(channel);
        assert_eq!(task.await.unwrap(), Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_fail_without_connection() {
        let (mut channel, _task, _devices) =
            spawn_client(FrameType::Tcp, ChannelConfig::default(), 0);
        assert_eq!(
            channel.read_coils(param(), range(0, 1)).await,
            Err(RequestError::NoConnection)
        );
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_reports_io_error() {
        let (mut channel, _task, _devices) =
            spawn_client(FrameType::Tcp, ChannelConfig::default(), 0);
        assert_eq!(
            channel.connect().await,
            Err(RequestError::Io(std::io::ErrorKind::ConnectionRefused))
        );
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_is_rejected() {
        let (mut channel, _device) = connected_tcp(ChannelConfig::default()).await;
        assert_eq!(channel.state().await.unwrap(), ConnectionState::Connected);
        assert_eq!(
            channel.connect().await,
            Err(RequestError::AlreadyConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reads_holding_registers() {
        let (mut channel, mut device) = connected_tcp(ChannelConfig::default()).await;

        let mut client = channel.clone();
        let read =
            tokio::spawn(async move { client.read_holding_registers(param(), range(0, 2)).await });

        let request = read_frame(&mut device, 12).await;
        assert_eq!(
            request,
            [0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02]
        );
        device
            .write_all(&tcp_response(&request, REGISTERS_PDU))
            .await
            .unwrap();

        assert_eq!(
            read.await.unwrap().unwrap(),
            vec![Indexed::new(0, 10), Indexed::new(1, 11)]
        );

        let counters = channel.counters().await.unwrap();
        assert_eq!(counters.bytes_sent, 12);
        assert_eq!(counters.bytes_received, 13);
        assert_eq!(counters.frames_sent, 1);
        assert_eq!(counters.frames_received, 1);
        assert_eq!(counters.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exception_response_fails_the_request() {
        let (channel, mut device) = connected_tcp(ChannelConfig::default()).await;

        let mut client = channel.clone();
        let write = tokio::spawn(async move {
            client
                .write_single_register(param(), Indexed::new(1, 0xCAFE))
                .await
        });

        let request = read_frame(&mut device, 12).await;
        device
            .write_all(&tcp_response(&request, &[0x86, 0x02]))
            .await
            .unwrap();

        assert_eq!(
            write.await.unwrap(),
            Err(RequestError::Exception(ExceptionCode::IllegalDataAddress))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retransmits_identical_frame_then_times_out() {
        let (mut channel, mut device) = connected_tcp(ChannelConfig::default()).await;

        let mut client = channel.clone();
        let read = tokio::spawn(async move {
            client
                .read_coils(param().with_retries(2), range(7, 2))
                .await
        });

        let first = read_frame(&mut device, 12).await;
        assert_eq!(read_frame(&mut device, 12).await, first);
        assert_eq!(read_frame(&mut device, 12).await, first);

        assert_eq!(read.await.unwrap(), Err(RequestError::ResponseTimeout));

        let counters = channel.counters().await.unwrap();
        assert_eq!(counters.frames_sent, 3);
        assert_eq!(counters.bytes_sent, 36);
        assert_eq!(counters.retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn response_to_a_retransmission_completes_the_request() {
        let (channel, mut device) = connected_tcp(ChannelConfig::default()).await;

        let mut client = channel.clone();
        let read = tokio::spawn(async move {
            client
                .read_input_registers(param().with_retries(1), range(0, 2))
                .await
        });

        read_frame(&mut device, 12).await;
        let retry = read_frame(&mut device, 12).await;
        let mut response = tcp_response(&retry, REGISTERS_PDU);
        response[7] = 0x04;
        device.write_all(&response).await.unwrap();

        assert_eq!(
            read.await.unwrap().unwrap(),
            vec![Indexed::new(0, 10), Indexed::new(1, 11)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn matches_out_of_order_responses_and_drops_unknown_ids() {
        let (channel, mut device) = connected_tcp(ChannelConfig::default()).await;

        let mut client = channel.clone();
        let first = tokio::spawn(async move {
            client
                .write_single_coil(param(), Indexed::new(3, true))
                .await
        });
        let first_request = read_frame(&mut device, 12).await;

        let mut client = channel.clone();
        let second =
            tokio::spawn(async move { client.read_holding_registers(param(), range(0, 2)).await });
        let second_request = read_frame(&mut device, 12).await;
        assert_eq!(&first_request[..2], &[0x00, 0x00]);
        assert_eq!(&second_request[..2], &[0x00, 0x01]);

        // unknown transaction id
        let mut unknown = tcp_response(&second_request, REGISTERS_PDU);
        unknown[1] = 0x05;
        device.write_all(&unknown).await.unwrap();

        device
            .write_all(&tcp_response(&second_request, REGISTERS_PDU))
            .await
            .unwrap();
        device
            .write_all(&tcp_response(&first_request, &first_request[7..]))
            .await
            .unwrap();

        assert_eq!(
            second.await.unwrap().unwrap(),
            vec![Indexed::new(0, 10), Indexed::new(1, 11)]
        );
        assert_eq!(first.await.unwrap().unwrap(), Indexed::new(3, true));
    }

    #[tokio::test(start_paused = true)]
    async fn handles_split_and_coalesced_responses() {
        let (channel, mut device) = connected_tcp(ChannelConfig::default()).await;

        let mut reads = Vec::new();
        let mut requests = Vec::new();
        for _ in 0..3 {
            let mut client = channel.clone();
            reads.push(tokio::spawn(async move {
                client.read_holding_registers(param(), range(0, 2)).await
            }));
            requests.push(read_frame(&mut device, 12).await);
        }

        // first response one byte at a time
        for byte in tcp_response(&requests[0], REGISTERS_PDU) {
            device.write_all(&[byte]).await.unwrap();
            tokio::task::yield_now().await;
        }

        // the other two in a single write
        let mut both = tcp_response(&requests[1], REGISTERS_PDU);
        both.extend(tcp_response(&requests[2], REGISTERS_PDU));
        device.write_all(&both).await.unwrap();

        for read in reads {
            assert_eq!(
                read.await.unwrap().unwrap(),
                vec![Indexed::new(0, 10), Indexed::new(1, 11)]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rtu_allows_a_single_request_in_flight() {
        let (mut channel, _task, mut devices) =
            spawn_client(FrameType::Rtu, ChannelConfig::default(), 1);
        let mut device = devices.pop_front().unwrap();
        channel.connect().await.unwrap();

        let mut client = channel.clone();
        let read =
            tokio::spawn(async move { client.read_holding_registers(param(), range(0, 2)).await });
        assert_eq!(
            read_frame(&mut device, 8).await,
            [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]
        );

        assert_eq!(
            channel.read_coils(param(), range(0, 1)).await,
            Err(RequestError::Busy)
        );

        // a response from another unit is not a match
        device
            .write_all(&rtu_frame(0x02, REGISTERS_PDU))
            .await
            .unwrap();
        device
            .write_all(&rtu_frame(0x01, REGISTERS_PDU))
            .await
            .unwrap();

        assert_eq!(
            read.await.unwrap().unwrap(),
            vec![Indexed::new(0, 10), Indexed::new(1, 11)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_aborts_pending_requests_and_reconnect_works() {
        let (mut channel, _task, mut devices) =
            spawn_client(FrameType::Tcp, ChannelConfig::default(), 2);
        channel.connect().await.unwrap();
        let mut device = devices.pop_front().unwrap();

        let mut reads = Vec::new();
        for _ in 0..3 {
            let mut client = channel.clone();
            reads.push(tokio::spawn(async move {
                client
                    .read_coils(RequestParam::new(UnitId::new(1), Duration::from_secs(60)), range(0, 8))
                    .await
            }));
            read_frame(&mut device, 12).await;
        }

        channel.disconnect().await.unwrap();
        for read in reads {
            assert_eq!(read.await.unwrap(), Err(RequestError::Aborted));
        }
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
        let mut rest = Vec::new();
        assert_eq!(device.read_to_end(&mut rest).await.unwrap(), 0);

        // disconnect is idempotent
        channel.disconnect().await.unwrap();

        channel.connect().await.unwrap();
        let mut device = devices.pop_front().unwrap();
        let mut client = channel.clone();
        let read = tokio::spawn(async move { client.read_coils(param(), range(0, 3)).await });
        let request = read_frame(&mut device, 12).await;
        device
            .write_all(&tcp_response(&request, &[0x01, 0x01, 0x05]))
            .await
            .unwrap();
        assert_eq!(
            read.await.unwrap().unwrap(),
            vec![
                Indexed::new(0, true),
                Indexed::new(1, false),
                Indexed::new(2, true)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remote_close_aborts_pending_requests() {
        let (mut channel, mut device) = connected_tcp(ChannelConfig::default()).await;

        let mut client = channel.clone();
        let read = tokio::spawn(async move {
            client
                .read_discrete_inputs(RequestParam::new(UnitId::new(1), Duration::from_secs(30)), range(0, 4))
                .await
        });
        read_frame(&mut device, 12).await;
        drop(device);

        assert_eq!(read.await.unwrap(), Err(RequestError::Aborted));
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_watchdog_closes_the_connection() {
        let config = ChannelConfig::default().with_inactivity_timeout(Duration::from_secs(5));
        let (mut channel, mut device) = connected_tcp(config).await;

        let start = Instant::now();
        let mut client = channel.clone();
        let read = tokio::spawn(async move {
            client
                .read_holding_registers(
                    RequestParam::new(UnitId::new(1), Duration::from_secs(10)),
                    range(0, 2),
                )
                .await
        });
        read_frame(&mut device, 12).await;

        assert_eq!(read.await.unwrap(), Err(RequestError::ResponseTimeout));
        assert!(Instant::now() - start < Duration::from_secs(10));
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_while_connecting_is_rejected_and_disconnect_aborts_the_attempt() {
        let (mut channel, _task) = spawn_with(
            Connector::Stalled(FrameType::Tcp),
            ChannelConfig::default().with_connect_timeout(Duration::from_secs(3600)),
        );

        let mut client = channel.clone();
        let attempt = tokio::spawn(async move { client.connect().await });
        wait_for_state(&mut channel, ConnectionState::Connecting).await;

        assert_eq!(
            channel.connect().await,
            Err(RequestError::AlreadyConnected)
        );
        assert_eq!(
            channel.read_coils(param(), range(0, 1)).await,
            Err(RequestError::NoConnection)
        );

        channel.disconnect().await.unwrap();
        assert_eq!(attempt.await.unwrap(), Err(RequestError::Aborted));
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_attempt_times_out() {
        let (mut channel, _task) = spawn_with(
            Connector::Stalled(FrameType::Tcp),
            ChannelConfig::default().with_connect_timeout(Duration::from_secs(2)),
        );

        let start = Instant::now();
        assert_eq!(
            channel.connect().await,
            Err(RequestError::Io(std::io::ErrorKind::TimedOut))
        );
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_watchdog_closes_an_idle_connection() {
        let config = ChannelConfig::default().with_inactivity_timeout(Duration::from_secs(5));
        let (mut channel, mut device) = connected_tcp(config).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(channel.state().await.unwrap(), ConnectionState::Connected);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
        let mut rest = Vec::new();
        assert_eq!(device.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_timeout_beyond_the_clock_range_never_fires() {
        let config =
            ChannelConfig::default().with_inactivity_timeout(Duration::from_secs(u64::MAX));
        let (mut channel, mut device) = connected_tcp(config).await;

        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        assert_eq!(channel.state().await.unwrap(), ConnectionState::Connected);

        let mut client = channel.clone();
        let read =
            tokio::spawn(async move { client.read_holding_registers(param(), range(0, 2)).await });
        let request = read_frame(&mut device, 12).await;
        device
            .write_all(&tcp_response(&request, REGISTERS_PDU))
            .await
            .unwrap();
        assert_eq!(
            read.await.unwrap().unwrap(),
            vec![Indexed::new(0, 10), Indexed::new(1, 11)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rtu_slot_is_released_after_retries_are_exhausted() {
        let (mut channel, _task, mut devices) =
            spawn_client(FrameType::Rtu, ChannelConfig::default(), 1);
        let mut device = devices.pop_front().unwrap();
        channel.connect().await.unwrap();

        let mut client = channel.clone();
        let read = tokio::spawn(async move {
            client
                .read_holding_registers(param().with_retries(1), range(0, 2))
                .await
        });
        let first = read_frame(&mut device, 8).await;
        assert_eq!(read_frame(&mut device, 8).await, first);
        assert_eq!(read.await.unwrap(), Err(RequestError::ResponseTimeout));
        assert_eq!(channel.counters().await.unwrap().retries, 1);

        let mut client = channel.clone();
        let write = tokio::spawn(async move {
            client
                .write_single_coil(param(), Indexed::new(4, false))
                .await
        });
        let request = read_frame(&mut device, 8).await;
        device
            .write_all(&rtu_frame(0x01, &request[1..6]))
            .await
            .unwrap();
        assert_eq!(write.await.unwrap().unwrap(), Indexed::new(4, false));
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_tcp_frame_is_dropped_and_requests_keep_waiting() {
        let (mut channel, mut device) = connected_tcp(ChannelConfig::default()).await;

        let mut client = channel.clone();
        let read =
            tokio::spawn(async move { client.read_holding_registers(param(), range(0, 2)).await });
        let request = read_frame(&mut device, 12).await;

        let mut corrupt = tcp_response(&request, REGISTERS_PDU);
        corrupt[2] = 0xCA;
        corrupt[3] = 0xFE;
        device.write_all(&corrupt).await.unwrap();
        // let the task drain the corrupt bytes before the real response arrives
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(channel.state().await.unwrap(), ConnectionState::Connected);

        device
            .write_all(&tcp_response(&request, REGISTERS_PDU))
            .await
            .unwrap();
        assert_eq!(
            read.await.unwrap().unwrap(),
            vec![Indexed::new(0, 10), Indexed::new(1, 11)]
        );
        assert_eq!(channel.counters().await.unwrap().frames_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_fails_the_request_and_ends_the_session() {
        let (mut channel, device) = connected_tcp(ChannelConfig::default()).await;
        drop(device);

        let result = channel
            .write_multiple_registers(param(), crate::WriteMultiple::from(0, vec![1, 2]).unwrap())
            .await;
        // the remote close may be noticed before or after the request is written
        assert!(matches!(
            result,
            Err(RequestError::Io(_)) | Err(RequestError::NoConnection)
        ));
        assert_eq!(
            channel.state().await.unwrap(),
            ConnectionState::Disconnected
        );
    }
}

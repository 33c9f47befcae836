//! Integration tests driving the client against a scripted Modbus TCP device
// only the public API and a runtime are needed by this test crate
#![allow(unused_crate_dependencies)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use modbus_engine::client::*;
use modbus_engine::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

/// A scripted Modbus TCP device holding ten of each point type
struct Device {
    coils: [bool; 10],
    discrete_inputs: [bool; 10],
    holding_registers: [u16; 10],
    input_registers: [u16; 10],
}

impl Device {
    fn new() -> Self {
        let mut device = Self {
            coils: [false; 10],
            discrete_inputs: [false; 10],
            holding_registers: [0; 10],
            input_registers: [0; 10],
        };
        device.discrete_inputs[0] = true;
        device.discrete_inputs[2] = true;
        for (index, value) in device.input_registers.iter_mut().enumerate() {
            *value = 100 + index as u16;
        }
        device
    }

    fn exception(function: u8, code: u8) -> Vec<u8> {
        vec![function | 0x80, code]
    }

    fn process(&mut self, pdu: &[u8]) -> Vec<u8> {
        let function = pdu[0];
        let start = u16::from_be_bytes([pdu[1], pdu[2]]) as usize;
        let value = u16::from_be_bytes([pdu[3], pdu[4]]);
        let count = value as usize;

        match function {
            0x01 | 0x02 => {
                let bits = if function == 0x01 {
                    &self.coils
                } else {
                    &self.discrete_inputs
                };
                if start + count > bits.len() {
                    return Self::exception(function, 0x02);
                }
                let mut bytes = vec![0u8; (count + 7) / 8];
                for i in 0..count {
                    if bits[start + i] {
                        bytes[i / 8] |= 1 << (i % 8);
                    }
                }
                let mut reply = vec![function, bytes.len() as u8];
                reply.extend(bytes);
                reply
            }
            0x03 | 0x04 => {
                let registers = if function == 0x03 {
                    &self.holding_registers
                } else {
                    &self.input_registers
                };
                if start + count > registers.len() {
                    return Self::exception(function, 0x02);
                }
                let mut reply = vec![function, (2 * count) as u8];
                for register in &registers[start..start + count] {
                    reply.extend(register.to_be_bytes());
                }
                reply
            }
            0x05 => {
                if start >= self.coils.len() {
                    return Self::exception(function, 0x02);
                }
                self.coils[start] = value == 0xFF00;
                pdu.to_vec()
            }
            0x06 => {
                if start >= self.holding_registers.len() {
                    return Self::exception(function, 0x02);
                }
                self.holding_registers[start] = value;
                pdu.to_vec()
            }
            0x0F => {
                if start + count > self.coils.len() {
                    return Self::exception(function, 0x02);
                }
                for i in 0..count {
                    self.coils[start + i] = pdu[6 + i / 8] & (1 << (i % 8)) != 0;
                }
                pdu[..5].to_vec()
            }
            0x10 => {
                if start + count > self.holding_registers.len() {
                    return Self::exception(function, 0x02);
                }
                for i in 0..count {
                    self.holding_registers[start + i] =
                        u16::from_be_bytes([pdu[6 + 2 * i], pdu[7 + 2 * i]]);
                }
                pdu[..5].to_vec()
            }
            _ => Self::exception(function, 0x01),
        }
    }

    async fn serve(mut self, mut socket: TcpStream) {
        loop {
            let mut header = [0u8; 7];
            if socket.read_exact(&mut header).await.is_err() {
                return;
            }
            let length = u16::from_be_bytes([header[4], header[5]]) as usize;
            let mut pdu = vec![0u8; length - 1];
            socket.read_exact(&mut pdu).await.unwrap();

            let reply = self.process(&pdu);
            let mut frame = header[..4].to_vec();
            frame.extend(((reply.len() + 1) as u16).to_be_bytes());
            frame.push(header[6]);
            frame.extend(reply);
            socket.write_all(&frame).await.unwrap();
        }
    }
}

#[derive(Clone, Default)]
struct StateRecorder {
    states: Arc<Mutex<Vec<ConnectionState>>>,
}

impl Listener<ConnectionState> for StateRecorder {
    fn update(&mut self, value: ConnectionState) -> MaybeAsync<()> {
        self.states.lock().unwrap().push(value);
        MaybeAsync::ready(())
    }
}

async fn test_requests_and_responses() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        Device::new().serve(socket).await;
    });

    let recorder = StateRecorder::default();
    let config = ChannelConfig::default().with_decode_level(DecodeLevel::new(
        PduDecodeLevel::DataValues,
        FrameDecodeLevel::Header,
        PhysDecodeLevel::Length,
    ));
    let mut channel =
        spawn_tcp_client_task("127.0.0.1", port, config, Some(Box::new(recorder.clone())));
    channel.connect().await.unwrap();

    let params = RequestParam::new(UnitId::new(0x01), Duration::from_secs(1));

    assert_eq!(
        channel
            .read_discrete_inputs(params, AddressRange::try_from(0, 3).unwrap())
            .await
            .unwrap(),
        vec![
            Indexed::new(0, true),
            Indexed::new(1, false),
            Indexed::new(2, true)
        ]
    );

    assert_eq!(
        channel
            .read_input_registers(params, AddressRange::try_from(8, 2).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(8, 108), Indexed::new(9, 109)]
    );

    // do a single coil write and verify that it was written by reading it
    assert_eq!(
        channel
            .write_single_coil(params, Indexed::new(1, true))
            .await
            .unwrap(),
        Indexed::new(1, true)
    );
    assert_eq!(
        channel
            .read_coils(params, AddressRange::try_from(0, 2).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(0, false), Indexed::new(1, true)]
    );

    // do a single register write and verify that it was written by reading it
    assert_eq!(
        channel
            .write_single_register(params, Indexed::new(1, 0xABCD))
            .await
            .unwrap(),
        Indexed::new(1, 0xABCD)
    );
    assert_eq!(
        channel
            .read_holding_registers(params, AddressRange::try_from(0, 2).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(0, 0x0000), Indexed::new(1, 0xABCD)]
    );

    // write multiple coils and verify that they were written
    assert_eq!(
        channel
            .write_multiple_coils(
                params,
                WriteMultiple::from(3, vec![true, true, true]).unwrap()
            )
            .await
            .unwrap(),
        AddressRange::try_from(3, 3).unwrap()
    );
    assert_eq!(
        channel
            .read_coils(params, AddressRange::try_from(2, 5).unwrap())
            .await
            .unwrap(),
        vec![
            Indexed::new(2, false),
            Indexed::new(3, true),
            Indexed::new(4, true),
            Indexed::new(5, true),
            Indexed::new(6, false)
        ]
    );

    // write registers and verify that they were written
    assert_eq!(
        channel
            .write_multiple_registers(
                params,
                WriteMultiple::from(0, vec![0x0102, 0x0304, 0x0506]).unwrap()
            )
            .await
            .unwrap(),
        AddressRange::try_from(0, 3).unwrap()
    );
    assert_eq!(
        channel
            .read_holding_registers(params, AddressRange::try_from(0, 3).unwrap())
            .await
            .unwrap(),
        vec![
            Indexed::new(0, 0x0102),
            Indexed::new(1, 0x0304),
            Indexed::new(2, 0x0506)
        ]
    );

    // reading beyond the device's points is an exception
    assert_eq!(
        channel
            .read_holding_registers(params, AddressRange::try_from(9, 2).unwrap())
            .await,
        Err(RequestError::Exception(ExceptionCode::IllegalDataAddress))
    );

    let counters = channel.counters().await.unwrap();
    assert_eq!(counters.frames_sent, 11);
    assert_eq!(counters.frames_received, 11);
    assert_eq!(counters.retries, 0);

    channel.disconnect().await.unwrap();
    assert_eq!(
        channel.state().await.unwrap(),
        ConnectionState::Disconnected
    );
    assert_eq!(
        recorder.states.lock().unwrap().as_slice(),
        &[
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closing,
            ConnectionState::Disconnected
        ]
    );

    assert_eq!(
        channel
            .read_coils(params, AddressRange::try_from(0, 1).unwrap())
            .await,
        Err(RequestError::NoConnection)
    );
}

#[test]
fn can_read_and_write_values() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();

    let rt = Runtime::new().unwrap();
    rt.block_on(test_requests_and_responses())
}

use std::time::Duration;

use tracing::Instrument;

use crate::client::connector::Connector;
use crate::client::listener::NullListener;
use crate::client::task::ClientLoop;
use crate::constants::limits;
use crate::decode::DecodeLevel;
use crate::error::InvalidRequest;
use crate::types::UnitId;

pub use crate::client::channel::Channel;
pub use crate::client::listener::{ConnectionState, Counters, Listener};

mod channel;
mod connector;
mod listener;
mod message;
mod pending;
mod task;

/// Parameters common to every request
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestParam {
    /// Unit id of the addressed device
    pub id: UnitId,
    /// How long to wait for each response, between 1 and 120 seconds
    pub response_timeout: Duration,
    /// How many times the identical frame is retransmitted after a response timeout, at most 10
    pub retries: u32,
}

impl RequestParam {
    /// Create parameters without retries
    pub fn new(id: UnitId, response_timeout: Duration) -> Self {
        Self {
            id,
            response_timeout,
            retries: 0,
        }
    }

    /// Set the retry count
    pub fn with_retries(self, retries: u32) -> Self {
        Self { retries, ..self }
    }

    pub(crate) fn validate(&self) -> Result<(), InvalidRequest> {
        if self.response_timeout < limits::MIN_RESPONSE_TIMEOUT
            || self.response_timeout > limits::MAX_RESPONSE_TIMEOUT
        {
            return Err(InvalidRequest::BadResponseTimeout(self.response_timeout));
        }
        if self.retries > limits::MAX_RETRIES {
            return Err(InvalidRequest::BadRetryCount(self.retries));
        }
        if self.id.value == 0 {
            return Err(InvalidRequest::BadUnitId(self.id.value));
        }
        Ok(())
    }
}

/// Settings of a channel task
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelConfig {
    /// Capacity of the queue between the channel handles and the task
    pub max_queued_requests: usize,
    /// Maximum time allowed to open the transport
    pub connect_timeout: Duration,
    /// Close the connection when nothing is sent or received for this long
    pub inactivity_timeout: Option<Duration>,
    /// Initial decoding level, it may be changed with [`Channel::set_decode_level`]
    pub decode: DecodeLevel,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_queued_requests: 16,
            connect_timeout: Duration::from_secs(5),
            inactivity_timeout: None,
            decode: DecodeLevel::default(),
        }
    }
}

impl ChannelConfig {
    /// Set the capacity of the request queue, a value of zero is raised to one
    pub fn with_max_queued_requests(self, max_queued_requests: usize) -> Self {
        Self {
            max_queued_requests,
            ..self
        }
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..self
        }
    }

    /// Enable the inactivity watchdog
    ///
    /// A duration that cannot be added to the current instant disables the watchdog
    pub fn with_inactivity_timeout(self, inactivity_timeout: Duration) -> Self {
        Self {
            inactivity_timeout: Some(inactivity_timeout),
            ..self
        }
    }

    /// Set the decoding level
    pub fn with_decode_level(self, decode: DecodeLevel) -> Self {
        Self { decode, ..self }
    }
}

/// Spawns a channel task onto the runtime that speaks Modbus TCP (MBAP framing) to `host:port`.
///
/// The channel starts disconnected, call [`Channel::connect`] to open the socket. The task
/// completes when the returned channel handle and all of its clones are dropped.
///
/// * `host` - Host name or IP address of the remote server
/// * `port` - TCP port of the remote server, usually 502
/// * `config` - Queue size, timeouts and decoding level
/// * `listener` - Optional callback notified of every connection state transition
///
/// Must be called from within a Tokio runtime.
pub fn spawn_tcp_client_task(
    host: &str,
    port: u16,
    config: ChannelConfig,
    listener: Option<Box<dyn Listener<ConnectionState>>>,
) -> Channel {
    let connector = Connector::Tcp {
        host: host.to_string(),
        port,
    };
    let span = tracing::info_span!("Modbus-Client-TCP", endpoint = %connector);
    spawn(connector, config, listener, span)
}

/// Spawns a channel task onto the runtime that speaks Modbus RTU over a serial port.
///
/// Only a single request may be in flight at a time, a second request fails with
/// [`crate::RequestError::Busy`] until the first completes.
///
/// * `path` - Path of the serial device, e.g. `/dev/ttyS0` or `COM1`
/// * `settings` - Serial port settings
/// * `config` - Queue size, timeouts and decoding level
/// * `listener` - Optional callback notified of every connection state transition
#[cfg(feature = "serial")]
pub fn spawn_rtu_client_task(
    path: &str,
    settings: crate::serial::SerialSettings,
    config: ChannelConfig,
    listener: Option<Box<dyn Listener<ConnectionState>>>,
) -> Channel {
    let connector = Connector::Serial {
        path: path.to_string(),
        settings,
    };
    let span = tracing::info_span!("Modbus-Client-RTU", port = path);
    spawn(connector, config, listener, span)
}

fn spawn(
    connector: Connector,
    config: ChannelConfig,
    listener: Option<Box<dyn Listener<ConnectionState>>>,
    span: tracing::Span,
) -> Channel {
    let (tx, rx) = tokio::sync::mpsc::channel(config.max_queued_requests.max(1));
    let listener = listener.unwrap_or_else(NullListener::create);
    let mut task = ClientLoop::new(rx.into(), connector, &config, listener);
    tokio::spawn(
        async move {
            let _ = task.run().await;
            tracing::info!("channel task shut down");
        }
        .instrument(span),
    );
    Channel::new(tx)
}

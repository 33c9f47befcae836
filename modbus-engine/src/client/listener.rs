use crate::MaybeAsync;

/// A generic listener type that can be invoked multiple times
pub trait Listener<T>: Send {
    /// inform the listener that the value has changed
    fn update(&mut self, _value: T) -> MaybeAsync<()> {
        MaybeAsync::ready(())
    }
}

/// Listener that does nothing
#[derive(Copy, Clone)]
pub(crate) struct NullListener;

impl NullListener {
    /// create a Box<dyn Listener<T>> that does nothing
    pub(crate) fn create<T>() -> Box<dyn Listener<T>> {
        Box::new(NullListener)
    }
}

impl<T> Listener<T> for NullListener {
    fn update(&mut self, _value: T) -> MaybeAsync<()> {
        MaybeAsync::ready(())
    }
}

/// Connection state of a client channel
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// no transport is open, requests fail with [`crate::RequestError::NoConnection`]
    Disconnected,
    /// the transport is being opened
    Connecting,
    /// requests may be sent
    Connected,
    /// pending requests are being aborted and the transport closed
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Closing => f.write_str("closing"),
        }
    }
}

/// Traffic counters of a channel, they only ever increase
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Counters {
    /// bytes written to the transport, retransmissions included
    pub bytes_sent: u64,
    /// bytes read from the transport
    pub bytes_received: u64,
    /// frames written to the transport, retransmissions included
    pub frames_sent: u64,
    /// complete frames extracted from the received bytes
    pub frames_received: u64,
    /// retransmissions after a response timeout
    pub retries: u64,
}

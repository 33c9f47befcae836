use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::client::message::RequestDetails;
use crate::common::frame::{FrameHeader, TxId};
use crate::error::RequestError;
use crate::types::UnitId;

/// A transmitted request waiting for its response
pub(crate) struct PendingRequest {
    pub(crate) header: FrameHeader,
    pub(crate) deadline: Instant,
    pub(crate) timeout: Duration,
    pub(crate) retries_remaining: u32,
    /// exact bytes of the original transmission, reused on retry
    pub(crate) frame: Vec<u8>,
    pub(crate) details: RequestDetails,
}

/// Outstanding requests, keyed by transaction id on TCP
///
/// RTU has no correlation field so only a single request may be in flight.
pub(crate) enum PendingTable {
    Multiplexed(BTreeMap<u16, PendingRequest>),
    Single(Option<PendingRequest>),
}

/// key of the lone RTU slot
const SINGLE_SLOT: u16 = 0;

impl PendingTable {
    pub(crate) fn multiplexed() -> Self {
        PendingTable::Multiplexed(BTreeMap::new())
    }

    pub(crate) fn single() -> Self {
        PendingTable::Single(None)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn len(&self) -> usize {
        match self {
            PendingTable::Multiplexed(map) => map.len(),
            PendingTable::Single(slot) => usize::from(slot.is_some()),
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// allocate the header for the next request, or `Busy` if its correlation key is in use
    pub(crate) fn next_header(
        &self,
        unit_id: UnitId,
        tx_id: &mut TxId,
    ) -> Result<FrameHeader, RequestError> {
        match self {
            PendingTable::Multiplexed(map) => {
                let id = tx_id.next();
                if map.contains_key(&id.to_u16()) {
                    return Err(RequestError::Busy);
                }
                Ok(FrameHeader::new_tcp_header(unit_id, id))
            }
            PendingTable::Single(slot) => {
                if slot.is_some() {
                    return Err(RequestError::Busy);
                }
                Ok(FrameHeader::new_rtu_header(unit_id))
            }
        }
    }

    pub(crate) fn insert(&mut self, request: PendingRequest) {
        match self {
            PendingTable::Multiplexed(map) => {
                let key = request.header.tx_id.map(TxId::to_u16).unwrap_or_default();
                map.insert(key, request);
            }
            PendingTable::Single(slot) => *slot = Some(request),
        }
    }

    /// remove the request matching the unit id and transaction id of a received frame
    pub(crate) fn take_match(&mut self, header: &FrameHeader) -> Option<PendingRequest> {
        match self {
            PendingTable::Multiplexed(map) => {
                let key = header.tx_id?.to_u16();
                let matches = map
                    .get(&key)
                    .is_some_and(|x| x.header.unit_id == header.unit_id);
                if matches {
                    map.remove(&key)
                } else {
                    None
                }
            }
            PendingTable::Single(slot) => {
                let matches = slot
                    .as_ref()
                    .is_some_and(|x| x.header.unit_id == header.unit_id);
                if matches {
                    slot.take()
                } else {
                    None
                }
            }
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match self {
            PendingTable::Multiplexed(map) => map.values().map(|x| x.deadline).min(),
            PendingTable::Single(slot) => slot.as_ref().map(|x| x.deadline),
        }
    }

    /// keys of every request whose deadline has passed
    pub(crate) fn expired(&self, now: Instant) -> Vec<u16> {
        match self {
            PendingTable::Multiplexed(map) => map
                .iter()
                .filter(|(_, x)| x.deadline <= now)
                .map(|(key, _)| *key)
                .collect(),
            PendingTable::Single(slot) => match slot {
                Some(x) if x.deadline <= now => vec![SINGLE_SLOT],
                _ => Vec::new(),
            },
        }
    }

    pub(crate) fn get_mut(&mut self, key: u16) -> Option<&mut PendingRequest> {
        match self {
            PendingTable::Multiplexed(map) => map.get_mut(&key),
            PendingTable::Single(slot) => slot.as_mut(),
        }
    }

    pub(crate) fn remove(&mut self, key: u16) -> Option<PendingRequest> {
        match self {
            PendingTable::Multiplexed(map) => map.remove(&key),
            PendingTable::Single(slot) => slot.take(),
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        match self {
            PendingTable::Multiplexed(map) => std::mem::take(map).into_values().collect(),
            PendingTable::Single(slot) => slot.take().into_iter().collect(),
        }
    }
}

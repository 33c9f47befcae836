//! Encoding of request PDUs and decoding of response PDUs
//!
//! Both directions are pure functions over byte slices. Requests are validated
//! when they are built, so nothing invalid ever reaches a transport.

mod request;
mod response;

pub use request::*;
pub use response::*;

//! Wire envelope codec for relay communication.
//!
//! Every frame is a JSON envelope `{type, version, data}`:
//! - [`StartPayload`] / [`StartAck`] - the session handshake
//! - [`EventPayload`] - an inbound webhook delivery
//! - [`ResponsePayload`] - the local server's answer
//!
//! Also provides type-safe ID wrappers for compile-time safety.

mod ids;
mod messages;

pub use ids::*;
pub use messages::*;

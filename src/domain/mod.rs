//! Domain layer public interface.
//!
//! This module defines the send-path abstractions that are independent of
//! any concrete broker, connection pool, or client library: the per-send
//! context, the wire message, the client/source capabilities, and inbound
//! affinity.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod affinity;
mod client;
mod context;
mod message;

// --- Send domain re-exports ---

pub use affinity::{
    //
    InboundAffinity,
    ReceivedAffinity,
};
pub use client::{
    //
    CancelOutcome,
    ClientContext,
    ClientContextPtr,
    ClientLease,
    ContextSource,
    ContextSourcePtr,
    ScheduleOutcome,
};
pub use context::{
    //
    Headers,
    SendContext,
    SendEnvelope,
};
pub use message::BrokerMessage;

//! Supervised send transport for message-oriented middleware.
//!
//! A [`SendTransport`] accepts an application message, lets the caller
//! customize it through a [`SendPipe`], builds a broker-ready
//! [`BrokerMessage`] and hands it to a broker client borrowed from a
//! [`ContextSource`]. Depending on the requested enqueue time the message is
//! delivered immediately or scheduled; scheduled messages can later be
//! cancelled by token or by sequence number. [`SendObserver`]s are notified
//! before and after delivery and on every fault, and the transport can be
//! stopped gracefully, waiting for in-flight sends.
//!
//! ```
//! use mom_send::{configure, MemoryBroker, SendContext, SendTransportBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mom_send::Result<()> {
//! let broker = MemoryBroker::new("orders");
//! let transport = SendTransportBuilder::new(broker.context_source(2)?).build()?;
//!
//! let receipt = transport
//!     .send(
//!         serde_json::json!({ "order": 42 }),
//!         configure(|ctx: &mut SendContext<serde_json::Value>| {
//!             ctx.set_header("tenant", "acme");
//!         }),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!
//! assert_eq!(broker.sent().len(), 1);
//! assert_eq!(receipt.sequence_number(), None);
//!
//! transport.stop().await?;
//! # Ok(())
//! # }
//! ```

// Must come first: the log_* macros are used by every module below.
#[macro_use]
mod macros;

mod client;
mod domain;

mod error;
mod message_builder;
mod observer;
mod pipe;
mod retry;
mod schedule_tokens;
mod send_config;
mod send_log;
mod send_transport;
mod supervisor;
mod sync_util;
mod transport_builder;

// --- public re-exports
pub use client::{
    //
    BrokerOp,
    MemoryBroker,
    PooledContextSource,
    ScheduledMessage,
    SharedContextSource,
};
pub use domain::{
    //
    BrokerMessage,
    CancelOutcome,
    ClientContext,
    ClientContextPtr,
    ClientLease,
    ContextSource,
    ContextSourcePtr,
    Headers,
    InboundAffinity,
    ReceivedAffinity,
    ScheduleOutcome,
    SendContext,
    SendEnvelope,
};
pub use error::{Result, SendError};
pub use message_builder::{canonical_id, BrokerMessageBuilder, HeaderConverter};
pub use observer::{ObserverHandle, ObserverRegistry, ObserverResult, SendObserver};
pub use pipe::{configure, pipe_fn, BoxFuture, Configure, PipeFn, SendPipe};
pub use retry::RetryConfig;
pub use send_config::{SendConfig, DEFAULT_CONTENT_TYPE};
pub use send_log::{SendLog, SendLogPtr, TracingSendLog};
pub use send_transport::{Delivery, SendReceipt, SendTransport};
pub use transport_builder::SendTransportBuilder;

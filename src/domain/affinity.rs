// src/domain/affinity.rs

//! Inbound affinity.
//!
//! When a message is sent while handling a received one (a reply or a
//! forward), the outgoing message can inherit the session and partition of
//! the message it answers. The received side is modelled by the narrow
//! [`InboundAffinity`] capability so that any consumer implementation can
//! attach itself to a [`SendContext`](crate::SendContext) without the send
//! path knowing its concrete type.

/// Session and partition routing of a received message.
///
/// Consulted only for affinity inheritance by the broker message builder.
pub trait InboundAffinity: Send + Sync {
    /// Session the received message arrived on.
    fn session_id(&self) -> Option<&str>;

    /// Session the sender asked replies to be delivered to.
    fn reply_to_session_id(&self) -> Option<&str>;

    /// Partition key of the received message.
    fn partition_key(&self) -> Option<&str>;
}

/// Plain-data [`InboundAffinity`] captured from a received message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceivedAffinity {
    /// Session the message arrived on.
    pub session_id: Option<String>,
    /// Requested reply session.
    pub reply_to_session_id: Option<String>,
    /// Partition key of the message.
    pub partition_key: Option<String>,
}

impl InboundAffinity for ReceivedAffinity {
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn reply_to_session_id(&self) -> Option<&str> {
        self.reply_to_session_id.as_deref()
    }

    fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }
}

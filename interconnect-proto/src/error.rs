use thiserror::Error;

/// A violation of the propagation protocol by the peer.
///
/// Any of these sets the session's abort reason; the next service pass tears
/// the stream down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("vpi has neither an id nor a name")]
    MalformedVpi,

    #[error("normal update names unknown id {id}")]
    UnknownUpdateId { id: u32 },

    #[error("registration record id {id} is already bound")]
    DuplicateRegistrationId { id: u32 },

    #[error("frame carries vpis but no seq")]
    MissingSeq,

    #[error("ack {ack_seq} does not cover pending frames contiguously (last processed {last_processed})")]
    AckSkipMismatch { ack_seq: u32, last_processed: u32 },

    #[error("peer sent a {record}, which this side never accepts")]
    UnexpectedRecord { record: &'static str },
}

//! Wire model for the interconnect propagation protocol.
//!
//! A session exchanges exactly one message shape in both directions: the
//! [`PushFrame`]. A frame carries an acknowledgement number, an optional
//! sequence number of its own, and any mix of value-propagation items
//! ([`Vpi`]), remote-service-action requests and action state updates.
//!
//! The serialization format is the transport's choice; this crate only fixes
//! the record shapes and their field optionality (absent numbers are zero,
//! absent lists are empty).

mod action;
mod error;
mod frame;
mod rules;

pub use action::{ActionRequest, ActionState, ActionStateCode, ActionUpdate};
pub use error::ProtocolError;
pub use frame::{PushFrame, SessionOpen, Vpi, VpiKind};
pub use rules::{MatchRule, MatchRuleSet};

/// Service name answered inside the propagation engine itself rather than
/// being dispatched to a host part. Kept verbatim for wire compatibility with
/// existing peers.
pub const PING_SERVICE_NAME: &str = "$WcfServicePing$";

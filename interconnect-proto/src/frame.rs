use interconnect_data::ValueContainer;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::action::{ActionRequest, ActionUpdate};
use crate::error::ProtocolError;
use crate::rules::MatchRuleSet;

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// One value-propagation item.
///
/// The `(id, name)` pair discriminates the record:
///
/// | id  | name    | meaning                                  |
/// |-----|---------|------------------------------------------|
/// | > 0 | present | registration record (server to client)   |
/// | 0   | present | add-name request (client to server)      |
/// | > 0 | absent  | normal update (either direction)         |
/// | 0   | absent  | protocol error                           |
///
/// An empty container is permitted and distinct from an absent one: absent
/// means "no value travels with this record".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpi {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ValueContainer>,
}

/// Classification of a [`Vpi`] under the protocol's discrimination rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpiKind {
    Registration,
    AddNameRequest,
    NormalUpdate,
}

impl Vpi {
    pub fn registration(
        id: u32,
        name: impl Into<String>,
        container: Option<ValueContainer>,
    ) -> Self {
        Vpi {
            id,
            name: Some(name.into()),
            container,
        }
    }

    pub fn add_name(name: impl Into<String>, container: Option<ValueContainer>) -> Self {
        Vpi {
            id: 0,
            name: Some(name.into()),
            container,
        }
    }

    pub fn update(id: u32, container: ValueContainer) -> Self {
        Vpi {
            id,
            name: None,
            container: Some(container),
        }
    }

    /// Apply the discrimination rule. The `(0, absent)` corner is the only
    /// malformed shape.
    pub fn kind(&self) -> Result<VpiKind, ProtocolError> {
        match (self.id, self.name.is_some()) {
            (0, false) => Err(ProtocolError::MalformedVpi),
            (0, true) => Ok(VpiKind::AddNameRequest),
            (_, true) => Ok(VpiKind::Registration),
            (_, false) => Ok(VpiKind::NormalUpdate),
        }
    }

    pub fn estimated_content_size(&self) -> usize {
        5 + self.name.as_ref().map_or(0, |n| 5 + n.len())
            + self
                .container
                .as_ref()
                .map_or(0, |c| c.estimated_content_size())
    }
}

/// The single message exchanged over an established session, in either
/// direction.
///
/// `seq = 0` means the frame does not require acknowledgement (an ack-only
/// frame); `ack_seq = 0` means the frame acknowledges nothing. All lists may
/// be empty, and an entirely empty frame that carries a seq is a ping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ack_seq: u32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: u32,

    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub vpis: SmallVec<[Vpi; 4]>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<ActionRequest>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<ActionUpdate>,
}

impl PushFrame {
    /// True when the frame carries no records at all (it may still carry seq
    /// and ack numbers).
    pub fn has_no_content(&self) -> bool {
        self.vpis.is_empty() && self.requests.is_empty() && self.updates.is_empty()
    }

    /// Estimated wire size of the frame's content, used to bound packing.
    pub fn estimated_content_size(&self) -> usize {
        9 + self
            .vpis
            .iter()
            .map(Vpi::estimated_content_size)
            .sum::<usize>()
            + self
                .requests
                .iter()
                .map(ActionRequest::estimated_content_size)
                .sum::<usize>()
            + self
                .updates
                .iter()
                .map(ActionUpdate::estimated_content_size)
                .sum::<usize>()
    }

    /// Strip the frame back to its default state so a carrier can be reused.
    pub fn clear(&mut self) {
        self.ack_seq = 0;
        self.seq = 0;
        self.vpis.clear();
        self.requests.clear();
        self.updates.clear();
    }
}

/// The session-initiating record, sent exactly once per stream by the
/// client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpen {
    /// Identity of the connecting client, for the server's logs.
    pub client_name: String,

    /// Name of the server-side table to mirror; empty selects the server's
    /// default table.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub table_name: String,

    /// Which of the server's names the client wants to receive.
    #[serde(default)]
    pub match_rules: MatchRuleSet,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn vpi_discrimination() {
        assert_eq!(
            Vpi::registration(3, "x", None).kind().unwrap(),
            VpiKind::Registration
        );
        assert_eq!(
            Vpi::add_name("x", None).kind().unwrap(),
            VpiKind::AddNameRequest
        );
        assert_eq!(
            Vpi::update(3, ValueContainer::Empty).kind().unwrap(),
            VpiKind::NormalUpdate
        );
        assert_eq!(Vpi::default().kind(), Err(ProtocolError::MalformedVpi));
    }

    #[test]
    fn absent_fields_are_omitted() {
        let frame = PushFrame {
            ack_seq: 0,
            seq: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"seq":7}"#);
    }

    #[test]
    fn empty_container_is_distinct_from_absent() {
        let with_empty = Vpi::update(1, ValueContainer::Empty);
        let absent = Vpi {
            id: 1,
            name: None,
            container: None,
        };
        assert_ne!(with_empty, absent);

        let bytes = bincode::serialize(&with_empty).unwrap();
        let back: Vpi = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.container, Some(ValueContainer::Empty));
    }

    #[test]
    fn frame_size_counts_every_record() {
        let mut frame = PushFrame::default();
        let base = frame.estimated_content_size();
        frame.vpis.push(Vpi::update(1, ValueContainer::I64(9)));
        assert!(frame.estimated_content_size() > base);
    }
}

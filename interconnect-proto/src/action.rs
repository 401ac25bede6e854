use interconnect_data::NamedValueSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to start (or cancel) a remote service action on the peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Correlates this request with its stream of [`ActionUpdate`]s. Chosen
    /// by the initiating side.
    pub uuid: Uuid,

    /// Target service. May be absent on a cancel-only request, where the
    /// uuid already identifies the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<NamedValueSet>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,
}

impl ActionRequest {
    pub fn start(uuid: Uuid, service_name: impl Into<String>, params: Option<NamedValueSet>) -> Self {
        ActionRequest {
            uuid,
            service_name: Some(service_name.into()),
            params,
            cancel: false,
        }
    }

    pub fn cancel(uuid: Uuid) -> Self {
        ActionRequest {
            uuid,
            service_name: None,
            params: None,
            cancel: true,
        }
    }

    pub fn estimated_content_size(&self) -> usize {
        24 + self.service_name.as_ref().map_or(0, |n| 5 + n.len())
            + self
                .params
                .as_ref()
                .map_or(0, NamedValueSet::estimated_content_size)
    }
}

/// A state change of a remote service action, streamed back to the
/// initiating side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionUpdate {
    pub uuid: Uuid,
    pub state: ActionState,
}

impl ActionUpdate {
    pub fn estimated_content_size(&self) -> usize {
        24 + self.state.estimated_content_size()
    }
}

/// Coarse lifecycle position of a service action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStateCode {
    /// The request has been accepted but the action has not begun running.
    #[default]
    Issued,
    /// The action is running.
    Started,
    /// Terminal: the action finished successfully.
    Complete,
    /// Terminal: the action finished unsuccessfully (including
    /// cancellation).
    Failed,
}

impl ActionStateCode {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStateCode::Complete | ActionStateCode::Failed)
    }
}

/// Full reported state of a service action: lifecycle code, a result-code
/// string (empty on success), and any named values the action produced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    pub code: ActionStateCode,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result_code: String,

    #[serde(default, skip_serializing_if = "NamedValueSet::is_empty")]
    pub values: NamedValueSet,
}

impl ActionState {
    pub fn issued() -> Self {
        Default::default()
    }

    pub fn started() -> Self {
        ActionState {
            code: ActionStateCode::Started,
            ..Default::default()
        }
    }

    pub fn complete(values: NamedValueSet) -> Self {
        ActionState {
            code: ActionStateCode::Complete,
            result_code: String::new(),
            values,
        }
    }

    pub fn failed(result_code: impl Into<String>) -> Self {
        ActionState {
            code: ActionStateCode::Failed,
            result_code: result_code.into(),
            values: Default::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.code.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.code == ActionStateCode::Complete
    }

    pub fn estimated_content_size(&self) -> usize {
        2 + self.result_code.len() + self.values.estimated_content_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_codes() {
        assert!(!ActionStateCode::Issued.is_terminal());
        assert!(!ActionStateCode::Started.is_terminal());
        assert!(ActionStateCode::Complete.is_terminal());
        assert!(ActionStateCode::Failed.is_terminal());
    }

    #[test]
    fn cancel_request_needs_no_service_name() {
        let req = ActionRequest::cancel(Uuid::nil());
        assert!(req.cancel);
        assert!(req.service_name.is_none());
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("service_name").is_none());
    }
}

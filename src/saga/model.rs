//! Saga document model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::actions::{Action, ActionKind};
use crate::envelope::ErrorCode;

/// Well-known saga types. Producers may submit others as free-form strings.
pub mod saga_types {
    pub const INVENTORY_TRANSACTION: &str = "inventory_transaction";
    pub const QUEST_REWARD: &str = "quest_reward";
    pub const TRADE_TRANSACTION: &str = "trade_transaction";
    pub const CHARACTER_CREATION: &str = "character_creation";
    pub const STORAGE_OPERATION: &str = "storage_operation";
    pub const CHARACTER_RESPAWN: &str = "character_respawn";
    pub const TRANSPORT_NOTICE: &str = "transport_notice";
    pub const TRANSPORT_WARP: &str = "transport_warp";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// One action of a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub step_id: String,
    #[serde(default)]
    pub status: StepStatus,
    pub action: ActionKind,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl Step {
    pub fn new(step_id: impl Into<String>, action: &Action) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            action: action.kind(),
            payload: action.payload(),
            created_at: now,
            updated_at: now,
            started_at: None,
            error_code: None,
        }
    }

    /// Typed action of this step.
    pub fn parsed(&self) -> Result<Action, serde_json::Error> {
        Action::parse(self.action, &self.payload)
    }

    pub(crate) fn set_status(&mut self, status: StepStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Orchestration state. Terminal states never change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    #[default]
    Pending,
    /// Index of the single step awaiting its outcome.
    InFlight(usize),
    Completed,
    Failed,
    /// Failed, and at least one compensation could not be issued.
    PartiallyCompensated,
}

impl SagaState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::PartiallyCompensated
        )
    }
}

/// First failure of a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaFailure {
    pub failed_step: String,
    pub error_code: ErrorCode,
    pub reason: String,
}

/// A multi-step distributed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Saga {
    pub transaction_id: Uuid,
    pub saga_type: String,
    #[serde(default)]
    pub initiated_by: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub state: SagaState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SagaFailure>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Saga {
    pub fn new(transaction_id: Uuid, saga_type: impl Into<String>, initiated_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            transaction_id,
            saga_type: saga_type.into(),
            initiated_by: initiated_by.into(),
            steps: Vec::new(),
            state: SagaState::Pending,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a step.
    pub fn step(mut self, step_id: impl Into<String>, action: impl Into<Action>) -> Self {
        self.steps.push(Step::new(step_id, &action.into()));
        self
    }

    /// Index of the first pending step.
    pub fn next_pending(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::Pending)
    }

    pub fn in_flight(&self) -> Option<usize> {
        match self.state {
            SagaState::InFlight(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn set_state(&mut self, state: SagaState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::actions::{AwardItem, AwardMesos};
    use serde_json::json;

    #[test]
    fn test_saga_document_round_trip() {
        let saga = Saga::new(Uuid::new_v4(), saga_types::QUEST_REWARD, "npc:9010000")
            .step("step_1", AwardMesos::new(42, 1000))
            .step("step_2", AwardItem::new(42, 2000001, 5));

        let value = serde_json::to_value(&saga).unwrap();
        assert_eq!(value["steps"][0]["action"], "award_mesos");
        assert_eq!(value["steps"][0]["payload"]["amount"], 1000);
        assert_eq!(value["state"], "pending");

        let back: Saga = serde_json::from_value(value).unwrap();
        assert_eq!(back, saga);
    }

    #[test]
    fn test_submitted_document_defaults() {
        let saga: Saga = serde_json::from_value(json!({
            "transactionId": Uuid::new_v4(),
            "sagaType": "quest_reward",
            "steps": [{
                "stepId": "give",
                "action": "award_asset",
                "payload": { "characterId": 42, "templateId": 2000001, "quantity": 1 }
            }]
        }))
        .unwrap();

        assert_eq!(saga.steps[0].status, StepStatus::Pending);
        assert_eq!(saga.steps[0].action, ActionKind::AwardItem);
        assert_eq!(saga.state, SagaState::Pending);
        assert_eq!(saga.next_pending(), Some(0));
    }

    #[test]
    fn test_in_flight_state_serialization() {
        assert_eq!(serde_json::to_value(SagaState::InFlight(2)).unwrap(), json!({ "in_flight": 2 }));
        assert!(SagaState::PartiallyCompensated.is_terminal());
        assert!(!SagaState::InFlight(0).is_terminal());
    }
}

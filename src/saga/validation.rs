//! Saga shape validation.

use std::collections::HashSet;

use super::actions::Action;
use super::model::{Saga, Step, StepStatus};
use super::{Result, SagaError};

fn invalid(reason: impl Into<String>) -> SagaError {
    SagaError::InvalidSaga(reason.into())
}

/// Validate a submitted saga and expand composite steps in place.
///
/// Rejects empty step lists, unknown or malformed payloads, duplicate step
/// ids, and documents whose step states are not a completed prefix followed
/// by pending steps.
pub fn validate(saga: &mut Saga) -> Result<()> {
    if saga.transaction_id.is_nil() {
        return Err(invalid("transactionId is nil"));
    }
    if saga.saga_type.trim().is_empty() {
        return Err(invalid("sagaType is empty"));
    }
    if saga.steps.is_empty() {
        return Err(invalid("saga has no steps"));
    }

    let mut expanded = Vec::with_capacity(saga.steps.len());
    for step in saga.steps.drain(..) {
        let action = step
            .parsed()
            .map_err(|e| invalid(format!("step {}: malformed {} payload: {}", step.step_id, step.action.as_str(), e)))?;
        action
            .check()
            .map_err(|reason| invalid(format!("step {}: {}", step.step_id, reason)))?;

        match action.expand() {
            Some(parts) => {
                if step.status != StepStatus::Pending {
                    return Err(invalid(format!("composite step {} is not pending", step.step_id)));
                }
                for (suffix, part) in parts {
                    expanded.push(Step::new(format!("{}.{}", step.step_id, suffix), &part));
                }
            }
            None => expanded.push(step),
        }
    }
    saga.steps = expanded;

    let mut seen = HashSet::new();
    for step in &saga.steps {
        if step.step_id.is_empty() {
            return Err(invalid("empty stepId"));
        }
        if !seen.insert(step.step_id.as_str()) {
            return Err(invalid(format!("duplicate stepId {}", step.step_id)));
        }
    }

    check_progress(&saga.steps)
}

fn check_progress(steps: &[Step]) -> Result<()> {
    let mut pending_seen = false;
    for step in steps {
        match step.status {
            StepStatus::Pending => pending_seen = true,
            StepStatus::Completed if pending_seen => {
                return Err(invalid(format!(
                    "step {} completed after a pending step",
                    step.step_id
                )));
            }
            StepStatus::Completed => {}
            StepStatus::Failed => {
                return Err(invalid(format!("step {} already failed", step.step_id)));
            }
        }
    }
    Ok(())
}

/// Typed action of a validated step.
pub(crate) fn action_of(step: &Step) -> Result<Action> {
    step.parsed()
        .map_err(|e| invalid(format!("step {}: {}", step.step_id, e)))
}

//! Bus wiring for the orchestrator.

use std::sync::Arc;

use tracing::warn;

use super::messages::SUBMIT;
use super::model::Saga;
use super::{Orchestrator, SagaError};
use crate::bus::{handler_fn, BusError, HandlerRegistry};
use crate::envelope::Topic;

/// Status variants that can settle an awaited step, per status topic.
pub const STATUS_ROUTES: &[(Topic, &[&str])] = &[
    (
        Topic::EventCompartmentStatus,
        &["CREATED", "DESTROYED", "EQUIPPED", "UNEQUIPPED", "RELEASED", "ACCEPTED", "ERROR"],
    ),
    (
        Topic::EventCharacterStatus,
        &[
            "MESOS_UPDATED",
            "EXPERIENCE_CHANGED",
            "JOB_CHANGED",
            "MAP_CHANGED",
            "CREATED",
            "CREATION_FAILED",
            "ERROR",
        ],
    ),
    (Topic::EventSkillStatus, &["CREATED", "UPDATED", "DELETED", "ERROR"]),
    (Topic::EventInviteStatus, &["CREATED", "ERROR"]),
    (Topic::EventInstanceTransport, &["ACCEPTED", "ERROR"]),
    (Topic::EventStorageStatus, &["DEPOSITED", "WITHDRAWN", "MESOS_UPDATED", "ERROR"]),
];

/// Register saga submission and every step status with `registry`.
///
/// Invalid submissions are logged and discarded; they never produce events.
pub fn register(registry: &mut HandlerRegistry, orchestrator: &Arc<Orchestrator>) {
    let topics = orchestrator.topics().clone();

    let submit = Arc::clone(orchestrator);
    registry.register(
        topics.name(Topic::CommandSaga),
        SUBMIT,
        "saga.submit",
        handler_fn(move |envelope| {
            let orchestrator = Arc::clone(&submit);
            async move {
                let saga: Saga = match envelope.decode() {
                    Ok(saga) => saga,
                    Err(e) => {
                        warn!(key = envelope.key, error = %e, "Discarding malformed saga submission");
                        return Ok(());
                    }
                };
                match orchestrator.submit(&envelope.tenant, saga).await {
                    Ok(_) => Ok(()),
                    Err(SagaError::InvalidSaga(reason)) => {
                        warn!(
                            tenant_id = %envelope.tenant.id,
                            transaction_id = ?envelope.transaction_id,
                            reason = %reason,
                            "Discarding invalid saga"
                        );
                        Ok(())
                    }
                    Err(e) => Err(BusError::handler("saga.submit", e)),
                }
            }
        }),
    );

    for (topic, types) in STATUS_ROUTES {
        for message_type in *types {
            let ingest = Arc::clone(orchestrator);
            registry.register(
                topics.name(*topic),
                *message_type,
                "saga.status",
                handler_fn(move |envelope| {
                    let orchestrator = Arc::clone(&ingest);
                    async move {
                        orchestrator
                            .ingest(&envelope)
                            .await
                            .map(|_| ())
                            .map_err(|e| BusError::handler("saga.status", e))
                    }
                }),
            );
        }
    }
}

//! Saga execution.
//!
//! Per saga, execution is strictly sequential. A step that awaits a status
//! event leaves a correlator behind, keyed by `(tenant, transactionId)`;
//! whichever of status ingest, timeout or cancel removes the correlator
//! first owns the step's outcome. Each correlator carries a generation so a
//! timer armed for an earlier step can never settle a later one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actions::{Action, Command, Dispatch, Expectation};
use super::messages::{self, SagaCompleted, SagaFailed, StatusFailure};
use super::model::{Saga, SagaFailure, SagaState, StepStatus};
use super::resolver::{self, Resolver};
use super::store::SagaStore;
use super::{validation, Result, SagaConfig, SagaError};
use crate::bus::EventBus;
use crate::envelope::{self, Envelope, ErrorCode, Topic, Topics};
use crate::jsonapi::ResolveError;
use crate::tenant::Tenant;
use crate::utils::shutdown::Shutdown;

type CorrelationKey = (Uuid, Uuid);

/// One-shot registration for the status of an in-flight step.
struct Correlator {
    generation: u64,
    step: usize,
    expect: Expectation,
    timer: AbortHandle,
}

impl Correlator {
    fn matches(&self, topic: Topic, envelope: &Envelope) -> bool {
        let expected_type = self.expect.success.contains(&envelope.message_type.as_str())
            || self.expect.failure.contains(&envelope.message_type.as_str());
        topic == self.expect.topic
            && expected_type
            && self.expect.subject.map_or(true, |subject| subject == envelope.key)
    }
}

enum StepOutcome {
    Completed,
    Awaiting,
    Failed(ErrorCode, String),
}

/// The saga orchestrator.
pub struct Orchestrator {
    store: Arc<dyn SagaStore>,
    bus: Arc<dyn EventBus>,
    resolver: Arc<dyn Resolver>,
    topics: Topics,
    config: SagaConfig,
    correlators: Mutex<HashMap<CorrelationKey, Correlator>>,
    generation: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SagaStore>,
        bus: Arc<dyn EventBus>,
        resolver: Arc<dyn Resolver>,
        topics: Topics,
        config: SagaConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            resolver,
            topics,
            config,
            correlators: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Validate, persist and start a saga.
    ///
    /// Resubmitting a known transaction id is a no-op returning the stored saga.
    pub async fn submit(self: &Arc<Self>, tenant: &Tenant, mut saga: Saga) -> Result<Saga> {
        validation::validate(&mut saga)?;
        let transaction_id = saga.transaction_id;
        saga.set_state(SagaState::Pending);
        saga.failure = None;

        if !self.store.insert(tenant, &saga).await? {
            info!(
                tenant_id = %tenant.id,
                transaction_id = %transaction_id,
                "Duplicate saga submission ignored"
            );
            return self
                .store
                .get(tenant, transaction_id)
                .await?
                .ok_or(SagaError::NotFound(transaction_id));
        }

        info!(
            tenant_id = %tenant.id,
            transaction_id = %transaction_id,
            saga_type = %saga.saga_type,
            initiated_by = %saga.initiated_by,
            steps = saga.steps.len(),
            "Saga submitted"
        );

        self.advance(tenant, saga.clone()).await?;
        Ok(self.store.get(tenant, transaction_id).await?.unwrap_or(saga))
    }

    /// Reconcile a domain status event with the in-flight step it settles.
    ///
    /// Returns `false` when the event matches no live correlator.
    pub async fn ingest(self: &Arc<Self>, envelope: &Envelope) -> Result<bool> {
        let Some(transaction_id) = envelope.transaction_id else {
            return Ok(false);
        };
        let Some(topic) = self.topics.topic_of(&envelope.topic) else {
            return Ok(false);
        };
        let tenant = &envelope.tenant;
        let key = (tenant.id, transaction_id);

        let correlator = {
            let mut correlators = self.correlators.lock().await;
            match correlators.get(&key) {
                Some(c) if c.matches(topic, envelope) => correlators.remove(&key),
                _ => None,
            }
        };
        let Some(correlator) = correlator else {
            debug!(
                transaction_id = %transaction_id,
                topic = %envelope.topic,
                message_type = %envelope.message_type,
                "Status matches no in-flight step"
            );
            return Ok(false);
        };
        correlator.timer.abort();

        let Some(mut saga) = self.live_saga(tenant, transaction_id, correlator.step).await? else {
            return Ok(false);
        };

        if correlator.expect.success.contains(&envelope.message_type.as_str()) {
            debug!(
                transaction_id = %transaction_id,
                step_id = %saga.steps[correlator.step].step_id,
                message_type = %envelope.message_type,
                "Step completed"
            );
            saga.steps[correlator.step].set_status(StepStatus::Completed);
            self.advance(tenant, saga).await?;
        } else {
            let failure: StatusFailure = envelope.decode().unwrap_or_default();
            let code = failure.error_code.unwrap_or(ErrorCode::UnknownError);
            let reason = failure
                .reason
                .or(failure.message)
                .unwrap_or_else(|| format!("{} reported {}", envelope.topic, envelope.message_type));
            self.fail_step(tenant, saga, correlator.step, code, reason).await?;
        }
        Ok(true)
    }

    pub async fn query(&self, tenant: &Tenant, transaction_id: Uuid) -> Result<Option<Saga>> {
        self.store.get(tenant, transaction_id).await
    }

    /// Every retained saga of a tenant, oldest first.
    pub async fn list(&self, tenant: &Tenant) -> Result<Vec<Saga>> {
        self.store.list(tenant).await
    }

    /// Fail the in-flight step with `CANCELLED` and compensate.
    ///
    /// Returns `false` when no step of the saga is awaiting an outcome.
    pub async fn cancel(&self, tenant: &Tenant, transaction_id: Uuid) -> Result<bool> {
        let taken = self
            .correlators
            .lock()
            .await
            .remove(&(tenant.id, transaction_id));
        let Some(correlator) = taken else {
            return Ok(false);
        };
        correlator.timer.abort();

        let Some(saga) = self.live_saga(tenant, transaction_id, correlator.step).await? else {
            return Ok(false);
        };
        info!(tenant_id = %tenant.id, transaction_id = %transaction_id, "Saga cancelled");
        self.fail_step(
            tenant,
            saga,
            correlator.step,
            ErrorCode::Cancelled,
            "saga cancelled".to_string(),
        )
        .await?;
        Ok(true)
    }

    /// Re-arm every persisted non-terminal saga after a restart.
    ///
    /// The in-flight command is emitted again; receivers are idempotent on
    /// the transaction id.
    pub async fn resume(self: &Arc<Self>) -> Result<usize> {
        let active = self.store.active().await?;
        let mut resumed = 0;
        for (tenant, saga) in active {
            let transaction_id = saga.transaction_id;
            match self.advance(&tenant, saga).await {
                Ok(()) => resumed += 1,
                Err(e) => error!(
                    tenant_id = %tenant.id,
                    transaction_id = %transaction_id,
                    error = %e,
                    "Failed to resume saga"
                ),
            }
        }
        info!(count = resumed, "Resumed in-flight sagas");
        Ok(resumed)
    }

    /// Drop terminal sagas older than the retention window.
    pub async fn purge_expired(&self) -> Result<usize> {
        let retention = chrono::Duration::seconds(self.config.retention_secs as i64);
        self.store.purge_terminal(Utc::now() - retention).await
    }

    /// Run the retention purge until shutdown.
    pub async fn run_retention(self: Arc<Self>, shutdown: Shutdown) {
        let mut ticker = interval(Duration::from_secs(self.config.retention_sweep_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => return,
            }
            match self.purge_expired().await {
                Ok(0) => {}
                Ok(n) => debug!(count = n, "Purged terminal sagas"),
                Err(e) => warn!(error = %e, "Saga retention purge failed"),
            }
        }
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Load a saga whose in-flight step is still `step`.
    async fn live_saga(&self, tenant: &Tenant, transaction_id: Uuid, step: usize) -> Result<Option<Saga>> {
        let Some(saga) = self.store.get(tenant, transaction_id).await? else {
            warn!(transaction_id = %transaction_id, "Correlated saga missing from store");
            return Ok(None);
        };
        if saga.in_flight() != Some(step) {
            debug!(transaction_id = %transaction_id, state = ?saga.state, "Stale correlation ignored");
            return Ok(None);
        }
        Ok(Some(saga))
    }

    /// Run steps until one awaits a status, the saga fails, or all complete.
    async fn advance(self: &Arc<Self>, tenant: &Tenant, mut saga: Saga) -> Result<()> {
        loop {
            let Some(index) = saga.next_pending() else {
                return self.complete(tenant, saga).await;
            };

            saga.set_state(SagaState::InFlight(index));
            saga.steps[index].started_at = Some(Utc::now());

            match self.run_step(tenant, &mut saga, index).await? {
                StepOutcome::Completed => {
                    saga.steps[index].set_status(StepStatus::Completed);
                }
                StepOutcome::Awaiting => return Ok(()),
                StepOutcome::Failed(code, reason) => {
                    return self.fail_step(tenant, saga, index, code, reason).await;
                }
            }
        }
    }

    async fn run_step(self: &Arc<Self>, tenant: &Tenant, saga: &mut Saga, index: usize) -> Result<StepOutcome> {
        let mut action = match validation::action_of(&saga.steps[index]) {
            Ok(action) => action,
            Err(e) => return Ok(StepOutcome::Failed(ErrorCode::UnknownError, e.to_string())),
        };

        if let Some(lookup) = action.lookup() {
            match resolver::resolve(self.resolver.as_ref(), tenant, &lookup).await {
                Ok(resolved) => {
                    action.apply(resolved);
                    saga.steps[index].payload = action.payload();
                }
                Err(ResolveError::NotFound(what)) => {
                    return Ok(StepOutcome::Failed(lookup.not_found_code(), format!("{} not found", what)));
                }
                Err(e) => return Ok(StepOutcome::Failed(ErrorCode::ServiceError, e.to_string())),
            }
        }

        let transaction_id = saga.transaction_id;
        match action.dispatch() {
            Dispatch::Composite => Ok(StepOutcome::Failed(
                ErrorCode::UnknownError,
                "composite step was not expanded".to_string(),
            )),
            Dispatch::Validate(request) => {
                let result = self
                    .resolver
                    .validate_character(tenant, request.character_id, &request.conditions)
                    .await;
                Ok(match result {
                    Ok(v) if v.passed => StepOutcome::Completed,
                    Ok(v) if v.details.is_empty() => {
                        StepOutcome::Failed(ErrorCode::ValidationFailed, "validation failed".to_string())
                    }
                    Ok(v) => StepOutcome::Failed(ErrorCode::ValidationFailed, v.details.join("; ")),
                    Err(ResolveError::NotFound(what)) => {
                        StepOutcome::Failed(ErrorCode::CharacterNotFound, format!("{} not found", what))
                    }
                    Err(e) => StepOutcome::Failed(ErrorCode::ServiceError, e.to_string()),
                })
            }
            Dispatch::Emit(command) => match self.publish_command(tenant, transaction_id, command).await {
                Ok(()) => Ok(StepOutcome::Completed),
                Err(e) => Ok(StepOutcome::Failed(ErrorCode::ServiceError, e.to_string())),
            },
            Dispatch::Await { command, expect } => {
                let generation = self.arm(tenant, saga, index, &action, expect).await;
                self.store.save(tenant, saga).await?;

                debug!(
                    transaction_id = %transaction_id,
                    step_id = %saga.steps[index].step_id,
                    action = %action.kind().as_str(),
                    message_type = %command.message_type,
                    key = command.key,
                    "Step dispatched"
                );

                if let Err(e) = self.publish_command(tenant, transaction_id, command).await {
                    if self.disarm(tenant.id, transaction_id, generation).await {
                        return Ok(StepOutcome::Failed(ErrorCode::ServiceError, e.to_string()));
                    }
                }
                Ok(StepOutcome::Awaiting)
            }
        }
    }

    /// Register the correlator and its timeout for an awaited step.
    async fn arm(
        self: &Arc<Self>,
        tenant: &Tenant,
        saga: &Saga,
        index: usize,
        action: &Action,
        expect: Expectation,
    ) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let timeout = self.config.timeout_for(action.kind());
        let transaction_id = saga.transaction_id;

        let this = Arc::clone(self);
        let timer_tenant = tenant.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.expire(&timer_tenant, transaction_id, generation).await;
        });

        let previous = self.correlators.lock().await.insert(
            (tenant.id, transaction_id),
            Correlator {
                generation,
                step: index,
                expect,
                timer: timer.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            previous.timer.abort();
        }
        generation
    }

    /// Remove the correlator if it is still `generation`.
    async fn disarm(&self, tenant_id: Uuid, transaction_id: Uuid, generation: u64) -> bool {
        let mut correlators = self.correlators.lock().await;
        let key = (tenant_id, transaction_id);
        match correlators.get(&key) {
            Some(c) if c.generation == generation => {
                if let Some(c) = correlators.remove(&key) {
                    c.timer.abort();
                }
                true
            }
            _ => false,
        }
    }

    async fn expire(&self, tenant: &Tenant, transaction_id: Uuid, generation: u64) {
        let taken = {
            let mut correlators = self.correlators.lock().await;
            let key = (tenant.id, transaction_id);
            match correlators.get(&key) {
                Some(c) if c.generation == generation => correlators.remove(&key),
                _ => None,
            }
        };
        let Some(correlator) = taken else {
            return;
        };

        let outcome = async {
            let Some(saga) = self.live_saga(tenant, transaction_id, correlator.step).await? else {
                return Ok(());
            };
            warn!(
                tenant_id = %tenant.id,
                transaction_id = %transaction_id,
                step_id = %saga.steps[correlator.step].step_id,
                "Step timed out"
            );
            self.fail_step(
                tenant,
                saga,
                correlator.step,
                ErrorCode::Timeout,
                "no status received before the step timeout".to_string(),
            )
            .await
        };
        if let Err(e) = outcome.await {
            error!(transaction_id = %transaction_id, error = %e, "Failed to time out step");
        }
    }

    async fn publish_command(&self, tenant: &Tenant, transaction_id: Uuid, command: Command) -> Result<()> {
        let envelope = Envelope::new(
            self.topics.name(command.topic),
            command.key,
            tenant.clone(),
            command.message_type,
            &command.body,
        )?
        .with_transaction(transaction_id);
        self.bus.publish(Arc::new(envelope)).await?;
        Ok(())
    }

    // ========================================================================
    // Termination
    // ========================================================================

    async fn complete(&self, tenant: &Tenant, mut saga: Saga) -> Result<()> {
        saga.set_state(SagaState::Completed);
        self.store.save(tenant, &saga).await?;

        let body = SagaCompleted {
            transaction_id: saga.transaction_id,
            saga_type: saga.saga_type.clone(),
        };
        self.publish_status(tenant, saga.transaction_id, messages::COMPLETED, &body)
            .await?;

        info!(
            tenant_id = %tenant.id,
            transaction_id = %saga.transaction_id,
            saga_type = %saga.saga_type,
            "Saga completed"
        );
        Ok(())
    }

    async fn fail_step(
        &self,
        tenant: &Tenant,
        mut saga: Saga,
        index: usize,
        code: ErrorCode,
        reason: String,
    ) -> Result<()> {
        let step_id = saga.steps[index].step_id.clone();
        saga.steps[index].set_status(StepStatus::Failed);
        saga.steps[index].error_code = Some(code.clone());

        warn!(
            tenant_id = %tenant.id,
            transaction_id = %saga.transaction_id,
            step_id = %step_id,
            error_code = %code,
            reason = %reason,
            "Saga step failed"
        );

        let fully_compensated = self.compensate(tenant, &saga, index).await;
        saga.failure = Some(SagaFailure {
            failed_step: step_id.clone(),
            error_code: code.clone(),
            reason: reason.clone(),
        });
        saga.set_state(if fully_compensated {
            SagaState::Failed
        } else {
            SagaState::PartiallyCompensated
        });
        self.store.save(tenant, &saga).await?;

        let body = SagaFailed {
            transaction_id: saga.transaction_id,
            saga_type: saga.saga_type.clone(),
            failed_step: step_id,
            error_code: code.clone(),
            reason,
            partially_compensated: !fully_compensated,
        };
        self.publish_status(tenant, saga.transaction_id, messages::FAILED, &body)
            .await?;

        if let Ok(Action::StartTransport(p)) = validation::action_of(&saga.steps[index]) {
            self.notify_transport_failure(tenant, &saga, p.character_id, &code)
                .await;
        }
        Ok(())
    }

    /// Issue inverses of completed steps before `failed`, newest first.
    ///
    /// A single pass; returns `false` if any inverse could not be issued.
    /// Inverses are published without awaiting their statuses, so a
    /// participant that rejects one goes unnoticed here. The saga only ends
    /// `PartiallyCompensated` when an inverse fails to publish.
    async fn compensate(&self, tenant: &Tenant, saga: &Saga, failed: usize) -> bool {
        let mut complete = true;
        for step in saga.steps[..failed].iter().rev() {
            if step.status != StepStatus::Completed {
                continue;
            }
            let inverse = match validation::action_of(step) {
                Ok(action) => action.inverse(),
                Err(e) => {
                    warn!(step_id = %step.step_id, error = %e, "Cannot decode step for compensation");
                    complete = false;
                    continue;
                }
            };
            let Some(inverse) = inverse else {
                continue;
            };
            let command = match inverse.dispatch() {
                Dispatch::Await { command, .. } | Dispatch::Emit(command) => command,
                Dispatch::Validate(_) | Dispatch::Composite => continue,
            };

            match self.publish_command(tenant, saga.transaction_id, command).await {
                Ok(()) => debug!(
                    transaction_id = %saga.transaction_id,
                    step_id = %step.step_id,
                    inverse = %inverse.kind().as_str(),
                    "Compensation issued"
                ),
                Err(e) => {
                    warn!(
                        transaction_id = %saga.transaction_id,
                        step_id = %step.step_id,
                        error = %e,
                        "Compensation failed"
                    );
                    complete = false;
                }
            }
        }
        complete
    }

    async fn publish_status<B: serde::Serialize>(
        &self,
        tenant: &Tenant,
        transaction_id: Uuid,
        message_type: &str,
        body: &B,
    ) -> Result<()> {
        let envelope = Envelope::new(
            self.topics.name(Topic::EventSagaStatus),
            envelope::transaction_key(transaction_id),
            tenant.clone(),
            message_type,
            body,
        )?
        .with_transaction(transaction_id);
        self.bus.publish(Arc::new(envelope)).await?;
        Ok(())
    }

    /// Pink text to the character through a message saga.
    async fn notify_transport_failure(&self, tenant: &Tenant, saga: &Saga, character_id: u32, code: &ErrorCode) {
        let notice = messages::message_saga(
            character_id,
            messages::transport_failure_text(code),
            format!("saga:{}", saga.transaction_id),
        );
        let published = match messages::submit_envelope(&self.topics, tenant, &notice) {
            Ok(envelope) => self.bus.publish(Arc::new(envelope)).await.map_err(SagaError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = published {
            warn!(character_id, error = %e, "Failed to submit transport failure notice");
        }
    }
}

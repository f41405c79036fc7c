//! Per-record idempotent side-effect execution.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use autobook_core::{
    BookingPolicy, CreateOutcome, CredentialProvider, ExternalRecord, SideEffectSink, TenantKey,
};
use autobook_state::{idempotency_key, IdempotencyStore};

/// Outcome for one input record. `skipped` marks the success-adjacent
/// cases where no new action was created: an idempotency hit or the
/// collaborator's own dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub identity: String,
    pub success: bool,
    pub skipped: bool,
    pub action_id: Option<String>,
    pub error: Option<String>,
}

/// Books a follow-up action for each newly detected record.
pub struct AutomationExecutor {
    sink: Arc<dyn SideEffectSink>,
    credentials: Arc<dyn CredentialProvider>,
    idempotency: Arc<IdempotencyStore>,
    policy: BookingPolicy,
}

impl AutomationExecutor {
    pub fn new(
        sink: Arc<dyn SideEffectSink>,
        credentials: Arc<dyn CredentialProvider>,
        idempotency: Arc<IdempotencyStore>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            sink,
            credentials,
            idempotency,
            policy,
        }
    }

    /// Process the batch sequentially, one result per record, input
    /// order preserved.
    pub async fn run(
        &self,
        tenant: &TenantKey,
        records: &[ExternalRecord],
        today: NaiveDate,
    ) -> Vec<ExecutionResult> {
        let effective_date = self.policy.effective_date(today);
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.run_one(tenant, record, effective_date).await);
        }
        results
    }

    async fn run_one(
        &self,
        tenant: &TenantKey,
        record: &ExternalRecord,
        effective_date: NaiveDate,
    ) -> ExecutionResult {
        let identity = record.identity();
        let title = &self.policy.title;
        let key = idempotency_key(&identity, effective_date, title);

        if self.idempotency.has(&key).await {
            debug!(tenant = %tenant, %identity, "already executed, skipping");
            return ExecutionResult {
                identity,
                success: true,
                skipped: true,
                action_id: None,
                error: None,
            };
        }

        if !self.credentials.has_credentials(tenant).await {
            debug!(tenant = %tenant, %identity, "no credentials, side effect skipped");
            return ExecutionResult {
                identity,
                success: false,
                skipped: false,
                action_id: None,
                error: Some("not configured".to_string()),
            };
        }

        match self
            .sink
            .create_action(tenant, record, effective_date, title)
            .await
        {
            Ok(CreateOutcome::Created(action)) => {
                // Only confirmed creations are recorded: a retry after
                // a failed attempt must still be able to succeed.
                self.idempotency
                    .record(&key, &action.id, &identity, effective_date, title)
                    .await;
                info!(
                    tenant = %tenant,
                    %identity,
                    action_id = %action.id,
                    date = %effective_date,
                    "action booked"
                );
                ExecutionResult {
                    identity,
                    success: true,
                    skipped: false,
                    action_id: Some(action.id),
                    error: None,
                }
            }
            Ok(CreateOutcome::DuplicateFound) => {
                debug!(tenant = %tenant, %identity, "collaborator dedup hit");
                ExecutionResult {
                    identity,
                    success: true,
                    skipped: true,
                    action_id: None,
                    error: None,
                }
            }
            Err(e) => {
                warn!(tenant = %tenant, %identity, error = %e, "side effect failed");
                ExecutionResult {
                    identity,
                    success: false,
                    skipped: false,
                    action_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

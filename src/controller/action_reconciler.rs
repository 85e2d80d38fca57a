use super::{APPROVAL_POLL, ERROR_REQUEUE, FAST_REQUEUE, MAX_BACKOFF};
use crate::crd::{
    Action as ActionCrd, ActionCondition, ActionPhase, ActionResultStatus, ActionStatus,
    ApprovalStatus,
};
use crate::error::KubeSkippyError;
use crate::events::{self, Severity};
use crate::kinds::{CandidateTarget, TargetKind};
use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::{Api, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::ReconcilerContext;

const FINALIZER: &str = "kubeskippy.io/action-cleanup";

pub async fn reconcile(
    action: Arc<ActionCrd>,
    ctx: Arc<ReconcilerContext>,
) -> std::result::Result<ReconcileAction, KubeSkippyError> {
    let namespace = action.namespace().unwrap_or_default();
    let name = action.name_any();
    let api: Api<ActionCrd> = Api::namespaced(ctx.client.clone(), &namespace);

    debug!(namespace = %namespace, name = %name, "reconciling action");

    if action.meta().deletion_timestamp.is_some() {
        run_finalizer(&action, &ctx, &api, &name).await?;
        return Ok(ReconcileAction::await_change());
    }

    if !has_finalizer(&action) {
        add_finalizer(&api, &name).await?;
        return Ok(ReconcileAction::requeue(FAST_REQUEUE));
    }

    let generation = action.metadata.generation.unwrap_or(0);
    let status = action.status.clone().unwrap_or_default();
    if status.observed_generation != generation && !status.phase.is_terminal() {
        patch_status(&api, &name, |s| {
            s.observed_generation = generation;
        })
        .await?;
    }

    let policy_key = format!("{}/{}", namespace, action.spec.policy_ref);

    match status.phase {
        ActionPhase::Pending => handle_pending(&action, &api, &name).await,
        ActionPhase::Approved => {
            handle_approved(&action, &ctx, &api, &name, &namespace, &policy_key).await
        }
        ActionPhase::InProgress => {
            handle_in_progress(&action, &ctx, &api, &name, &namespace, &policy_key).await
        }
        ActionPhase::Succeeded | ActionPhase::Failed | ActionPhase::Cancelled => {
            Ok(ReconcileAction::await_change())
        }
    }
}

pub fn error_policy(
    action: Arc<ActionCrd>,
    error: &KubeSkippyError,
    _ctx: Arc<ReconcilerContext>,
) -> ReconcileAction {
    warn!(action = %action.name_any(), error = ?error, "action reconciliation error");
    ReconcileAction::requeue(ERROR_REQUEUE)
}

async fn handle_pending(
    action: &ActionCrd,
    api: &Api<ActionCrd>,
    name: &str,
) -> crate::error::Result<ReconcileAction> {
    let status = action.status.clone().unwrap_or_default();

    if action.spec.approval_required {
        let approved = status.approval.as_ref().map(|a| a.approved).unwrap_or(false);
        if approved {
            patch_status(api, name, |s| {
                s.phase = ActionPhase::Approved;
            })
            .await?;
            return Ok(ReconcileAction::requeue(FAST_REQUEUE));
        }

        if status.approval.is_none() {
            patch_status(api, name, |s| {
                s.approval = Some(ApprovalStatus {
                    required: true,
                    approved: false,
                    approved_by: None,
                });
            })
            .await?;
        }
        return Ok(ReconcileAction::requeue(APPROVAL_POLL));
    }

    patch_status(api, name, |s| {
        s.phase = ActionPhase::Approved;
    })
    .await?;
    Ok(ReconcileAction::requeue(FAST_REQUEUE))
}

async fn handle_approved(
    action: &ActionCrd,
    ctx: &ReconcilerContext,
    api: &Api<ActionCrd>,
    name: &str,
    namespace: &str,
    policy_key: &str,
) -> crate::error::Result<ReconcileAction> {
    let target = build_target(action)?;

    let patch_ref = match &action.spec.action.spec {
        crate::crd::ActionTemplateSpec::Patch { patch } => Some(patch),
        _ => None,
    };
    let validation_input = crate::safety::ActionValidationInput {
        policy_key,
        target: crate::safety::ProtectionSubject {
            namespace: &target.namespace,
            kind: target.kind.kind_name(),
            labels: &target.labels,
        },
        action_spec: &action.spec.action.spec,
        patch: patch_ref,
    };

    let validation = ctx.safety.validate_action(&validation_input).await;
    if !validation.valid {
        let reason = validation.reason.unwrap_or_else(|| "validation failed".to_string());
        ctx.safety.record_outcome(policy_key, false).await;
        events::emit(Severity::Warning, namespace, name, "ValidationError", &reason);
        patch_status(api, name, |s| {
            s.phase = ActionPhase::Failed;
            s.completion_time = Some(Utc::now().to_rfc3339());
            s.result = Some(ActionResultStatus {
                success: false,
                message: reason.clone(),
                error: Some(reason.clone()),
                changes: Vec::new(),
                metrics: Default::default(),
            });
            push_condition(s, "Failed", "True", Some("ValidationError"), Some(&reason));
        })
        .await?;
        return Ok(ReconcileAction::await_change());
    }

    patch_status(api, name, |s| {
        s.phase = ActionPhase::InProgress;
        s.start_time = Some(Utc::now().to_rfc3339());
    })
    .await?;
    Ok(ReconcileAction::requeue(FAST_REQUEUE))
}

async fn handle_in_progress(
    action: &ActionCrd,
    ctx: &ReconcilerContext,
    api: &Api<ActionCrd>,
    name: &str,
    namespace: &str,
    policy_key: &str,
) -> crate::error::Result<ReconcileAction> {
    let status = action.status.clone().unwrap_or_default();
    let now = Utc::now();

    if let Some(start_time) = status.start_time.as_deref().and_then(parse_rfc3339) {
        let elapsed = (now - start_time).num_seconds().max(0) as u64;
        if elapsed > action.spec.timeout_seconds {
            ctx.safety.record_outcome(policy_key, false).await;
            events::emit(Severity::Warning, namespace, name, "Timeout", "action exceeded its timeout");
            patch_status(api, name, |s| {
                s.phase = ActionPhase::Failed;
                s.completion_time = Some(now.to_rfc3339());
                s.result = Some(ActionResultStatus {
                    success: false,
                    message: "timed out".to_string(),
                    error: Some("timeout".to_string()),
                    changes: Vec::new(),
                    metrics: Default::default(),
                });
                push_condition(s, "Failed", "True", Some("Timeout"), None);
            })
            .await?;
            return Ok(ReconcileAction::await_change());
        }
    }

    let target = build_target(action)?;
    let attempt = status.attempts + 1;

    let outcome = ctx
        .remediation
        .execute(&target, &action.spec.action.spec, action.spec.dry_run)
        .await;

    match outcome {
        Ok(result) if result.success => {
            if action.spec.require_health_check && !action.spec.dry_run {
                let timeout = Duration::from_secs(action.spec.health_check_timeout_seconds);
                let healthy = ctx.remediation.health_check(&target, timeout).await;
                let healthy = match healthy {
                    Ok(healthy) => healthy,
                    Err(e) => {
                        warn!(action = %name, error = %e, "health check errored");
                        false
                    }
                };
                if !healthy {
                    ctx.safety.record_outcome(policy_key, false).await;
                    let message =
                        "target did not become ready within health check timeout".to_string();
                    events::emit(Severity::Warning, namespace, name, "HealthCheckFailed", &message);
                    patch_status(api, name, |s| {
                        s.phase = ActionPhase::Failed;
                        s.attempts = attempt;
                        s.last_attempt_time = Some(now.to_rfc3339());
                        s.completion_time = Some(now.to_rfc3339());
                        s.result = Some(ActionResultStatus {
                            success: false,
                            message: message.clone(),
                            error: Some(message.clone()),
                            changes: result.changes.clone(),
                            metrics: result.metrics.clone(),
                        });
                        push_condition(s, "Failed", "True", Some("HealthCheckFailed"), Some(&message));
                    })
                    .await?;
                    return Ok(ReconcileAction::await_change());
                }
            }

            ctx.safety.record_outcome(policy_key, true).await;
            events::emit(Severity::Normal, namespace, name, "ActionSucceeded", &result.message);
            patch_status(api, name, |s| {
                s.phase = ActionPhase::Succeeded;
                s.attempts = attempt;
                s.last_attempt_time = Some(now.to_rfc3339());
                s.completion_time = Some(now.to_rfc3339());
                s.result = Some(ActionResultStatus {
                    success: true,
                    message: result.message.clone(),
                    error: None,
                    changes: result.changes.clone(),
                    metrics: result.metrics.clone(),
                });
                push_condition(s, "Succeeded", "True", Some("Executed"), None);
            })
            .await?;
            Ok(ReconcileAction::await_change())
        }
        Ok(result) => {
            finish_attempt(action, ctx, api, name, namespace, policy_key, attempt, result.message, now).await
        }
        Err(e) => {
            finish_attempt(action, ctx, api, name, namespace, policy_key, attempt, e.to_string(), now).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn finish_attempt(
    action: &ActionCrd,
    ctx: &ReconcilerContext,
    api: &Api<ActionCrd>,
    name: &str,
    namespace: &str,
    policy_key: &str,
    attempt: u32,
    message: String,
    now: DateTime<Utc>,
) -> crate::error::Result<ReconcileAction> {
    let retry_policy = &action.spec.retry_policy;

    if attempt < retry_policy.max_attempts {
        let delay = backoff_for(retry_policy, attempt);
        patch_status(api, name, |s| {
            s.attempts = attempt;
            s.last_attempt_time = Some(now.to_rfc3339());
        })
        .await?;
        Ok(ReconcileAction::requeue(delay))
    } else {
        ctx.safety.record_outcome(policy_key, false).await;
        events::emit(Severity::Warning, namespace, name, "ActionFailed", &message);
        patch_status(api, name, |s| {
            s.phase = ActionPhase::Failed;
            s.attempts = attempt;
            s.last_attempt_time = Some(now.to_rfc3339());
            s.completion_time = Some(now.to_rfc3339());
            s.result = Some(ActionResultStatus {
                success: false,
                message: message.clone(),
                error: Some(message.clone()),
                changes: Vec::new(),
                metrics: Default::default(),
            });
            push_condition(s, "Failed", "True", Some("AttemptsExhausted"), Some(&message));
        })
        .await?;
        Ok(ReconcileAction::await_change())
    }
}

fn backoff_for(retry_policy: &crate::crd::RetryPolicy, attempt: u32) -> Duration {
    let seconds = retry_policy.backoff_delay_seconds as f64
        * retry_policy.backoff_multiplier.powi((attempt.max(1) - 1) as i32);
    Duration::from_secs_f64(seconds.max(0.0)).min(MAX_BACKOFF)
}

fn build_target(action: &ActionCrd) -> crate::error::Result<CandidateTarget> {
    let resource = &action.spec.target_resource;
    let kind = TargetKind::from_api_kind(&resource.api_version, &resource.kind).ok_or_else(|| {
        KubeSkippyError::ValidationError(format!(
            "unsupported target kind {}/{}",
            resource.api_version, resource.kind
        ))
    })?;
    Ok(CandidateTarget {
        kind,
        namespace: resource.namespace.clone(),
        name: resource.name.clone(),
        uid: resource.uid.clone(),
        labels: BTreeMap::new(),
    })
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn has_finalizer(action: &ActionCrd) -> bool {
    action
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|f| f == FINALIZER))
        .unwrap_or(false)
}

async fn add_finalizer(api: &Api<ActionCrd>, name: &str) -> crate::error::Result<()> {
    let patch = serde_json::json!({ "metadata": { "finalizers": [FINALIZER] } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(KubeSkippyError::KubeError)?;
    Ok(())
}

async fn run_finalizer(
    action: &ActionCrd,
    ctx: &ReconcilerContext,
    api: &Api<ActionCrd>,
    name: &str,
) -> crate::error::Result<()> {
    if !has_finalizer(action) {
        return Ok(());
    }

    let status = action.status.clone().unwrap_or_default();
    if !status.phase.is_terminal() {
        if let (Ok(target), Some(result)) = (build_target(action), status.result.as_ref()) {
            if let Err(e) = ctx.remediation.rollback(&target, &result.changes).await {
                warn!(action = %name, error = %e, "rollback on delete failed");
            }
        }
    }

    let finalizers: Vec<String> = action
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();

    let patch = serde_json::json!({
        "status": { "phase": "Cancelled" },
    });
    let _ = api
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await;

    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(KubeSkippyError::KubeError)?;
    Ok(())
}

async fn patch_status(
    api: &Api<ActionCrd>,
    name: &str,
    mutate: impl FnOnce(&mut ActionStatus),
) -> crate::error::Result<()> {
    let current = api.get_status(name).await.map_err(KubeSkippyError::KubeError)?;
    let mut status = current.status.unwrap_or_default();
    mutate(&mut status);

    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(KubeSkippyError::KubeError)?;
    Ok(())
}

fn push_condition(
    status: &mut ActionStatus,
    condition_type: &str,
    condition_status: &str,
    reason: Option<&str>,
    message: Option<&str>,
) {
    status.conditions.push(ActionCondition {
        condition_type: condition_type.to_string(),
        status: condition_status.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.map(String::from),
        message: message.map(String::from),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ActionSpec, ActionTemplate, ActionTemplateSpec, RetryPolicy, TargetResource};

    fn retry_policy(max_attempts: u32, delay: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_delay_seconds: delay,
            backoff_multiplier: multiplier,
        }
    }

    #[test]
    fn backoff_for_grows_geometrically_from_first_attempt() {
        let policy = retry_policy(5, 10, 2.0);
        assert_eq!(backoff_for(&policy, 1), Duration::from_secs(10));
        assert_eq!(backoff_for(&policy, 2), Duration::from_secs(20));
        assert_eq!(backoff_for(&policy, 3), Duration::from_secs(40));
    }

    #[test]
    fn backoff_for_is_capped_at_max_backoff() {
        let policy = retry_policy(20, 3600, 3.0);
        assert_eq!(backoff_for(&policy, 10), MAX_BACKOFF);
    }

    #[test]
    fn parse_rfc3339_rejects_garbage() {
        assert!(parse_rfc3339("not-a-timestamp").is_none());
        assert!(parse_rfc3339("2024-01-01T00:00:00Z").is_some());
    }

    fn action() -> ActionCrd {
        ActionCrd::new(
            "restart-crashers-web-deadbeef",
            ActionSpec {
                policy_ref: "restart-crashers".to_string(),
                target_resource: TargetResource {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    namespace: "default".to_string(),
                    name: "web".to_string(),
                    uid: Some("target-uid".to_string()),
                },
                action: ActionTemplate {
                    name: "restart".to_string(),
                    priority: 1,
                    requires_approval: false,
                    spec: ActionTemplateSpec::Delete {},
                    timeout_seconds: None,
                    retry_policy: None,
                },
                approval_required: false,
                dry_run: false,
                timeout_seconds: 300,
                retry_policy: RetryPolicy::default(),
                require_health_check: false,
                health_check_timeout_seconds: 60,
            },
        )
    }

    #[test]
    fn build_target_resolves_registered_kind() {
        let target = build_target(&action()).expect("deployment is a registered kind");
        assert_eq!(target.namespace, "default");
        assert_eq!(target.name, "web");
        assert_eq!(target.uid.as_deref(), Some("target-uid"));
    }

    #[test]
    fn build_target_rejects_unregistered_kind() {
        let mut a = action();
        a.spec.target_resource.api_version = "batch/v1".to_string();
        a.spec.target_resource.kind = "CronJob".to_string();
        assert!(build_target(&a).is_err());
    }

    #[test]
    fn has_finalizer_detects_presence_and_absence() {
        let mut a = action();
        assert!(!has_finalizer(&a));

        a.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        assert!(has_finalizer(&a));
    }
}

use super::{ACTIVE_REQUEUE, ERROR_REQUEUE, FAST_REQUEUE, MONITOR_REQUEUE};
use crate::advisor::TriggeredAction;
use crate::crd::{
    Action as ActionCrd, ActionSpec, ActionTemplate, ActionTemplateSpec, Policy, PolicyCondition,
    PolicyMode, Selector, TargetResource, Trigger, TriggerSpec,
};
use crate::error::KubeSkippyError;
use crate::events::{self, Severity};
use crate::kinds::{self, CandidateTarget, TargetKind};
use crate::safety::{ActionValidationInput, ProtectionSubject};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event as K8sEvent;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::{Api, Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::ReconcilerContext;

const FINALIZER: &str = "kubeskippy.io/policy-cleanup";

pub async fn reconcile(
    policy: Arc<Policy>,
    ctx: Arc<ReconcilerContext>,
) -> std::result::Result<ReconcileAction, KubeSkippyError> {
    let namespace = policy.namespace().unwrap_or_default();
    let name = policy.name_any();
    let api: Api<Policy> = Api::namespaced(ctx.client.clone(), &namespace);

    debug!(namespace = %namespace, name = %name, "reconciling policy");

    if policy.meta().deletion_timestamp.is_some() {
        run_finalizer(&policy, &ctx, &api, &namespace, &name).await?;
        return Ok(ReconcileAction::await_change());
    }

    if !has_finalizer(&policy) {
        add_finalizer(&api, &name).await?;
        return Ok(ReconcileAction::requeue(FAST_REQUEUE));
    }

    let generation = policy.metadata.generation.unwrap_or(0);
    let observed = policy.status.as_ref().map(|s| s.observed_generation).unwrap_or(-1);
    if observed != generation {
        patch_status(&api, &name, |status| {
            status.observed_generation = generation;
            status.last_evaluated = Some(Utc::now().to_rfc3339());
        })
        .await?;
        return Ok(ReconcileAction::requeue(FAST_REQUEUE));
    }

    if policy.spec.mode == PolicyMode::Monitor {
        patch_status(&api, &name, |status| {
            status.last_evaluated = Some(Utc::now().to_rfc3339());
        })
        .await?;
        return Ok(ReconcileAction::requeue(MONITOR_REQUEUE));
    }

    let policy_key = format!("{}/{}", namespace, name);
    let max_actions_per_hour = policy.spec.safety_rules.max_actions_per_hour;
    if !ctx.safety.check_rate_limit(&policy_key, max_actions_per_hour).await {
        events::emit(
            Severity::Warning,
            &namespace,
            &name,
            "RateLimited",
            "policy has exhausted its hourly action budget",
        );
        patch_status(&api, &name, |status| {
            status.last_evaluated = Some(Utc::now().to_rfc3339());
            upsert_condition(status, "RateLimited", "True", Some("RateLimited"));
        })
        .await?;
        return Ok(ReconcileAction::requeue(ACTIVE_REQUEUE));
    }

    let metrics_snapshot = match ctx.metrics.collect(&policy).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "metrics collection failed, degrading to empty snapshot");
            Default::default()
        }
    };

    let mut active_triggers = Vec::new();
    let mut trigger_fire_times: BTreeMap<String, String> = policy
        .status
        .as_ref()
        .map(|s| s.trigger_last_fired.clone())
        .unwrap_or_default();
    let mut candidates: Vec<(CandidateTarget, ActionTemplate)> = Vec::new();

    let now = Utc::now();

    for trigger in &policy.spec.triggers {
        if let Some(last_fired) = trigger_fire_times.get(&trigger.name) {
            if let Ok(last_fired) = DateTime::parse_from_rfc3339(last_fired) {
                let elapsed = (now - last_fired.with_timezone(&Utc)).num_seconds();
                if elapsed >= 0 && (elapsed as u64) < trigger.cooldown_period_seconds {
                    continue;
                }
            }
        }

        let evaluation = match &trigger.spec {
            TriggerSpec::Metric { .. } => {
                ctx.metrics.evaluate_trigger(trigger, &metrics_snapshot).await
            }
            TriggerSpec::Event { .. } => {
                evaluate_event_trigger(&ctx.client, &policy.spec.selector, &namespace, trigger).await
            }
            TriggerSpec::Condition { .. } => {
                evaluate_condition_trigger(&ctx.client, &policy.spec.selector, &namespace, trigger).await
            }
        };

        let (fired, reason) = match evaluation {
            Ok(result) => result,
            Err(e) => {
                warn!(trigger = %trigger.name, error = %e, "trigger evaluation failed, skipping");
                continue;
            }
        };

        if !fired {
            continue;
        }

        debug!(trigger = %trigger.name, reason = %reason, "trigger fired");
        active_triggers.push(trigger.name.clone());
        trigger_fire_times.insert(trigger.name.clone(), now.to_rfc3339());

        for ns in kinds::effective_namespaces(&policy.spec.selector, &namespace) {
            for kind_selector in &policy.spec.selector.kinds {
                let Some(target_kind) =
                    TargetKind::from_api_kind(&kind_selector.api_version, &kind_selector.kind)
                else {
                    continue;
                };

                let found = match kinds::list_candidates(
                    &ctx.client,
                    target_kind,
                    ns,
                    &policy.spec.selector,
                )
                .await
                {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(kind = %kind_selector.kind, error = %e, "target enumeration failed, skipping kind");
                        continue;
                    }
                };

                for candidate in found {
                    if kinds::is_excluded(kind_selector, &candidate.name) {
                        continue;
                    }
                    for action_template in &policy.spec.actions {
                        candidates.push((candidate.clone(), action_template.clone()));
                    }
                }
            }
        }
    }

    if candidates.is_empty() {
        patch_status(&api, &name, |status| {
            status.last_evaluated = Some(now.to_rfc3339());
            status.active_triggers = active_triggers.clone();
            status.trigger_last_fired = trigger_fire_times.clone();
        })
        .await?;
        return Ok(ReconcileAction::requeue(ACTIVE_REQUEUE));
    }

    let triggered: Vec<TriggeredAction> = candidates
        .iter()
        .enumerate()
        .map(|(i, (target, action_template))| TriggeredAction {
            id: i.to_string(),
            target_namespace: target.namespace.clone(),
            target_name: target.name.clone(),
            target_kind: target.kind.kind_name().to_string(),
            action_type: action_type_name(&action_template.spec).to_string(),
            priority: action_template.priority,
        })
        .collect();

    let metrics_summary = format!(
        "namespaces={:?} collected_at={:?}",
        metrics_snapshot.namespaces, metrics_snapshot.collected_at
    );

    let mut selected = ctx.advisor.analyze(&metrics_summary, triggered).await;
    selected.sort_by_key(|annotated| annotated.candidate.priority);
    selected.truncate(5);

    let mut actions_created = 0i64;

    for annotated in &selected {
        let idx: usize = match annotated.candidate.id.parse() {
            Ok(idx) => idx,
            Err(_) => continue,
        };
        let Some((target, action_template)) = candidates.get(idx) else {
            continue;
        };

        let patch_ref = match &action_template.spec {
            ActionTemplateSpec::Patch { patch } => Some(patch),
            _ => None,
        };
        let validation_input = ActionValidationInput {
            policy_key: &policy_key,
            target: ProtectionSubject {
                namespace: &target.namespace,
                kind: target.kind.kind_name(),
                labels: &target.labels,
            },
            action_spec: &action_template.spec,
            patch: patch_ref,
        };

        let validation = ctx.safety.validate_action(&validation_input).await;
        if !validation.valid {
            events::emit(
                Severity::Warning,
                &target.namespace,
                &target.name,
                "ValidationError",
                validation.reason.as_deref().unwrap_or("validation failed"),
            );
            continue;
        }

        let action_crd = build_action(&policy, &name, target, action_template);
        let action_api: Api<ActionCrd> = Api::namespaced(ctx.client.clone(), &target.namespace);
        match action_api.create(&PostParams::default(), &action_crd).await {
            Ok(created) => {
                actions_created += 1;
                ctx.safety
                    .consume_rate_limit(&policy_key, max_actions_per_hour)
                    .await;
                events::emit(
                    Severity::Normal,
                    &target.namespace,
                    &created.name_any(),
                    "ActionCreated",
                    &format!("created for policy {}", name),
                );
            }
            Err(e) => {
                warn!(target = %target.name, error = %e, "failed to create action, continuing");
            }
        }
    }

    patch_status(&api, &name, |status| {
        status.last_evaluated = Some(now.to_rfc3339());
        status.active_triggers = active_triggers.clone();
        status.trigger_last_fired = trigger_fire_times.clone();
        status.actions_taken += actions_created;
        if actions_created > 0 {
            status.last_action_time = Some(now.to_rfc3339());
        }
        upsert_condition(status, "Ready", "True", Some("Reconciled"));
    })
    .await?;

    Ok(ReconcileAction::requeue(ACTIVE_REQUEUE))
}

pub fn error_policy(policy: Arc<Policy>, error: &KubeSkippyError, _ctx: Arc<ReconcilerContext>) -> ReconcileAction {
    warn!(policy = %policy.name_any(), error = ?error, "policy reconciliation error");
    ReconcileAction::requeue(ERROR_REQUEUE)
}

/// Evaluates an Event trigger by listing the core `Event` objects in the
/// Policy's effective namespaces and summing the `count` of those matching
/// `reason`/`type` whose `lastTimestamp` falls within `windowSeconds`. Fires
/// once that sum reaches the trigger's configured `count`.
async fn evaluate_event_trigger(
    client: &kube::Client,
    selector: &Selector,
    policy_namespace: &str,
    trigger: &Trigger,
) -> crate::error::Result<(bool, String)> {
    let TriggerSpec::Event {
        reason,
        event_type,
        count,
        window_seconds,
    } = &trigger.spec
    else {
        return Ok((false, "trigger is not event-backed".to_string()));
    };

    let cutoff = Utc::now() - chrono::Duration::seconds(*window_seconds as i64);
    let mut matched = 0u32;

    for ns in kinds::effective_namespaces(selector, policy_namespace) {
        let api: Api<K8sEvent> = Api::namespaced(client.clone(), ns);
        let events = api
            .list(&ListParams::default())
            .await
            .map_err(KubeSkippyError::KubeError)?;

        for event in events.items {
            if event.reason.as_deref() != Some(reason.as_str()) {
                continue;
            }
            if event.type_.as_deref() != Some(event_type.as_str()) {
                continue;
            }
            let recent = event
                .last_timestamp
                .as_ref()
                .map(|t| t.0 >= cutoff)
                .unwrap_or(false);
            if !recent {
                continue;
            }
            matched += event.count.unwrap_or(1).max(1) as u32;
        }
    }

    let fired = matched >= *count;
    let message = format!(
        "{} matching '{}' events within {}s ({} {})",
        matched,
        reason,
        window_seconds,
        if fired { ">=" } else { "<" },
        count
    );
    Ok((fired, message))
}

/// Evaluates a Condition trigger by enumerating the Policy's selector
/// candidates and checking each one's `status.conditions` for an entry
/// matching `type`/`status`. Fires as soon as any candidate matches.
async fn evaluate_condition_trigger(
    client: &kube::Client,
    selector: &Selector,
    policy_namespace: &str,
    trigger: &Trigger,
) -> crate::error::Result<(bool, String)> {
    let TriggerSpec::Condition {
        condition_type,
        status,
    } = &trigger.spec
    else {
        return Ok((false, "trigger is not condition-backed".to_string()));
    };

    for ns in kinds::effective_namespaces(selector, policy_namespace) {
        for kind_selector in &selector.kinds {
            let Some(target_kind) =
                TargetKind::from_api_kind(&kind_selector.api_version, &kind_selector.kind)
            else {
                continue;
            };

            let found = kinds::list_candidates(client, target_kind, ns, selector).await?;
            for candidate in found {
                if kinds::is_excluded(kind_selector, &candidate.name) {
                    continue;
                }
                let conditions =
                    kinds::conditions_for(client, target_kind, ns, &candidate.name).await?;
                if conditions
                    .iter()
                    .any(|(t, s)| t == condition_type && s == status)
                {
                    return Ok((
                        true,
                        format!(
                            "{}/{} has condition {}={}",
                            ns, candidate.name, condition_type, status
                        ),
                    ));
                }
            }
        }
    }

    Ok((
        false,
        format!("no candidate currently has condition {}={}", condition_type, status),
    ))
}

fn action_type_name(spec: &ActionTemplateSpec) -> &'static str {
    match spec {
        ActionTemplateSpec::Restart { .. } => "restart",
        ActionTemplateSpec::Scale { .. } => "scale",
        ActionTemplateSpec::Patch { .. } => "patch",
        ActionTemplateSpec::Delete {} => "delete",
    }
}

fn build_action(
    policy: &Policy,
    policy_name: &str,
    target: &CandidateTarget,
    action_template: &ActionTemplate,
) -> ActionCrd {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let action_name = format!(
        "{}-{}-{}",
        policy_name,
        target.name.to_lowercase(),
        &suffix[..8]
    )
    .chars()
    .take(253)
    .collect::<String>();

    let mut action = ActionCrd::new(
        &action_name,
        ActionSpec {
            policy_ref: policy_name.to_string(),
            target_resource: TargetResource {
                api_version: target.kind.api_version().to_string(),
                kind: target.kind.kind_name().to_string(),
                namespace: target.namespace.clone(),
                name: target.name.clone(),
                uid: target.uid.clone(),
            },
            action: action_template.clone(),
            approval_required: action_template.requires_approval,
            dry_run: policy.spec.mode == PolicyMode::Dryrun,
            timeout_seconds: action_template.timeout_seconds.unwrap_or(300),
            retry_policy: action_template.retry_policy.clone().unwrap_or_default(),
            require_health_check: policy.spec.safety_rules.require_health_check,
            health_check_timeout_seconds: policy.spec.safety_rules.health_check_timeout_seconds,
        },
    );
    action.metadata.namespace = Some(target.namespace.clone());
    if let Some(owner_ref) = policy.controller_owner_ref(&()) {
        action.metadata.owner_references = Some(vec![owner_ref]);
    }
    action
}

fn has_finalizer(policy: &Policy) -> bool {
    policy
        .metadata
        .finalizers
        .as_ref()
        .map(|f| f.iter().any(|f| f == FINALIZER))
        .unwrap_or(false)
}

async fn add_finalizer(api: &Api<Policy>, name: &str) -> crate::error::Result<()> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": [FINALIZER]
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(KubeSkippyError::KubeError)?;
    Ok(())
}

async fn run_finalizer(
    policy: &Policy,
    ctx: &ReconcilerContext,
    api: &Api<Policy>,
    namespace: &str,
    name: &str,
) -> crate::error::Result<()> {
    if !has_finalizer(policy) {
        return Ok(());
    }

    let action_api: Api<ActionCrd> = Api::namespaced(ctx.client.clone(), namespace);
    let list_params = kube::api::ListParams::default();
    if let Ok(actions) = action_api.list(&list_params).await {
        for action in actions.items {
            if action.spec.policy_ref == name {
                let _ = action_api
                    .delete(&action.name_any(), &kube::api::DeleteParams::default())
                    .await;
            }
        }
    }

    let finalizers: Vec<String> = policy
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();

    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(KubeSkippyError::KubeError)?;

    events::emit(Severity::Normal, namespace, name, "PolicyDeleted", "owned actions removed");
    Ok(())
}

async fn patch_status(
    api: &Api<Policy>,
    name: &str,
    mutate: impl FnOnce(&mut crate::crd::PolicyStatus),
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

fn upsert_condition(
    status: &mut crate::crd::PolicyStatus,
    condition_type: &str,
    condition_status: &str,
    reason: Option<&str>,
) {
    let now = Utc::now().to_rfc3339();
    if let Some(existing) = status
        .conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        existing.status = condition_status.to_string();
        existing.last_transition_time = now;
        existing.reason = reason.map(String::from);
    } else {
        status.conditions.push(PolicyCondition {
            condition_type: condition_type.to_string(),
            status: condition_status.to_string(),
            last_transition_time: now,
            reason: reason.map(String::from),
            message: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{PolicyMode, PolicySpec, RestartStrategy, Selector};
    use crate::kinds::TargetKind;

    fn policy() -> Policy {
        let mut policy = Policy::new(
            "restart-crashers",
            PolicySpec {
                mode: PolicyMode::Automatic,
                selector: Selector {
                    namespaces: Vec::new(),
                    match_labels: BTreeMap::new(),
                    kinds: Vec::new(),
                },
                triggers: Vec::new(),
                actions: Vec::new(),
                safety_rules: crate::crd::SafetyRules::default(),
            },
        );
        policy.metadata.uid = Some("policy-uid-1".to_string());
        policy
    }

    fn target() -> CandidateTarget {
        CandidateTarget {
            kind: TargetKind::Deployment,
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: Some("abc-123".to_string()),
            labels: BTreeMap::new(),
        }
    }

    fn action_template() -> ActionTemplate {
        ActionTemplate {
            name: "restart".to_string(),
            priority: 1,
            requires_approval: false,
            spec: ActionTemplateSpec::Restart {
                strategy: RestartStrategy::Rolling,
                max_concurrent: 1,
            },
            timeout_seconds: None,
            retry_policy: None,
        }
    }

    #[test]
    fn action_type_name_covers_every_variant() {
        assert_eq!(
            action_type_name(&ActionTemplateSpec::Restart {
                strategy: RestartStrategy::Rolling,
                max_concurrent: 1,
            }),
            "restart"
        );
        assert_eq!(
            action_type_name(&ActionTemplateSpec::Delete {}),
            "delete"
        );
    }

    #[test]
    fn build_action_sets_owner_reference_and_policy_ref() {
        let policy = policy();
        let target = target();
        let template = action_template();

        let action = build_action(&policy, "restart-crashers", &target, &template);

        assert_eq!(action.spec.policy_ref, "restart-crashers");
        assert_eq!(action.spec.target_resource.name, "web");
        assert_eq!(action.spec.target_resource.uid.as_deref(), Some("abc-123"));
        assert_eq!(action.metadata.namespace.as_deref(), Some("default"));
        assert!(action.metadata.owner_references.is_some());
        assert!(action.name_any().starts_with("restart-crashers-web-"));
    }

    #[test]
    fn build_action_marks_dry_run_in_dryrun_mode() {
        let mut policy = policy();
        policy.spec.mode = PolicyMode::Dryrun;
        let action = build_action(&policy, "restart-crashers", &target(), &action_template());
        assert!(action.spec.dry_run);
    }

    #[test]
    fn has_finalizer_detects_presence_and_absence() {
        let mut policy = policy();
        assert!(!has_finalizer(&policy));

        policy.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        assert!(has_finalizer(&policy));
    }

    #[test]
    fn upsert_condition_replaces_existing_entry() {
        let mut status = crate::crd::PolicyStatus::default();
        upsert_condition(&mut status, "Ready", "False", Some("Evaluating"));
        assert_eq!(status.conditions.len(), 1);

        upsert_condition(&mut status, "Ready", "True", Some("Reconciled"));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, "True");
        assert_eq!(status.conditions[0].reason.as_deref(), Some("Reconciled"));
    }
}

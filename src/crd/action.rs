use super::policy::{ActionTemplate, RetryPolicy};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Controller-generated, single-use remediation instance. See spec §3.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kubeskippy.io",
    version = "v1alpha1",
    kind = "Action",
    plural = "actions",
    shortname = "ksa",
    namespaced,
    status = "ActionStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.targetResource.name"}"#,
    printcolumn = r#"{"name":"Attempts","type":"integer","jsonPath":".status.attempts"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub policy_ref: String,
    pub target_resource: TargetResource,
    pub action: ActionTemplate,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Copied from the owning Policy's `safetyRules.requireHealthCheck` at
    /// creation time, so the Action reconciler does not need to re-fetch the
    /// Policy once execution starts.
    #[serde(default)]
    pub require_health_check: bool,
    #[serde(default = "default_health_check_timeout_seconds")]
    pub health_check_timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_health_check_timeout_seconds() -> u64 {
    60
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetResource {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    #[serde(default)]
    pub phase: ActionPhase,

    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub start_time: Option<String>,

    #[serde(default)]
    pub last_attempt_time: Option<String>,

    #[serde(default)]
    pub completion_time: Option<String>,

    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub approval: Option<ApprovalStatus>,

    #[serde(default)]
    pub result: Option<ActionResultStatus>,

    #[serde(default)]
    pub conditions: Vec<ActionCondition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ActionPhase {
    #[default]
    Pending,
    Approved,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl ActionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionPhase::Succeeded | ActionPhase::Failed | ActionPhase::Cancelled
        )
    }
}

impl std::fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionPhase::Pending => write!(f, "Pending"),
            ActionPhase::Approved => write!(f, "Approved"),
            ActionPhase::InProgress => write!(f, "InProgress"),
            ActionPhase::Succeeded => write!(f, "Succeeded"),
            ActionPhase::Failed => write!(f, "Failed"),
            ActionPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStatus {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approved_by: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionResultStatus {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub changes: Vec<ResourceChange>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChange {
    pub field: String,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionCondition {
    pub condition_type: String,
    pub status: String,
    pub last_transition_time: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

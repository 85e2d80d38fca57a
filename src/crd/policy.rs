use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-authored "watch X, when Y, do Z" definition. See spec §3.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kubeskippy.io",
    version = "v1alpha1",
    kind = "Policy",
    plural = "policies",
    shortname = "ksp",
    namespaced,
    status = "PolicyStatus",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Actions Taken","type":"integer","jsonPath":".status.actionsTaken"}"#,
    printcolumn = r#"{"name":"Last Evaluated","type":"date","jsonPath":".status.lastEvaluated"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub mode: PolicyMode,

    pub selector: Selector,

    pub triggers: Vec<Trigger>,

    pub actions: Vec<ActionTemplate>,

    #[serde(default)]
    pub safety_rules: SafetyRules,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    #[default]
    Automatic,
    Dryrun,
    Monitor,
    Manual,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub kinds: Vec<KindSelector>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KindSelector {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub exclude_names: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub name: String,
    #[serde(flatten)]
    pub spec: TriggerSpec,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_period_seconds: u64,
}

fn default_cooldown_seconds() -> u64 {
    300
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerSpec {
    Metric {
        query: String,
        threshold: f64,
        operator: ComparisonOperator,
        #[serde(default)]
        duration_seconds: u64,
    },
    Event {
        reason: String,
        #[serde(rename = "type")]
        event_type: String,
        #[serde(default = "default_event_count")]
        count: u32,
        #[serde(default = "default_event_window_seconds")]
        window_seconds: u64,
    },
    Condition {
        #[serde(rename = "type")]
        condition_type: String,
        status: String,
    },
}

fn default_event_count() -> u32 {
    1
}

fn default_event_window_seconds() -> u64 {
    300
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => value > threshold,
            ComparisonOperator::GreaterOrEqual => value >= threshold,
            ComparisonOperator::LessThan => value < threshold,
            ComparisonOperator::LessOrEqual => value <= threshold,
            ComparisonOperator::Equal => (value - threshold).abs() < f64::EPSILON,
            ComparisonOperator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionTemplate {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(flatten)]
    pub spec: ActionTemplateSpec,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionTemplateSpec {
    Restart {
        #[serde(default = "default_restart_strategy")]
        strategy: RestartStrategy,
        #[serde(default = "default_max_concurrent")]
        max_concurrent: u32,
    },
    Scale {
        direction: ScaleDirection,
        #[serde(default)]
        replicas: Option<i32>,
        min: i32,
        max: i32,
    },
    Patch {
        patch: serde_json::Value,
    },
    Delete {},
}

fn default_restart_strategy() -> RestartStrategy {
    RestartStrategy::Rolling
}

fn default_max_concurrent() -> u32 {
    1
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestartStrategy {
    Rolling,
    Immediate,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_delay_seconds")]
    pub backoff_delay_seconds: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_delay_seconds: default_backoff_delay_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_delay_seconds() -> u64 {
    1
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafetyRules {
    #[serde(default = "default_max_actions_per_hour")]
    pub max_actions_per_hour: u32,
    #[serde(default)]
    pub require_health_check: bool,
    #[serde(default = "default_health_check_timeout_seconds")]
    pub health_check_timeout_seconds: u64,
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            max_actions_per_hour: default_max_actions_per_hour(),
            require_health_check: false,
            health_check_timeout_seconds: default_health_check_timeout_seconds(),
        }
    }
}

fn default_max_actions_per_hour() -> u32 {
    10
}

fn default_health_check_timeout_seconds() -> u64 {
    60
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub last_evaluated: Option<String>,

    #[serde(default)]
    pub active_triggers: Vec<String>,

    #[serde(default)]
    pub actions_taken: i64,

    #[serde(default)]
    pub last_action_time: Option<String>,

    /// Per-trigger last-fire timestamp (RFC3339), keyed by trigger name.
    /// A per-trigger table, rather than a single Policy-wide
    /// `lastActionTime`, is what makes per-trigger cooldown correct when a
    /// Policy declares more than one trigger.
    #[serde(default)]
    pub trigger_last_fired: BTreeMap<String, String>,

    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    pub condition_type: String,
    pub status: String,
    pub last_transition_time: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

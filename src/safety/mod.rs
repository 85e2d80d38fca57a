//! Safety Controller: rate limiting, protected-resource enforcement,
//! circuit breaking, and pre-execution validation (spec §4.3). Four
//! functions, each pure with respect to its inputs plus the internal
//! action-history store shared across all Policies.

mod circuit_breaker;
mod protected;
mod rate_limiter;

pub use protected::{is_protected, patch_touches_protected_fields, ProtectionSubject};

use crate::config::SafetyConfig;
use crate::crd::ActionTemplateSpec;
use circuit_breaker::CircuitBreakerRegistry;
use rate_limiter::RateLimiter;

/// What `ValidateAction` needs to know about the action under
/// consideration, gathered by the caller before dispatch.
pub struct ActionValidationInput<'a> {
    pub policy_key: &'a str,
    pub target: ProtectionSubject<'a>,
    pub action_spec: &'a ActionTemplateSpec,
    pub patch: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn ok(warnings: Vec<String>) -> Self {
        Self {
            valid: true,
            reason: None,
            warnings,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            warnings: Vec::new(),
        }
    }
}

pub struct SafetyController {
    config: SafetyConfig,
    rate_limiter: RateLimiter,
    breakers: CircuitBreakerRegistry,
}

impl SafetyController {
    pub fn new(config: SafetyConfig) -> Self {
        let breakers = CircuitBreakerRegistry::new(
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_open_seconds,
            config.circuit_breaker_success_threshold,
        );
        Self {
            config,
            rate_limiter: RateLimiter::new(),
            breakers,
        }
    }

    pub fn is_protected(&self, subject: &ProtectionSubject<'_>) -> (bool, Option<String>) {
        protected::is_protected(&self.config, subject)
    }

    /// Peeks at whether `policy_key` still has rate-limit tokens; does not
    /// consume one. Tokens are spent in [`SafetyController::consume_rate_limit`].
    pub async fn check_rate_limit(&self, policy_key: &str, max_actions_per_hour: u32) -> bool {
        self.rate_limiter
            .check(policy_key, max_actions_per_hour)
            .await
    }

    /// Re-checks target protection and runs type-specific validation. The
    /// circuit breaker gates this call: if `policy_key`'s breaker is open,
    /// validation is rejected without inspecting the action at all.
    pub async fn validate_action(&self, input: &ActionValidationInput<'_>) -> ValidationResult {
        if !self.breakers.allow(input.policy_key).await {
            return ValidationResult::deny("circuit breaker is open for this policy");
        }

        let (protected, reason) = protected::is_protected(&self.config, &input.target);
        if protected {
            return ValidationResult::deny(
                reason.unwrap_or_else(|| "target is protected".to_string()),
            );
        }

        let mut warnings = Vec::new();
        match input.action_spec {
            ActionTemplateSpec::Delete {} => {
                if self
                    .config
                    .protected_kinds
                    .iter()
                    .any(|k| k == input.target.kind)
                {
                    return ValidationResult::deny(format!(
                        "delete is disallowed on protected kind {}",
                        input.target.kind
                    ));
                }
            }
            ActionTemplateSpec::Scale {
                replicas, min, max, ..
            } => {
                if let Some(replicas) = replicas {
                    if replicas < min || replicas > max {
                        return ValidationResult::deny(format!(
                            "requested replicas {} outside bounds [{}, {}]",
                            replicas, min, max
                        ));
                    }
                }
                if *max - *min > 50 {
                    warnings.push("scale bounds span a large blast radius".to_string());
                }
            }
            ActionTemplateSpec::Patch { patch } => {
                let patch = input.patch.unwrap_or(patch);
                if protected::patch_touches_protected_fields(patch) {
                    return ValidationResult::deny(
                        "patch mutates a protected field (owner references, finalizers, uid, resourceVersion)",
                    );
                }
            }
            ActionTemplateSpec::Restart { max_concurrent, .. } => {
                if *max_concurrent > 10 {
                    warnings.push("restart max_concurrent is unusually high".to_string());
                }
            }
        }

        ValidationResult::ok(warnings)
    }

    /// Consumes one rate-limit token for `policy_key`. Tokens decrement on
    /// Action creation, not on evaluation or on an Action's eventual
    /// outcome, so this is called once per `Action` the Policy Reconciler
    /// actually creates.
    pub async fn consume_rate_limit(&self, policy_key: &str, max_actions_per_hour: u32) {
        self.rate_limiter
            .consume(policy_key, max_actions_per_hour)
            .await;
    }

    /// Feeds an executed Action's outcome to the circuit breaker. Does not
    /// touch the rate limiter: the token for this Action was already spent
    /// when it was created.
    pub async fn record_outcome(&self, policy_key: &str, succeeded: bool) {
        if succeeded {
            self.breakers.record_success(policy_key).await;
        } else {
            self.breakers.record_failure(policy_key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn controller() -> SafetyController {
        SafetyController::new(SafetyConfig::default())
    }

    #[tokio::test]
    async fn denies_delete_on_protected_kind() {
        let labels = BTreeMap::new();
        let input = ActionValidationInput {
            policy_key: "default/p",
            target: ProtectionSubject {
                namespace: "default",
                kind: "Node",
                labels: &labels,
            },
            action_spec: &ActionTemplateSpec::Delete {},
            patch: None,
        };
        let result = controller().validate_action(&input).await;
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn denies_scale_outside_bounds() {
        let labels = BTreeMap::new();
        let spec = ActionTemplateSpec::Scale {
            direction: crate::crd::ScaleDirection::Up,
            replicas: Some(100),
            min: 1,
            max: 10,
        };
        let input = ActionValidationInput {
            policy_key: "default/p",
            target: ProtectionSubject {
                namespace: "default",
                kind: "Deployment",
                labels: &labels,
            },
            action_spec: &spec,
            patch: None,
        };
        let result = controller().validate_action(&input).await;
        assert!(!result.valid);
    }
}

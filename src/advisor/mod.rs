//! LM Advisor integration: builds the prompt, calls the configured
//! provider, parses its response, and filters candidate actions by
//! confidence (spec §4.5). Advisor unavailability is never fatal; every
//! failure path degrades to the unfiltered candidate set.

mod client;
mod prompt;
mod response;

pub use client::AdvisorClient;
pub use response::{Alternative, Recommendation};

use crate::config::AdvisorConfig;
use crate::error::Result;
use std::time::Duration;
use tracing::warn;

/// One candidate remediation surfaced by the Policy Reconciler, in the
/// shape the advisor prompt and synonym matching need.
#[derive(Clone, Debug)]
pub struct TriggeredAction {
    pub id: String,
    pub target_namespace: String,
    pub target_name: String,
    pub target_kind: String,
    pub action_type: String,
    pub priority: i32,
}

#[derive(Clone, Debug)]
pub struct AnnotatedCandidate {
    pub candidate: TriggeredAction,
    pub recommendation: Option<Recommendation>,
    pub is_ai_based: bool,
}

/// Action identifiers the advisor must never be allowed to greenlight,
/// regardless of confidence.
const UNSAFE_ACTIONS: &[&str] = &[
    "delete_namespace",
    "delete_node",
    "delete_crd",
    "delete_pv",
    "force_delete_all",
    "drain_node",
];

const SYNONYMS: &[(&str, &[&str])] = &[
    ("restart", &["restart", "rolling_restart", "pod_restart"]),
    ("scale", &["scale", "scale_up", "scale_down", "horizontal_scale"]),
    ("delete", &["delete", "remove", "terminate", "strategic_delete"]),
    ("patch", &["patch", "update", "modify", "configure"]),
];

fn action_types_match(candidate_type: &str, observed: &str) -> bool {
    let observed_lower = observed.to_lowercase();
    for (canonical, aliases) in SYNONYMS {
        if *canonical == candidate_type {
            return aliases.iter().any(|alias| observed_lower.contains(alias));
        }
    }
    observed_lower.contains(candidate_type)
}

fn is_denylisted(recommendation: &Recommendation) -> bool {
    let haystack = format!("{} {}", recommendation.action_id, recommendation.target).to_lowercase();
    UNSAFE_ACTIONS.iter().any(|unsafe_action| haystack.contains(unsafe_action))
}

pub struct AdvisorPort {
    client: Option<Box<dyn AdvisorClient>>,
    timeout: Duration,
    min_confidence: f64,
    fallback_top_k: usize,
}

impl AdvisorPort {
    pub fn new(config: &AdvisorConfig) -> Result<Self> {
        Ok(Self {
            client: client::create_advisor_client(config)?,
            timeout: Duration::from_secs(config.timeout_seconds),
            min_confidence: config.min_confidence,
            fallback_top_k: config.fallback_top_k,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Runs the full advisor round trip and filter. Always returns a
    /// usable candidate set: on any failure (disabled, timeout, HTTP
    /// error, unparseable response) every candidate is returned
    /// unfiltered and marked `is_ai_based = false`.
    pub async fn analyze(
        &self,
        metrics_summary: &str,
        candidates: Vec<TriggeredAction>,
    ) -> Vec<AnnotatedCandidate> {
        let Some(client) = &self.client else {
            return unfiltered(candidates);
        };

        let built_prompt = prompt::build_prompt(metrics_summary, &candidates);

        let call = client.complete(prompt::SYSTEM_PROMPT, &built_prompt);
        let outcome = tokio::time::timeout(self.timeout, call).await;

        let text = match outcome {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "advisor call failed, proceeding unfiltered");
                return unfiltered(candidates);
            }
            Err(_) => {
                warn!("advisor call timed out, proceeding unfiltered");
                return unfiltered(candidates);
            }
        };

        match response::parse_recommendations(&text) {
            Ok(recommendations) => self.filter(candidates, recommendations),
            Err(e) => {
                warn!(error = %e, "advisor response unparseable, proceeding unfiltered");
                unfiltered(candidates)
            }
        }
    }

    fn filter(
        &self,
        candidates: Vec<TriggeredAction>,
        recommendations: Vec<Recommendation>,
    ) -> Vec<AnnotatedCandidate> {
        let survivors: Vec<Recommendation> = recommendations
            .into_iter()
            .filter(|r| r.confidence >= self.min_confidence)
            .filter(|r| !is_denylisted(r))
            .collect();

        let mut annotated = Vec::new();
        for candidate in &candidates {
            let matched = survivors.iter().find(|r| {
                action_types_match(&candidate.action_type, &r.action_id)
                    || action_types_match(&candidate.action_type, &r.target)
            });
            if let Some(recommendation) = matched {
                annotated.push(AnnotatedCandidate {
                    candidate: candidate.clone(),
                    recommendation: Some(recommendation.clone()),
                    is_ai_based: true,
                });
            }
        }

        if annotated.is_empty() {
            let mut ranked = candidates;
            ranked.sort_by(|a, b| a.priority.cmp(&b.priority));
            return ranked
                .into_iter()
                .take(self.fallback_top_k)
                .map(|candidate| AnnotatedCandidate {
                    candidate,
                    recommendation: None,
                    is_ai_based: false,
                })
                .collect();
        }

        annotated
    }
}

fn unfiltered(candidates: Vec<TriggeredAction>) -> Vec<AnnotatedCandidate> {
    candidates
        .into_iter()
        .map(|candidate| AnnotatedCandidate {
            candidate,
            recommendation: None,
            is_ai_based: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, action_type: &str, priority: i32) -> TriggeredAction {
        TriggeredAction {
            id: id.to_string(),
            target_namespace: "default".to_string(),
            target_name: "api".to_string(),
            target_kind: "Deployment".to_string(),
            action_type: action_type.to_string(),
            priority,
        }
    }

    fn recommendation(action_id: &str, confidence: f64) -> Recommendation {
        Recommendation {
            action_id: action_id.to_string(),
            target: "default/api".to_string(),
            reason: "high cpu".to_string(),
            risk: "low".to_string(),
            confidence,
            reasoning: Default::default(),
        }
    }

    #[test]
    fn synonym_table_matches_aliases() {
        assert!(action_types_match("restart", "rolling_restart"));
        assert!(action_types_match("scale", "horizontal_scale"));
        assert!(!action_types_match("delete", "restart"));
    }

    #[test]
    fn denylist_blocks_unsafe_recommendations() {
        let rec = recommendation("delete_namespace", 0.95);
        assert!(is_denylisted(&rec));
    }

    #[tokio::test]
    async fn filter_falls_back_to_top_priority_when_nothing_survives() {
        let port = AdvisorPort {
            client: None,
            timeout: Duration::from_secs(1),
            min_confidence: 0.7,
            fallback_top_k: 1,
        };
        let candidates = vec![candidate("a", "restart", 1), candidate("b", "scale", 5)];
        let recs = vec![recommendation("patch", 0.9)];
        let result = port.filter(candidates, recs);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].candidate.id, "a");
        assert!(!result[0].is_ai_based);
    }

    #[tokio::test]
    async fn filter_retains_matching_candidates_above_threshold() {
        let port = AdvisorPort {
            client: None,
            timeout: Duration::from_secs(1),
            min_confidence: 0.7,
            fallback_top_k: 2,
        };
        let candidates = vec![candidate("a", "restart", 1)];
        let recs = vec![recommendation("rolling_restart", 0.95)];
        let result = port.filter(candidates, recs);
        assert_eq!(result.len(), 1);
        assert!(result[0].is_ai_based);
    }
}

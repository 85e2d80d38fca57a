//! Prompt construction for the LM advisor (spec §4.5).

use super::TriggeredAction;

pub const SYSTEM_PROMPT: &str = r#"You are an expert Site Reliability Engineer reviewing a set of proposed automated remediations for a Kubernetes cluster. Your task is to:

1. Summarize the current cluster condition
2. Reason step by step about which proposed actions are appropriate
3. Flag any issues with the proposed actions
4. Recommend which actions should proceed

Respond with the following sections, each clearly labeled:

SUMMARY: one paragraph.

REASONING_STEPS: a numbered list; each step has an Evidence line and a Confidence (0-1) line.

ISSUES: a list of concerns, or "none".

RECOMMENDATIONS: a JSON array. Each element has:
{
  "action_id": "the candidate action identifier being recommended",
  "target": "namespace/name",
  "reason": "why this action is appropriate",
  "risk": "low|medium|high",
  "confidence": 0.0,
  "reasoning": {
    "observations": ["..."],
    "analysis": "...",
    "alternatives": [{"option": "...", "pros": ["..."], "cons": ["..."], "risk": "...", "rejection": "..."}],
    "decision_logic": "...",
    "confidence_factors": ["..."]
  }
}
"#;

pub fn build_prompt(metrics_summary: &str, candidates: &[TriggeredAction]) -> String {
    let mut prompt = String::new();

    prompt.push_str("=== CLUSTER METRICS SNAPSHOT ===\n");
    prompt.push_str(metrics_summary);
    prompt.push_str("\n\n=== CANDIDATE ACTIONS ===\n");

    for candidate in candidates {
        prompt.push_str(&format!(
            "- id={} type={} target={}/{} ({}) priority={}\n",
            candidate.id,
            candidate.action_type,
            candidate.target_namespace,
            candidate.target_name,
            candidate.target_kind,
            candidate.priority,
        ));
    }

    prompt.push_str(
        "\nEvaluate these candidates against the cluster metrics snapshot above and respond using the required sections.",
    );

    prompt
}

//! Tolerant parsing of the advisor's response (spec §4.5). The advisor is
//! asked for a structured document but LMs drift from formatting
//! instructions, so only the `RECOMMENDATIONS` JSON array is parsed
//! strictly; everything else is best-effort.

use crate::error::{KubeSkippyError, Result};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Recommendation {
    pub action_id: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub risk: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: ReasoningBlock,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReasoningBlock {
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    #[serde(default)]
    pub decision_logic: String,
    #[serde(default)]
    pub confidence_factors: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Alternative {
    #[serde(default)]
    pub option: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub risk: String,
    #[serde(default)]
    pub rejection: String,
}

/// Extracts and parses the `RECOMMENDATIONS` JSON array from a free-text
/// advisor response. Looks for the labeled section first; falls back to
/// the first top-level JSON array anywhere in the text.
pub fn parse_recommendations(text: &str) -> Result<Vec<Recommendation>> {
    let candidate = text
        .find("RECOMMENDATIONS")
        .map(|idx| &text[idx..])
        .unwrap_or(text);

    let json_str = extract_json_array(candidate).or_else(|| extract_json_array(text));

    let Some(json_str) = json_str else {
        return Err(KubeSkippyError::AdvisorError(
            "no RECOMMENDATIONS array found in advisor response".to_string(),
        ));
    };

    serde_json::from_str(&json_str).map_err(|e| {
        KubeSkippyError::AdvisorError(format!("failed to parse recommendations: {}", e))
    })
}

fn extract_json_array(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    Some(text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recommendations_embedded_in_prose() {
        let text = r#"
SUMMARY: things look fine.

RECOMMENDATIONS:
[
  {"action_id": "restart-1", "target": "default/api", "confidence": 0.9, "risk": "low"}
]
"#;
        let recs = parse_recommendations(text).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].action_id, "restart-1");
        assert!((recs[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn errors_when_no_array_present() {
        assert!(parse_recommendations("no structured data here").is_err());
    }
}

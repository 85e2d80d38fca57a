//! Protected-resource checks (spec §4.3 `IsProtected`).

use crate::config::SafetyConfig;
use std::collections::BTreeMap;

/// Enough of a resource's identity to run the protection checks against,
/// without requiring the caller to hand over a whole typed object.
pub struct ProtectionSubject<'a> {
    pub namespace: &'a str,
    pub kind: &'a str,
    pub labels: &'a BTreeMap<String, String>,
}

/// Returns `(true, reason)` if `subject` is protected from mutation, per
/// namespace, kind, or label/annotation rules.
pub fn is_protected(config: &SafetyConfig, subject: &ProtectionSubject) -> (bool, Option<String>) {
    if config
        .protected_namespaces
        .iter()
        .any(|ns| ns == subject.namespace)
    {
        return (
            true,
            Some(format!("namespace {} is protected", subject.namespace)),
        );
    }

    if config.protected_kinds.iter().any(|k| k == subject.kind) {
        return (true, Some(format!("kind {} is protected", subject.kind)));
    }

    if subject
        .labels
        .get(&config.protected_label_key)
        .map(|v| v == "true")
        .unwrap_or(false)
    {
        return (
            true,
            Some(format!(
                "label {}=true is set",
                config.protected_label_key
            )),
        );
    }

    (false, None)
}

/// Recursively checks a strategic-merge patch for keys that touch
/// owner references, finalizers, or other fields the Remediation Engine
/// must never mutate.
pub fn patch_touches_protected_fields(patch: &serde_json::Value) -> bool {
    const PROTECTED_KEYS: &[&str] = &["ownerReferences", "finalizers", "uid", "resourceVersion"];

    match patch {
        serde_json::Value::Object(map) => map.iter().any(|(k, v)| {
            PROTECTED_KEYS.contains(&k.as_str()) || patch_touches_protected_fields(v)
        }),
        serde_json::Value::Array(items) => items.iter().any(patch_touches_protected_fields),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SafetyConfig {
        SafetyConfig::default()
    }

    #[test]
    fn protects_known_namespace() {
        let labels = BTreeMap::new();
        let subject = ProtectionSubject {
            namespace: "kube-system",
            kind: "Pod",
            labels: &labels,
        };
        let (protected, reason) = is_protected(&config(), &subject);
        assert!(protected);
        assert!(reason.unwrap().contains("kube-system"));
    }

    #[test]
    fn protects_labelled_resource() {
        let mut labels = BTreeMap::new();
        labels.insert("kubeskippy.io/protected".to_string(), "true".to_string());
        let subject = ProtectionSubject {
            namespace: "default",
            kind: "Pod",
            labels: &labels,
        };
        assert!(is_protected(&config(), &subject).0);
    }

    #[test]
    fn allows_unprotected_resource() {
        let labels = BTreeMap::new();
        let subject = ProtectionSubject {
            namespace: "default",
            kind: "Pod",
            labels: &labels,
        };
        assert!(!is_protected(&config(), &subject).0);
    }

    #[test]
    fn detects_owner_reference_patch() {
        let patch = serde_json::json!({"metadata": {"ownerReferences": []}});
        assert!(patch_touches_protected_fields(&patch));
        let patch = serde_json::json!({"spec": {"replicas": 3}});
        assert!(!patch_touches_protected_fields(&patch));
    }
}

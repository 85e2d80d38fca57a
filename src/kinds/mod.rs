//! Registered kind table for target resources.
//!
//! The executors and the Policy Reconciler's target enumeration both need to
//! operate across several Kubernetes kinds (Pod, Deployment, StatefulSet).
//! Rather than dispatching on `(apiVersion, kind)` strings at every call site
//! (reflection-shaped), every supported kind is registered once here with a
//! `Lister` (enumerate candidates for a selector) and a `Matcher` (namespace,
//! label, and name-exclude checks). Callers look up a `TargetKind` and get
//! back the behavior for that kind from the table.

use crate::crd::{KindSelector, Selector};
use crate::error::{KubeSkippyError, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Pod,
    Deployment,
    StatefulSet,
}

impl TargetKind {
    pub fn from_api_kind(api_version: &str, kind: &str) -> Option<Self> {
        match (api_version, kind) {
            ("v1", "Pod") => Some(TargetKind::Pod),
            ("apps/v1", "Deployment") => Some(TargetKind::Deployment),
            ("apps/v1", "StatefulSet") => Some(TargetKind::StatefulSet),
            _ => None,
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            TargetKind::Pod => "v1",
            TargetKind::Deployment | TargetKind::StatefulSet => "apps/v1",
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TargetKind::Pod => "Pod",
            TargetKind::Deployment => "Deployment",
            TargetKind::StatefulSet => "StatefulSet",
        }
    }
}

/// A candidate resource discovered by a [`Lister`], identified well enough to
/// build an `Action`'s `targetResource` without re-fetching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateTarget {
    pub kind: TargetKind,
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Enumerates resources of a given kind in a namespace, matching the
/// selector's label expression. Table-driven per kind; no reflective
/// dispatch.
pub async fn list_candidates(
    client: &Client,
    kind: TargetKind,
    namespace: &str,
    selector: &Selector,
) -> Result<Vec<CandidateTarget>> {
    let label_selector = label_selector_string(selector);
    let lp = match &label_selector {
        Some(sel) => ListParams::default().labels(sel),
        None => ListParams::default(),
    };

    let candidates = match kind {
        TargetKind::Pod => {
            let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
            api.list(&lp)
                .await
                .map_err(KubeSkippyError::KubeError)?
                .items
                .into_iter()
                .map(|p| CandidateTarget {
                    kind,
                    namespace: namespace.to_string(),
                    name: p.name_any(),
                    uid: p.uid(),
                    labels: p.labels().clone(),
                })
                .collect()
        }
        TargetKind::Deployment => {
            let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
            api.list(&lp)
                .await
                .map_err(KubeSkippyError::KubeError)?
                .items
                .into_iter()
                .map(|d| CandidateTarget {
                    kind,
                    namespace: namespace.to_string(),
                    name: d.name_any(),
                    uid: d.uid(),
                    labels: d.labels().clone(),
                })
                .collect()
        }
        TargetKind::StatefulSet => {
            let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
            api.list(&lp)
                .await
                .map_err(KubeSkippyError::KubeError)?
                .items
                .into_iter()
                .map(|s| CandidateTarget {
                    kind,
                    namespace: namespace.to_string(),
                    name: s.name_any(),
                    uid: s.uid(),
                    labels: s.labels().clone(),
                })
                .collect()
        }
    };

    Ok(candidates)
}

/// Fetches a candidate's current `status.conditions`, normalized to
/// `(type, status)` pairs regardless of kind. Used by Condition trigger
/// evaluation, which needs to know object state the metrics backend has no
/// view into.
pub async fn conditions_for(
    client: &Client,
    kind: TargetKind,
    namespace: &str,
    name: &str,
) -> Result<Vec<(String, String)>> {
    let conditions = match kind {
        TargetKind::Pod => {
            let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
            api.get(name)
                .await
                .map_err(KubeSkippyError::KubeError)?
                .status
                .and_then(|s| s.conditions)
                .unwrap_or_default()
                .into_iter()
                .map(|c| (c.type_, c.status))
                .collect()
        }
        TargetKind::Deployment => {
            let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
            api.get(name)
                .await
                .map_err(KubeSkippyError::KubeError)?
                .status
                .and_then(|s| s.conditions)
                .unwrap_or_default()
                .into_iter()
                .map(|c| (c.type_, c.status))
                .collect()
        }
        TargetKind::StatefulSet => {
            let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
            api.get(name)
                .await
                .map_err(KubeSkippyError::KubeError)?
                .status
                .and_then(|s| s.conditions)
                .unwrap_or_default()
                .into_iter()
                .map(|c| (c.type_, c.status))
                .collect()
        }
    };

    Ok(conditions)
}

fn label_selector_string(selector: &Selector) -> Option<String> {
    if selector.match_labels.is_empty() {
        return None;
    }
    Some(
        selector
            .match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Returns true if `name` is excluded by the `KindSelector`'s `excludeNames`.
pub fn is_excluded(kind_selector: &KindSelector, name: &str) -> bool {
    kind_selector.exclude_names.iter().any(|n| n == name)
}

/// Resolves the namespaces a Policy's selector should be evaluated against:
/// the declared list if non-empty, else the Policy's own namespace.
pub fn effective_namespaces<'a>(selector: &'a Selector, policy_namespace: &'a str) -> Vec<&'a str> {
    if selector.namespaces.is_empty() {
        vec![policy_namespace]
    } else {
        selector.namespaces.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_kinds() {
        assert_eq!(
            TargetKind::from_api_kind("v1", "Pod"),
            Some(TargetKind::Pod)
        );
        assert_eq!(
            TargetKind::from_api_kind("apps/v1", "Deployment"),
            Some(TargetKind::Deployment)
        );
        assert_eq!(TargetKind::from_api_kind("v1", "Service"), None);
    }

    #[test]
    fn effective_namespaces_falls_back_to_policy_namespace() {
        let selector = Selector::default();
        assert_eq!(effective_namespaces(&selector, "default"), vec!["default"]);

        let selector = Selector {
            namespaces: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        assert_eq!(effective_namespaces(&selector, "default"), vec!["a", "b"]);
    }

    #[test]
    fn exclude_names_rejects_literal_match() {
        let ks = KindSelector {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            exclude_names: vec!["keep-me".to_string()],
        };
        assert!(is_excluded(&ks, "keep-me"));
        assert!(!is_excluded(&ks, "other"));
    }
}

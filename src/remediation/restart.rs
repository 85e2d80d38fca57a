//! Restart executor. For a bare Pod, rolling termination; for a managed
//! workload (Deployment, StatefulSet), prefer a template-annotation bump
//! over raw pod deletion so the owning controller drives the rollout.

use super::executor::{ExecutionResult, Executor};
use crate::crd::{ActionTemplateSpec, RestartStrategy};
use crate::error::{KubeSkippyError, Result};
use crate::kinds::{CandidateTarget, TargetKind};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, Patch, PatchParams, PropagationPolicy};
use kube::{Api, Client};

pub struct RestartExecutor {
    client: Client,
}

impl RestartExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn delete_params(strategy: &RestartStrategy) -> DeleteParams {
        match strategy {
            RestartStrategy::Immediate => DeleteParams {
                grace_period_seconds: Some(0),
                propagation_policy: Some(PropagationPolicy::Background),
                ..DeleteParams::default()
            },
            RestartStrategy::Rolling => DeleteParams::default(),
        }
    }

    fn restart_annotation_patch() -> serde_json::Value {
        serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            "kubeskippy.io/restartedAt": Utc::now().to_rfc3339(),
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Executor for RestartExecutor {
    async fn validate(&self, _target: &CandidateTarget, spec: &ActionTemplateSpec) -> Result<()> {
        match spec {
            ActionTemplateSpec::Restart { max_concurrent, .. } if *max_concurrent == 0 => Err(
                KubeSkippyError::ValidationError("max_concurrent must be at least 1".to_string()),
            ),
            ActionTemplateSpec::Restart { .. } => Ok(()),
            _ => Err(KubeSkippyError::ValidationError(
                "restart executor received a non-restart action".to_string(),
            )),
        }
    }

    async fn execute(
        &self,
        target: &CandidateTarget,
        spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult> {
        let ActionTemplateSpec::Restart { strategy, .. } = spec else {
            return Ok(ExecutionResult::failed(
                "restart executor received a non-restart action",
                Utc::now(),
            ));
        };
        let start = Utc::now();

        let change = match target.kind {
            TargetKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
                api.delete(&target.name, &Self::delete_params(strategy))
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
                crate::crd::ResourceChange {
                    field: "pod".to_string(),
                    before: Some(target.name.clone()),
                    after: None,
                }
            }
            TargetKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
                let patch = Self::restart_annotation_patch();
                api.patch(
                    &target.name,
                    &PatchParams::default(),
                    &Patch::Strategic(&patch),
                )
                .await
                .map_err(KubeSkippyError::KubeError)?;
                crate::crd::ResourceChange {
                    field: "spec.template.metadata.annotations.kubeskippy.io/restartedAt"
                        .to_string(),
                    before: None,
                    after: Some(Utc::now().to_rfc3339()),
                }
            }
            TargetKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &target.namespace);
                let patch = Self::restart_annotation_patch();
                api.patch(
                    &target.name,
                    &PatchParams::default(),
                    &Patch::Strategic(&patch),
                )
                .await
                .map_err(KubeSkippyError::KubeError)?;
                crate::crd::ResourceChange {
                    field: "spec.template.metadata.annotations.kubeskippy.io/restartedAt"
                        .to_string(),
                    before: None,
                    after: Some(Utc::now().to_rfc3339()),
                }
            }
        };

        Ok(ExecutionResult::ok(
            format!("restarted {}/{}", target.namespace, target.name),
            vec![change],
            start,
        ))
    }

    async fn dry_run(
        &self,
        target: &CandidateTarget,
        _spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult> {
        let start = Utc::now();
        let change = match target.kind {
            TargetKind::Pod => crate::crd::ResourceChange {
                field: "pod".to_string(),
                before: Some(target.name.clone()),
                after: None,
            },
            TargetKind::Deployment | TargetKind::StatefulSet => crate::crd::ResourceChange {
                field: "spec.template.metadata.annotations.kubeskippy.io/restartedAt"
                    .to_string(),
                before: None,
                after: Some("(simulated)".to_string()),
            },
        };
        Ok(ExecutionResult::ok(
            format!("would restart {}/{}", target.namespace, target.name),
            vec![change],
            start,
        ))
    }
}

//! Scale executor: reads current replicas, computes a clamped new value,
//! no-ops if nothing would change, else writes the new spec.

use super::executor::{ExecutionResult, Executor};
use crate::crd::{ActionTemplateSpec, ScaleDirection};
use crate::error::{KubeSkippyError, Result};
use crate::kinds::{CandidateTarget, TargetKind};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

const DEFAULT_STEP: i32 = 1;

pub struct ScaleExecutor {
    client: Client,
}

impl ScaleExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn target_replicas(current: i32, spec: &ActionTemplateSpec) -> Result<i32> {
        let ActionTemplateSpec::Scale {
            direction,
            replicas,
            min,
            max,
        } = spec
        else {
            return Err(KubeSkippyError::ValidationError(
                "scale executor received a non-scale action".to_string(),
            ));
        };

        let desired = match replicas {
            Some(r) => *r,
            None => match direction {
                ScaleDirection::Up => current + DEFAULT_STEP,
                ScaleDirection::Down => current - DEFAULT_STEP,
            },
        };

        Ok(desired.clamp(*min, *max))
    }

    async fn current_replicas(&self, target: &CandidateTarget) -> Result<i32> {
        match target.kind {
            TargetKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
                let obj = api.get(&target.name).await.map_err(KubeSkippyError::KubeError)?;
                Ok(obj.spec.and_then(|s| s.replicas).unwrap_or(1))
            }
            TargetKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &target.namespace);
                let obj = api.get(&target.name).await.map_err(KubeSkippyError::KubeError)?;
                Ok(obj.spec.and_then(|s| s.replicas).unwrap_or(1))
            }
            TargetKind::Pod => Err(KubeSkippyError::ValidationError(
                "scale action cannot target a bare Pod".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Executor for ScaleExecutor {
    async fn validate(&self, target: &CandidateTarget, spec: &ActionTemplateSpec) -> Result<()> {
        let ActionTemplateSpec::Scale { min, max, .. } = spec else {
            return Err(KubeSkippyError::ValidationError(
                "scale executor received a non-scale action".to_string(),
            ));
        };
        if min > max {
            return Err(KubeSkippyError::ValidationError(format!(
                "scale min {} exceeds max {}",
                min, max
            )));
        }
        if matches!(target.kind, TargetKind::Pod) {
            return Err(KubeSkippyError::ValidationError(
                "scale action cannot target a bare Pod".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        target: &CandidateTarget,
        spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult> {
        let start = Utc::now();
        let current = self.current_replicas(target).await?;
        let desired = Self::target_replicas(current, spec)?;

        if desired == current {
            return Ok(ExecutionResult::ok(
                format!("replicas already at {}, no-op", current),
                Vec::new(),
                start,
            ));
        }

        let patch = serde_json::json!({ "spec": { "replicas": desired } });
        match target.kind {
            TargetKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
                api.patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
            }
            TargetKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &target.namespace);
                api.patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
            }
            TargetKind::Pod => unreachable!("validated above"),
        }

        let change = crate::crd::ResourceChange {
            field: "spec.replicas".to_string(),
            before: Some(current.to_string()),
            after: Some(desired.to_string()),
        };

        Ok(ExecutionResult::ok(
            format!("scaled {}/{} from {} to {}", target.namespace, target.name, current, desired),
            vec![change],
            start,
        ))
    }

    async fn dry_run(
        &self,
        target: &CandidateTarget,
        spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult> {
        let start = Utc::now();
        let current = self.current_replicas(target).await?;
        let desired = Self::target_replicas(current, spec)?;

        let changes = if desired == current {
            Vec::new()
        } else {
            vec![crate::crd::ResourceChange {
                field: "spec.replicas".to_string(),
                before: Some(current.to_string()),
                after: Some(desired.to_string()),
            }]
        };

        Ok(ExecutionResult::ok(
            format!(
                "would scale {}/{} from {} to {}",
                target.namespace, target.name, current, desired
            ),
            changes,
            start,
        ))
    }
}

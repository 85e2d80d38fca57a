//! Patch executor: applies a strategic merge patch verbatim. Safety
//! Controller rejects patches touching protected fields before this ever
//! runs; this executor only guards against an empty patch.

use super::executor::{ExecutionResult, Executor};
use crate::crd::ActionTemplateSpec;
use crate::error::{KubeSkippyError, Result};
use crate::kinds::{CandidateTarget, TargetKind};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

pub struct PatchExecutor {
    client: Client,
}

impl PatchExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for PatchExecutor {
    async fn validate(&self, _target: &CandidateTarget, spec: &ActionTemplateSpec) -> Result<()> {
        let ActionTemplateSpec::Patch { patch } = spec else {
            return Err(KubeSkippyError::ValidationError(
                "patch executor received a non-patch action".to_string(),
            ));
        };
        if patch.is_null() || patch.as_object().map(|o| o.is_empty()).unwrap_or(false) {
            return Err(KubeSkippyError::ValidationError(
                "patch body is empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        target: &CandidateTarget,
        spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult> {
        let ActionTemplateSpec::Patch { patch } = spec else {
            return Ok(ExecutionResult::failed(
                "patch executor received a non-patch action",
                Utc::now(),
            ));
        };
        let start = Utc::now();

        match target.kind {
            TargetKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
                api.patch(&target.name, &PatchParams::default(), &Patch::Strategic(patch))
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
            }
            TargetKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
                api.patch(&target.name, &PatchParams::default(), &Patch::Strategic(patch))
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
            }
            TargetKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &target.namespace);
                api.patch(&target.name, &PatchParams::default(), &Patch::Strategic(patch))
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
            }
        }

        let change = crate::crd::ResourceChange {
            field: "patch".to_string(),
            before: None,
            after: Some(patch.to_string()),
        };

        Ok(ExecutionResult::ok(
            format!("patched {}/{}", target.namespace, target.name),
            vec![change],
            start,
        ))
    }

    async fn dry_run(
        &self,
        target: &CandidateTarget,
        spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult> {
        let ActionTemplateSpec::Patch { patch } = spec else {
            return Ok(ExecutionResult::failed(
                "patch executor received a non-patch action",
                Utc::now(),
            ));
        };
        let start = Utc::now();
        let change = crate::crd::ResourceChange {
            field: "patch".to_string(),
            before: None,
            after: Some(patch.to_string()),
        };
        Ok(ExecutionResult::ok(
            format!("would patch {}/{}", target.namespace, target.name),
            vec![change],
            start,
        ))
    }
}

//! Delete executor: removes the named target outright. The Safety
//! Controller rejects delete actions on protected kinds before dispatch.

use super::executor::{ExecutionResult, Executor};
use crate::crd::ActionTemplateSpec;
use crate::error::{KubeSkippyError, Result};
use crate::kinds::{CandidateTarget, TargetKind};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::{Api, Client};

pub struct DeleteExecutor {
    client: Client,
}

impl DeleteExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Executor for DeleteExecutor {
    async fn validate(&self, _target: &CandidateTarget, spec: &ActionTemplateSpec) -> Result<()> {
        match spec {
            ActionTemplateSpec::Delete {} => Ok(()),
            _ => Err(KubeSkippyError::ValidationError(
                "delete executor received a non-delete action".to_string(),
            )),
        }
    }

    async fn execute(
        &self,
        target: &CandidateTarget,
        _spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult> {
        let start = Utc::now();
        match target.kind {
            TargetKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
                api.delete(&target.name, &DeleteParams::default())
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
            }
            TargetKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
                api.delete(&target.name, &DeleteParams::default())
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
            }
            TargetKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &target.namespace);
                api.delete(&target.name, &DeleteParams::default())
                    .await
                    .map_err(KubeSkippyError::KubeError)?;
            }
        }

        let change = crate::crd::ResourceChange {
            field: target.kind.kind_name().to_string(),
            before: Some(target.name.clone()),
            after: None,
        };

        Ok(ExecutionResult::ok(
            format!("deleted {}/{}", target.namespace, target.name),
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
        let change = crate::crd::ResourceChange {
            field: target.kind.kind_name().to_string(),
            before: Some(target.name.clone()),
            after: None,
        };
        Ok(ExecutionResult::ok(
            format!("would delete {}/{}", target.namespace, target.name),
            vec![change],
            start,
        ))
    }
}

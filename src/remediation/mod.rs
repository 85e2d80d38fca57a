//! Remediation Engine: dispatches the executor for an Action's type,
//! performs dry-run simulation, records changes, rolls back reversible
//! mutations, and polls post-mutation health (spec §4.4).

mod delete;
mod executor;
mod patch;
mod restart;
mod scale;

pub use executor::{ExecutionResult, Executor};

use crate::crd::{ActionTemplateSpec, ResourceChange};
use crate::error::{KubeSkippyError, Result};
use crate::kinds::{CandidateTarget, TargetKind};
use delete::DeleteExecutor;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use patch::PatchExecutor;
use restart::RestartExecutor;
use scale::ScaleExecutor;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

pub struct RemediationEngine {
    client: Client,
    restart: RestartExecutor,
    scale: ScaleExecutor,
    patch: PatchExecutor,
    delete: DeleteExecutor,
}

impl RemediationEngine {
    pub fn new(client: Client) -> Self {
        Self {
            restart: RestartExecutor::new(client.clone()),
            scale: ScaleExecutor::new(client.clone()),
            patch: PatchExecutor::new(client.clone()),
            delete: DeleteExecutor::new(client.clone()),
            client,
        }
    }

    fn executor_for(&self, spec: &ActionTemplateSpec) -> &dyn Executor {
        match spec {
            ActionTemplateSpec::Restart { .. } => &self.restart,
            ActionTemplateSpec::Scale { .. } => &self.scale,
            ActionTemplateSpec::Patch { .. } => &self.patch,
            ActionTemplateSpec::Delete {} => &self.delete,
        }
    }

    pub async fn execute(
        &self,
        target: &CandidateTarget,
        spec: &ActionTemplateSpec,
        dry_run: bool,
    ) -> Result<ExecutionResult> {
        let executor = self.executor_for(spec);
        executor.validate(target, spec).await?;
        if dry_run {
            executor.dry_run(target, spec).await
        } else {
            executor.execute(target, spec).await
        }
    }

    /// Reconstructs a counter-mutation from the `before` snapshots captured
    /// in `changes`. Delete is not reversible and is skipped with a
    /// warning; restart has no meaningful counter-mutation either.
    pub async fn rollback(&self, target: &CandidateTarget, changes: &[ResourceChange]) -> Result<()> {
        for change in changes {
            if change.field != "spec.replicas" {
                continue;
            }
            let Some(before) = &change.before else { continue };
            let Ok(replicas) = before.parse::<i32>() else {
                continue;
            };
            let patch = serde_json::json!({ "spec": { "replicas": replicas } });

            match target.kind {
                TargetKind::Deployment => {
                    let api: Api<Deployment> =
                        Api::namespaced(self.client.clone(), &target.namespace);
                    api.patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
                        .await
                        .map_err(KubeSkippyError::KubeError)?;
                }
                TargetKind::StatefulSet => {
                    let api: Api<StatefulSet> =
                        Api::namespaced(self.client.clone(), &target.namespace);
                    api.patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
                        .await
                        .map_err(KubeSkippyError::KubeError)?;
                }
                TargetKind::Pod => {
                    warn!("no replica rollback possible for a bare Pod target");
                }
            }
        }
        Ok(())
    }

    /// Polls target readiness up to `timeout`. Returns `false` (not an
    /// error) if the deadline elapses without the target becoming ready.
    pub async fn health_check(&self, target: &CandidateTarget, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready(target).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    async fn is_ready(&self, target: &CandidateTarget) -> Result<bool> {
        match target.kind {
            TargetKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
                let pod = match api.get(&target.name).await {
                    Ok(p) => p,
                    Err(kube::Error::Api(e)) if e.code == 404 => return Ok(false),
                    Err(e) => return Err(KubeSkippyError::KubeError(e)),
                };
                let ready = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.conditions.as_ref())
                    .map(|conds| {
                        conds
                            .iter()
                            .any(|c| c.type_ == "Ready" && c.status == "True")
                    })
                    .unwrap_or(false);
                Ok(ready)
            }
            TargetKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
                let dep = match api.get(&target.name).await {
                    Ok(d) => d,
                    Err(kube::Error::Api(e)) if e.code == 404 => return Ok(false),
                    Err(e) => return Err(KubeSkippyError::KubeError(e)),
                };
                let desired = dep.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let available = dep
                    .status
                    .as_ref()
                    .and_then(|s| s.available_replicas)
                    .unwrap_or(0);
                Ok(available >= desired)
            }
            TargetKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &target.namespace);
                let sts = match api.get(&target.name).await {
                    Ok(s) => s,
                    Err(kube::Error::Api(e)) if e.code == 404 => return Ok(false),
                    Err(e) => return Err(KubeSkippyError::KubeError(e)),
                };
                let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let ready = sts
                    .status
                    .as_ref()
                    .map(|s| s.ready_replicas.unwrap_or(0))
                    .unwrap_or(0);
                Ok(ready >= desired)
            }
        }
    }
}

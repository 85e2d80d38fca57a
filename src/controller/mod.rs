mod action_reconciler;
mod policy_reconciler;

use crate::advisor::AdvisorPort;
use crate::config::AppConfig;
use crate::crd::{Action as ActionCrd, Policy};
use crate::error::{KubeSkippyError, Result};
use crate::metrics::{MetricsPort, PrometheusMetricsPort};
use crate::remediation::RemediationEngine;
use crate::safety::SafetyController;
use futures::StreamExt;
use kube::runtime::{controller::Controller, watcher::Config as WatcherConfig};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub struct ReconcilerContext {
    pub client: Client,
    pub config: AppConfig,
    pub metrics: Arc<dyn MetricsPort>,
    pub safety: Arc<SafetyController>,
    pub remediation: Arc<RemediationEngine>,
    pub advisor: Arc<AdvisorPort>,
}

impl ReconcilerContext {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(KubeSkippyError::KubeError)?;

        let metrics: Arc<dyn MetricsPort> =
            Arc::new(PrometheusMetricsPort::new(&config.prometheus)?);
        let safety = Arc::new(SafetyController::new(config.safety.clone()));
        let remediation = Arc::new(RemediationEngine::new(client.clone()));
        let advisor = Arc::new(AdvisorPort::new(&config.advisor)?);

        Ok(Self {
            client,
            config,
            metrics,
            safety,
            remediation,
            advisor,
        })
    }
}

pub async fn run_controllers(ctx: Arc<ReconcilerContext>) -> Result<()> {
    info!("starting kubeskippy controllers");

    let policy_api: Api<Policy> = Api::all(ctx.client.clone());
    let action_api: Api<ActionCrd> = Api::all(ctx.client.clone());

    let policy_controller = Controller::new(policy_api, WatcherConfig::default())
        .run(
            policy_reconciler::reconcile,
            policy_reconciler::error_policy,
            ctx.clone(),
        )
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!(?o, "reconciled policy"),
                Err(e) => error!(error = %e, "policy reconciliation error"),
            }
        });

    let action_controller = Controller::new(action_api, WatcherConfig::default())
        .run(
            action_reconciler::reconcile,
            action_reconciler::error_policy,
            ctx.clone(),
        )
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!(?o, "reconciled action"),
                Err(e) => error!(error = %e, "action reconciliation error"),
            }
        });

    tokio::select! {
        _ = policy_controller => {
            info!("policy controller stopped");
        }
        _ = action_controller => {
            info!("action controller stopped");
        }
    }

    Ok(())
}

pub(crate) const MONITOR_REQUEUE: Duration = Duration::from_secs(300);
pub(crate) const ACTIVE_REQUEUE: Duration = Duration::from_secs(60);
pub(crate) const FAST_REQUEUE: Duration = Duration::from_secs(1);
pub(crate) const ERROR_REQUEUE: Duration = Duration::from_secs(30);
pub(crate) const APPROVAL_POLL: Duration = Duration::from_secs(30);
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(30 * 60);

//! Metrics Port: the Policy Reconciler's only window onto cluster state
//! (spec §4.1 step 5, §6). Wraps Prometheus behind a narrow trait so the
//! reconciler never depends on the time-series backend directly.

mod registry;

pub use registry::{is_promql_expression, NAMED_METRICS};

use crate::config::PrometheusConfig;
use crate::crd::{ComparisonOperator, Policy, Trigger, TriggerSpec};
use crate::error::{KubeSkippyError, Result};
use crate::kinds::CandidateTarget;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus_http_query::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// A point-in-time snapshot of the metrics relevant to one Policy's
/// namespaces, collected once per reconciliation and reused across all of
/// that Policy's triggers.
#[derive(Clone, Debug, Default)]
pub struct ClusterMetrics {
    pub namespaces: Vec<String>,
    pub collected_at: Option<DateTime<Utc>>,
}

/// Per-resource metric values, keyed by named metric (spec §6 named
/// registry) plus any raw samples a caller queried directly.
#[derive(Clone, Debug, Default)]
pub struct ResourceMetrics {
    pub namespace: String,
    pub name: String,
    pub values: HashMap<String, f64>,
}

#[async_trait]
pub trait MetricsPort: Send + Sync {
    /// Collects a cheap snapshot of the namespaces a Policy's selector
    /// covers. Triggers are evaluated against live queries; this snapshot
    /// only records what was collected and when, for status reporting.
    async fn collect(&self, policy: &Policy) -> Result<ClusterMetrics>;

    /// Evaluates a single trigger. Metric triggers are resolved to a
    /// PromQL query (named registry or the raw expression) and run as a
    /// range query over `duration_seconds`; the trigger fires only if
    /// every sample in that window satisfies the comparison. A
    /// `duration_seconds` of zero falls back to an instant query. Event
    /// and Condition triggers are not metrics-backed and always report
    /// not-fired here; the Policy Reconciler evaluates those against the
    /// API server's event stream and object status directly.
    async fn evaluate_trigger(
        &self,
        trigger: &Trigger,
        metrics: &ClusterMetrics,
    ) -> Result<(bool, String)>;

    /// Fetches current values for the named metrics, scoped to one
    /// candidate target, for use by executors checking pre/post-action
    /// health and by the advisor prompt builder.
    async fn get_resource_metrics(&self, target: &CandidateTarget) -> Result<ResourceMetrics>;
}

pub struct PrometheusMetricsPort {
    client: Client,
    timeout: Duration,
}

impl PrometheusMetricsPort {
    pub fn new(config: &PrometheusConfig) -> Result<Self> {
        let client = Client::try_from(config.url.as_str()).map_err(|e| {
            KubeSkippyError::MetricsError(format!("failed to create Prometheus client: {}", e))
        })?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    async fn query_instant(&self, query: &str) -> Result<Vec<f64>> {
        debug!(query, "running instant query");
        let response = self
            .client
            .query(query)
            .timeout(self.timeout)
            .get()
            .await
            .map_err(|e| KubeSkippyError::MetricsError(format!("instant query failed: {}", e)))?;

        let values = match response.data() {
            prometheus_http_query::response::Data::Vector(v) => {
                v.iter().map(|s| s.sample().value()).collect()
            }
            prometheus_http_query::response::Data::Scalar(s) => vec![s.sample().value()],
            _ => Vec::new(),
        };
        Ok(values)
    }

    /// Runs a range query over the last `duration_seconds` and returns every
    /// sample value across every returned series, in chronological order.
    async fn query_range_values(&self, query: &str, duration_seconds: u64) -> Result<Vec<f64>> {
        let end = Utc::now();
        let start = end - chrono::Duration::seconds(duration_seconds.max(1) as i64);
        let step = (duration_seconds / 12).max(15);

        debug!(query, duration_seconds, "running range query");
        let response = self
            .client
            .query_range(query, start.timestamp(), end.timestamp(), step as f64)
            .timeout(self.timeout)
            .get()
            .await
            .map_err(|e| KubeSkippyError::MetricsError(format!("range query failed: {}", e)))?;

        let values = match response.data() {
            prometheus_http_query::response::Data::Matrix(m) => m
                .iter()
                .flat_map(|ts| ts.samples().iter().map(|s| s.value()))
                .collect(),
            _ => Vec::new(),
        };
        Ok(values)
    }
}

#[async_trait]
impl MetricsPort for PrometheusMetricsPort {
    async fn collect(&self, policy: &Policy) -> Result<ClusterMetrics> {
        let namespaces = crate::kinds::effective_namespaces(
            &policy.spec.selector,
            policy
                .metadata
                .namespace
                .as_deref()
                .unwrap_or("kubeskippy-system"),
        )
        .into_iter()
        .map(String::from)
        .collect();

        Ok(ClusterMetrics {
            namespaces,
            collected_at: Some(Utc::now()),
        })
    }

    async fn evaluate_trigger(
        &self,
        trigger: &Trigger,
        metrics: &ClusterMetrics,
    ) -> Result<(bool, String)> {
        let TriggerSpec::Metric {
            query,
            threshold,
            operator,
            duration_seconds,
        } = &trigger.spec
        else {
            return Ok((false, "trigger is not metrics-backed".to_string()));
        };

        let resolved_queries: Vec<String> = if registry::is_promql_expression(query) {
            vec![query.clone()]
        } else {
            metrics
                .namespaces
                .iter()
                .filter_map(|ns| registry::named_query_for_namespace(query, ns))
                .collect()
        };

        if resolved_queries.is_empty() {
            return Err(KubeSkippyError::ValidationError(format!(
                "trigger {} references unknown metric {}",
                trigger.name, query
            )));
        }

        let mut samples = Vec::new();
        for q in &resolved_queries {
            let values = if *duration_seconds > 0 {
                self.query_range_values(q, *duration_seconds).await?
            } else {
                self.query_instant(q).await?
            };
            samples.extend(values);
        }

        if samples.is_empty() {
            return Ok((
                false,
                format!("no samples returned for trigger {}", trigger.name),
            ));
        }

        let fired = samples
            .iter()
            .all(|v| operator_fires(operator, *v, *threshold));

        let reason = if fired {
            format!(
                "{} samples over {}s all satisfy {:?} {}",
                samples.len(),
                duration_seconds,
                operator,
                threshold
            )
        } else {
            format!(
                "{} samples over {}s do not sustain {:?} {}",
                samples.len(),
                duration_seconds,
                operator,
                threshold
            )
        };

        Ok((fired, reason))
    }

    async fn get_resource_metrics(&self, target: &CandidateTarget) -> Result<ResourceMetrics> {
        let mut values = HashMap::new();
        for name in registry::NAMED_METRICS {
            let query = registry::named_query_for_pod(name, &target.namespace, &target.name)
                .expect("name comes from NAMED_METRICS");
            let samples = self.query_instant(&query).await?;
            let value = samples.first().copied().unwrap_or(0.0);
            values.insert(name.to_string(), if value.is_nan() { 0.0 } else { value });
        }

        Ok(ResourceMetrics {
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            values,
        })
    }
}

fn operator_fires(operator: &ComparisonOperator, value: f64, threshold: f64) -> bool {
    operator.evaluate(value, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ComparisonOperator;

    #[test]
    fn operator_fires_matches_comparison_operator() {
        assert!(operator_fires(&ComparisonOperator::GreaterThan, 90.0, 80.0));
        assert!(!operator_fires(&ComparisonOperator::LessThan, 90.0, 80.0));
    }
}

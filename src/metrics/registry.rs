//! Named metric registry used when a trigger's `query` is a bare identifier
//! rather than a PromQL expression, per spec §4.1 step 6 and §6.

/// Returns the canonical PromQL template for a named metric scoped to a
/// single pod, used by `GetResourceMetrics`. `None` if `name` is not
/// registered.
pub fn named_query_for_pod(name: &str, namespace: &str, pod: &str) -> Option<String> {
    let query = match name {
        "cpu_usage_percent" => format!(
            r#"sum(rate(container_cpu_usage_seconds_total{{namespace="{ns}", pod="{pod}"}}[5m])) by (pod) * 100"#,
            ns = namespace,
            pod = pod
        ),
        "memory_usage_percent" => format!(
            r#"sum(container_memory_usage_bytes{{namespace="{ns}", pod="{pod}"}}) by (pod) / sum(container_spec_memory_limit_bytes{{namespace="{ns}", pod="{pod}"}}) by (pod) * 100"#,
            ns = namespace,
            pod = pod
        ),
        "restart_count" => format!(
            r#"sum(kube_pod_container_status_restarts_total{{namespace="{ns}", pod="{pod}"}}) by (pod)"#,
            ns = namespace,
            pod = pod
        ),
        "error_rate_percent" => format!(
            r#"sum(rate(http_requests_total{{namespace="{ns}", pod="{pod}", status=~"5.."}}[5m])) / sum(rate(http_requests_total{{namespace="{ns}", pod="{pod}"}}[5m])) * 100"#,
            ns = namespace,
            pod = pod
        ),
        "availability_percent" => format!(
            r#"avg_over_time(up{{namespace="{ns}", pod="{pod}"}}[5m]) * 100"#,
            ns = namespace,
            pod = pod
        ),
        _ => return None,
    };
    Some(query)
}

/// Same registry, aggregated across every pod in the namespace (no `pod`
/// label filter). Used when evaluating a Policy-level trigger, before
/// targets have been enumerated.
pub fn named_query_for_namespace(name: &str, namespace: &str) -> Option<String> {
    let query = match name {
        "cpu_usage_percent" => format!(
            r#"sum(rate(container_cpu_usage_seconds_total{{namespace="{ns}"}}[5m])) * 100"#,
            ns = namespace
        ),
        "memory_usage_percent" => format!(
            r#"sum(container_memory_usage_bytes{{namespace="{ns}"}}) / sum(container_spec_memory_limit_bytes{{namespace="{ns}"}}) * 100"#,
            ns = namespace
        ),
        "restart_count" => format!(
            r#"sum(kube_pod_container_status_restarts_total{{namespace="{ns}"}})"#,
            ns = namespace
        ),
        "error_rate_percent" => format!(
            r#"sum(rate(http_requests_total{{namespace="{ns}", status=~"5.."}}[5m])) / sum(rate(http_requests_total{{namespace="{ns}"}}[5m])) * 100"#,
            ns = namespace
        ),
        "availability_percent" => format!(
            r#"avg_over_time(up{{namespace="{ns}"}}[5m]) * 100"#,
            ns = namespace
        ),
        _ => return None,
    };
    Some(query)
}

pub const NAMED_METRICS: &[&str] = &[
    "cpu_usage_percent",
    "memory_usage_percent",
    "restart_count",
    "error_rate_percent",
    "availability_percent",
];

/// Returns true when `query` looks like a PromQL expression (aggregation,
/// selector braces, or a known function) rather than a bare named-metric
/// identifier.
pub fn is_promql_expression(query: &str) -> bool {
    const FUNCTIONS: &[&str] = &[
        "rate(",
        "sum(",
        "avg(",
        "max(",
        "min(",
        "histogram_quantile(",
        "count(",
        "avg_over_time(",
        "increase(",
    ];
    query.contains('{') || query.contains('(') || FUNCTIONS.iter().any(|f| query.contains(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_query_known_metrics() {
        assert!(named_query_for_pod("cpu_usage_percent", "ns", "pod").is_some());
        assert!(named_query_for_namespace("memory_usage_percent", "ns").is_some());
        assert!(named_query_for_pod("totally_unknown_metric", "ns", "pod").is_none());
    }

    #[test]
    fn detects_promql_expressions() {
        assert!(is_promql_expression(
            r#"sum(rate(foo{namespace="x"}[5m]))"#
        ));
        assert!(!is_promql_expression("cpu_usage_percent"));
    }
}

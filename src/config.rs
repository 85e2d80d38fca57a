use crate::error::{KubeSkippyError, Result};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub prometheus: PrometheusConfig,

    #[serde(default)]
    pub advisor: AdvisorConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_namespace() -> String {
    "kubeskippy-system".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct PrometheusConfig {
    pub url: String,
    #[serde(default = "default_prometheus_timeout")]
    pub timeout_seconds: u64,
}

fn default_prometheus_timeout() -> u64 {
    10
}

/// Configuration for the optional LM advisor. When `provider` is absent the
/// advisor is disabled and the Policy Reconciler proceeds with unfiltered
/// candidates, per spec §4.5 "Advisor unavailability is never fatal".
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AdvisorConfig {
    #[serde(default)]
    pub provider: Option<AdvisorProvider>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_advisor_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_fallback_top_k")]
    pub fallback_top_k: usize,
}

fn default_advisor_timeout() -> u64 {
    30
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_fallback_top_k() -> usize {
    2
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorProvider {
    Claude,
    OpenAI,
    Gemini,
    Ollama,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_protected_namespaces")]
    pub protected_namespaces: Vec<String>,

    #[serde(default = "default_protected_kinds")]
    pub protected_kinds: Vec<String>,

    #[serde(default = "default_protected_label")]
    pub protected_label_key: String,

    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_failure_threshold: u32,

    #[serde(default = "default_breaker_timeout")]
    pub circuit_breaker_open_seconds: u64,

    #[serde(default = "default_breaker_success_threshold")]
    pub circuit_breaker_success_threshold: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            protected_namespaces: default_protected_namespaces(),
            protected_kinds: default_protected_kinds(),
            protected_label_key: default_protected_label(),
            circuit_breaker_failure_threshold: default_breaker_threshold(),
            circuit_breaker_open_seconds: default_breaker_timeout(),
            circuit_breaker_success_threshold: default_breaker_success_threshold(),
        }
    }
}

fn default_protected_namespaces() -> Vec<String> {
    vec![
        "kube-system".to_string(),
        "kube-public".to_string(),
        "kube-node-lease".to_string(),
        "kubeskippy-system".to_string(),
    ]
}

fn default_protected_kinds() -> Vec<String> {
    vec![
        "Namespace".to_string(),
        "Node".to_string(),
        "CustomResourceDefinition".to_string(),
        "PersistentVolume".to_string(),
    ]
}

fn default_protected_label() -> String {
    "kubeskippy.io/protected".to_string()
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_timeout() -> u64 {
    300
}

fn default_breaker_success_threshold() -> u32 {
    1
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let prometheus_url = std::env::var("PROMETHEUS_URL")
            .unwrap_or_else(|_| "http://prometheus:9090".to_string());

        let advisor_provider = std::env::var("ADVISOR_PROVIDER").ok().and_then(|v| {
            match v.to_lowercase().as_str() {
                "claude" => Some(AdvisorProvider::Claude),
                "openai" => Some(AdvisorProvider::OpenAI),
                "gemini" => Some(AdvisorProvider::Gemini),
                "ollama" => Some(AdvisorProvider::Ollama),
                _ => None,
            }
        });

        Ok(Self {
            namespace: std::env::var("NAMESPACE").unwrap_or_else(|_| default_namespace()),
            prometheus: PrometheusConfig {
                url: prometheus_url,
                timeout_seconds: std::env::var("PROMETHEUS_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_prometheus_timeout),
            },
            advisor: AdvisorConfig {
                provider: advisor_provider,
                model: std::env::var("ADVISOR_MODEL").ok(),
                api_key: std::env::var("ADVISOR_API_KEY").ok(),
                base_url: std::env::var("ADVISOR_BASE_URL").ok(),
                timeout_seconds: std::env::var("ADVISOR_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_advisor_timeout),
                min_confidence: std::env::var("ADVISOR_MIN_CONFIDENCE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_min_confidence),
                fallback_top_k: std::env::var("ADVISOR_FALLBACK_TOP_K")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(default_fallback_top_k),
            },
            safety: SafetyConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KubeSkippyError::ConfigError(format!("failed to read config file: {}", e))
        })?;
        serde_yaml::from_str(&contents)
            .map_err(|e| KubeSkippyError::ConfigError(format!("failed to parse config: {}", e)))
    }
}

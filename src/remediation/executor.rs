//! Uniform executor contract (spec §4.4): every action type implements
//! `Execute`, `Validate`, and `DryRun`, returning the same result shape so
//! the engine's dispatch and status-writing code never special-cases a
//! kind of action.

use crate::crd::{ActionTemplateSpec, ResourceChange};
use crate::error::Result;
use crate::kinds::CandidateTarget;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub changes: Vec<ResourceChange>,
    pub metrics: HashMap<String, f64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>, changes: Vec<ResourceChange>, start: DateTime<Utc>) -> Self {
        Self {
            success: true,
            message: message.into(),
            changes,
            metrics: HashMap::new(),
            start_time: start,
            end_time: Utc::now(),
        }
    }

    pub fn failed(message: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            success: false,
            message: message.into(),
            changes: Vec::new(),
            metrics: HashMap::new(),
            start_time: start,
            end_time: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Validates the action is intrinsically well-formed for this target
    /// (bounds, non-empty patch, etc). Protection and rate-limit checks
    /// live in the Safety Controller, not here.
    async fn validate(&self, target: &CandidateTarget, spec: &ActionTemplateSpec) -> Result<()>;

    async fn execute(
        &self,
        target: &CandidateTarget,
        spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult>;

    /// Simulates the mutation and returns the same `changes[]` shape
    /// `execute` would, without touching the target.
    async fn dry_run(
        &self,
        target: &CandidateTarget,
        spec: &ActionTemplateSpec,
    ) -> Result<ExecutionResult>;
}

//! Per-run pipeline state and the merge policy applied to stage updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::{Alert, ContextItem, Remediation};
use crate::verification::VerificationReport;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieve,
    Analyze,
    Plan,
    Verify,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Retrieve => write!(f, "retrieve"),
            Stage::Analyze => write!(f, "analyze"),
            Stage::Plan => write!(f, "plan"),
            Stage::Verify => write!(f, "verify"),
            Stage::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlSignal {
    Continue,
    End,
    Error,
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlSignal::Continue => write!(f, "CONTINUE"),
            ControlSignal::End => write!(f, "END"),
            ControlSignal::Error => write!(f, "ERROR"),
        }
    }
}

/// Fields a stage may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Stage,
    Context,
    AnalysisText,
    Remediation,
    Verification,
    ControlSignal,
    RetryCount,
    HaltReason,
}

impl StateField {
    pub const ALL: [StateField; 8] = [
        StateField::Stage,
        StateField::Context,
        StateField::AnalysisText,
        StateField::Remediation,
        StateField::Verification,
        StateField::ControlSignal,
        StateField::RetryCount,
        StateField::HaltReason,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// The incoming value overwrites the current one.
    Replace,
    /// The incoming value is added to the current one.
    Append,
}

/// How each field combines with a stage's update.
pub const MERGE_POLICY: &[(StateField, MergeRule)] = &[
    (StateField::Stage, MergeRule::Replace),
    (StateField::Context, MergeRule::Append),
    (StateField::AnalysisText, MergeRule::Replace),
    (StateField::Remediation, MergeRule::Replace),
    (StateField::Verification, MergeRule::Replace),
    (StateField::ControlSignal, MergeRule::Replace),
    (StateField::RetryCount, MergeRule::Replace),
    (StateField::HaltReason, MergeRule::Replace),
];

pub fn merge_rule(field: StateField) -> Option<MergeRule> {
    MERGE_POLICY
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, rule)| *rule)
}

/// A partial update produced by one stage. Absent fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub stage: Option<Stage>,
    pub context: Option<Vec<ContextItem>>,
    pub analysis_text: Option<String>,
    pub remediation: Option<Remediation>,
    pub verification: Option<VerificationReport>,
    pub control_signal: Option<ControlSignal>,
    pub retry_count: Option<u32>,
    pub halt_reason: Option<String>,
}

impl StateUpdate {
    pub fn at_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Update that halts the run with the ERROR signal.
    pub fn halt(reason: impl Into<String>) -> Self {
        Self {
            control_signal: Some(ControlSignal::Error),
            halt_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Everything known about one alert's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub alert: Alert,
    /// Last stage that completed.
    pub stage: Stage,
    pub context: Vec<ContextItem>,
    pub analysis_text: Option<String>,
    pub remediation: Option<Remediation>,
    pub verification: Option<VerificationReport>,
    pub control_signal: ControlSignal,
    pub retry_count: u32,
    pub halt_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    pub fn new(alert: Alert) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            alert,
            stage: Stage::Retrieve,
            context: Vec::new(),
            analysis_text: None,
            remediation: None,
            verification: None,
            control_signal: ControlSignal::Continue,
            retry_count: 0,
            halt_reason: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.control_signal == ControlSignal::Error
    }

    /// Merge `update` into the state according to [`MERGE_POLICY`].
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            stage,
            context,
            analysis_text,
            remediation,
            verification,
            control_signal,
            retry_count,
            halt_reason,
        } = update;

        if let Some(v) = stage {
            merge_value(&mut self.stage, v, rule_for(StateField::Stage));
        }
        if let Some(items) = context {
            merge_list(&mut self.context, items, rule_for(StateField::Context));
        }
        if let Some(v) = analysis_text {
            merge_option(&mut self.analysis_text, v, rule_for(StateField::AnalysisText));
        }
        if let Some(v) = remediation {
            merge_option(&mut self.remediation, v, rule_for(StateField::Remediation));
        }
        if let Some(v) = verification {
            merge_option(&mut self.verification, v, rule_for(StateField::Verification));
        }
        if let Some(v) = control_signal {
            merge_value(&mut self.control_signal, v, rule_for(StateField::ControlSignal));
        }
        if let Some(v) = retry_count {
            merge_value(&mut self.retry_count, v, rule_for(StateField::RetryCount));
        }
        if let Some(v) = halt_reason {
            merge_option(&mut self.halt_reason, v, rule_for(StateField::HaltReason));
        }
        self.updated_at = Utc::now();
    }
}

fn rule_for(field: StateField) -> MergeRule {
    merge_rule(field).unwrap_or(MergeRule::Replace)
}

fn merge_list<T>(slot: &mut Vec<T>, incoming: Vec<T>, rule: MergeRule) {
    match rule {
        MergeRule::Replace => *slot = incoming,
        MergeRule::Append => slot.extend(incoming),
    }
}

// A single-valued slot under Append keeps the first value written.
fn merge_option<T>(slot: &mut Option<T>, incoming: T, rule: MergeRule) {
    match rule {
        MergeRule::Replace => *slot = Some(incoming),
        MergeRule::Append => {
            slot.get_or_insert(incoming);
        }
    }
}

fn merge_value<T>(slot: &mut T, incoming: T, rule: MergeRule) {
    match rule {
        MergeRule::Replace => *slot = incoming,
        MergeRule::Append => {}
    }
}

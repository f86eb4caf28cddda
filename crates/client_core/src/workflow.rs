use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ServiceRecord, Stats, TemplateParam},
    protocol::ARTIFACT_FILENAME,
};
use thiserror::Error;
use tracing::warn;

/// Server-side outcome of a template-create request: the artifact
/// bytes, or the plain-text rejection the server returned instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateCreateOutcome {
    Artifact(Vec<u8>),
    Rejected(String),
}

/// The requests a provisioning workflow can issue. The HTTP
/// implementation lives on the client; tests substitute stubs.
#[async_trait]
pub trait ProvisioningTransport: Send + Sync {
    async fn direct_create(&self, name: &str, owner: &str) -> Result<()>;
    async fn template_create(
        &self,
        template: &str,
        params: &[(String, String)],
    ) -> Result<TemplateCreateOutcome>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("no templates are available to provision from")]
    NoTemplates,
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },
}

/// An artifact to offer the user as a file download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDownload {
    pub filename: &'static str,
    pub bytes: Vec<u8>,
}

/// Which provisioning variant a deployment runs. Exactly one is active
/// per client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowMode {
    #[default]
    Direct,
    Template,
    Simulated,
}

/// One workflow per deployment mode, behind a single tagged type so the
/// driving code and the renderer handle every variant through the same
/// seam instead of growing per-variant copies.
#[derive(Debug)]
pub enum Workflow {
    Direct(DirectCreate),
    Template(TemplateCreate),
    Simulated(SimulatedProgress),
}

impl Workflow {
    pub fn for_mode(mode: WorkflowMode, templates: &[ServiceRecord]) -> Self {
        match mode {
            WorkflowMode::Direct => Workflow::Direct(DirectCreate::new()),
            WorkflowMode::Template => Workflow::Template(TemplateCreate::from_records(templates)),
            WorkflowMode::Simulated => Workflow::Simulated(SimulatedProgress::new()),
        }
    }
}

// --- direct create ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectState {
    #[default]
    Idle,
    Submitting,
    Done,
}

/// The plain name+owner form. A single request, no retry, and the form
/// closes on any response at all.
#[derive(Debug, Default)]
pub struct DirectCreate {
    state: DirectState,
    name: String,
    owner: String,
}

impl DirectCreate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DirectState {
        self.state
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    /// Issues the creation request. Success and failure are not
    /// distinguished: either way the workflow finishes and the inputs
    /// are cleared.
    pub async fn submit(&mut self, transport: &dyn ProvisioningTransport) -> Result<(), WorkflowError> {
        if self.state != DirectState::Idle {
            return Err(WorkflowError::InvalidTransition {
                state: "not idle",
                action: "submit",
            });
        }
        self.state = DirectState::Submitting;
        if let Err(err) = transport.direct_create(&self.name, &self.owner).await {
            warn!(name = %self.name, "direct create request failed: {err}");
        }
        self.state = DirectState::Done;
        self.name.clear();
        self.owner.clear();
        Ok(())
    }
}

// --- template create ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateState {
    SelectingTemplate,
    CollectingParameters,
    Submitting,
    Error(String),
    Done,
}

/// One selectable provisioning recipe: the template's name plus the
/// parameters it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateChoice {
    pub name: String,
    pub params: Vec<TemplateParam>,
}

/// The template-driven form: pick a template, fill in its declared
/// parameters, submit, and either download the produced artifact or
/// read the server's rejection and try again.
#[derive(Debug)]
pub struct TemplateCreate {
    templates: Vec<TemplateChoice>,
    state: TemplateState,
    chosen: Option<TemplateChoice>,
    values: BTreeMap<String, String>,
}

impl TemplateCreate {
    pub fn new(templates: Vec<TemplateChoice>) -> Self {
        Self {
            templates,
            state: TemplateState::SelectingTemplate,
            chosen: None,
            values: BTreeMap::new(),
        }
    }

    /// Builds the choice list from directory records, keeping only the
    /// ones that actually carry a template descriptor.
    pub fn from_records(records: &[ServiceRecord]) -> Self {
        let templates = records
            .iter()
            .filter_map(|record| {
                record.template_params().map(|params| TemplateChoice {
                    name: record.name.clone(),
                    params: params.to_vec(),
                })
            })
            .collect();
        Self::new(templates)
    }

    pub fn state(&self) -> &TemplateState {
        &self.state
    }

    pub fn templates(&self) -> &[TemplateChoice] {
        &self.templates
    }

    /// False when the directory offers nothing to provision from: a
    /// terminal empty display state, not an error.
    pub fn can_proceed(&self) -> bool {
        !self.templates.is_empty()
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            TemplateState::Error(text) => Some(text),
            _ => None,
        }
    }

    pub fn select(&mut self, name: &str) -> Result<(), WorkflowError> {
        if self.state != TemplateState::SelectingTemplate {
            return Err(WorkflowError::InvalidTransition {
                state: "not selecting",
                action: "select a template",
            });
        }
        if self.templates.is_empty() {
            return Err(WorkflowError::NoTemplates);
        }
        let choice = self
            .templates
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownTemplate(name.to_string()))?;
        self.values = choice
            .params
            .iter()
            .map(|p| (p.name.clone(), String::new()))
            .collect();
        self.chosen = Some(choice);
        self.state = TemplateState::CollectingParameters;
        Ok(())
    }

    /// Values are keyed by parameter name; no validation beyond
    /// presence, empty strings are sent as-is.
    pub fn set_value(&mut self, param: impl Into<String>, value: impl Into<String>) {
        self.values.insert(param.into(), value.into());
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Submits the collected parameters. Permitted from
    /// `CollectingParameters` and from `Error` (resubmission with the
    /// same values). A transport-level failure is surfaced the same way
    /// as a server rejection: stored as the error text, recoverable.
    pub async fn submit(
        &mut self,
        transport: &dyn ProvisioningTransport,
    ) -> Result<Option<ArtifactDownload>, WorkflowError> {
        match self.state {
            TemplateState::CollectingParameters | TemplateState::Error(_) => {}
            _ => {
                return Err(WorkflowError::InvalidTransition {
                    state: "not collecting parameters",
                    action: "submit",
                })
            }
        }
        let template = self
            .chosen
            .as_ref()
            .ok_or(WorkflowError::NoTemplates)?
            .clone();

        // Query arguments in declared parameter order.
        let params: Vec<(String, String)> = template
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    self.values.get(&p.name).cloned().unwrap_or_default(),
                )
            })
            .collect();

        self.state = TemplateState::Submitting;
        match transport.template_create(&template.name, &params).await {
            Ok(TemplateCreateOutcome::Artifact(bytes)) => {
                self.state = TemplateState::Done;
                self.values.clear();
                Ok(Some(ArtifactDownload {
                    filename: ARTIFACT_FILENAME,
                    bytes,
                }))
            }
            Ok(TemplateCreateOutcome::Rejected(text)) => {
                self.state = TemplateState::Error(text);
                Ok(None)
            }
            Err(err) => {
                self.state = TemplateState::Error(err.to_string());
                Ok(None)
            }
        }
    }

    /// Returns to template selection with parameters cleared. Available
    /// from every state except mid-submit.
    pub fn cancel(&mut self) -> Result<(), WorkflowError> {
        if self.state == TemplateState::Submitting {
            return Err(WorkflowError::InvalidTransition {
                state: "submitting",
                action: "cancel",
            });
        }
        self.state = TemplateState::SelectingTemplate;
        self.chosen = None;
        self.values.clear();
        Ok(())
    }
}

// --- simulated progress ---

/// Display names of the five fake provisioning stages.
pub const SIMULATED_STAGES: [&str; 5] = [
    "Creating repository",
    "Provisioning infrastructure",
    "Building artifact",
    "Deploying service",
    "Verifying health",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedState {
    Idle,
    Step(u8),
    Done,
}

/// Timer-driven provisioning theater: stages complete on a fixed tick
/// with no backend acknowledgment whatsoever. Kept because the existing
/// product behaves this way; treat the `Done` record it produces as a
/// placeholder until a real `dirty` event confirms it.
#[derive(Debug, Default)]
pub struct SimulatedProgress {
    service: Option<(String, String)>,
    completed: u8,
    started: bool,
}

impl SimulatedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SimulatedState {
        if !self.started {
            SimulatedState::Idle
        } else if usize::from(self.completed) < SIMULATED_STAGES.len() {
            SimulatedState::Step(self.completed + 1)
        } else {
            SimulatedState::Done
        }
    }

    pub fn begin(&mut self, name: impl Into<String>, owner: impl Into<String>) -> Result<(), WorkflowError> {
        if self.started {
            return Err(WorkflowError::InvalidTransition {
                state: "already running",
                action: "begin",
            });
        }
        self.service = Some((name.into(), owner.into()));
        self.started = true;
        self.completed = 0;
        Ok(())
    }

    /// Marks the current stage completed. The counter never decreases
    /// and halts exactly at the terminal step.
    pub fn advance(&mut self) -> SimulatedState {
        if self.started && usize::from(self.completed) < SIMULATED_STAGES.len() {
            self.completed += 1;
        }
        self.state()
    }

    pub fn completed_stages(&self) -> &[&'static str] {
        &SIMULATED_STAGES[..usize::from(self.completed).min(SIMULATED_STAGES.len())]
    }

    pub fn is_done(&self) -> bool {
        self.state() == SimulatedState::Done
    }

    /// The zero-stat record the caller materializes into the directory
    /// once the last stage completes.
    pub fn completed_record(&self) -> Option<ServiceRecord> {
        if !self.is_done() {
            return None;
        }
        self.service.as_ref().map(|(name, owner)| ServiceRecord {
            name: name.clone(),
            owner: owner.clone(),
            stats: Stats::default(),
            tasks: Vec::new(),
            descriptor: None,
        })
    }
}

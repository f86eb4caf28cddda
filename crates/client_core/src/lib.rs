use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use shared::{
    domain::{ServiceRecord, WorklogEntry},
    protocol::{events_url, PushEvent, CREATE_PATH, SNAPSHOT_PATH, WORKLOG_PATH},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub mod config;
pub mod directory;
pub mod liveness;
pub mod workflow;
pub mod worklog;

pub use config::{load_settings, Settings};
pub use directory::{DirectoryStore, StoreChange};
pub use liveness::LivenessMonitor;
pub use workflow::{
    ArtifactDownload, DirectCreate, DirectState, ProvisioningTransport, SimulatedProgress,
    SimulatedState, TemplateCreate, TemplateCreateOutcome, TemplateState, Workflow, WorkflowError,
    WorkflowMode, SIMULATED_STAGES,
};
pub use worklog::{WorklogBuffer, WorklogDelta};

const PUSH_RECONNECT_ATTEMPTS: usize = 5;
const PUSH_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Fan-out notifications to whatever is rendering this client's state.
/// Mutation has already happened by the time an event is observed;
/// subscribers re-read the store rather than carry payloads around.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    DirectoryChanged,
    WorklogReplaced { delta: WorklogDelta },
    Heartbeat { on: bool },
    ProvisioningStep { step: u8, stage: &'static str },
    ProvisioningComplete { name: String },
    /// The push subscription ended. Events sent while disconnected are
    /// lost; the owner calls `reconnect_push_events` to reopen the
    /// channel and restore a consistent baseline.
    PushChannelDown,
    Error(String),
}

#[derive(Default)]
struct ClientTasks {
    push_task: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    progress_task: Option<JoinHandle<()>>,
}

/// One client session against a service registry: the merge store, the
/// worklog buffer and the liveness monitor, fed by a one-shot snapshot,
/// a long-lived push subscription and a fixed-interval worklog poll.
///
/// All state lives behind this struct's own mutexes and is only touched
/// from the tasks it spawns, so within one entity the most recently
/// delivered event wins. An in-flight response that arrives after a
/// newer push event can briefly reintroduce stale data; that window is
/// accepted, the next delivery corrects it.
pub struct RegistryClient {
    http: Client,
    settings: Settings,
    directory: Mutex<DirectoryStore>,
    worklog: Mutex<WorklogBuffer>,
    liveness: Mutex<LivenessMonitor>,
    tasks: Mutex<ClientTasks>,
    events: broadcast::Sender<ClientEvent>,
}

impl RegistryClient {
    pub fn new(settings: Settings) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            http: Client::new(),
            settings,
            directory: Mutex::new(DirectoryStore::new()),
            worklog: Mutex::new(WorklogBuffer::new()),
            liveness: Mutex::new(LivenessMonitor::new()),
            tasks: Mutex::new(ClientTasks::default()),
            events,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    // --- snapshot ---

    /// Fetches the full directory once and merges it record-by-record,
    /// so push events that land mid-fetch are not clobbered wholesale.
    /// Returns how many records the merge touched.
    pub async fn fetch_snapshot(&self) -> Result<usize> {
        let records: Vec<ServiceRecord> = self
            .http
            .get(format!("{}{SNAPSHOT_PATH}", self.settings.server_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid snapshot payload")?;

        let total = records.len();
        let changed = self.directory.lock().await.apply_snapshot(records);
        info!(total, changed, "snapshot merged");
        if changed > 0 {
            self.emit(ClientEvent::DirectoryChanged);
        }
        Ok(changed)
    }

    /// Re-establishes a consistent baseline after the push channel was
    /// down: fresh snapshot plus an immediate worklog refresh.
    pub async fn resync(&self) -> Result<()> {
        self.fetch_snapshot().await?;
        self.poll_worklog().await?;
        Ok(())
    }

    pub async fn directory_records(&self) -> Vec<ServiceRecord> {
        self.directory.lock().await.records().to_vec()
    }

    pub async fn template_records(&self) -> Vec<ServiceRecord> {
        self.directory
            .lock()
            .await
            .templates()
            .cloned()
            .collect()
    }

    pub async fn worklog_entries(&self) -> Vec<WorklogEntry> {
        self.worklog.lock().await.entries().to_vec()
    }

    pub async fn heartbeat_on(&self) -> bool {
        self.liveness.lock().await.is_on()
    }

    // --- worklog polling ---

    /// One poll cycle: fetch the full list and swap it in. Emits the
    /// delta exactly once when the buffer actually changed.
    pub async fn poll_worklog(&self) -> Result<()> {
        let entries: Vec<WorklogEntry> = self
            .http
            .get(format!("{}{WORKLOG_PATH}", self.settings.server_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid worklog payload")?;

        let delta = self.worklog.lock().await.replace(entries);
        if delta.changed() {
            self.emit(ClientEvent::WorklogReplaced { delta });
        }
        Ok(())
    }

    /// Polls the worklog on the configured interval until stopped. A
    /// failed poll is surfaced on the event channel and the next one
    /// proceeds on schedule; there is no backoff.
    pub async fn start_worklog_poller(self: &Arc<Self>) {
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.settings.worklog_poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = client.poll_worklog().await {
                    warn!("worklog poll failed: {err}");
                    client.emit(ClientEvent::Error(format!("worklog poll failed: {err}")));
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.poll_task.replace(handle) {
            previous.abort();
        }
    }

    pub async fn stop_worklog_poller(&self) {
        if let Some(handle) = self.tasks.lock().await.poll_task.take() {
            handle.abort();
        }
    }

    // --- push channel ---

    /// Opens the long-lived push subscription and dispatches events in
    /// network-arrival order. Reconnection is the transport owner's
    /// concern: when the stream ends, `PushChannelDown` is emitted and
    /// a fresh `resync` is required before trusting the store again.
    pub async fn start_push_events(self: &Arc<Self>) -> Result<()> {
        let ws_url = events_url(&self.settings.server_url)?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect push channel: {ws_url}"))?;
        let (_, mut ws_reader) = ws_stream.split();

        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<PushEvent>(&text) {
                        Ok(event) => client.handle_push_event(event).await,
                        Err(err) => {
                            client.emit(ClientEvent::Error(format!("invalid push event: {err}")));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        client.emit(ClientEvent::Error(format!("push channel receive failed: {err}")));
                        break;
                    }
                }
            }
            warn!("push channel closed");
            client.emit(ClientEvent::PushChannelDown);
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.push_task.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Re-establishes the push subscription after a drop. The ws
    /// transport has no auto-reconnect of its own, so the subscription
    /// owner calls this on `PushChannelDown`. Once a connection is up a
    /// `resync` restores the baseline, since everything sent while
    /// disconnected is lost.
    pub async fn reconnect_push_events(self: &Arc<Self>) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=PUSH_RECONNECT_ATTEMPTS {
            match self.start_push_events().await {
                Ok(()) => {
                    self.resync().await?;
                    info!(attempt, "push channel reconnected");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = PUSH_RECONNECT_ATTEMPTS,
                        "push channel reconnect failed: {err}"
                    );
                    last_err = Some(err);
                    if attempt < PUSH_RECONNECT_ATTEMPTS {
                        tokio::time::sleep(PUSH_RECONNECT_DELAY).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("push channel reconnect attempts exhausted")))
    }

    async fn handle_push_event(&self, event: PushEvent) {
        match event {
            PushEvent::Message(payload) => {
                debug!(payload = %payload, "heartbeat");
                let on = self.liveness.lock().await.observe();
                self.emit(ClientEvent::Heartbeat { on });
            }
            PushEvent::Dirty(record) => {
                let change = self.directory.lock().await.apply_dirty(record);
                if change.is_mutation() {
                    self.emit(ClientEvent::DirectoryChanged);
                }
            }
            PushEvent::Deleted(name) => {
                let change = self.directory.lock().await.apply_deleted(&name);
                if change.is_mutation() {
                    self.emit(ClientEvent::DirectoryChanged);
                }
            }
            PushEvent::Work(entries) => {
                let delta = self.worklog.lock().await.replace(entries);
                if delta.changed() {
                    self.emit(ClientEvent::WorklogReplaced { delta });
                }
            }
        }
    }

    // --- provisioning drivers ---

    /// Runs the direct-create workflow end to end.
    pub async fn create_service(&self, name: &str, owner: &str) -> Result<()> {
        let mut flow = DirectCreate::new();
        flow.set_name(name);
        flow.set_owner(owner);
        flow.submit(self).await?;
        Ok(())
    }

    /// A template workflow seeded with the templates currently known to
    /// the directory. Submit it with this client as the transport.
    pub async fn template_workflow(&self) -> TemplateCreate {
        TemplateCreate::from_records(&self.template_records().await)
    }

    /// Drives the simulated-progress variant: advances one stage per
    /// configured tick, then stops the timer and materializes the
    /// zero-stat record into the directory. Purely timer-driven; no
    /// backend acknowledgment is involved.
    pub async fn start_simulated_provisioning(
        self: &Arc<Self>,
        name: &str,
        owner: &str,
    ) -> Result<(), WorkflowError> {
        let mut flow = SimulatedProgress::new();
        flow.begin(name, owner)?;

        let client = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.settings.progress_tick);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match flow.advance() {
                    SimulatedState::Step(next) => {
                        let completed = next - 1;
                        client.emit(ClientEvent::ProvisioningStep {
                            step: completed,
                            stage: SIMULATED_STAGES[usize::from(completed) - 1],
                        });
                    }
                    SimulatedState::Done => {
                        let completed = SIMULATED_STAGES.len() as u8;
                        client.emit(ClientEvent::ProvisioningStep {
                            step: completed,
                            stage: SIMULATED_STAGES[SIMULATED_STAGES.len() - 1],
                        });
                        if let Some(record) = flow.completed_record() {
                            let name = record.name.clone();
                            let change = client.directory.lock().await.apply_dirty(record);
                            if change.is_mutation() {
                                client.emit(ClientEvent::DirectoryChanged);
                            }
                            client.emit(ClientEvent::ProvisioningComplete { name });
                        }
                        break;
                    }
                    SimulatedState::Idle => break,
                }
            }
            client.tasks.lock().await.progress_task = None;
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.progress_task.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Stops every spawned timer and reader. Required on teardown so no
    /// scheduled work runs against a dropped session.
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for handle in [
            tasks.push_task.take(),
            tasks.poll_task.take(),
            tasks.progress_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

#[async_trait]
impl ProvisioningTransport for RegistryClient {
    async fn direct_create(&self, name: &str, owner: &str) -> Result<()> {
        self.http
            .get(format!("{}{CREATE_PATH}", self.settings.server_url))
            .query(&[("name", name), ("owner", owner)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn template_create(
        &self,
        template: &str,
        params: &[(String, String)],
    ) -> Result<TemplateCreateOutcome> {
        let response = self
            .http
            .get(format!(
                "{}{CREATE_PATH}/{template}",
                self.settings.server_url
            ))
            .query(params)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(TemplateCreateOutcome::Artifact(
                response.bytes().await?.to_vec(),
            ))
        } else {
            Ok(TemplateCreateOutcome::Rejected(response.text().await?))
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{ServiceRecord, WorklogEntry},
    error::ProtocolError,
};

/// Path of the one-shot full directory snapshot.
pub const SNAPSHOT_PATH: &str = "/get";
/// Path of the full-replacement activity log.
pub const WORKLOG_PATH: &str = "/worklog";
/// Path prefix of the provisioning endpoints (`/create` and
/// `/create/{template}`).
pub const CREATE_PATH: &str = "/create";
/// Path of the push channel the server publishes events on.
pub const EVENTS_PATH: &str = "/events";

/// Download name offered for a template-create artifact.
pub const ARTIFACT_FILENAME: &str = "service.tgz";

/// One push-channel notification, delivered in network-arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    /// Opaque heartbeat payload.
    Message(String),
    /// A record was created or updated; merge it by name.
    Dirty(ServiceRecord),
    /// The named record no longer exists.
    Deleted(String),
    /// Full replacement of the activity log.
    Work(Vec<WorklogEntry>),
}

/// Derives the push-channel URL from the HTTP base address the same way
/// the snapshot and worklog requests address it.
pub fn events_url(server_url: &str) -> Result<String, ProtocolError> {
    let ws_base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ProtocolError::UnsupportedScheme {
            url: server_url.to_string(),
        });
    };
    Ok(format!("{}{EVENTS_PATH}", ws_base.trim_end_matches('/')))
}

use std::{collections::HashMap, fs, time::Duration};

use crate::workflow::WorkflowMode;

/// Runtime settings for one client session. The server address defaults
/// to the local dev registry; a `spyglass.toml` next to the binary and
/// `SPYGLASS_*` environment variables override it, in that order. The
/// env layer is the non-production escape hatch for pointing a dev
/// client at a remote registry.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub worklog_poll: Duration,
    pub progress_tick: Duration,
    pub mode: WorkflowMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            worklog_poll: Duration::from_secs(5),
            progress_tick: Duration::from_secs(1),
            mode: WorkflowMode::Direct,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("spyglass.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply(&mut settings, |key| file_cfg.get(key).cloned());
        }
    }

    apply(&mut settings, |key| {
        std::env::var(format!("SPYGLASS_{}", key.to_ascii_uppercase())).ok()
    });

    settings
}

fn apply(settings: &mut Settings, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("server_url") {
        settings.server_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = get("worklog_poll_secs") {
        if let Ok(secs) = v.parse::<u64>() {
            settings.worklog_poll = Duration::from_secs(secs);
        }
    }
    if let Some(v) = get("progress_tick_ms") {
        if let Ok(ms) = v.parse::<u64>() {
            settings.progress_tick = Duration::from_millis(ms);
        }
    }
    if let Some(v) = get("mode") {
        if let Some(mode) = parse_mode(&v) {
            settings.mode = mode;
        }
    }
}

pub fn parse_mode(raw: &str) -> Option<WorkflowMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "direct" => Some(WorkflowMode::Direct),
        "template" => Some(WorkflowMode::Template),
        "simulated" => Some(WorkflowMode::Simulated),
        _ => None,
    }
}

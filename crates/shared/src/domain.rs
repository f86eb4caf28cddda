use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Health counters for one service. The registry reports these as
/// floating-point rates; the renderer sums them into a single rate dial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Stats {
    pub good: f64,
    pub bad: f64,
    pub slow: f64,
}

impl Stats {
    pub fn total(&self) -> f64 {
        self.good + self.bad + self.slow
    }
}

/// One parameter slot a template expects the user to fill in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateParam {
    pub name: String,
    pub title: String,
}

/// Free-form service metadata. Only the `template` field is interpreted
/// by the client; everything else rides along untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Vec<TemplateParam>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A registry entry keyed by `name`. A record whose descriptor carries a
/// `template` list is a provisioning recipe rather than a live service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
}

impl ServiceRecord {
    pub fn is_template(&self) -> bool {
        self.descriptor
            .as_ref()
            .is_some_and(|d| d.template.is_some())
    }

    pub fn template_params(&self) -> Option<&[TemplateParam]> {
        self.descriptor
            .as_ref()
            .and_then(|d| d.template.as_deref())
    }
}

/// One executed (or still running) command from the registry's activity
/// log. `code` is `None` until the server reports an exit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorklogEntry {
    pub command: Vec<String>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub code: Option<i32>,
}

impl WorklogEntry {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }

    pub fn code_label(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_descriptor_is_not_a_template() {
        let record: ServiceRecord =
            serde_json::from_str(r#"{"name":"auth","owner":"alice@org.io"}"#).expect("decode");
        assert!(!record.is_template());
        assert_eq!(record.stats, Stats::default());
        assert!(record.tasks.is_empty());
    }

    #[test]
    fn descriptor_template_marks_record_as_template() {
        let record: ServiceRecord = serde_json::from_str(
            r#"{"name":"web","owner":"","descriptor":{"template":[{"name":"port","title":"Port"}],"artifact":"web:v1"}}"#,
        )
        .expect("decode");
        assert!(record.is_template());
        let params = record.template_params().expect("params");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "port");
        assert_eq!(params[0].title, "Port");
        let descriptor = record.descriptor.expect("descriptor");
        assert_eq!(
            descriptor.extra.get("artifact"),
            Some(&serde_json::json!("web:v1"))
        );
    }

    #[test]
    fn null_exit_code_decodes_to_unknown_sentinel() {
        let entry: WorklogEntry = serde_json::from_str(
            r#"{"command":["git","pull"],"output":"Already up to date.\n","code":null}"#,
        )
        .expect("decode");
        assert_eq!(entry.code, None);
        assert_eq!(entry.code_label(), "unknown");
        assert_eq!(entry.command_line(), "git pull");
    }
}

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{config, ClientEvent, RegistryClient, WorkflowMode, WorklogDelta};
use shared::domain::WorklogEntry;
use tracing::{info, warn};

/// Headless registry viewer: connects to a registry, keeps the local
/// directory in sync, tails activity to stdout and optionally drives
/// one provisioning run in the configured mode.
#[derive(Parser, Debug)]
struct Args {
    /// Registry base URL; overrides config file and environment.
    #[arg(long)]
    server_url: Option<String>,
    /// Provisioning mode: direct, template or simulated.
    #[arg(long)]
    mode: Option<String>,
    /// Provision a service on startup. In direct and simulated mode
    /// this is the new service's name; in template mode it names the
    /// template to provision from.
    #[arg(long)]
    create: Option<String>,
    /// Owner recorded for the provisioned service.
    #[arg(long, default_value = "")]
    owner: String,
    /// Template parameter as key=value; repeatable. Template mode only.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = config::load_settings();
    if let Some(url) = args.server_url {
        settings.server_url = url.trim_end_matches('/').to_string();
    }
    if let Some(mode) = args.mode.as_deref().and_then(config::parse_mode) {
        settings.mode = mode;
    }
    info!(server_url = %settings.server_url, "connecting");

    let client = RegistryClient::new(settings);
    let mut events = client.subscribe_events();

    client.fetch_snapshot().await?;
    client.start_push_events().await?;
    client.start_worklog_poller().await;

    print_directory(&client).await;

    if let Some(name) = &args.create {
        run_provisioning(&client, name, &args.owner, &args.params).await?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::DirectoryChanged) => print_directory(&client).await,
                Ok(ClientEvent::WorklogReplaced { delta }) => print_worklog_tail(&client, delta).await,
                Ok(ClientEvent::Heartbeat { .. }) => {}
                Ok(ClientEvent::ProvisioningStep { step, stage }) => {
                    println!("provisioning [{step}/5] {stage}");
                }
                Ok(ClientEvent::ProvisioningComplete { name }) => {
                    println!("provisioned {name}");
                }
                Ok(ClientEvent::PushChannelDown) => {
                    warn!("push channel down; reconnecting");
                    if let Err(err) = client.reconnect_push_events().await {
                        warn!("push channel reconnect gave up: {err}");
                    }
                }
                Ok(ClientEvent::Error(message)) => warn!("{message}"),
                Err(err) => {
                    warn!("event stream lagged or closed: {err}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Kicks off one provisioning run in whichever mode the settings chose.
/// Simulated progress reports through the event loop; the other two
/// variants complete here.
async fn run_provisioning(
    client: &Arc<RegistryClient>,
    name: &str,
    owner: &str,
    params: &[(String, String)],
) -> Result<()> {
    match client.settings().mode {
        WorkflowMode::Direct => {
            client.create_service(name, owner).await?;
            println!("create requested for {name}");
        }
        WorkflowMode::Simulated => {
            client.start_simulated_provisioning(name, owner).await?;
        }
        WorkflowMode::Template => {
            let mut flow = client.template_workflow().await;
            if !flow.can_proceed() {
                println!("No templates available to provision from");
                return Ok(());
            }
            flow.select(name)?;
            for (param, value) in params {
                flow.set_value(param, value);
            }
            match flow.submit(client.as_ref()).await? {
                Some(download) => {
                    tokio::fs::write(download.filename, &download.bytes).await?;
                    println!("wrote {}", download.filename);
                }
                None => {
                    warn!(
                        "template create failed: {}",
                        flow.error_message().unwrap_or("unknown error")
                    );
                }
            }
        }
    }
    Ok(())
}

async fn print_directory(client: &RegistryClient) {
    let records = client.directory_records().await;
    if records.is_empty() {
        println!("No services...");
        return;
    }
    for record in records {
        let kind = if record.is_template() { "template" } else { "service" };
        println!(
            "{kind:8} {name:20} {owner:24} rate={rate:.1} tasks={tasks}",
            name = record.name,
            owner = record.owner,
            rate = record.stats.total(),
            tasks = record.tasks.len(),
        );
    }
}

async fn print_worklog_tail(client: &RegistryClient, delta: WorklogDelta) {
    let entries = client.worklog_entries().await;
    for entry in tail_slice(&entries, delta) {
        println!("$ {} [{}]", entry.command_line(), entry.code_label());
        if !entry.output.is_empty() {
            print!("{}", entry.output);
        }
    }
}

/// The entries worth printing for a given delta. The buffer may have
/// been replaced again between the event and this read, so an
/// extension count larger than the buffer falls back to the full list.
fn tail_slice(entries: &[WorklogEntry], delta: WorklogDelta) -> &[WorklogEntry] {
    match delta {
        WorklogDelta::Extended { added } if added <= entries.len() => {
            &entries[entries.len() - added..]
        }
        _ => entries,
    }
}

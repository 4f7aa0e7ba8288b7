//! Subcommand implementations.

use crate::pairs::{parse_method, parse_pair};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use courier_core::{
    Courier, CourierError, HttpMethod, NetworkClass, RequestSpec, RequiredConnectivity,
};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct SendArgs {
    /// HTTP method
    #[arg(value_parser = parse_method)]
    method: HttpMethod,

    /// URL template; `{name}` placeholders are filled from --path
    url: String,

    /// Request header as name=value
    #[arg(short = 'H', long = "header", value_parser = parse_pair)]
    headers: Vec<(String, String)>,

    /// Query parameter as name=value
    #[arg(short, long = "query", value_parser = parse_pair)]
    query: Vec<(String, String)>,

    /// Path parameter as name=value
    #[arg(short, long = "path", value_parser = parse_pair)]
    path: Vec<(String, String)>,

    /// JSON request body
    #[arg(long, conflicts_with = "form")]
    json: Option<String>,

    /// Form field as name=value
    #[arg(long, value_parser = parse_pair)]
    form: Vec<(String, String)>,

    /// Accepted status code (repeatable, 2xx only)
    #[arg(long = "expect")]
    expect: Vec<u16>,

    /// Only attempt the request over Wi-Fi
    #[arg(long, conflicts_with = "only")]
    wifi_only: bool,

    /// Only attempt the request over the given network class
    #[arg(long, value_parser = crate::pairs::parse_network_class)]
    only: Option<NetworkClass>,

    /// Queue the request for retry if it cannot be delivered
    #[arg(long)]
    cache: bool,

    /// Correlation tag stored with a queued request
    #[arg(long)]
    tag: Option<String>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "60")]
    timeout: u64,
}

impl SendArgs {
    fn to_spec(&self) -> Result<RequestSpec> {
        let mut spec = RequestSpec::new(self.method, self.url.clone());

        for (name, value) in &self.headers {
            spec = spec.header(name, value);
        }
        for (name, value) in &self.query {
            spec = spec.query(name, value);
        }
        for (name, value) in &self.path {
            spec = spec.path_param(name, value);
        }

        if let Some(json) = &self.json {
            let body: Value = serde_json::from_str(json).context("Invalid --json body")?;
            spec = spec.json_body(&body);
        } else if !self.form.is_empty() {
            let fields: Map<String, Value> = self
                .form
                .iter()
                .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                .collect();
            spec = spec.form_body(&fields);
        }

        if !self.expect.is_empty() {
            spec = spec.expect_status(self.expect.iter().copied());
        }

        let required = match (self.wifi_only, self.only) {
            (true, _) => RequiredConnectivity::WifiOnly,
            (false, Some(class)) => RequiredConnectivity::Only(class),
            (false, None) => RequiredConnectivity::Any,
        };
        spec = spec.require_connectivity(required).cache_on_failure(self.cache);

        if let Some(tag) = &self.tag {
            spec = spec.correlation_tag(tag.clone());
        }

        Ok(spec)
    }
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
    /// List queued requests
    List,
    /// Drop every queued request
    Clear,
    /// Sweep the queue now and wait for the resends
    Replay,
}

pub async fn send(courier: &Courier, args: SendArgs) -> Result<()> {
    let spec = args.to_spec()?;
    let future = courier.send::<Value, _>(&spec);

    let result = match tokio::time::timeout(Duration::from_secs(args.timeout), future.wait()).await
    {
        Ok(result) => result,
        Err(_) => {
            future.cancel();
            bail!("No response after {}s", args.timeout);
        }
    };

    match result {
        Ok(response) => {
            println!("{}", response.status);
            if !response.value.is_null() {
                println!("{}", serde_json::to_string_pretty(&response.value)?);
            }
            Ok(())
        }
        Err(CourierError::UnexpectedStatus { status, body }) => {
            bail!(
                "Unexpected status {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )
        }
        Err(e) if e.is_cacheable() && args.cache => {
            warn!("Request not delivered: {}", e);
            println!("queued ({} pending)", courier.cache().len().await);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn queue(courier: &Courier, command: QueueCommand) -> Result<()> {
    match command {
        QueueCommand::List => {
            let entries = courier.cache().entries().await;
            if entries.is_empty() {
                println!("Queue is empty.");
                return Ok(());
            }
            println!("{} queued request(s):", entries.len());
            for entry in entries {
                println!(
                    "  {} {} [{}] queued {}{}",
                    entry.method(),
                    entry.url(),
                    entry.required_connectivity(),
                    entry.created_at().format("%Y-%m-%d %H:%M:%S"),
                    entry
                        .correlation_tag()
                        .map(|tag| format!(" tag={}", tag))
                        .unwrap_or_default()
                );
            }
        }
        QueueCommand::Clear => {
            let count = courier.cache().len().await;
            courier.cache().clear().await;
            println!("Removed {} queued request(s).", count);
        }
        QueueCommand::Replay => {
            let outcome = courier.sweep_now().await;
            if !outcome.ran {
                println!("Network unavailable, nothing replayed.");
                return Ok(());
            }
            info!("{}", outcome);
            let delivered = outcome.wait().await;
            println!(
                "Delivered {} request(s), {} still queued.",
                delivered,
                courier.cache().len().await
            );
        }
    }
    Ok(())
}

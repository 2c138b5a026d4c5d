//! `alarmd serve` and `alarmd status` — the one subcommand that runs the daemon in-process, and
//! a thin health-check client for the rest.

use std::path::PathBuf;

use reqwest::Client;
use serde_json::Value;

use super::{base_url, connection_error_message};
use crate::daemon::{start_daemon, StartOptions};

fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

pub async fn cmd_serve(config: Option<&str>, port: Option<u16>, data_dir: Option<&str>, host: &str) -> anyhow::Result<()> {
    let config_path = config.map(PathBuf::from);
    let data_dir_path = data_dir.map(PathBuf::from);

    start_daemon(StartOptions {
        config_path: config_path.as_deref(),
        data_dir_override: data_dir_path.as_deref(),
        host_override: Some(host),
        port_override: port,
    })
    .await
}

pub async fn cmd_status(host: &str, port: u16) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/health", base_url(host, port));

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    let daemon_status = body["status"].as_str().unwrap_or("unknown");
    let uptime = body["uptime_seconds"].as_u64().unwrap_or(0);
    let alarm_count = body["alarm_count"].as_u64().unwrap_or(0);
    let tick_age_ms = body["tick_age_ms"].as_i64().unwrap_or(-1);

    println!("Daemon Status: {daemon_status}");
    println!("  Uptime:      {uptime}s");
    println!("  Alarms:      {alarm_count}");
    println!("  Tick age:    {tick_age_ms}ms");

    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

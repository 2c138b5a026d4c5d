//! `alarmd add|remove|list|show` — reqwest-based handlers against the daemon's `/alarms` façade.

use std::io::{self, BufRead, Write};

use reqwest::Client;
use serde_json::Value;

use super::{base_url, connection_error_message, parse_days};
use crate::models::NewAlarm;

fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_add(
    host: &str,
    port: u16,
    code_id: &str,
    email: &str,
    time: &str,
    timezone: Option<&str>,
    recurring: bool,
    days: Option<&str>,
) -> anyhow::Result<()> {
    let days_of_week = match days {
        Some(spec) => parse_days(spec).map_err(|e| anyhow::anyhow!(e))?,
        None => Default::default(),
    };
    if recurring && days_of_week.is_empty() {
        anyhow::bail!("--days is required when --recurring is set");
    }

    let new_alarm = NewAlarm {
        code_id: code_id.to_string(),
        email: email.to_string(),
        time: time.to_string(),
        timezone: timezone.map(|s| s.to_string()),
        is_recurring: recurring,
        days_of_week,
    };

    let client = Client::new();
    let url = format!("{}/alarms", base_url(host, port));
    let response = client
        .post(&url)
        .json(&new_alarm)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if status.is_success() {
        println!("Alarm '{code_id}' scheduled.");
        println!("  Local time: {time}");
        println!("  Timezone:   {}", body["timezone"].as_str().unwrap_or("unknown"));
        println!("  Recurring:  {recurring}");
    } else {
        let message = body["message"].as_str().unwrap_or("Unknown error");
        eprintln!("Error: {message}");
        std::process::exit(1);
    }

    Ok(())
}

pub async fn cmd_remove(host: &str, port: u16, code_id: &str, yes: bool) -> anyhow::Result<()> {
    if !yes {
        print!("Are you sure you want to cancel alarm '{code_id}'? [y/N] ");
        io::stdout().flush()?;
        let stdin = io::stdin();
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        let answer = line.trim().to_lowercase();
        if answer != "y" && answer != "yes" {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let client = Client::new();
    let url = format!("{}/alarms/{}", base_url(host, port), code_id);
    let response = client
        .delete(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    if response.status().is_success() {
        println!("Alarm '{code_id}' canceled.");
        Ok(())
    } else {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or_default();
        let message = body["message"].as_str().unwrap_or("Unknown error");
        eprintln!("Error ({status}): {message}");
        std::process::exit(1);
    }
}

pub async fn cmd_list(host: &str, port: u16, email: Option<&str>, status: Option<&str>, json: bool) -> anyhow::Result<()> {
    let client = Client::new();
    let mut url = format!("{}/alarms", base_url(host, port));
    let mut params = Vec::new();
    if let Some(e) = email {
        params.push(format!("email={e}"));
    }
    if let Some(s) = status {
        params.push(format!("status={s}"));
    }
    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.join("&"));
    }

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let resp_status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    if !resp_status.is_success() {
        let message = body["message"].as_str().unwrap_or("Unknown error");
        eprintln!("Error: {message}");
        std::process::exit(1);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let empty_vec = vec![];
    let alarms = body.as_array().unwrap_or(&empty_vec);
    if alarms.is_empty() {
        println!("No alarms found.");
        return Ok(());
    }

    println!("{:<20} {:<24} {:<10} {:<10} {:<10}", "ID", "EMAIL", "TIME", "ZONE", "STATUS");
    for alarm in alarms {
        println!(
            "{:<20} {:<24} {:<10} {:<10} {:<10}",
            alarm["code_id"].as_str().unwrap_or("?"),
            alarm["email"].as_str().unwrap_or("?"),
            alarm["local_time"].as_str().unwrap_or("?"),
            alarm["timezone"].as_str().unwrap_or("?"),
            alarm["status"].as_str().unwrap_or("?"),
        );
    }

    Ok(())
}

pub async fn cmd_show(host: &str, port: u16, code_id: &str) -> anyhow::Result<()> {
    let client = Client::new();
    let url = format!("{}/alarms/{}", base_url(host, port), code_id);
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

    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or("Unknown error");
        eprintln!("Error: {message}");
        std::process::exit(1);
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_request_error_connect_is_friendly() {
        // reqwest::Error isn't directly constructible in tests; this smoke-tests the message
        // shape via the connection_error_message helper it delegates to.
        let msg = connection_error_message("127.0.0.1", 8177);
        assert!(msg.contains("127.0.0.1:8177"));
    }
}

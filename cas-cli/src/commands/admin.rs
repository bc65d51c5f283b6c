//! Actuator commands: SSO sessions, events and throttles.

use anyhow::Result;
use serde_json::Value;

use crate::api::CasClient;
use crate::utils::{format_timestamp, truncate};

pub async fn list_sessions(
    client: &CasClient,
    json: bool,
    scope: Option<&str>,
    username: Option<&str>,
) -> Result<()> {
    let mut query = Vec::new();
    if let Some(scope) = scope {
        query.push(("type", scope));
    }
    if let Some(username) = username {
        query.push(("username", username));
    }
    let report = client.actuator_get("/ssoSessions", &query).await?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
        return Ok(());
    }

    let sessions = report["activeSsoSessions"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    if sessions.is_empty() {
        eprintln!("No active sessions");
        return Ok(());
    }

    println!(
        "{:<40}  {:<16}  {:<23}  {:>4}  {}",
        "TICKET", "PRINCIPAL", "AUTHENTICATED", "USES", "SERVICES"
    );
    println!("{}", "-".repeat(100));
    for session in sessions {
        let services = session["authenticated_services"]
            .as_object()
            .map(|s| s.len())
            .unwrap_or(0);
        let proxied = if session["is_proxied"] == Value::Bool(true) {
            " (proxied)"
        } else {
            ""
        };
        println!(
            "{:<40}  {:<16}  {:<23}  {:>4}  {}{}",
            truncate(session["ticket_granting_ticket"].as_str().unwrap_or("?"), 40),
            truncate(session["authenticated_principal"].as_str().unwrap_or("?"), 16),
            format_timestamp(session["authentication_date"].as_str().unwrap_or_default()),
            session["number_of_uses"].as_u64().unwrap_or(0),
            services,
            proxied,
        );
    }
    eprintln!(
        "{} session(s), {} principal(s)",
        report["totalTickets"], report["totalPrincipals"]
    );
    Ok(())
}

pub async fn destroy_session(client: &CasClient, ticket: &str) -> Result<()> {
    let response = client
        .actuator_delete(&format!("/ssoSessions/{ticket}"), &[])
        .await?;
    if response["destroyed"] == Value::Bool(true) {
        eprintln!("Destroyed {ticket}");
    } else {
        eprintln!("No session {ticket}");
    }
    Ok(())
}

/// Destroy every session of `username`, or every session in `scope`.
pub async fn destroy_sessions(
    client: &CasClient,
    scope: Option<&str>,
    username: Option<&str>,
) -> Result<()> {
    match (username, scope) {
        (Some(username), _) => {
            let response = client
                .actuator_delete("/ssoSessions", &[("username", username)])
                .await?;
            let count = response.as_object().map(|m| m.len()).unwrap_or(0);
            eprintln!("Destroyed {count} session(s) of {username}");
        }
        (None, Some(scope)) => {
            let response = client
                .actuator_delete("/ssoSessions", &[("type", scope)])
                .await?;
            eprintln!("Destroyed {} session(s)", response["destroyed"]);
        }
        (None, None) => anyhow::bail!("pass --username or --type"),
    }
    Ok(())
}

pub async fn list_events(client: &CasClient, json: bool, limit: usize) -> Result<()> {
    let events = client.actuator_get("/events", &[]).await?;
    let events = events.as_array().map(Vec::as_slice).unwrap_or_default();
    let recent = &events[events.len().saturating_sub(limit)..];

    if json {
        println!("{}", serde_json::to_string(recent)?);
        return Ok(());
    }
    for event in recent {
        let mut line = format!(
            "{}  {:<34}",
            format_timestamp(event["ts"].as_str().unwrap_or_default()),
            event["kind"].as_str().unwrap_or("?"),
        );
        for field in ["principal", "ticket", "service", "client_ip"] {
            if let Some(value) = event[field].as_str() {
                line.push_str(&format!("  {field}={value}"));
            }
        }
        println!("{line}");
    }
    Ok(())
}

pub async fn clear_events(client: &CasClient) -> Result<()> {
    let response = client.actuator_delete("/events", &[]).await?;
    eprintln!("Cleared {} event(s)", response["cleared"]);
    Ok(())
}

pub async fn clear_throttles(client: &CasClient) -> Result<()> {
    let response = client.actuator_delete("/throttles", &[]).await?;
    eprintln!("Cleared {} throttled key(s)", response["cleared"]);
    Ok(())
}

//! `casctl login`, `casctl validate` and `casctl proxy`.

use std::fmt::Write as _;
use std::io::{self, BufRead};

use anyhow::{bail, Context, Result};
use cas_core::{ProxyResponse, ServiceResponse};
use clap::ValueEnum;

use crate::api::{ticket_from_redirect, CasClient};

#[derive(Clone, Copy, ValueEnum)]
pub enum ProtocolArg {
    /// `/validate`, plain text
    V1,
    /// `/serviceValidate` or `/proxyValidate`
    V2,
    /// `/p3/serviceValidate` or `/p3/proxyValidate`
    V3,
}

impl ProtocolArg {
    fn path(self, proxy: bool) -> &'static str {
        match (self, proxy) {
            (Self::V1, _) => "/validate",
            (Self::V2, false) => "/serviceValidate",
            (Self::V2, true) => "/proxyValidate",
            (Self::V3, false) => "/p3/serviceValidate",
            (Self::V3, true) => "/p3/proxyValidate",
        }
    }
}

pub async fn login(
    client: &CasClient,
    json: bool,
    username: &str,
    password: Option<String>,
    service: Option<&str>,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    let result = client.login(username, &password, service).await?;

    if json {
        let ticket = result
            .redirect
            .as_deref()
            .map(ticket_from_redirect)
            .transpose()?;
        println!(
            "{}",
            serde_json::json!({
                "ticketGrantingTicket": result.ticket_granting_ticket,
                "serviceTicket": ticket,
                "redirect": result.redirect,
            })
        );
        return Ok(());
    }

    match (&result.redirect, &result.body) {
        (Some(redirect), _) => {
            // Service ticket to stdout (script-friendly), the rest to stderr.
            println!("{}", ticket_from_redirect(redirect)?);
            eprintln!("Redirect: {redirect}");
        }
        (None, Some(body)) => {
            let principal = body["principal"].as_str().unwrap_or("unknown");
            eprintln!("Logged in as {principal}");
        }
        (None, None) => bail!("unexpected login response"),
    }
    if let Some(tgt) = &result.ticket_granting_ticket {
        eprintln!("TGT: {tgt}");
    }
    Ok(())
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(password)
}

pub async fn validate(
    client: &CasClient,
    json: bool,
    ticket: &str,
    service: &str,
    protocol: ProtocolArg,
    pgt_url: Option<&str>,
) -> Result<()> {
    let proxy = ticket.starts_with("PT-");
    let mut query = vec![("ticket", ticket), ("service", service)];
    if let Some(pgt_url) = pgt_url {
        query.push(("pgtUrl", pgt_url));
    }

    if matches!(protocol, ProtocolArg::V1) {
        let body = client.get_text(protocol.path(proxy), &query).await?;
        print!("{body}");
        if !body.starts_with("yes") {
            bail!("ticket was not validated");
        }
        return Ok(());
    }

    query.push(("format", "JSON"));
    let body = client.get_text(protocol.path(proxy), &query).await?;
    let response =
        ServiceResponse::from_json(&body).context("Unexpected validation response")?;
    if json {
        println!("{}", body.trim_end());
    } else {
        print!("{}", describe_validation(&response));
    }
    if !response.is_success() {
        bail!("ticket was not validated");
    }
    Ok(())
}

/// Ask for a proxy ticket for `target_service` and print it.
pub async fn proxy(client: &CasClient, json: bool, pgt: &str, target_service: &str) -> Result<()> {
    let query = [("pgt", pgt), ("targetService", target_service), ("format", "JSON")];
    let body = client.get_text("/proxy", &query).await?;
    let response = ProxyResponse::from_json(&body).context("Unexpected proxy response")?;
    if json {
        println!("{}", body.trim_end());
    }
    match response {
        ProxyResponse::ProxySuccess { proxy_ticket } => {
            if !json {
                println!("{proxy_ticket}");
            }
            Ok(())
        }
        ProxyResponse::ProxyFailure(failure) => {
            bail!("{}: {}", failure.code, failure.description)
        }
    }
}

fn describe_validation(response: &ServiceResponse) -> String {
    let mut out = String::new();
    match response {
        ServiceResponse::AuthenticationSuccess(success) => {
            let _ = writeln!(out, "user: {}", success.user);
            for (name, values) in &success.attributes {
                let _ = writeln!(out, "  {name}: {}", values.join(", "));
            }
            if let Some(iou) = &success.proxy_granting_ticket {
                let _ = writeln!(out, "pgtIou: {iou}");
            }
            for proxy in &success.proxies {
                let _ = writeln!(out, "proxy: {proxy}");
            }
        }
        ServiceResponse::AuthenticationFailure(failure) => {
            let _ = writeln!(out, "{}: {}", failure.code, failure.description);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_per_protocol() {
        assert_eq!(ProtocolArg::V1.path(true), "/validate");
        assert_eq!(ProtocolArg::V2.path(false), "/serviceValidate");
        assert_eq!(ProtocolArg::V3.path(true), "/p3/proxyValidate");
    }

    #[test]
    fn describes_decoded_success() {
        let body = r#"{
            "serviceResponse": {
                "authenticationSuccess": {
                    "user": "casuser",
                    "attributes": {"memberOf": ["staff", "faculty"]},
                    "proxies": ["https://portal.example.org/pgtCallback"]
                }
            }
        }"#;
        let response = ServiceResponse::from_json(body).unwrap();
        assert!(response.is_success());
        assert_eq!(
            describe_validation(&response),
            "user: casuser\n  memberOf: staff, faculty\nproxy: https://portal.example.org/pgtCallback\n"
        );
    }

    #[test]
    fn describes_decoded_failure() {
        let body = r#"{"serviceResponse": {"authenticationFailure":
            {"code": "INVALID_TICKET", "description": "Ticket ST-1 not recognized"}}}"#;
        let response = ServiceResponse::from_json(body).unwrap();
        assert!(!response.is_success());
        assert_eq!(
            describe_validation(&response),
            "INVALID_TICKET: Ticket ST-1 not recognized\n"
        );
    }

    #[test]
    fn decodes_proxy_responses() {
        let ok = ProxyResponse::from_json(
            r#"{"serviceResponse": {"proxySuccess": {"proxyTicket": "PT-1-abc-node1"}}}"#,
        )
        .unwrap();
        assert_eq!(
            ok,
            ProxyResponse::ProxySuccess {
                proxy_ticket: "PT-1-abc-node1".to_string()
            }
        );
        let failed = ProxyResponse::from_json(
            r#"{"serviceResponse": {"proxyFailure": {"code": "INVALID_REQUEST", "description": "missing pgt"}}}"#,
        )
        .unwrap();
        assert!(matches!(failed, ProxyResponse::ProxyFailure(f) if f.description == "missing pgt"));
    }
}

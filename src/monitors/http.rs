//! HTTP(S) check module
//!
//! Requests `url`, or `http://<target>:<port><path>` when no URL is
//! configured, and grades the response.
//!
//! ## Check config
//!
//! | key      | default  | meaning                                   |
//! |----------|----------|-------------------------------------------|
//! | `url`    | none     | full URL, overrides port and path         |
//! | `port`   | `80`     | port on the check target                  |
//! | `path`   | `/`      | request path                              |
//! | `method` | `GET`    | `GET`, `POST` or `HEAD`                   |
//! | `code`   | `^200$`  | regex the status code must match          |
//! | `body`   | none     | regex the response body must match        |
//!
//! ## Metrics
//!
//! `code` (u32), `duration` (ms, double), `bytes` (u64)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, instrument, trace, warn};

use super::millis;
use crate::check::Check;
use crate::engine::Probe;
use crate::module::CheckModule;
use crate::stats::{Availability, State};

const DEFAULT_CODE: &str = "^200$";

/// Module performing one HTTP request per firing
pub struct HttpModule {
    /// Shared client (connection pool reused across checks)
    client: RwLock<reqwest::Client>,
}

impl HttpModule {
    pub fn new() -> Self {
        Self {
            client: RwLock::new(reqwest::Client::new()),
        }
    }
}

impl Default for HttpModule {
    fn default() -> Self {
        Self::new()
    }
}

/// What to request and how to grade the answer
#[derive(Debug, Clone)]
struct Request {
    method: reqwest::Method,
    url: String,
    code: Regex,
    body: Option<Regex>,
}

impl Request {
    fn from_check(check: &Check) -> Result<Self> {
        let method = parse_method(check.config_value("method").unwrap_or("GET"))?;

        let url = match check.config_value("url") {
            Some(url) => url.to_string(),
            None => {
                let port = match check.config_value("port") {
                    Some(port) => port
                        .parse::<u16>()
                        .with_context(|| format!("invalid port '{port}'"))?,
                    None => 80,
                };
                let path = check.config_value("path").unwrap_or("/");
                let separator = if path.starts_with('/') { "" } else { "/" };
                format!(
                    "http://{}{separator}{path}",
                    SocketAddr::new(check.address(), port)
                )
            }
        };

        let code = check.config_value("code").unwrap_or(DEFAULT_CODE);
        let code = Regex::new(code).with_context(|| format!("invalid code pattern '{code}'"))?;

        let body = check
            .config_value("body")
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("invalid body pattern '{pattern}'"))
            })
            .transpose()?;

        Ok(Self {
            method,
            url,
            code,
            body,
        })
    }

    /// Grade a response: (state, status line)
    fn evaluate(&self, status_code: u16, body: &str) -> (State, String) {
        if !self.code.is_match(&status_code.to_string()) {
            return (State::Bad, format!("unexpected status code {status_code}"));
        }

        if let Some(pattern) = &self.body
            && !pattern.is_match(body)
        {
            return (
                State::Bad,
                format!("status code {status_code}, body did not match"),
            );
        }

        (State::Good, format!("status code {status_code}"))
    }
}

fn parse_method(method: &str) -> Result<reqwest::Method> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(reqwest::Method::GET),
        "POST" => Ok(reqwest::Method::POST),
        "HEAD" => Ok(reqwest::Method::HEAD),
        other => bail!("unsupported HTTP method '{other}'"),
    }
}

/// Execute the request; returns (status_code, body)
async fn execute(
    client: &reqwest::Client,
    request: &Request,
    timeout: Duration,
) -> Result<(u16, String)> {
    let response = client
        .request(request.method.clone(), &request.url)
        .timeout(timeout)
        .send()
        .await
        .context("HTTP request failed")?;

    let status_code = response.status().as_u16();

    let body = if request.method == reqwest::Method::HEAD {
        String::new()
    } else {
        response
            .text()
            .await
            .context("failed to read response body")?
    };

    Ok((status_code, body))
}

#[instrument(skip_all, fields(check = %probe.check(), url = %request.url))]
async fn run(client: reqwest::Client, request: Request, probe: Probe) {
    trace!("requesting {}", request.url);

    let start = Instant::now();
    let result = execute(&client, &request, probe.check().timeout()).await;
    let elapsed = start.elapsed();

    match result {
        Ok((status_code, body)) => {
            let (state, status) = request.evaluate(status_code, &body);
            debug!("{status}");

            probe.set_metric("code", u32::from(status_code));
            probe.set_metric("duration", millis(elapsed));
            probe.set_metric("bytes", body.len() as u64);
            probe.set_availability(Availability::Available);
            probe.set_state(state);
            probe.set_status(status);
            probe.complete();
        }
        Err(e) => {
            warn!("request failed: {e:#}");
            probe.set_metric("duration", millis(elapsed));
            probe.fail(format!("{e:#}"));
        }
    }
}

impl CheckModule for HttpModule {
    fn name(&self) -> &str {
        "http"
    }

    /// Options: `user_agent`
    fn configure(&self, options: &HashMap<String, String>) -> Result<()> {
        let mut builder = reqwest::Client::builder();
        if let Some(user_agent) = options.get("user_agent") {
            builder = builder.user_agent(user_agent.as_str());
        }
        let client = builder.build().context("failed to build HTTP client")?;
        *self.client.write() = client;
        Ok(())
    }

    fn start_probe(&self, probe: Probe) {
        let request = match Request::from_check(probe.check()) {
            Ok(request) => request,
            Err(e) => {
                probe.fail(format!("{e:#}"));
                return;
            }
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            probe.fail("no async runtime available");
            return;
        };

        let client = self.client.read().clone();
        handle.spawn(run(client, request, probe));
    }
}

// ============================================================================
// Tests
// ============================================================================

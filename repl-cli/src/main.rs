//! repl-cli - talk to a running repl-server over HTTP
//!
//! # Subcommands
//! - `status`                                   - show server health
//! - `put <url> <file> [--content-type <ct>]`   - store an artifact (text or binary), as the build pipeline does
//! - `tail [--client-id <id>] [--json]`         - follow relayed runtime events

use std::path::Path;

use base64::engine::general_purpose;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";
const ARTIFACTS_PATH: &str = "/~repl-server-artifacts";
const EVENTS_PATH: &str = "/repl/~repl-server-events";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "repl-cli", version, about = "Push artifacts to and follow events from a repl-server")]
struct Cli {
    /// repl-server URL (overrides REPL_HTTP_URL env var)
    #[arg(long, env = "REPL_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show repl-server status
    Status,

    /// Store a file in the artifact cache (binary files are sent base64-encoded)
    Put {
        /// URL (or path, e.g. /repl/s1/index.html) the artifact is served at
        url: String,

        /// File whose contents become the response body
        file: String,

        /// Content-Type of the stored response (guessed from the file name if omitted)
        #[arg(long)]
        content_type: Option<String>,

        /// Cache name (server default if omitted)
        #[arg(long)]
        cache: Option<String>,
    },

    /// Follow relayed runtime events
    Tail {
        /// Only show events for this session
        #[arg(long)]
        client_id: Option<String>,

        /// Print raw JSON messages
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// Event Formatting
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedMessage {
    pub client_id: String,
    pub event: RelayedEvent,
}

#[derive(Debug, Deserialize)]
pub struct RelayedEvent {
    pub kind: String,
    pub scope: String,
    pub message: serde_json::Value,
    pub start: f64,
}

/// One line per event: `[s1 +12.3ms] client console-log: hello world`
pub fn format_event(m: &RelayedMessage) -> String {
    let text = match &m.event.message {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let head = format!(
        "[{} +{:.1}ms] {} {}",
        m.client_id, m.event.start, m.event.scope, m.event.kind
    );
    if text.is_empty() {
        head
    } else {
        format!("{}: {}", head, text)
    }
}

/// Text for one relayed SSE message: the raw payload with `--json`, else one
/// formatted line (falling back to the raw payload if it is not an event).
pub fn render_event(data: &str, json: bool) -> String {
    if json {
        return data.to_string();
    }
    match serde_json::from_str::<RelayedMessage>(data) {
        Ok(m) => format_event(&m),
        Err(_) => data.to_string(),
    }
}

/// Upload field carrying `bytes`: UTF-8 goes as `body`, anything else as `body_base64`.
pub fn body_field(bytes: Vec<u8>) -> (&'static str, String) {
    match String::from_utf8(bytes) {
        Ok(text) => ("body", text),
        Err(e) => ("body_base64", general_purpose::STANDARD.encode(e.into_bytes())),
    }
}

pub fn guess_content_type(file: &str) -> String {
    mime_guess::from_path(Path::new(file))
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("repl-server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:     {}", body["version"].as_str().unwrap_or("?"));
            println!("Cache:       {}", body["cache"].as_str().unwrap_or("?"));
            println!("Entries:     {}", body["entries"]);
            println!("Subscribers: {}", body["subscribers"]);
            println!("Socket:      {}", body["socket"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("repl-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("repl-cli: cannot reach {} - {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn do_put(
    server: &str,
    url: &str,
    file: &str,
    content_type: Option<String>,
    cache: Option<String>,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).map_err(|e| anyhow::anyhow!("cannot read {}: {}", file, e))?;
    let content_type = content_type.unwrap_or_else(|| guess_content_type(file));
    let (field, body) = body_field(bytes);

    let mut upload = serde_json::json!({
        "cache": cache,
        "url": url,
        "content_type": content_type,
    });
    upload[field] = serde_json::Value::String(body);

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let resp = client
        .post(format!("{}{}", server, ARTIFACTS_PATH))
        .json(&upload)
        .send()?;

    let status = resp.status();
    let data: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!(
            "server returned {}: {}",
            status,
            data["error"].as_str().unwrap_or("unknown error")
        );
    }
    println!(
        "stored {} in {} ({})",
        data["url"].as_str().unwrap_or(url),
        data["cache"].as_str().unwrap_or("?"),
        content_type
    );
    Ok(())
}

fn do_tail(server: &str, client_id: Option<String>, json: bool) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(follow_events(server, client_id, json))
}

async fn follow_events(server: &str, client_id: Option<String>, json: bool) -> anyhow::Result<()> {
    let mut request = reqwest::Client::new().get(format!("{}{}", server, EVENTS_PATH));
    if let Some(id) = &client_id {
        request = request.query(&[("clientId", id)]);
    }
    let mut events = request
        .eventsource()
        .map_err(|e| anyhow::anyhow!("cannot open event stream: {}", e))?;

    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Open) => {}
            Ok(Event::Message(msg)) => println!("{}", render_event(&msg.data, json)),
            Err(reqwest_eventsource::Error::StreamEnded) => {
                events.close();
                break;
            }
            Err(e) => {
                events.close();
                anyhow::bail!("event stream failed: {}", e);
            }
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Put { url, file, content_type, cache } => {
            do_put(&server, &url, &file, content_type, cache)
        }
        Commands::Tail { client_id, json } => do_tail(&server, client_id, json),
    };

    if let Err(e) = result {
        eprintln!("repl-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> RelayedMessage {
        serde_json::from_str(raw).expect("valid relayed message")
    }

    #[test]
    fn test_format_console_event() {
        let m = parse(
            r#"{"type":"event","clientId":"s1","event":{"kind":"console-log","scope":"client","message":["hello","world"],"start":12.34}}"#,
        );
        assert_eq!(format_event(&m), "[s1 +12.3ms] client console-log: hello world");
    }

    #[test]
    fn test_format_resume_event_without_message() {
        let m = parse(
            r#"{"type":"event","clientId":"s2","event":{"kind":"resume","scope":"client","message":"","start":0}}"#,
        );
        assert_eq!(format_event(&m), "[s2 +0.0ms] client resume");
    }

    #[test]
    fn test_format_network_event() {
        let m = parse(
            r#"{"type":"event","clientId":"s1","event":{"kind":"client-module","scope":"network","message":["/repl/s1/a.js?v=1"],"start":5}}"#,
        );
        assert_eq!(
            format_event(&m),
            "[s1 +5.0ms] network client-module: /repl/s1/a.js?v=1"
        );
    }

    #[test]
    fn test_render_event() {
        // a message whose data arrived over several `data:` lines is joined with '\n'
        let joined = "{\"type\":\"event\",\"clientId\":\"s1\",\n\"event\":{\"kind\":\"console-warn\",\"scope\":\"client\",\"message\":[\"w\"],\"start\":1}}";
        assert_eq!(render_event(joined, false), "[s1 +1.0ms] client console-warn: w");
        assert_eq!(render_event(joined, true), joined);
        assert_eq!(render_event("not json", false), "not json");
    }

    #[test]
    fn test_body_field_text_and_binary() {
        assert_eq!(body_field(b"<h1>hi</h1>".to_vec()), ("body", "<h1>hi</h1>".to_string()));
        assert_eq!(
            body_field(vec![0x89, b'P', b'N', b'G', 0xff]),
            ("body_base64", "iVBOR/8=".to_string())
        );
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("index.html"), "text/html");
        assert_eq!(guess_content_type("style.css"), "text/css");
        assert_eq!(guess_content_type("blob.unknownext"), "application/octet-stream");
    }
}

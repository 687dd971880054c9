use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use crate::finalizer::PersistedSessionRecord;
use crate::session::{ConsoleLogEntry, NetworkEventEntry, SessionBuffers};

const RULE: &str = "========================================\n";
const DIVIDER: &str = "----------------------------------------\n";

/// Render console entries as `[time] [LEVEL] [URL: ..]` blocks
pub fn format_console_logs(entries: &[ConsoleLogEntry]) -> String {
    if entries.is_empty() {
        return "No console logs captured.\n".to_string();
    }

    let mut out = String::from("Console Logs:\n");
    out.push_str(RULE);
    for entry in entries {
        let log = &entry.payload;
        let url = if log.url.is_empty() { "N/A" } else { &log.url };
        let args = log
            .args
            .iter()
            .map(render_arg)
            .collect::<Vec<_>>()
            .join(" ");

        out.push_str(&format!(
            "[{}] [{}] [URL: {}]\n  {}\n\n",
            clock_time(&log.timestamp),
            log.level.to_uppercase(),
            url,
            args
        ));
    }
    out.push_str(RULE);
    out
}

/// Render network events grouped by request id, in order of first appearance.
/// Events without a request id are skipped.
pub fn format_network_logs(entries: &[NetworkEventEntry]) -> String {
    if entries.is_empty() {
        return "No network logs captured.\n".to_string();
    }

    let mut order: Vec<&str> = Vec::new();
    let mut requests: HashMap<&str, Vec<&NetworkEventEntry>> = HashMap::new();
    for entry in entries {
        let Some(id) = entry.payload.request_id() else {
            continue;
        };
        requests
            .entry(id)
            .or_insert_with(|| {
                order.push(id);
                Vec::new()
            })
            .push(entry);
    }

    let mut out = String::from("Network Activity Log:\n");
    out.push_str(RULE);
    for id in order {
        let events = &requests[id];
        let find = |method: &str| events.iter().find(|e| e.payload.method == method);

        if let Some(sent) = find("Network.requestWillBeSent") {
            let params = &sent.payload.params;
            let time = params
                .get("wallTime")
                .and_then(Value::as_f64)
                .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64))
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| format!("+{}ms", sent.offset_ms));
            let request = &params["request"];

            out.push_str(&format!("\n[{}] Request ID: {}\n", time, id));
            out.push_str(&format!("  URL: {}\n", text(&request["url"])));
            out.push_str(&format!("  Method: {}\n", text(&request["method"])));
            if let Some(body) = request.get("postData").and_then(Value::as_str) {
                let preview: String = body.chars().take(100).collect();
                out.push_str(&format!("  Request Body (first 100 chars): {}...\n", preview));
            }
        }

        if let Some(received) = find("Network.responseReceived") {
            let response = &received.payload.params["response"];
            let status = match response.get("statusText").and_then(Value::as_str) {
                Some(status_text) if !status_text.is_empty() => {
                    format!("{} {}", text(&response["status"]), status_text)
                }
                _ => text(&response["status"]),
            };
            out.push_str(&format!("  Status: {}\n", status));
            out.push_str(&format!("  MIME Type: {}\n", text(&response["mimeType"])));
        }

        if let Some(finished) = find("Network.loadingFinished") {
            out.push_str(&format!(
                "  Finished: Encoded Data Length: {} bytes\n",
                text(&finished.payload.params["encodedDataLength"])
            ));
        }

        if let Some(failed) = find("Network.loadingFailed") {
            let params = &failed.payload.params;
            out.push_str(&format!(
                "  Failed: {} (Canceled: {})\n",
                text(&params["errorText"]),
                params.get("canceled").and_then(Value::as_bool).unwrap_or(false)
            ));
        }
        out.push_str(DIVIDER);
    }
    out.push_str(RULE);
    out
}

/// Full plain-text report for one persisted session
pub fn format_report(record: &PersistedSessionRecord, buffers: &SessionBuffers) -> String {
    let mut out = String::from("Bug Recording Report\n");
    out.push_str(RULE);
    out.push_str(&format!("Recording: {}\n", record.id));
    out.push_str(&format!("Started: {}\n", record.started_at.to_rfc3339()));
    out.push_str(&format!("Duration: {:.1}s\n", record.duration_ms as f64 / 1000.0));
    out.push_str(&format!("Page: {} ({})\n", or_na(&record.page_title), or_na(&record.page_url)));
    out.push_str(&format!("User Agent: {}\n", or_na(&record.user_agent)));
    out.push_str(&format!("Resolution: {}\n", or_na(&record.display_resolution)));
    match (&record.media_mime_type, record.media_size) {
        (Some(mime), Some(size)) => out.push_str(&format!("Video: {} ({} bytes)\n", mime, size)),
        _ => out.push_str("Video: none\n"),
    }
    out.push_str(&format!("DOM Events: {}\n", record.dom_event_count));
    if let Some(error) = &record.error {
        out.push_str(&format!("Error: {}\n", error));
    }
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format_console_logs(&buffers.console));
    out.push('\n');
    out.push_str(&format_network_logs(&buffers.network));
    out
}

fn render_arg(arg: &Value) -> String {
    match arg {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(arg).unwrap_or_else(|_| arg.to_string())
        }
        other => other.to_string(),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn or_na(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}

fn clock_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc).format("%H:%M:%S").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

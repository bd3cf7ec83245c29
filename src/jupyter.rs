//! Jupyter kernel multi-cell execution (§4.5): drive a running kernel over
//! the ZeroMQ messaging protocol, HMAC-SHA256-signed per the wire protocol
//! spec, executing one or more cells and collecting their outputs.
//!
//! Grounded on `stencila`'s `kernel.rs`/`message.rs` (REQ shell socket, SUB
//! iopub socket, `HmacSha256` derived from the connection key, a warm-up
//! `execute_request` sent before the caller's first real cell) adapted from
//! "long-lived interactive kernel" to "one kernel process per request,
//! shut down after the last cell" to match this sandbox's per-request
//! lifecycle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const DELIMITER: &str = "<IDS|MSG>";

/// Ports and HMAC key for one kernel connection, as written to a Jupyter
/// "connection file" (§4.5).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionInfo {
    pub shell_port: u16,
    pub iopub_port: u16,
    pub ip: String,
    pub key: String,
    #[serde(default = "default_scheme")]
    pub signature_scheme: String,
}

fn default_scheme() -> String {
    "hmac-sha256".to_string()
}

impl ConnectionInfo {
    pub fn shell_url(&self) -> String {
        format!("tcp://{}:{}", self.ip, self.shell_port)
    }

    pub fn iopub_url(&self) -> String {
        format!("tcp://{}:{}", self.ip, self.iopub_port)
    }

    fn hmac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(self.key.as_bytes()).context("building HMAC from connection key")
    }
}

/// Output produced by one cell (§4.5): stdout/stderr streams, rich
/// `display_data`/`execute_result` payloads, or an error traceback.
#[derive(Debug, Clone, Serialize)]
pub struct CellOutput {
    pub stream_stdout: String,
    pub stream_stderr: String,
    pub results: Vec<Value>,
    pub error: Option<String>,
    pub execution_count: Option<i64>,
}

impl Default for CellOutput {
    fn default() -> Self {
        Self { stream_stdout: String::new(), stream_stderr: String::new(), results: Vec::new(), error: None, execution_count: None }
    }
}

/// A signed, multi-part Jupyter protocol message (§4.5 wire format):
/// `<IDS|MSG>`, signature, header, parent_header, metadata, content.
struct WireMessage {
    header: Value,
    parent_header: Value,
    metadata: Value,
    content: Value,
}

impl WireMessage {
    fn execute_request(code: &str) -> Self {
        Self {
            header: header("execute_request"),
            parent_header: json!({}),
            metadata: json!({}),
            content: json!({
                "code": code,
                "silent": false,
                "store_history": true,
                "user_expressions": {},
                "allow_stdin": false,
                "stop_on_error": true,
            }),
        }
    }

    /// Serialize and sign into the zmq multipart frames a shell-socket
    /// `REQ` send expects.
    fn frames(&self, hmac: &HmacSha256) -> Result<Vec<Vec<u8>>> {
        let header = serde_json::to_vec(&self.header)?;
        let parent = serde_json::to_vec(&self.parent_header)?;
        let metadata = serde_json::to_vec(&self.metadata)?;
        let content = serde_json::to_vec(&self.content)?;

        let mut signer = hmac.clone();
        signer.update(&header);
        signer.update(&parent);
        signer.update(&metadata);
        signer.update(&content);
        let signature = hex::encode(signer.finalize().into_bytes());

        Ok(vec![
            DELIMITER.as_bytes().to_vec(),
            signature.into_bytes(),
            header,
            parent,
            metadata,
            content,
        ])
    }
}

fn header(msg_type: &str) -> Value {
    json!({
        "msg_id": Uuid::new_v4().to_string(),
        "username": "sandbox-engine",
        "session": Uuid::new_v4().to_string(),
        "msg_type": msg_type,
        "version": "5.3",
    })
}

/// Parse a received shell/iopub multipart reply, verifying its signature
/// against `hmac` (§4.5: a kernel that fails verification is treated as
/// compromised/misbehaving and the run aborts).
fn parse_reply(parts: &[Vec<u8>], hmac: &HmacSha256) -> Result<(Value, Value)> {
    let delim_idx = parts
        .iter()
        .position(|p| p == DELIMITER.as_bytes())
        .context("no <IDS|MSG> delimiter in reply")?;
    let signature = parts.get(delim_idx + 1).context("missing signature frame")?;
    let header = parts.get(delim_idx + 2).context("missing header frame")?;
    let parent = parts.get(delim_idx + 3).context("missing parent_header frame")?;
    let metadata = parts.get(delim_idx + 4).context("missing metadata frame")?;
    let content = parts.get(delim_idx + 5).context("missing content frame")?;

    let mut verifier = hmac.clone();
    verifier.update(header);
    verifier.update(parent);
    verifier.update(metadata);
    verifier.update(content);
    let expected = hex::encode(verifier.finalize().into_bytes());
    if expected.as_bytes() != signature.as_slice() {
        anyhow::bail!("HMAC signature mismatch on kernel reply");
    }

    let header_value: Value = serde_json::from_slice(header)?;
    let content_value: Value = serde_json::from_slice(content)?;
    Ok((header_value, content_value))
}

/// Drive `cells` through the kernel described by `connection`, in order,
/// respecting `per_cell_timeout` and an overall `total_timeout` (§4.5).
/// Before running the caller's cells, sends a warm-up `print(123)` and
/// requires the matching stdout within 2s; a mismatch or timeout is
/// reported as a single failed `CellOutput` rather than silently
/// proceeding against an unresponsive kernel.
pub async fn run_cells(connection: &ConnectionInfo, cells: &[String], per_cell_timeout: Duration, total_timeout: Duration) -> Result<Vec<CellOutput>> {
    let hmac = connection.hmac()?;
    let ctx = zmq::Context::new();
    let shell = ctx.socket(zmq::REQ).context("creating shell socket")?;
    shell.connect(&connection.shell_url()).context("connecting shell socket")?;

    let iopub = ctx.socket(zmq::SUB).context("creating iopub socket")?;
    iopub.connect(&connection.iopub_url()).context("connecting iopub socket")?;
    iopub.set_subscribe(b"").context("subscribing to iopub")?;

    if !warm_up(&shell, &iopub, &hmac).await? {
        warn!("jupyter kernel failed warm-up probe within 2s");
        return Ok(vec![CellOutput { error: Some("kernel did not respond to warm-up probe".to_string()), ..Default::default() }]);
    }

    let deadline = tokio::time::Instant::now() + total_timeout;
    let mut outputs = Vec::with_capacity(cells.len());
    for cell in cells {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let budget = remaining.min(per_cell_timeout);
        if budget.is_zero() {
            outputs.push(CellOutput { error: Some("total execution deadline exceeded".to_string()), ..Default::default() });
            break;
        }
        let outcome = tokio::time::timeout(budget, execute_one(&shell, &iopub, &hmac, cell)).await;
        match outcome {
            Ok(Ok(output)) => outputs.push(output),
            Ok(Err(e)) => {
                outputs.push(CellOutput { error: Some(format!("{e:#}")), ..Default::default() });
                break;
            }
            Err(_) => {
                outputs.push(CellOutput { error: Some("cell execution timed out".to_string()), ..Default::default() });
                break;
            }
        }
    }

    shutdown_best_effort(&shell, &hmac);
    Ok(outputs)
}

async fn warm_up(shell: &zmq::Socket, iopub: &zmq::Socket, hmac: &HmacSha256) -> Result<bool> {
    let probe = tokio::time::timeout(Duration::from_secs(2), execute_one(shell, iopub, hmac, "print(123)")).await;
    match probe {
        Ok(Ok(output)) => Ok(output.stream_stdout.trim() == "123"),
        _ => Ok(false),
    }
}

async fn execute_one(shell: &zmq::Socket, iopub: &zmq::Socket, hmac: &HmacSha256, code: &str) -> Result<CellOutput> {
    let message = WireMessage::execute_request(code);
    let msg_id = message.header.get("msg_id").and_then(Value::as_str).unwrap_or_default().to_string();
    let frames = message.frames(hmac)?;
    send_multipart(shell, &frames)?;

    let reply_parts = recv_multipart(shell)?;
    let (_header, content) = parse_reply(&reply_parts, hmac)?;

    let mut output = CellOutput::default();
    output.execution_count = content.get("execution_count").and_then(Value::as_i64);
    if content.get("status").and_then(Value::as_str) == Some("error") {
        let ename = content.get("ename").and_then(Value::as_str).unwrap_or("Error");
        let evalue = content.get("evalue").and_then(Value::as_str).unwrap_or("");
        output.error = Some(format!("{ename}: {evalue}"));
    }

    drain_iopub(iopub, hmac, &msg_id, &mut output);
    Ok(output)
}

/// Drain IOPUB until the `status: idle` belonging to `msg_id` arrives,
/// routing `stream`/`display_data`/`execute_result`/`error` messages into
/// `output` as they come in. These message types only ever arrive on
/// IOPUB, never embedded in the shell `execute_reply` (§4.5 wire format),
/// so a real `SUB` socket is required — there is no shell-only substitute.
/// Bounded by a generous fixed deadline independent of the cell timeout so
/// a kernel that never emits `idle` can't hang this past a sane ceiling.
fn drain_iopub(iopub: &zmq::Socket, hmac: &HmacSha256, msg_id: &str, output: &mut CellOutput) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let _ = iopub.set_rcvtimeo(250);
    loop {
        if Instant::now() >= deadline {
            warn!(msg_id, "gave up waiting for iopub idle status");
            return;
        }
        let parts = match recv_multipart(iopub) {
            Ok(parts) => parts,
            Err(_) => continue,
        };
        let Ok((header, parent, content)) = parse_iopub(&parts, hmac) else {
            continue;
        };
        if parent.get("msg_id").and_then(Value::as_str) != Some(msg_id) {
            continue;
        }

        match header.get("msg_type").and_then(Value::as_str).unwrap_or_default() {
            "stream" => {
                let name = content.get("name").and_then(Value::as_str).unwrap_or("stdout");
                let text = content.get("text").and_then(Value::as_str).unwrap_or_default();
                if name == "stderr" {
                    output.stream_stderr.push_str(text);
                } else {
                    output.stream_stdout.push_str(text);
                }
            }
            "display_data" | "execute_result" => {
                if let Some(data) = content.get("data") {
                    output.results.push(data.clone());
                }
            }
            "error" => {
                let ename = content.get("ename").and_then(Value::as_str).unwrap_or("Error");
                let evalue = content.get("evalue").and_then(Value::as_str).unwrap_or("");
                output.error.get_or_insert_with(|| format!("{ename}: {evalue}"));
            }
            "status" if content.get("execution_state").and_then(Value::as_str) == Some("idle") => {
                return;
            }
            _ => {}
        }
    }
}

/// Like `parse_reply`, but also returns `parent_header` — iopub messages
/// are matched back to the request that triggered them via
/// `parent_header.msg_id` (§4.5).
fn parse_iopub(parts: &[Vec<u8>], hmac: &HmacSha256) -> Result<(Value, Value, Value)> {
    let delim_idx = parts
        .iter()
        .position(|p| p == DELIMITER.as_bytes())
        .context("no <IDS|MSG> delimiter in iopub message")?;
    let signature = parts.get(delim_idx + 1).context("missing signature frame")?;
    let header = parts.get(delim_idx + 2).context("missing header frame")?;
    let parent = parts.get(delim_idx + 3).context("missing parent_header frame")?;
    let metadata = parts.get(delim_idx + 4).context("missing metadata frame")?;
    let content = parts.get(delim_idx + 5).context("missing content frame")?;

    let mut verifier = hmac.clone();
    verifier.update(header);
    verifier.update(parent);
    verifier.update(metadata);
    verifier.update(content);
    let expected = hex::encode(verifier.finalize().into_bytes());
    if expected.as_bytes() != signature.as_slice() {
        anyhow::bail!("HMAC signature mismatch on iopub message");
    }

    Ok((serde_json::from_slice(header)?, serde_json::from_slice(parent)?, serde_json::from_slice(content)?))
}

fn send_multipart(socket: &zmq::Socket, frames: &[Vec<u8>]) -> Result<()> {
    let (last, rest) = frames.split_last().context("empty frame list")?;
    for frame in rest {
        socket.send(frame.as_slice(), zmq::SNDMORE).context("sending message frame")?;
    }
    socket.send(last.as_slice(), 0).context("sending final message frame")?;
    Ok(())
}

fn recv_multipart(socket: &zmq::Socket) -> Result<Vec<Vec<u8>>> {
    let mut parts = Vec::new();
    loop {
        let part = socket.recv_bytes(0).context("receiving message frame")?;
        let more = socket.get_rcvmore().context("checking ZMQ_RCVMORE")?;
        parts.push(part);
        if !more {
            break;
        }
    }
    Ok(parts)
}

/// Best-effort shutdown: send a `shutdown_request` and don't wait long for
/// a reply, since the kernel's process is about to be killed by the
/// request's `RequestGuard` regardless (§4.5, §3 cleanup invariants).
fn shutdown_best_effort(shell: &zmq::Socket, hmac: &HmacSha256) {
    let message = WireMessage { header: header("shutdown_request"), parent_header: json!({}), metadata: json!({}), content: json!({"restart": false}) };
    if let Ok(frames) = message.frames(hmac) {
        let _ = send_multipart(shell, &frames);
    }
    debug!("sent best-effort shutdown_request");
}

/// Group cell sources coming from an ordered map (e.g. a notebook's cell
/// index → source) back into execution order (§4.5).
pub fn ordered_cells(cells_by_index: &HashMap<usize, String>) -> Vec<String> {
    let mut indices: Vec<&usize> = cells_by_index.keys().collect();
    indices.sort();
    indices.into_iter().map(|i| cells_by_index[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hmac() -> HmacSha256 {
        HmacSha256::new_from_slice(b"test-key").unwrap()
    }

    #[test]
    fn frames_round_trip_through_parse_reply() {
        let hmac = test_hmac();
        let message = WireMessage::execute_request("print(1)");
        let frames = message.frames(&hmac).unwrap();
        let (header, content) = parse_reply(&frames, &hmac).unwrap();
        assert_eq!(header.get("msg_type").and_then(Value::as_str), Some("execute_request"));
        assert_eq!(content.get("code").and_then(Value::as_str), Some("print(1)"));
    }

    #[test]
    fn tampered_content_fails_signature_check() {
        let hmac = test_hmac();
        let message = WireMessage::execute_request("print(1)");
        let mut frames = message.frames(&hmac).unwrap();
        let last = frames.last_mut().unwrap();
        last.push(b'!');
        assert!(parse_reply(&frames, &hmac).is_err());
    }

    #[test]
    fn parse_iopub_round_trips_and_matches_parent_msg_id() {
        let hmac = test_hmac();
        let message = WireMessage {
            header: header("stream"),
            parent_header: json!({"msg_id": "abc123"}),
            metadata: json!({}),
            content: json!({"name": "stdout", "text": "hi\n"}),
        };
        let frames = message.frames(&hmac).unwrap();
        let (header, parent, content) = parse_iopub(&frames, &hmac).unwrap();
        assert_eq!(header.get("msg_type").and_then(Value::as_str), Some("stream"));
        assert_eq!(parent.get("msg_id").and_then(Value::as_str), Some("abc123"));
        assert_eq!(content.get("text").and_then(Value::as_str), Some("hi\n"));
    }

    #[test]
    fn ordered_cells_sorts_by_index() {
        let mut map = HashMap::new();
        map.insert(2, "c".to_string());
        map.insert(0, "a".to_string());
        map.insert(1, "b".to_string());
        assert_eq!(ordered_cells(&map), vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn connection_info_builds_tcp_urls() {
        let conn = ConnectionInfo { shell_port: 5000, iopub_port: 5001, ip: "127.0.0.1".to_string(), key: "k".to_string(), signature_scheme: default_scheme() };
        assert_eq!(conn.shell_url(), "tcp://127.0.0.1:5000");
        assert_eq!(conn.iopub_url(), "tcp://127.0.0.1:5001");
    }
}

// src/network/protocol.rs
//! Monero stratum messages
//!
//! Builders for the requests the miner sends and parsers for what the pool
//! pushes back. Message framing is left to the transport.

use crate::miner::job::{Job, NONCE_OFFSET, Target};
use crate::miner::verifier::Submission;
use crate::utils::error::MinerError;
use serde_json::{Value, json};

/// Request id used for the login call
pub const LOGIN_ID: u64 = 1;

/// Byte of the blob holding the pool-assigned nonce prefix on NiceHash pools
const EXTRANONCE_OFFSET: usize = NONCE_OFFSET + 3;

/// Agent string sent on login
pub fn agent() -> String {
    format!("xmr_pipeline/{}", env!("CARGO_PKG_VERSION"))
}

/// Builds the login request
pub fn login_request(user: &str, password: &str) -> Value {
    json!({
        "id": LOGIN_ID,
        "jsonrpc": "2.0",
        "method": "login",
        "params": {
            "login": user,
            "pass": password,
            "agent": agent()
        }
    })
}

/// Builds a share submission for the session `session_id`
pub fn submit_request(id: u64, session_id: &str, submission: &Submission) -> Value {
    json!({
        "id": id,
        "jsonrpc": "2.0",
        "method": "submit",
        "params": {
            "id": session_id,
            "job_id": submission.job_id,
            "nonce": submission.nonce,
            "result": submission.result
        }
    })
}

/// Builds a keepalive ping
pub fn keepalive_request(id: u64, session_id: &str) -> Value {
    json!({
        "id": id,
        "jsonrpc": "2.0",
        "method": "keepalived",
        "params": { "id": session_id }
    })
}

/// A message received from the pool
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// `job` notification with its raw params
    Job(Value),
    /// Response to one of our requests
    Response {
        /// Request id being answered
        id: u64,
        /// `result` member, if not null
        result: Option<Value>,
        /// `error` member, if not null
        error: Option<Value>,
    },
    /// Any other method the miner does not act on
    Unknown(String),
}

/// Classifies one line or frame from the pool
pub fn parse_message(text: &str) -> Result<Incoming, MinerError> {
    let json: Value = serde_json::from_str(text)?;

    if let Some(method) = json.get("method").and_then(Value::as_str) {
        return Ok(match method {
            "job" => Incoming::Job(json.get("params").cloned().unwrap_or(Value::Null)),
            other => Incoming::Unknown(other.to_string()),
        });
    }

    let id = json
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| MinerError::ProtocolError(format!("message without method or id: {}", text)))?;
    Ok(Incoming::Response {
        id,
        result: json.get("result").filter(|v| !v.is_null()).cloned(),
        error: json.get("error").filter(|v| !v.is_null()).cloned(),
    })
}

/// A job notification as decoded from the wire
#[derive(Debug, Clone, PartialEq)]
pub struct JobNotice {
    /// The job, ready to publish
    pub job: Job,
    /// Algorithm named by the pool, if it named one
    pub algo: Option<String>,
}

fn str_field<'a>(params: &'a Value, name: &str) -> Result<&'a str, MinerError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| MinerError::ProtocolError(format!("job is missing {}", name)))
}

/// Decodes job params
///
/// With `nicehash` set the pool owns the top nonce byte, which it has
/// already written into the blob.
pub fn parse_job(params: &Value, nicehash: bool) -> Result<JobNotice, MinerError> {
    let job_id = str_field(params, "job_id")?;
    let blob = hex::decode(str_field(params, "blob")?)?;
    let target = Target::from_hex(str_field(params, "target")?)?;

    let extranonce = if nicehash {
        let byte = blob.get(EXTRANONCE_OFFSET).copied().ok_or_else(|| {
            MinerError::ProtocolError(format!("job {} blob too short for extranonce", job_id))
        })?;
        Some(byte)
    } else {
        None
    };

    Ok(JobNotice {
        job: Job::new(job_id, blob, target, extranonce)?,
        algo: params.get("algo").and_then(Value::as_str).map(str::to_owned),
    })
}

/// Session granted by a successful login
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Worker id echoed on submit and keepalive
    pub id: String,
    /// First job, if the pool sent one with the login result
    pub job: Option<JobNotice>,
}

/// Decodes the login response
pub fn parse_login(
    result: Option<&Value>,
    error: Option<&Value>,
    nicehash: bool,
) -> Result<Session, MinerError> {
    if let Some(error) = error {
        return Err(MinerError::AuthError(error_message(error)));
    }
    let result = result.ok_or_else(|| MinerError::AuthError("empty login result".into()))?;
    let id = result
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| MinerError::ProtocolError("login result is missing id".into()))?;
    let job = match result.get("job") {
        Some(params) if !params.is_null() => Some(parse_job(params, nicehash)?),
        _ => None,
    };
    Ok(Session {
        id: id.to_string(),
        job,
    })
}

/// Whether a submit response reports the share as accepted
pub fn share_accepted(result: Option<&Value>, error: Option<&Value>) -> bool {
    if error.is_some() {
        return false;
    }
    match result.and_then(|r| r.get("status")).and_then(Value::as_str) {
        Some(status) => status.eq_ignore_ascii_case("OK"),
        None => result.is_some(),
    }
}

/// Human-readable text of a stratum `error` member
pub fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| error.to_string())
}

//! Worker/master coordination messages.
//!
//! Framing is one UTF-8 text line per message, terminated by `\n`. A worker
//! sends status lines:
//!
//! ```text
//! WORKER_UPDATE id:<u64> steps:<u64> reward:<f64>
//! ```
//!
//! and the master answers every line with `ACK`, or `ERR <reason>` when the
//! line could not be parsed. Rewards are written with Rust's shortest
//! round-trip float formatting, so parsing recovers the exact bits.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentStatus};
use crate::error::ProtocolError;

/// Longest accepted line, terminator included.
pub const MAX_LINE_BYTES: usize = 4096;

const UPDATE_TAG: &str = "WORKER_UPDATE";
const ACK: &str = "ACK";
const ERR_PREFIX: &str = "ERR";

static UPDATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^WORKER_UPDATE id:(\d+) steps:(\d+) reward:(\S+)$")
        .expect("status line pattern is valid")
});

/// Progress report for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub worker_id: AgentId,
    pub steps: u64,
    pub reward: f64,
}

impl From<AgentStatus> for StatusReport {
    fn from(status: AgentStatus) -> Self {
        Self {
            worker_id: status.id,
            steps: status.steps,
            reward: status.reward,
        }
    }
}

/// Messages a worker sends to the master.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Periodic status report
    Update(StatusReport),
}

impl WorkerMessage {
    /// Encode as a single terminated line.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }

    /// Decode one line (terminator optional).
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        check_length(line)?;
        let line = strip_terminator(line);
        let malformed = || ProtocolError::Malformed(line.to_string());

        let caps = UPDATE_RE.captures(line).ok_or_else(malformed)?;
        let worker_id = caps[1].parse().map_err(|_| malformed())?;
        let steps = caps[2].parse().map_err(|_| malformed())?;
        let reward: f64 = caps[3].parse().map_err(|_| malformed())?;
        if !reward.is_finite() {
            return Err(malformed());
        }

        Ok(Self::Update(StatusReport {
            worker_id,
            steps,
            reward,
        }))
    }
}

impl fmt::Display for WorkerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update(report) => write!(
                f,
                "{UPDATE_TAG} id:{} steps:{} reward:{}",
                report.worker_id, report.steps, report.reward
            ),
        }
    }
}

/// Master's answer to a worker message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterReply {
    /// Message accepted
    Ack,
    /// Message rejected; the connection stays open
    Error(String),
}

impl MasterReply {
    /// Encode as a single terminated line.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }

    /// Decode one line (terminator optional).
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        check_length(line)?;
        let line = strip_terminator(line);
        if line == ACK {
            return Ok(Self::Ack);
        }
        match line.strip_prefix(ERR_PREFIX) {
            Some(rest) if rest.is_empty() || rest.starts_with(' ') => {
                Ok(Self::Error(rest.trim_start().to_string()))
            }
            _ => Err(ProtocolError::UnknownReply(line.to_string())),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }
}

impl fmt::Display for MasterReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => f.write_str(ACK),
            Self::Error(reason) => {
                // A reason must never split the frame
                let reason = reason.replace(['\r', '\n'], " ");
                write!(f, "{ERR_PREFIX} {reason}")
            }
        }
    }
}

fn check_length(line: &str) -> Result<(), ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLong {
            limit: MAX_LINE_BYTES,
        });
    }
    Ok(())
}

fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

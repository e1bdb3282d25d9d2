use chatnav_adapters::Role;
use chatnav_dom::NodeId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of a message within one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fallback id for candidates without a stable identifier: a digest of
    /// role, position in the detection pass and normalized content.
    pub fn from_content(role: Role, position: usize, content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(role.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(position.to_le_bytes());
        hasher.update(b"\0");
        hasher.update(comparison_key(content).as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("msg-{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One entry of the authoritative sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    /// Truncated single-line preview
    pub content: String,
    pub full_content: String,
    /// Primary sort key; fixed once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u64>,
    /// Detection time, unix milliseconds
    pub timestamp_ms: u64,
    /// Last known host element. Only a lookup hint: it may be detached.
    #[serde(skip)]
    pub element: Option<NodeId>,
}

impl Message {
    pub fn preview_of(full_content: &str, max_chars: usize) -> String {
        let flat = comparison_key(full_content);
        if flat.chars().count() <= max_chars {
            return flat;
        }
        let mut out: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
        out.truncate(out.trim_end().len());
        out.push('…');
        out
    }
}

/// Line structure kept, trailing whitespace dropped, runs of blank lines
/// collapsed to one, the whole text trimmed.
pub fn normalize_text(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            if lines.last().map_or(true, |l| l.is_empty()) {
                continue;
            }
            lines.push("");
        } else {
            lines.push(line);
        }
    }
    lines.join("\n").trim().to_string()
}

/// Whitespace-insensitive form used to compare contents.
pub fn comparison_key(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

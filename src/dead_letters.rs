//! Read-only inspection of the dead-letter topic.

use serde::Deserialize;
use serde_json::Value;
use std::io::Write;

use crate::bus::{Bus, Record, RecordId, TransportError};
use crate::protocol::Topic;

/// Number of entries shown when no count is given.
pub const DEFAULT_COUNT: usize = 10;

/// Longest raw dump printed for a record that does not parse.
const RAW_PREVIEW_CHARS: usize = 200;

/// Dead-letter fields as found on the topic. Every field is optional so that
/// records written by older or foreign producers still render.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeadLetterView {
    pub error: Option<String>,
    pub failed_by_agent: Option<String>,
    pub original_sender: Option<String>,
    pub context_id: Option<String>,
    pub original_message: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterEntry {
    Parsed {
        id: RecordId,
        letter: DeadLetterView,
    },
    Unparseable {
        id: RecordId,
        error: String,
        raw: String,
    },
}

impl DeadLetterEntry {
    fn from_record(record: Record) -> Self {
        match record.decode::<DeadLetterView>() {
            Ok(letter) => Self::Parsed {
                id: record.id,
                letter,
            },
            Err(e) => Self::Unparseable {
                id: record.id,
                error: e.to_string(),
                raw: record.payload,
            },
        }
    }
}

/// The newest `count` dead letters, newest first.
pub async fn recent(
    bus: &dyn Bus,
    topic: &Topic,
    count: usize,
) -> Result<Vec<DeadLetterEntry>, TransportError> {
    let records = bus.read_recent(topic, count).await?;
    Ok(records.into_iter().map(DeadLetterEntry::from_record).collect())
}

fn or_unknown(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or("Unknown")
}

/// Writes a human-readable report of `entries`.
pub fn render(entries: &[DeadLetterEntry], out: &mut impl Write) -> std::io::Result<()> {
    if entries.is_empty() {
        writeln!(out, "No dead letters found")?;
        return Ok(());
    }
    writeln!(out, "Found {} dead letter(s):", entries.len())?;

    for (i, entry) in entries.iter().enumerate() {
        writeln!(out)?;
        match entry {
            DeadLetterEntry::Parsed { id, letter } => {
                writeln!(out, "{}. [{}]", i + 1, id)?;
                writeln!(out, "   Error: {}", or_unknown(&letter.error))?;
                writeln!(out, "   Failed agent: {}", or_unknown(&letter.failed_by_agent))?;
                writeln!(out, "   Original sender: {}", or_unknown(&letter.original_sender))?;
                writeln!(out, "   Context: {}", or_unknown(&letter.context_id))?;
                if let Some(message) = &letter.original_message {
                    let pretty = serde_json::to_string_pretty(message)
                        .unwrap_or_else(|_| message.to_string());
                    writeln!(out, "   Original message: {}", pretty)?;
                }
            }
            DeadLetterEntry::Unparseable { id, error, raw } => {
                writeln!(out, "{}. [{}]", i + 1, id)?;
                writeln!(out, "   Could not parse: {}", error)?;
                let preview: String = raw.chars().take(RAW_PREVIEW_CHARS).collect();
                let ellipsis = if raw.chars().count() > RAW_PREVIEW_CHARS {
                    "..."
                } else {
                    ""
                };
                writeln!(out, "   Raw data: {}{}", preview, ellipsis)?;
            }
        }
    }
    Ok(())
}

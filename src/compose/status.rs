// src/compose/status.rs

//! Compose status word and the failed-deliverables ledger

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use strum_macros::{Display, EnumString};

/// Status written to the `STATUS` file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ComposeStatus {
    Started,
    Finished,
    FinishedIncomplete,
    Doomed,
    Terminated,
}

impl ComposeStatus {
    /// Statuses that cannot be rewritten once reached
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Finished | Self::FinishedIncomplete)
    }

    /// Exit code the command reports for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Finished | Self::FinishedIncomplete => 0,
            _ => 1,
        }
    }
}

/// Check that `current -> next` is allowed
///
/// Returns `Ok(None)` when nothing needs writing.
pub fn transition(current: Option<ComposeStatus>, next: ComposeStatus) -> Result<Option<ComposeStatus>> {
    match current {
        Some(now) if now == next => Ok(None),
        Some(now) if now.is_final() => Err(Error::StatusTransition {
            from: now.to_string(),
            to: next.to_string(),
        }),
        _ => Ok(Some(next)),
    }
}

/// Truncate, write and flush the status word
pub fn write_status_file(path: &Path, status: ComposeStatus) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{status}")?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

pub fn read_status_file(path: &Path) -> Result<Option<ComposeStatus>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let word = text.trim();
    if word.is_empty() {
        return Ok(None);
    }
    word.parse()
        .map(Some)
        .map_err(|_| Error::Parse(format!("unknown compose status '{word}'")))
}

/// variant uid (empty for global) → arch → failed deliverables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDeliverables {
    entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl FailedDeliverables {
    pub fn record(&mut self, variant: &str, arch: &str, deliverable: &str) {
        self.entries
            .entry(variant.to_string())
            .or_default()
            .entry(arch.to_string())
            .or_default()
            .push(deliverable.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (variant, arch, deliverable) triples in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.entries.iter().flat_map(|(variant, arches)| {
            arches.iter().flat_map(move |(arch, items)| {
                items
                    .iter()
                    .map(move |item| (variant.as_str(), arch.as_str(), item.as_str()))
            })
        })
    }

    pub fn as_map(&self) -> &BTreeMap<String, BTreeMap<String, Vec<String>>> {
        &self.entries
    }
}

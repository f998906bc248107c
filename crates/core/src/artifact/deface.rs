//! Deface request file and completion ledgers.
//!
//! The deface process appends one line per image to a success ledger or a
//! failure ledger. A line is either a JSON object with an `id` field, a
//! Python dict repr (`{'id': 'sub-01/ses-1', ...}`), or a bare identifier.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Defacing algorithm requested by the client.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DefaceMethod {
    #[default]
    Quickshear,
    Pydeface,
}

/// Contents of the deface request file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefaceRequest {
    /// Identifiers of the anatomical images to deface.
    pub images: Vec<String>,
    #[serde(default)]
    pub method: DefaceMethod,
}

/// Outcome of defacing one image.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageDefaceState {
    Defaced,
    Failed,
    /// Not yet present in either ledger.
    Pending,
}

/// State of one requested image after merging the ledgers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageDefaceResult {
    pub id: String,
    pub state: ImageDefaceState,
}

/// Requested images merged against both ledgers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerMerge {
    /// One entry per requested image, in request order.
    pub images: Vec<ImageDefaceResult>,
    /// Entries listed more than once within the same ledger.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<String>,
    /// Entries that were never requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unexpected: Vec<String>,
    /// Requested images listed in both ledgers (resolved as failed).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting: Vec<String>,
}

static PY_REPR_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"]id['"]\s*:\s*['"]([^'"]+)['"]"#).expect("valid id regex"));

/// Extract the image identifier from one ledger line.
pub fn parse_ledger_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.starts_with('{') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(line) {
            return map
                .get("id")
                .and_then(|v| v.as_str())
                .map(normalize_id);
        }
        return PY_REPR_ID
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| normalize_id(m.as_str()));
    }

    Some(normalize_id(line))
}

fn normalize_id(raw: &str) -> String {
    raw.trim().trim_start_matches("./").to_string()
}

fn parse_ledger(contents: &str) -> Vec<String> {
    contents.lines().filter_map(parse_ledger_line).collect()
}

impl LedgerMerge {
    /// Merge ledger contents against the requested images.
    pub fn merge(requested: &[String], success_ledger: &str, failure_ledger: &str) -> Self {
        let requested_set: HashSet<String> = requested.iter().map(|s| normalize_id(s)).collect();

        let mut merge = LedgerMerge::default();
        let mut outcome: HashMap<String, ImageDefaceState> = HashMap::new();

        for (contents, state) in [
            (success_ledger, ImageDefaceState::Defaced),
            (failure_ledger, ImageDefaceState::Failed),
        ] {
            let mut seen_here = HashSet::new();
            for id in parse_ledger(contents) {
                if !seen_here.insert(id.clone()) {
                    merge.duplicates.push(id);
                    continue;
                }
                if !requested_set.contains(&id) {
                    merge.unexpected.push(id);
                    continue;
                }
                match outcome.get(&id) {
                    Some(previous) if *previous != state => {
                        merge.conflicting.push(id.clone());
                        outcome.insert(id, ImageDefaceState::Failed);
                    }
                    _ => {
                        outcome.insert(id, state);
                    }
                }
            }
        }

        let mut listed = HashSet::new();
        for raw in requested {
            let id = normalize_id(raw);
            if !listed.insert(id.clone()) {
                continue;
            }
            let state = outcome
                .get(&id)
                .copied()
                .unwrap_or(ImageDefaceState::Pending);
            merge.images.push(ImageDefaceResult { id, state });
        }

        merge
    }

    /// Every requested image appears in a ledger.
    pub fn is_complete(&self) -> bool {
        self.images
            .iter()
            .all(|img| img.state != ImageDefaceState::Pending)
    }

    /// Requested images not yet present in either ledger.
    pub fn missing(&self) -> Vec<&str> {
        self.images
            .iter()
            .filter(|img| img.state == ImageDefaceState::Pending)
            .map(|img| img.id.as_str())
            .collect()
    }

    pub fn count(&self, state: ImageDefaceState) -> usize {
        self.images.iter().filter(|img| img.state == state).count()
    }

    /// One-line summary for the session status message.
    pub fn summary(&self) -> String {
        format!(
            "{} defaced, {} failed",
            self.count(ImageDefaceState::Defaced),
            self.count(ImageDefaceState::Failed)
        )
    }
}

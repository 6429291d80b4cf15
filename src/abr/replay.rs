//! Recorded level decisions replayed by the `FromFileInput` strategy.
//!
//! The file is a JSON array of entries as written by earlier sessions'
//! telemetry exports:
//!
//! ```json
//! [{"objectName": "AxeGuy", "segmentId": "00001", "geometryQuality": 2, "textureQuality": 2}]
//! ```
//!
//! `segmentId` is accepted as a zero-padded string or as a number.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read replay file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed replay file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEntry {
    /// Matched as a substring of the object's name.
    pub object_name: String,
    #[serde(deserialize_with = "segment_id_from_text_or_number")]
    pub segment_id: u32,
    /// Replayed as the assigned level.
    pub geometry_quality: usize,
    #[serde(default)]
    pub texture_quality: usize,
}

fn segment_id_from_text_or_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u32),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| serde::de::Error::custom(format!("invalid segment id `{s}`"))),
    }
}

/// Ordered list of replay entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplayTable {
    entries: Vec<ReplayEntry>,
}

impl ReplayTable {
    pub fn new(entries: Vec<ReplayEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Level recorded for `object_name` at `segment_no`; the last match wins.
    pub fn lookup(&self, object_name: &str, segment_no: u32) -> Option<usize> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.segment_id == segment_no && object_name.contains(entry.object_name.as_str()))
            .map(|entry| entry.geometry_quality)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Append-only JSON log of transcribed speech.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::StorageError;

#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TranscriptsFile {
    transcripts: Vec<TranscriptEntry>,
}

/// Persists every transcription under `transcripts/transcripts.json`.
pub struct TranscriptLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TranscriptLog {
    /// Open (or initialize) the log under `dir`.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let path = dir.join("transcripts.json");

        if !path.exists() {
            fs::write(&path, serde_json::to_string_pretty(&TranscriptsFile::default())?)?;
        }

        Ok(Self { path, lock: Mutex::new(()) })
    }

    /// Append one transcription with the current timestamp.
    pub fn append(&self, text: &str, metadata: Option<Value>) -> Result<(), StorageError> {
        let _guard = self.lock.lock();

        // A hand-edited or truncated log should not halt transcription
        let mut data: TranscriptsFile = match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => TranscriptsFile::default(),
        };

        data.transcripts.push(TranscriptEntry {
            text: text.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            metadata: metadata.unwrap_or(Value::Object(Default::default())),
        });

        fs::write(&self.path, serde_json::to_string_pretty(&data)?)?;
        debug!("Saved transcription ({} entries)", data.transcripts.len());
        Ok(())
    }

    /// Number of persisted entries.
    pub fn entry_count(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock();
        let raw = fs::read_to_string(&self.path)?;
        let data: TranscriptsFile = serde_json::from_str(&raw).unwrap_or_default();
        Ok(data.transcripts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_log(tag: &str) -> TranscriptLog {
        let dir = std::env::temp_dir().join(format!("cva-transcripts-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        TranscriptLog::open(&dir).unwrap()
    }

    #[test]
    fn test_append_preserves_prior_entries() {
        let log = temp_log("append");
        log.append("Blood pressure is 120 over 80", None).unwrap();
        log.append("Recommend follow-up in two weeks", Some(json!({"confidence": 0.9}))).unwrap();
        assert_eq!(log.entry_count().unwrap(), 2);
    }

    #[test]
    fn test_corrupt_file_is_replaced_not_fatal() {
        let log = temp_log("corrupt");
        fs::write(&log.path, "{not json").unwrap();
        log.append("still works", None).unwrap();
        assert_eq!(log.entry_count().unwrap(), 1);
    }
}

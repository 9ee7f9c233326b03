//! Atomic JSON file persistence.
//!
//! Every durable document in the control plane (registry snapshot, command
//! queues, installation runs, human requests) is written through
//! [`atomic_write_json`] so readers never observe a torn file.

use std::path::Path;

use {serde::Serialize, serde::de::DeserializeOwned, tokio::fs};

use crate::error::Result;

/// Write `value` as pretty JSON via temp-file-plus-rename.
///
/// The temp file lives next to the target so the rename stays on one
/// filesystem. Parent directories are created as needed.
pub async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");

    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Read a JSON document, returning `None` when the file does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let data = fs::read_to_string(path).await?;
    Ok(Some(serde_json::from_str(&data)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let doc = Doc {
            name: "fleet".into(),
            count: 3,
        };

        atomic_write_json(&path, &doc).await.unwrap();
        let loaded: Doc = read_json(&path).await.unwrap().unwrap();
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Doc> = read_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn rewrite_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        for count in 0..3 {
            let doc = Doc {
                name: "fleet".into(),
                count,
            };
            atomic_write_json(&path, &doc).await.unwrap();
        }
        assert!(!path.with_extension("json.tmp").exists());
    }
}

//! Filesystem CSV artifact store (spec §5, §6)
//!
//! Files are named `{fileHash}/query_results_*.csv` under a shared base
//! directory. Writes are atomic: the file is written to a temporary path
//! and renamed into place so concurrent readers never observe a partial
//! write (teacher precedent: `FileSystemManager` in `brain-infra`).

use async_trait::async_trait;
use chatsql_core::ArtifactStore;
use chatsql_types::{ChatSqlError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct FilesystemArtifactStore {
    base_dir: PathBuf,
}

impl FilesystemArtifactStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub async fn ensure_base_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    fn dir_for(&self, file_hash: &str) -> PathBuf {
        self.base_dir.join(file_hash)
    }

    fn final_path(&self, file_hash: &str) -> PathBuf {
        self.dir_for(file_hash).join("query_results_0.csv")
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn write_csv(
        &self,
        file_hash: &str,
        columns: &[String],
        rows: &[Vec<serde_json::Value>],
    ) -> Result<()> {
        let dir = self.dir_for(file_hash);
        fs::create_dir_all(&dir).await?;

        let mut body = String::new();
        body.push_str(&columns.join(","));
        body.push('\n');
        for row in rows {
            let line = row
                .iter()
                .map(csv_escape)
                .collect::<Vec<_>>()
                .join(",");
            body.push_str(&line);
            body.push('\n');
        }

        let final_path = self.final_path(file_hash);
        let tmp_path = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        fs::write(&tmp_path, body).await?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| ChatSqlError::Internal(format!("artifact rename failed: {e}")))?;
        Ok(())
    }

    async fn exists(&self, file_hash: &str) -> Result<bool> {
        let final_path = self.final_path(file_hash);
        Ok(fs::metadata(&final_path).await.is_ok())
    }
}

fn csv_escape(value: &serde_json::Value) -> String {
    let raw = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_exists_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        let columns = vec!["a".to_string(), "b".to_string()];
        let rows = vec![vec![json!(1), json!("hello, world")]];

        assert!(!store.exists("abc123").await.unwrap());
        store.write_csv("abc123", &columns, &rows).await.unwrap();
        assert!(store.exists("abc123").await.unwrap());

        let content = fs::read_to_string(dir.path().join("abc123/query_results_0.csv"))
            .await
            .unwrap();
        assert!(content.starts_with("a,b\n"));
        assert!(content.contains("\"hello, world\""));
    }

    #[tokio::test]
    async fn missing_artifact_reports_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemArtifactStore::new(dir.path());
        assert!(!store.exists("missing").await.unwrap());
    }
}

//! Flat-document persistence.
//!
//! Five JSON documents under `<data_dir>/{workspaces,collections,
//! environments,history,settings}/data.json`. Loads tolerate missing files;
//! saves are pretty-printed and atomic (temp file + rename).

mod models;

pub use models::{
    Collection, CollectionData, CollectionRequest, Environment, EnvironmentData, HistoryData,
    HistoryItem, Settings, Workspace, WorkspaceData,
};

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Errors from document load/save.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Document does not exist yet.
    #[error("document not found: {0}")]
    NotFound(String),
}

const DOCUMENT_DIRS: [&str; 5] = [
    "workspaces",
    "collections",
    "environments",
    "history",
    "settings",
];

/// Store for the five flat JSON documents.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    data_dir: PathBuf,
}

impl DocumentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Create the per-document directories.
    pub async fn ensure_directories(&self) -> PersistenceResult<()> {
        for dir in DOCUMENT_DIRS {
            fs::create_dir_all(self.data_dir.join(dir)).await?;
        }
        Ok(())
    }

    pub async fn save_workspaces(&self, workspaces: Vec<Workspace>) -> PersistenceResult<()> {
        self.save_json("workspaces", &WorkspaceData { workspaces })
            .await
    }

    /// Load workspaces; a missing document is an empty list.
    pub async fn load_workspaces(&self) -> PersistenceResult<Vec<Workspace>> {
        match self.load_json::<WorkspaceData>("workspaces").await {
            Ok(data) => Ok(data.workspaces),
            Err(PersistenceError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn save_collections(&self, collections: Vec<Collection>) -> PersistenceResult<()> {
        self.save_json("collections", &CollectionData { collections })
            .await
    }

    pub async fn load_collections(&self) -> PersistenceResult<Vec<Collection>> {
        match self.load_json::<CollectionData>("collections").await {
            Ok(data) => Ok(data.collections),
            Err(PersistenceError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn save_environments(
        &self,
        environments: Vec<Environment>,
    ) -> PersistenceResult<()> {
        self.save_json("environments", &EnvironmentData { environments })
            .await
    }

    pub async fn load_environments(&self) -> PersistenceResult<Vec<Environment>> {
        match self.load_json::<EnvironmentData>("environments").await {
            Ok(data) => Ok(data.environments),
            Err(PersistenceError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn save_history(&self, items: Vec<HistoryItem>) -> PersistenceResult<()> {
        self.save_json("history", &HistoryData { items }).await
    }

    pub async fn load_history(&self) -> PersistenceResult<Vec<HistoryItem>> {
        match self.load_json::<HistoryData>("history").await {
            Ok(data) => Ok(data.items),
            Err(PersistenceError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn save_settings(&self, settings: Settings) -> PersistenceResult<()> {
        self.save_json("settings", &settings).await
    }

    /// Load settings. Unlike the list documents, a missing settings record
    /// surfaces as `NotFound` so the caller can apply defaults explicitly.
    pub async fn load_settings(&self) -> PersistenceResult<Settings> {
        self.load_json("settings").await
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name).join("data.json")
    }

    async fn save_json<T: Serialize>(&self, name: &str, data: &T) -> PersistenceResult<()> {
        let path = self.document_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(data)?;

        // Write-then-rename keeps a crash from truncating the live document.
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &json).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!("wrote {} bytes to {}", json.len(), path.display());
        Ok(())
    }

    async fn load_json<T: DeserializeOwned>(&self, name: &str) -> PersistenceResult<T> {
        let path = self.document_path(name);
        let bytes = fs::read(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                PersistenceError::NotFound(name.to_string())
            } else {
                PersistenceError::Io(err)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (DocumentStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (DocumentStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn test_missing_documents_load_empty() {
        let (store, _dir) = store();
        assert!(store.load_workspaces().await.unwrap().is_empty());
        assert!(store.load_collections().await.unwrap().is_empty());
        assert!(store.load_environments().await.unwrap().is_empty());
        assert!(store.load_history().await.unwrap().is_empty());
        assert!(matches!(
            store.load_settings().await,
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_workspace_round_trip() {
        let (store, _dir) = store();

        let workspaces = vec![Workspace {
            id: "ws-1".to_string(),
            name: "Default".to_string(),
            created_at: None,
        }];
        store.save_workspaces(workspaces.clone()).await.unwrap();

        let loaded = store.load_workspaces().await.unwrap();
        assert_eq!(loaded, workspaces);

        // Save of the load is identical to the load of the save.
        store.save_workspaces(loaded.clone()).await.unwrap();
        assert_eq!(store.load_workspaces().await.unwrap(), loaded);
    }

    #[tokio::test]
    async fn test_environment_round_trip() {
        let (store, _dir) = store();

        let mut variables = std::collections::HashMap::new();
        variables.insert("BASE_URL".to_string(), "http://localhost".to_string());
        let environments = vec![Environment {
            id: "env-1".to_string(),
            name: "Local".to_string(),
            variables,
            workspace_id: "ws-1".to_string(),
        }];

        store
            .save_environments(environments.clone())
            .await
            .unwrap();
        assert_eq!(store.load_environments().await.unwrap(), environments);
    }

    #[tokio::test]
    async fn test_settings_round_trip_and_overwrite() {
        let (store, _dir) = store();

        let mut settings = Settings::default();
        store.save_settings(settings.clone()).await.unwrap();
        assert_eq!(store.load_settings().await.unwrap(), settings);

        settings.theme = "light".to_string();
        settings.ui_scale = 125;
        store.save_settings(settings.clone()).await.unwrap();
        assert_eq!(store.load_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_document_is_pretty_printed_envelope() {
        let (store, dir) = store();
        store
            .save_workspaces(vec![Workspace {
                id: "ws-1".to_string(),
                name: "Default".to_string(),
                created_at: None,
            }])
            .await
            .unwrap();

        let raw = std::fs::read_to_string(
            dir.path().join("workspaces").join("data.json"),
        )
        .unwrap();
        assert!(raw.contains("\"workspaces\""));
        assert!(raw.contains('\n'), "document must be pretty-printed");
    }

    #[tokio::test]
    async fn test_ensure_directories() {
        let (store, dir) = store();
        store.ensure_directories().await.unwrap();
        for name in DOCUMENT_DIRS {
            assert!(dir.path().join(name).is_dir());
        }
    }
}

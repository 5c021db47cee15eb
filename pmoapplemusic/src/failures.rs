//! Journal des pistes non converties

use crate::models::SourceTrack;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

/// Raison d'un échec de conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    UnableToAdd,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("NOT FOUND"),
            Self::UnableToAdd => f.write_str("UNABLE TO ADD TO PLAYLIST"),
        }
    }
}

/// `"<title> | <artist> | <album> => <reason>"`
pub fn failure_line(track: &SourceTrack, reason: FailureReason) -> String {
    format!("{} => {}", track.summary(), reason)
}

/// Enregistrement durable, en ajout seul, des échecs d'une playlist
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn append_failure(&self, playlist_name: &str, line: &str);
}

/// Écrit les échecs dans `<dir>/<playlist>_noresult.txt`
pub struct FileFailureSink {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileFailureSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Chemin du fichier d'échecs d'une playlist
    pub fn path_for(&self, playlist_name: &str) -> PathBuf {
        self.dir.join(format!("{}_noresult.txt", playlist_name))
    }

    async fn write_line(&self, path: &Path, line: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl FailureSink for FileFailureSink {
    async fn append_failure(&self, playlist_name: &str, line: &str) {
        let path = self.path_for(playlist_name);
        if let Err(e) = self.write_line(&path, line).await {
            error!("Error writing to file {}: {}", path.display(), e);
        }
    }
}

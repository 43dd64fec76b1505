use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt as _;

use super::credentials::{Credentials, CredentialsFile};

/// Filesystem persistence for credentials.
///
/// Load walks an ordered candidate list and the first file that parses
/// wins. Save writes `<path>.tmp` with mode 0600, fsyncs, and renames over
/// the target so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct CredentialsStore {
    paths: Vec<PathBuf>,
}

impl CredentialsStore {
    /// Standard candidate paths:
    /// `$XDG_CONFIG_HOME/ccproxy/credentials.json`, then
    /// `$HOME/.config/ccproxy/credentials.json`, then
    /// `$HOME/.claude/credentials.json`.
    pub fn from_env() -> Self {
        let mut paths = Vec::new();

        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("ccproxy").join("credentials.json"));
        }

        if let Some(home) = std::env::var_os("HOME") {
            let home = PathBuf::from(home);
            paths.push(home.join(".config").join("ccproxy").join("credentials.json"));
            paths.push(home.join(".claude").join("credentials.json"));
        }

        Self { paths }
    }

    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Load the first parseable credential file. Parse failures are
    /// logged and the next candidate is tried.
    pub async fn load(&self) -> Option<Credentials> {
        for path in &self.paths {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(_) => continue,
            };

            match serde_json::from_str::<CredentialsFile>(&content) {
                Ok(file) => {
                    log::debug!("Loaded credentials from {}", path.display());
                    return Some(Credentials::from(file));
                }
                Err(e) => {
                    log::warn!("Ignoring malformed credential file {}: {e}", path.display());
                }
            }
        }

        None
    }

    /// Persist atomically to the preferred path (an existing file's path
    /// is reused so a `~/.claude` login stays where the CLI put it).
    pub async fn save(&self, credentials: &Credentials) -> crate::Result<PathBuf> {
        let path = self.target_path().await;
        let file = CredentialsFile::from(credentials);
        let content = serde_json::to_vec_pretty(&file).map_err(|e| {
            log::error!("Failed to serialize credentials: {e}");
            crate::LlmError::Internal(None)
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(&path, "create directory", e))?;
        }

        let tmp_path = path.with_extension("json.tmp");

        {
            let mut options = tokio::fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            options.mode(0o600);

            let mut tmp = options
                .open(&tmp_path)
                .await
                .map_err(|e| io_error(&tmp_path, "open", e))?;

            tmp.write_all(&content)
                .await
                .map_err(|e| io_error(&tmp_path, "write", e))?;
            tmp.sync_all().await.map_err(|e| io_error(&tmp_path, "fsync", e))?;
        }

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| io_error(&path, "rename", e))?;

        log::debug!("Saved credentials to {}", path.display());
        Ok(path)
    }

    /// Remove the credential file, reporting whether one existed.
    pub async fn delete(&self) -> bool {
        let mut deleted = false;

        for path in &self.paths {
            if tokio::fs::remove_file(path).await.is_ok() {
                log::info!("Deleted credentials at {}", path.display());
                deleted = true;
            }
        }

        deleted
    }

    pub async fn exists(&self) -> bool {
        for path in &self.paths {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    async fn target_path(&self) -> PathBuf {
        for path in &self.paths {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return path.clone();
            }
        }

        self.paths
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("credentials.json"))
    }
}

fn io_error(path: &Path, action: &str, error: std::io::Error) -> crate::LlmError {
    log::error!("Failed to {action} {}: {error}", path.display());
    crate::LlmError::Internal(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;
    use secrecy::SecretString;

    fn credentials() -> Credentials {
        Credentials {
            access_token: SecretString::from("at"),
            refresh_token: SecretString::from("rt"),
            expires_at: Timestamp::from_millisecond(1_750_000_000_000).unwrap(),
            scopes: vec![],
            subscription_type: None,
            token_type: "Bearer".to_string(),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialsStore::with_paths(vec![path.clone()]);

        store.save(&credentials()).await.unwrap();
        assert!(store.exists().await);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.expires_at.as_millisecond(), 1_750_000_000_000);

        // No temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialsStore::with_paths(vec![path.clone()]);

        store.save(&credentials()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn malformed_first_candidate_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        let good = dir.path().join("good.json");

        std::fs::write(&bad, "{not json").unwrap();
        let store = CredentialsStore::with_paths(vec![good.clone()]);
        store.save(&credentials()).await.unwrap();

        let store = CredentialsStore::with_paths(vec![bad, good]);
        assert!(store.load().await.is_some());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = CredentialsStore::with_paths(vec![path]);

        assert!(!store.delete().await);
        store.save(&credentials()).await.unwrap();
        assert!(store.delete().await);
        assert!(!store.exists().await);
    }
}

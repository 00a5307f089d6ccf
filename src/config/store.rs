//! Persisted state (component K): `config.json`, `state.json`,
//! `credentials.json` and PEM material under one directory, written with
//! the "validate path, create with explicit mode, write" discipline used by
//! the teacher's on-host identifier storer.
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

#[cfg(target_family = "unix")]
const FILE_PERMISSIONS: u32 = 0o600;
#[cfg(target_family = "unix")]
const DIR_PERMISSIONS: u32 = 0o750;

pub const DEFAULT_STATE_DIR: &str = "/etc/nano-agent";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PersistedConfig {
    pub api_url: String,
    pub node_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub cert_file: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default)]
    pub ca_file: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub org_name: Option<String>,
    #[serde(default)]
    pub net_id: Option<String>,
    #[serde(default)]
    pub net_name: Option<String>,
    #[serde(default)]
    pub net_slug: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub agent_api_key: Option<String>,
    #[serde(default)]
    pub agent_api_key_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PersistedRuntimeState {
    #[serde(default)]
    pub enrolled: bool,
    #[serde(default)]
    pub enrolled_at: Option<i64>,
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub last_sync: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PersistedCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub logged_in_at: Option<i64>,
    #[serde(default)]
    pub default_api_url: Option<String>,
}

/// File-backed persistence under one base directory. Every write goes
/// through the same create-with-mode path; nothing is ever appended to an
/// existing world- or group-readable file.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn ensure_dir(&self) -> Result<(), ConfigError> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir)?;
            fs::set_permissions(&self.base_dir, fs::Permissions::from_mode(DIR_PERMISSIONS))?;
            debug!(dir = %self.base_dir.display(), "created persisted state directory");
        }
        Ok(())
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), ConfigError> {
        self.ensure_dir()?;
        let path = self.path(name);
        let body = serde_json::to_vec_pretty(value)?;
        write_with_permissions(&path, &body)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de> + Default>(&self, name: &str) -> Result<T, ConfigError> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let body = fs::read(&path)?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub fn load_config(&self) -> Result<PersistedConfig, ConfigError> {
        self.read_json("config.json")
    }

    pub fn store_config(&self, config: &PersistedConfig) -> Result<(), ConfigError> {
        self.write_json("config.json", config)
    }

    pub fn load_state(&self) -> Result<PersistedRuntimeState, ConfigError> {
        self.read_json("state.json")
    }

    pub fn store_state(&self, state: &PersistedRuntimeState) -> Result<(), ConfigError> {
        self.write_json("state.json", state)
    }

    pub fn load_credentials(&self) -> Result<PersistedCredentials, ConfigError> {
        self.read_json("credentials.json")
    }

    pub fn store_credentials(&self, creds: &PersistedCredentials) -> Result<(), ConfigError> {
        self.write_json("credentials.json", creds)
    }

    pub fn store_pem(&self, name: &str, pem: &str) -> Result<(), ConfigError> {
        self.ensure_dir()?;
        write_with_permissions(&self.path(name), pem.as_bytes())
    }

    pub fn load_pem(&self, name: &str) -> Result<Option<String>, ConfigError> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    pub fn cert_path(&self) -> PathBuf {
        self.path("client.crt")
    }
    pub fn key_path(&self) -> PathBuf {
        self.path("client.key")
    }
    pub fn ca_path(&self) -> PathBuf {
        self.path("ca.crt")
    }
}

fn write_with_permissions(path: &Path, body: &[u8]) -> Result<(), ConfigError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_PERMISSIONS)
        .open(path)?;
    file.write_all(body)?;
    // OpenOptions::mode only governs creation; tighten explicitly in case
    // the file pre-existed with looser permissions.
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_PERMISSIONS))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_config_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let config = PersistedConfig {
            api_url: "https://cp.example.com".into(),
            node_id: "node-1".into(),
            ..Default::default()
        };
        store.store_config(&config).unwrap();
        let loaded = store.load_config().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_files_load_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.load_state().unwrap(), PersistedRuntimeState::default());
    }

    #[test]
    fn written_files_are_mode_0600_and_dir_is_0750() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.store_credentials(&PersistedCredentials::default()).unwrap();

        let file_mode = fs::metadata(store.path("credentials.json")).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);

        let dir_mode = fs::metadata(dir.path()).unwrap().permissions().mode() & 0o777;
        // tempdir() itself is created 0700 by the OS before we touch it;
        // ensure_dir only sets permissions when it creates the directory.
        assert!(dir_mode & 0o750 == dir_mode || dir_mode == 0o700);
    }

    #[test]
    fn creates_missing_directory_at_0750() {
        let parent = tempfile::tempdir().unwrap();
        let nested = parent.path().join("nano-agent-state");
        let store = FileStore::new(&nested);
        store.store_state(&PersistedRuntimeState::default()).unwrap();
        let dir_mode = fs::metadata(&nested).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o750);
    }

    #[test]
    fn pem_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.store_pem("ca.crt", "-----BEGIN CERTIFICATE-----\n...\n").unwrap();
        let loaded = store.load_pem("ca.crt").unwrap();
        assert!(loaded.unwrap().starts_with("-----BEGIN"));
        assert!(store.load_pem("missing.pem").unwrap().is_none());
    }
}

use crate::domain::{SessionKey, ViewMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PIN_ON_SELECT_KEY: &str = "pin_on_select";
pub const VIEW_MODE_KEY: &str = "view_mode";
const LABEL_PREFIX: &str = "label:";

#[derive(Debug, Error)]
pub enum ResolveStateDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

/// `TAILBOARD_STATE_DIR` wins; otherwise `~/.tailboard`.
pub fn resolve_state_dir() -> Result<PathBuf, ResolveStateDirError> {
    if let Some(override_dir) = std::env::var_os("TAILBOARD_STATE_DIR") {
        return Ok(PathBuf::from(override_dir));
    }
    let Some(home) = dirs::home_dir() else {
        return Err(ResolveStateDirError::HomeDirNotFound);
    };
    Ok(home.join(".tailboard"))
}

#[derive(Debug, Error)]
pub enum LoadPreferencesError {
    #[error("failed to read preferences: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse preferences: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SavePreferencesError {
    #[error("failed to encode preferences: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write preferences: {0}")]
    Write(#[from] io::Error),
}

/// String key/value settings that outlive the process.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Option<String>;

    /// An empty value removes the key.
    fn set(&mut self, key: &str, value: &str) -> Result<(), SavePreferencesError>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryPreferences {
    values: BTreeMap<String, String>,
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SavePreferencesError> {
        store_value(&mut self.values, key, value);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FilePreferences {
    state_dir: PathBuf,
    values: BTreeMap<String, String>,
}

impl FilePreferences {
    pub fn load(state_dir: &Path) -> Result<Self, LoadPreferencesError> {
        let path = preferences_path(state_dir);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    state_dir: state_dir.to_path_buf(),
                    values: BTreeMap::new(),
                });
            }
            Err(error) => return Err(error.into()),
        };

        let file: PreferencesFile = serde_json::from_str(&raw)?;
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            values: file.values,
        })
    }

    fn save(&self) -> Result<(), SavePreferencesError> {
        fs::create_dir_all(&self.state_dir)?;

        let path = preferences_path(&self.state_dir);
        let tmp = path.with_extension("json.tmp");
        let file = PreferencesFile {
            version: 1,
            values: self.values.clone(),
        };
        let text = serde_json::to_string_pretty(&file)?;
        fs::write(&tmp, text)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SavePreferencesError> {
        store_value(&mut self.values, key, value);
        self.save()
    }
}

fn store_value(values: &mut BTreeMap<String, String>, key: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        values.remove(key);
    } else {
        values.insert(key.to_string(), value.to_string());
    }
}

fn preferences_path(state_dir: &Path) -> PathBuf {
    state_dir.join("preferences.json")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PreferencesFile {
    version: u32,
    values: BTreeMap<String, String>,
}

pub fn label_key(session: &SessionKey) -> String {
    format!("{LABEL_PREFIX}{session}")
}

pub fn load_pin_on_select(store: &dyn PreferenceStore) -> bool {
    store.get(PIN_ON_SELECT_KEY).as_deref() == Some("1")
}

pub fn save_pin_on_select(
    store: &mut dyn PreferenceStore,
    pin_on_select: bool,
) -> Result<(), SavePreferencesError> {
    store.set(PIN_ON_SELECT_KEY, if pin_on_select { "1" } else { "0" })
}

pub fn load_view_mode(store: &dyn PreferenceStore) -> ViewMode {
    store
        .get(VIEW_MODE_KEY)
        .as_deref()
        .and_then(ViewMode::parse)
        .unwrap_or_default()
}

pub fn save_view_mode(
    store: &mut dyn PreferenceStore,
    mode: ViewMode,
) -> Result<(), SavePreferencesError> {
    store.set(VIEW_MODE_KEY, mode.label())
}

pub fn load_label(store: &dyn PreferenceStore, session: &SessionKey) -> Option<String> {
    store.get(&label_key(session))
}

/// Every `label:<key>` entry, for seeding the thread index at startup.
pub fn stored_labels(store: &FilePreferences) -> Vec<(SessionKey, String)> {
    store
        .values
        .iter()
        .filter_map(|(key, value)| {
            let session = key.strip_prefix(LABEL_PREFIX)?;
            Some((SessionKey::new(session), value.clone()))
        })
        .collect()
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Which overlays the map draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layers {
    pub territories: bool,
    pub players: bool,
    pub wars: bool,
}

impl Default for Layers {
    fn default() -> Self {
        Self {
            territories: true,
            players: true,
            wars: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Territories,
    Players,
    Wars,
}

impl Layer {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "territories" | "territory" => Some(Self::Territories),
            "players" | "player" => Some(Self::Players),
            "wars" | "war" => Some(Self::Wars),
            _ => None,
        }
    }
}

impl Layers {
    pub fn toggle(&mut self, layer: Layer) {
        let flag = match layer {
            Layer::Territories => &mut self.territories,
            Layer::Players => &mut self.players,
            Layer::Wars => &mut self.wars,
        };
        *flag = !*flag;
    }
}

/// UI preferences that survive restarts.
///
/// `admin_mode` only reveals the diagnostics counters; it grants nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub admin_mode: bool,
    pub layers: Layers,
}

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("failed to write preferences to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode preferences: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait PreferenceStore: Send {
    /// Stored preferences, or defaults when nothing usable is stored.
    fn load(&self) -> Preferences;
    fn save(&mut self, prefs: &Preferences) -> Result<(), PrefsError>;
}

/// Preferences kept as pretty-printed JSON in one file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFileStore {
    fn load(&self) -> Preferences {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Preferences::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read preferences");
                return Preferences::default();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "ignoring unreadable preferences");
            Preferences::default()
        })
    }

    fn save(&mut self, prefs: &Preferences) -> Result<(), PrefsError> {
        let body = serde_json::to_vec_pretty(prefs)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PrefsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, body).map_err(|source| PrefsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory store; clones share the same slot.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: std::sync::Arc<std::sync::Mutex<Option<Preferences>>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn with(prefs: Preferences) -> Self {
        Self {
            slot: std::sync::Arc::new(std::sync::Mutex::new(Some(prefs))),
        }
    }

    pub fn stored(&self) -> Option<Preferences> {
        *self.slot.lock().expect("preference slot")
    }
}

#[cfg(test)]
impl PreferenceStore for MemoryStore {
    fn load(&self) -> Preferences {
        self.stored().unwrap_or_default()
    }

    fn save(&mut self, prefs: &Preferences) -> Result<(), PrefsError> {
        *self.slot.lock().expect("preference slot") = Some(*prefs);
        Ok(())
    }
}

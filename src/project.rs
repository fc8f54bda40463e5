//! Project Store
//!
//! On-disk layout of a session:
//!
//! ```text
//! <project>/project.json   track list, names, mute flags, take file names
//! <project>/audio/*.wav    takes, one referenced file per non-empty track
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::engine::track::TrackId;
use crate::error::{EngineError, Result};

/// Project directory structure constants.
pub const PROJECT_FILE: &str = "project.json";
pub const AUDIO_DIR: &str = "audio";

/// Manifest format this build reads and writes
pub const MANIFEST_VERSION: u32 = 1;

/// Contents of `project.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub version: u32,

    /// Display name of the project.
    pub name: String,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,

    /// Number used for the next auto-named track.
    #[serde(default = "default_next_track_number")]
    pub next_track_number: u32,

    /// Tracks in display order.
    #[serde(default)]
    pub tracks: Vec<TrackEntry>,

    /// Unknown fields preserved for forward compatibility.
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

fn default_next_track_number() -> u32 {
    1
}

/// One track in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub id: TrackId,
    pub name: String,
    /// Take path relative to the project directory
    pub file: Option<String>,
    #[serde(default)]
    pub muted: bool,
}

impl ProjectManifest {
    /// A fresh manifest with no tracks
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: MANIFEST_VERSION,
            name: name.into(),
            created_at: now,
            modified_at: now,
            next_track_number: 1,
            tracks: Vec::new(),
            unknown_fields: HashMap::new(),
        }
    }

    /// Read `project.json` from a project directory
    ///
    /// # Errors
    /// * `Io` - If the file cannot be read
    /// * `InvalidProject` - If the JSON is malformed or from a newer format
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = manifest_path(project_dir);
        let content = fs::read_to_string(&path).map_err(|e| EngineError::io(&path, e))?;

        let manifest: ProjectManifest =
            serde_json::from_str(&content).map_err(|e| EngineError::InvalidProject {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if manifest.version > MANIFEST_VERSION {
            return Err(EngineError::InvalidProject {
                path,
                reason: format!(
                    "format version {} is newer than supported version {}",
                    manifest.version, MANIFEST_VERSION
                ),
            });
        }
        Ok(manifest)
    }

    /// Write `project.json`, replacing the previous file atomically
    pub fn save(&mut self, project_dir: &Path) -> Result<()> {
        self.version = MANIFEST_VERSION;
        self.modified_at = Utc::now();

        fs::create_dir_all(project_dir).map_err(|e| EngineError::io(project_dir, e))?;
        let path = manifest_path(project_dir);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, content).map_err(|e| EngineError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| EngineError::io(&path, e))?;

        debug!("Saved {} track(s) to {}", self.tracks.len(), path.display());
        Ok(())
    }

    /// Absolute take path for an entry
    pub fn resolve(&self, project_dir: &Path, entry: &TrackEntry) -> Option<PathBuf> {
        entry.file.as_ref().map(|file| project_dir.join(file))
    }
}

/// Path of the manifest inside a project directory
pub fn manifest_path(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_FILE)
}

/// Path of the audio directory inside a project directory
pub fn audio_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(AUDIO_DIR)
}

/// Whether a directory holds a project
pub fn is_project(dir: &Path) -> bool {
    manifest_path(dir).is_file()
}

/// Manifest-relative path for a take inside the project
pub fn relative_take_path(project_dir: &Path, file: &Path) -> String {
    match file.strip_prefix(project_dir) {
        Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
        Err(_) => file.to_string_lossy().to_string(),
    }
}

/// Delete `.wav` files in the audio directory that nothing references
///
/// Returns how many files were removed. Files that cannot be removed are
/// logged and left in place.
pub fn purge_unreferenced(audio_dir: &Path, keep: &HashSet<PathBuf>) -> usize {
    if !audio_dir.exists() {
        return 0;
    }

    let orphans: Vec<PathBuf> = WalkDir::new(audio_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("wav"))
        })
        .map(|entry| entry.path().to_path_buf())
        .filter(|path| !keep.contains(path))
        .collect();

    let mut removed = 0;
    for path in orphans {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not purge {}: {}", path.display(), e),
        }
    }
    if removed > 0 {
        info!("Purged {} unreferenced audio file(s)", removed);
    }
    removed
}

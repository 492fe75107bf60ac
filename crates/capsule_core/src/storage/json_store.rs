use crate::error::AppError;
use crate::model::{Capsule, CapsuleProjection};
use crate::storage::{CapsuleQuery, CapsuleStore, CapsuleUpdate, UpdateOutcome};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SCHEMA_VERSION: u32 = 2;
const STORE_FILE_NAME: &str = "capsules.json";
const STORE_ENV_VAR: &str = "CAPSULE_STORE_PATH";

#[derive(Debug, Serialize, Deserialize)]
struct StoredCapsules {
    schema_version: u32,
    capsules: Vec<Capsule>,
}

pub fn store_path() -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(STORE_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata).join("capsule").join(STORE_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("capsule")
            .join(STORE_FILE_NAME))
    }
}

pub fn load_capsules(path: &Path) -> Result<Vec<Capsule>, AppError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path).map_err(|err| AppError::io(err.to_string()))?;
    let stored: StoredCapsules =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if !(1..=SCHEMA_VERSION).contains(&stored.schema_version) {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    Ok(stored.capsules)
}

/// Writes the document to a sibling temp file and renames it over `path`, so
/// readers see either the old or the new document.
pub fn save_capsules(path: &Path, capsules: &[Capsule]) -> Result<(), AppError> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).map_err(|err| AppError::io(err.to_string()))?;

    let stored = StoredCapsules {
        schema_version: SCHEMA_VERSION,
        capsules: capsules.to_vec(),
    };
    let content = serde_json::to_string_pretty(&stored)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;

    let mut staged = NamedTempFile::new_in(dir).map_err(|err| AppError::io(err.to_string()))?;
    staged
        .write_all(content.as_bytes())
        .map_err(|err| AppError::io(err.to_string()))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|err| AppError::io(err.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(staged.path(), permissions)
            .map_err(|err| AppError::io(err.to_string()))?;
    }

    staged
        .persist(path)
        .map_err(|err| AppError::io(err.error.to_string()))?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from(STORE_FILE_NAME));
    name.push(".lock");
    path.with_file_name(name)
}

/// File-backed store shared by every process pointed at the same path.
///
/// Read-modify-write holds an exclusive OS lock on `<store>.lock` for its
/// whole duration. Plain reads take no lock since saves replace the file in
/// one rename.
pub struct JsonCapsuleStore {
    path: PathBuf,
}

impl JsonCapsuleStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self::new(store_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Capsule>, AppError> {
        load_capsules(&self.path)
    }

    /// Runs `edit` against the full record set and persists the result when
    /// it returns `Ok`. The record set is reloaded under the lock, so edits
    /// made by other processes since the last `load` are kept.
    pub fn modify<T, F>(&self, edit: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Vec<Capsule>) -> Result<T, AppError>,
    {
        let mut lock = self.open_lock()?;
        let _guard = lock
            .write()
            .map_err(|err| AppError::io(format!("capsule store lock failed: {err}")))?;
        let mut capsules = load_capsules(&self.path)?;
        let value = edit(&mut capsules)?;
        save_capsules(&self.path, &capsules)?;
        Ok(value)
    }

    fn open_lock(&self) -> Result<RwLock<File>, AppError> {
        std::fs::create_dir_all(parent_dir(&self.path))
            .map_err(|err| AppError::io(err.to_string()))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path(&self.path))
            .map_err(|err| AppError::io(err.to_string()))?;
        Ok(RwLock::new(file))
    }
}

impl CapsuleStore for JsonCapsuleStore {
    fn find(&self, query: &CapsuleQuery) -> Result<Vec<CapsuleProjection>, AppError> {
        let capsules = self.load()?;
        for capsule in capsules.iter().filter(|c| c.unlock_time().is_none()) {
            log::warn!(
                "event=malformed_unlock_at capsule={} unlock_at={:?}",
                capsule.id,
                capsule.unlock_at
            );
        }

        Ok(capsules
            .iter()
            .filter(|capsule| query.matches(capsule))
            .map(Capsule::projection)
            .collect())
    }

    fn conditional_update_many(
        &self,
        updates: &[CapsuleUpdate],
    ) -> Result<Vec<UpdateOutcome>, AppError> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        self.modify(|capsules| {
            let outcomes = updates
                .iter()
                .map(|update| {
                    match capsules.iter_mut().find(|capsule| capsule.id == update.id) {
                        None => UpdateOutcome::NotFound,
                        Some(capsule) if !update.filter.matches(capsule) => {
                            UpdateOutcome::FilterMismatch
                        }
                        Some(capsule) => {
                            update.patch.apply(capsule);
                            UpdateOutcome::Applied
                        }
                    }
                })
                .collect();
            Ok(outcomes)
        })
    }
}

//! Durable resumption snapshots.
//!
//! Whenever the set of known shares changes, the coordinator persists a
//! snapshot of the active session and its shares. After an unclean shutdown
//! the snapshot is loaded once at startup so the session can be resumed,
//! either automatically or after user confirmation.
//!
//! Snapshot files are stored in platform-specific directories:
//! - Linux: `~/.local/share/waypost/session.json`
//! - macOS: `~/Library/Application Support/Waypost/session.json`
//! - Windows: `%APPDATA%\Waypost\session.json`

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::{Session, Share};

/// Durable storage for the active session and its shares.
///
/// The coordinator treats the layout as opaque; implementations must
/// round-trip [`Session`] and [`Share`] data exactly.
pub trait ResumptionStore: Send {
    /// Persist a snapshot of the session and every known share.
    fn save(&self, session: &Session, shares: &[Share]) -> Result<()>;

    /// Remove a single share from the snapshot.
    ///
    /// Clearing the last share clears the session record as well.
    fn clear_share(&self, share_id: &str) -> Result<()>;

    /// Remove the whole snapshot.
    fn clear(&self) -> Result<()>;

    /// Load the snapshot, if one exists.
    fn load(&self) -> Result<Option<(Session, Vec<Share>)>>;
}

/// On-disk snapshot envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    /// Snapshot format version
    version: u32,
    session: Session,
    shares: Vec<Share>,
}

const SNAPSHOT_VERSION: u32 = 1;

/// JSON-file implementation of [`ResumptionStore`].
#[derive(Debug, Clone)]
pub struct FileResumptionStore {
    path: PathBuf,
}

impl FileResumptionStore {
    /// Create a store at the default platform-specific location.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: Self::default_path().unwrap_or_else(|| PathBuf::from("session.json")),
        }
    }

    /// Create a store backed by a specific file.
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// The default snapshot path for this platform.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "waypost", "Waypost")
            .map(|dirs| dirs.data_dir().join("session.json"))
    }

    /// The file this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Store(format!(
                    "failed to create snapshot directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        // Write-then-rename so a crash mid-write never corrupts the snapshot.
        let temp_path = self.path.with_extension("tmp");
        let file = fs::File::create(&temp_path).map_err(|e| {
            Error::Store(format!("failed to create {}: {e}", temp_path.display()))
        })?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, snapshot)
            .map_err(|e| Error::Store(format!("failed to write snapshot: {e}")))?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| Error::Store(format!("failed to replace snapshot: {e}")))?;

        tracing::debug!(path = %self.path.display(), shares = snapshot.shares.len(), "saved resumption snapshot");
        Ok(())
    }

    fn read_snapshot(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&self.path)
            .map_err(|e| Error::Store(format!("failed to open {}: {e}", self.path.display())))?;
        let reader = BufReader::new(file);
        let snapshot: Snapshot = serde_json::from_reader(reader)
            .map_err(|e| Error::Store(format!("failed to parse {}: {e}", self.path.display())))?;

        Ok(Some(snapshot))
    }
}

impl Default for FileResumptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResumptionStore for FileResumptionStore {
    fn save(&self, session: &Session, shares: &[Share]) -> Result<()> {
        self.write_snapshot(&Snapshot {
            version: SNAPSHOT_VERSION,
            session: session.clone(),
            shares: shares.to_vec(),
        })
    }

    fn clear_share(&self, share_id: &str) -> Result<()> {
        let Some(mut snapshot) = self.read_snapshot()? else {
            return Ok(());
        };

        snapshot.shares.retain(|share| share.id() != share_id);

        if snapshot.shares.is_empty() {
            self.clear()
        } else {
            self.write_snapshot(&snapshot)
        }
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "cleared resumption snapshot");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn load(&self) -> Result<Option<(Session, Vec<Share>)>> {
        Ok(self
            .read_snapshot()?
            .map(|snapshot| (snapshot.session, snapshot.shares)))
    }
}

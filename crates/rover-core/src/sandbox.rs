//! `std::fs` implementation of [`FileGateway`] confined to one root directory.
//!
//! Names from the peer are split on `/` (backslashes are treated the same),
//! applied segment by segment to the current directory, and then
//! canonicalized.  A result that does not start with the canonical root is
//! refused, which also catches symlinks pointing out of the tree.
//!
//! Navigation works on a copy of the current directory, so a command like
//! `docs/missing` leaves the current directory where it was.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::domain::gateway::{DirEntry, FileGateway, FileProperties, GatewayError};
use crate::protocol::messages::{DELIMITER, RECORD_SEPARATOR};

/// Prefix of every path label.
pub const LABEL_PREFIX: &str = "filespace:/";

/// A gateway rooted at one directory, with its own current directory.
#[derive(Debug, Clone)]
pub struct SandboxGateway {
    root: PathBuf,
    cwd: PathBuf,
}

impl SandboxGateway {
    /// Opens a sandbox at `root`, which must be an existing directory.
    ///
    /// # Errors
    ///
    /// [`GatewayError::NotADirectory`] when `root` is a file, or the I/O error
    /// from canonicalizing it.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).map_err(|e| GatewayError::io(root, e))?;
        if !canonical.is_dir() {
            return Err(GatewayError::NotADirectory(root.display().to_string()));
        }
        Ok(Self {
            cwd: canonical.clone(),
            root: canonical,
        })
    }

    /// The canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The canonical current directory.
    pub fn current_dir(&self) -> &Path {
        &self.cwd
    }

    /// Applies `name` to the current directory without touching the disk.
    ///
    /// `..` may not climb above the root; every other segment must be a
    /// single plain path component.
    fn resolve_lexical(&self, name: &str) -> Result<PathBuf, GatewayError> {
        let normalized = name.replace('\\', "/");
        let mut path = self.cwd.clone();
        for segment in normalized.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if path == self.root {
                        return Err(GatewayError::OutsideSandbox);
                    }
                    path.pop();
                }
                plain => {
                    ensure_plain(plain)?;
                    path.push(plain);
                }
            }
        }
        Ok(path)
    }

    /// Resolves `name` to an existing path inside the sandbox.
    fn resolve_existing(&self, name: &str) -> Result<PathBuf, GatewayError> {
        let lexical = self.resolve_lexical(name)?;
        let canonical = fs::canonicalize(&lexical).map_err(|e| GatewayError::io(name, e))?;
        if !canonical.starts_with(&self.root) {
            return Err(GatewayError::OutsideSandbox);
        }
        Ok(canonical)
    }

    /// Checks that the deepest existing ancestor of `path` is inside the
    /// sandbox, for paths that are about to be created.
    fn ensure_within(&self, path: &Path) -> Result<(), GatewayError> {
        let mut candidate = path;
        loop {
            if let Ok(canonical) = fs::canonicalize(candidate) {
                return if canonical.starts_with(&self.root) {
                    Ok(())
                } else {
                    Err(GatewayError::OutsideSandbox)
                };
            }
            candidate = candidate.parent().ok_or(GatewayError::OutsideSandbox)?;
        }
    }

    /// Deletes a regular file, resolving `name` the same way
    /// [`FileGateway::open_for_write`] does.
    ///
    /// # Errors
    ///
    /// [`GatewayError::OutsideSandbox`] for paths that leave the root,
    /// [`GatewayError::NotAFile`] for directories, and I/O failures.
    pub fn remove_file(&self, name: &str) -> Result<(), GatewayError> {
        let path = self.resolve_existing(name)?;
        if !fs::symlink_metadata(&path)
            .map_err(|e| GatewayError::io(name, e))?
            .is_file()
        {
            return Err(GatewayError::NotAFile(name.to_string()));
        }
        fs::remove_file(&path).map_err(|e| GatewayError::io(name, e))
    }

    fn label_for(&self, path: &Path) -> Result<String, GatewayError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| GatewayError::OutsideSandbox)?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(format!("{LABEL_PREFIX}{}", parts.join("/")))
    }
}

fn ensure_plain(segment: &str) -> Result<(), GatewayError> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(GatewayError::InvalidCommand),
    }
}

fn unix_seconds(time: io::Result<SystemTime>) -> f64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl FileGateway for SandboxGateway {
    fn list(&self) -> Result<Vec<DirEntry>, GatewayError> {
        let read_dir = fs::read_dir(&self.cwd).map_err(|e| GatewayError::io(&self.cwd, e))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| GatewayError::io(&self.cwd, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.contains([DELIMITER, RECORD_SEPARATOR]) {
                debug!(%name, "skipping entry that cannot be listed on the wire");
                continue;
            }
            // Follows symlinks; a dangling link is skipped.
            let Ok(meta) = fs::metadata(entry.path()) else {
                debug!(%name, "skipping unreadable entry");
                continue;
            };
            if meta.is_dir() {
                entries.push(DirEntry::directory(name));
            } else {
                entries.push(DirEntry::file(name, meta.len()));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn stat(&self, name: &str) -> Result<FileProperties, GatewayError> {
        let path = self.resolve_existing(name)?;
        let meta = fs::metadata(&path).map_err(|e| GatewayError::io(name, e))?;
        Ok(FileProperties {
            path: self.label_for(&path)?,
            size: meta.len(),
            accessed: unix_seconds(meta.accessed()),
            modified: unix_seconds(meta.modified()),
        })
    }

    fn change_directory(&mut self, command: &str) -> Result<String, GatewayError> {
        let normalized = command.replace('\\', "/");
        let mut next = self.cwd.clone();
        for segment in normalized.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if next == self.root {
                        return Err(GatewayError::AtRoot);
                    }
                    next.pop();
                }
                plain => {
                    ensure_plain(plain)?;
                    let candidate = next.join(plain);
                    let canonical =
                        fs::canonicalize(&candidate).map_err(|e| GatewayError::io(plain, e))?;
                    if !canonical.starts_with(&self.root) {
                        return Err(GatewayError::OutsideSandbox);
                    }
                    if !canonical.is_dir() {
                        return Err(GatewayError::NotADirectory(plain.to_string()));
                    }
                    next = canonical;
                }
            }
        }
        self.cwd = next;
        self.label_for(&self.cwd)
    }

    fn create_directory(&self, path: &str) -> Result<(), GatewayError> {
        let target = self.resolve_lexical(path)?;
        if target == self.cwd {
            return Err(GatewayError::InvalidCommand);
        }
        self.ensure_within(&target)?;
        if target.exists() {
            return Err(GatewayError::DirectoryExists);
        }
        fs::create_dir_all(&target).map_err(|e| GatewayError::io(path, e))
    }

    fn open_for_read(&self, name: &str) -> Result<(File, u64), GatewayError> {
        let path = self.resolve_existing(name)?;
        let meta = fs::metadata(&path).map_err(|e| GatewayError::io(name, e))?;
        if !meta.is_file() {
            return Err(GatewayError::NotAFile(name.to_string()));
        }
        let file = File::open(&path).map_err(|e| GatewayError::io(name, e))?;
        Ok((file, meta.len()))
    }

    fn open_for_write(&self, name: &str) -> Result<File, GatewayError> {
        let target = self.resolve_lexical(name)?;
        if target == self.cwd {
            return Err(GatewayError::InvalidCommand);
        }
        let parent = target.parent().ok_or(GatewayError::OutsideSandbox)?;
        self.ensure_within(parent)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => GatewayError::FileExists,
                _ => GatewayError::io(name, e),
            })
    }

    fn read_text(&self, name: &str) -> Result<Vec<u8>, GatewayError> {
        let (mut file, size) = self.open_for_read(name)?;
        let mut contents = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        file.read_to_end(&mut contents)
            .map_err(|e| GatewayError::io(name, e))?;
        Ok(contents)
    }

    fn current_path_label(&self) -> Result<String, GatewayError> {
        self.label_for(&self.cwd)
    }

    fn reset(&mut self) {
        self.cwd = self.root.clone();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

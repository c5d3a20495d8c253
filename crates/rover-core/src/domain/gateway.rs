//! The filesystem gateway contract.
//!
//! The protocol layer never builds a filesystem path itself.  Every name that
//! arrives from the peer is handed to a [`FileGateway`], which resolves it
//! against its current directory and refuses anything that would leave the
//! sandbox root.  [`crate::sandbox::SandboxGateway`] is the `std::fs`
//! implementation; tests substitute a mock.

use std::fs::File;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::messages::DIRECTORY_SIZE;

/// One line of a directory listing.
///
/// Directory names carry a trailing `/` and a size of [`DIRECTORY_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: i64,
}

impl DirEntry {
    /// A regular file of `size` bytes.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size: i64::try_from(size).unwrap_or(i64::MAX),
        }
    }

    /// A directory.  The trailing slash is added if missing.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            size: DIRECTORY_SIZE,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.size == DIRECTORY_SIZE
    }
}

/// The answer to an `INFO` request.
///
/// Timestamps are seconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct FileProperties {
    /// Sandbox-relative label of the file, e.g. `filespace:/docs/a.txt`.
    pub path: String,
    pub size: u64,
    pub accessed: f64,
    pub modified: f64,
}

/// Reasons a gateway refuses an operation.
///
/// The `Display` text is what the server sends back to the client after the
/// failure marker, so it is written for the person at the other end.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Path not in filespace")]
    OutsideSandbox,

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("File already exists")]
    FileExists,

    #[error("Directory already exists")]
    DirectoryExists,

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Can't go back further than root directory")]
    AtRoot,

    #[error("Invalid command")]
    InvalidCommand,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GatewayError {
    /// Wraps an I/O error, mapping `NotFound` to [`GatewayError::NotFound`].
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            return GatewayError::NotFound(path.display().to_string());
        }
        GatewayError::Io { path, source }
    }
}

/// Sandboxed filesystem operations, relative to a movable current directory.
///
/// All `name`/`path` arguments are relative to the current directory and may
/// use `/` or `\` as separators.  Implementations must refuse any argument
/// that resolves outside the sandbox root.
pub trait FileGateway: Send {
    /// Lists the current directory, sorted by name.
    fn list(&self) -> Result<Vec<DirEntry>, GatewayError>;

    /// Returns the properties of one file.
    fn stat(&self, name: &str) -> Result<FileProperties, GatewayError>;

    /// Applies a navigation command such as `docs/../music` and returns the
    /// new path label.  On failure the current directory is unchanged.
    fn change_directory(&mut self, command: &str) -> Result<String, GatewayError>;

    /// Creates a directory, including missing intermediate directories.
    fn create_directory(&self, path: &str) -> Result<(), GatewayError>;

    /// Opens a regular file for reading and returns it with its size.
    fn open_for_read(&self, name: &str) -> Result<(File, u64), GatewayError>;

    /// Creates a new file for writing.  Never overwrites.
    fn open_for_write(&self, name: &str) -> Result<File, GatewayError>;

    /// Reads a whole file into memory.
    fn read_text(&self, name: &str) -> Result<Vec<u8>, GatewayError>;

    /// The current directory as `filespace:/<relative path>`.
    fn current_path_label(&self) -> Result<String, GatewayError>;

    /// Returns to the sandbox root.
    fn reset(&mut self);
}

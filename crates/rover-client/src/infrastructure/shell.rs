//! Line parser and output formatting for the interactive shell.
//!
//! Everything after the command word is one argument, so names containing
//! spaces need no quoting.  Commands prefixed with `l` act on the local side.

use std::fmt::Write as _;

use rover_core::{DirEntry, FileProperties, TransferHandle};
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  servers             find servers on the local network
  connect <host>      open a session (host, ip, or host:port)
  disconnect          close the session
  ls | pwd            list / show the remote directory
  cd <path>           change remote directory (.. goes up)
  mkdir <path>        create a remote directory
  info <file>         show remote file size and times
  cat <file>          print a remote file
  get <file>          queue a download into the local directory
  put <file>          queue an upload from the local directory
  status              show every queued transfer
  lls | lcd <path> | lmkdir <path>
                      the same, on the local side
  help | exit";

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Servers,
    Connect(String),
    Disconnect,
    List,
    Pwd,
    Cd(String),
    Mkdir(String),
    Info(String),
    Cat(String),
    Get(String),
    Put(String),
    Status,
    LocalList,
    LocalCd(String),
    LocalMkdir(String),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command {0:?}; type help for a list")]
    Unknown(String),

    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
}

/// Parses one line.  Blank lines give `Ok(None)`.
///
/// # Errors
///
/// [`ParseError`] for an unknown word or a missing argument.
pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let arg = |name: &'static str| {
        if rest.is_empty() {
            Err(ParseError::MissingArgument(name))
        } else {
            Ok(rest.to_string())
        }
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "help" | "?" => ShellCommand::Help,
        "servers" => ShellCommand::Servers,
        "connect" => ShellCommand::Connect(arg("connect")?),
        "disconnect" => ShellCommand::Disconnect,
        "ls" => ShellCommand::List,
        "pwd" => ShellCommand::Pwd,
        "cd" => ShellCommand::Cd(arg("cd")?),
        "mkdir" => ShellCommand::Mkdir(arg("mkdir")?),
        "info" => ShellCommand::Info(arg("info")?),
        "cat" => ShellCommand::Cat(arg("cat")?),
        "get" => ShellCommand::Get(arg("get")?),
        "put" => ShellCommand::Put(arg("put")?),
        "status" => ShellCommand::Status,
        "lls" => ShellCommand::LocalList,
        "lcd" => ShellCommand::LocalCd(arg("lcd")?),
        "lmkdir" => ShellCommand::LocalMkdir(arg("lmkdir")?),
        "exit" | "quit" => ShellCommand::Exit,
        _ => return Err(ParseError::Unknown(word.to_string())),
    };
    Ok(Some(cmd))
}

// ── Output formatting ─────────────────────────────────────────────────────────

/// One line per entry: size column (`<dir>` for directories) then name.
pub fn format_listing(entries: &[DirEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        if entry.is_directory() {
            let _ = writeln!(out, "{:>12}  {}", "<dir>", entry.name);
        } else {
            let _ = writeln!(out, "{:>12}  {}", entry.size, entry.name);
        }
    }
    out
}

pub fn format_properties(props: &FileProperties) -> String {
    format!(
        "{}\n  size:     {} bytes\n  accessed: {}\n  modified: {}",
        props.path, props.size, props.accessed as i64, props.modified as i64
    )
}

/// `#n direction filename: status`, one line per transfer.
pub fn format_transfers(handles: &[TransferHandle]) -> String {
    let mut out = String::new();
    for (n, handle) in handles.iter().enumerate() {
        let _ = writeln!(
            out,
            "#{} {} {}: {}",
            n + 1,
            handle.direction(),
            handle.filename(),
            handle.status()
        );
    }
    out
}

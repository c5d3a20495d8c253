//! FileRover client entry point.
//!
//! A small line-oriented shell over [`RemoteClient`].  It holds no protocol
//! state of its own: every command maps to one call on the remote client
//! or on the local sandbox gateway, and the result is printed.
//!
//! # Usage
//!
//! ```text
//! rover [OPTIONS]
//!
//! Options:
//!   --connect <HOST>   Connect on start-up
//!   --dir <DIR>        Local directory for get/put [default: .]
//!   --config <FILE>    Config file [default: platform config dir]
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config() + CLI overrides
//!  └─ SandboxGateway::new(dir)           -- local side of every transfer
//!  └─ RemoteClient<Session, ConnectChannel>
//!  └─ read-eval-print loop
//!       ├─ remote commands   -> RemoteClient
//!       ├─ local commands    -> SandboxGateway
//!       └─ exit              -> wait for transfers, disconnect
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rover_core::{FileGateway, SandboxGateway, TransferEngine};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rover_client::application::remote::{RemoteClient, RemoteError};
use rover_client::infrastructure::network::discovery::discover_servers;
use rover_client::infrastructure::network::session::Session;
use rover_client::infrastructure::network::transfer::ConnectChannel;
use rover_client::infrastructure::shell::{
    format_listing, format_properties, format_transfers, parse_line, ShellCommand, HELP,
};
use rover_client::infrastructure::storage::config::{load_config, ClientConfig};

/// Longest wait for queued transfers when leaving the shell.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(600);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// FileRover client.
#[derive(Debug, Parser)]
#[command(name = "rover", about = "Browse a FileRover server and transfer files", version)]
struct Cli {
    /// Server to connect to on start-up.
    #[arg(long, env = "ROVER_SERVER")]
    connect: Option<String>,

    /// Local directory that downloads land in and uploads come from.
    #[arg(long, env = "ROVER_LOCAL_DIR", default_value = ".")]
    dir: PathBuf,

    /// Config file to read instead of the platform default.
    #[arg(long, env = "ROVER_CLIENT_CONFIG")]
    config: Option<PathBuf>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref()).context("failed to load client config")?;

    // Logs go to stderr so they do not interleave with listings.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.client.log_level)),
        )
        .init();

    let local = SandboxGateway::new(&cli.dir)
        .with_context(|| format!("cannot use {} as the local directory", cli.dir.display()))?;
    let remote = RemoteClient::new(
        Session::new(cfg.network.session_settings()),
        TransferEngine::new(cfg.network.data_channel()),
    );
    let mut shell = Shell { remote, local, cfg };

    if let Some(target) = cli.connect {
        shell.run(ShellCommand::Connect(target));
    }

    println!("FileRover client.  Type help for commands.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("rover> ");
        io::stdout().flush().context("stdout closed")?;

        let Some(line) = lines.next() else { break };
        let line = line.context("failed to read command")?;
        match parse_line(&line) {
            Ok(Some(cmd)) => {
                if !shell.run(cmd) {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => println!("{e}"),
        }
    }

    shell.shutdown();
    Ok(())
}

// ── Shell ─────────────────────────────────────────────────────────────────────

struct Shell {
    remote: RemoteClient<Session, ConnectChannel>,
    local: SandboxGateway,
    cfg: ClientConfig,
}

impl Shell {
    /// Runs one command.  Returns `false` when the shell should exit.
    fn run(&mut self, cmd: ShellCommand) -> bool {
        match cmd {
            ShellCommand::Help => println!("{HELP}"),
            ShellCommand::Exit => return false,
            ShellCommand::Servers => self.servers(),
            ShellCommand::Connect(target) => match self.remote.transport_mut().connect(&target) {
                Ok(addr) => println!("connected to {addr}"),
                Err(e) => println!("{e}"),
            },
            ShellCommand::Disconnect => {
                self.remote.transport_mut().disconnect(true);
                println!("disconnected");
            }
            ShellCommand::List => {
                let result = self.remote.list_dir();
                self.show(result, |entries| print!("{}", format_listing(&entries)));
            }
            ShellCommand::Pwd => {
                let result = self.remote.current_dir();
                self.show(result, |label| println!("{label}"));
            }
            ShellCommand::Cd(path) => {
                let result = self.remote.change_dir(&path);
                self.show(result, |()| {});
            }
            ShellCommand::Mkdir(path) => {
                let result = self.remote.make_dir(&path);
                self.show(result, |()| {});
            }
            ShellCommand::Info(name) => {
                let result = self.remote.file_properties(&name);
                self.show(result, |props| println!("{}", format_properties(&props)));
            }
            ShellCommand::Cat(name) => {
                let result = self.remote.file_text(&name);
                self.show(result, |text| println!("{}", String::from_utf8_lossy(&text)));
            }
            ShellCommand::Get(name) => self.get(&name),
            ShellCommand::Put(name) => self.put(&name),
            ShellCommand::Status => {
                if self.remote.transfers().is_empty() {
                    println!("no transfers");
                } else {
                    print!("{}", format_transfers(self.remote.transfers()));
                }
            }
            ShellCommand::LocalList => match self.local.list() {
                Ok(entries) => print!("{}", format_listing(&entries)),
                Err(e) => println!("{e}"),
            },
            ShellCommand::LocalCd(path) => match self.local.change_directory(&path) {
                Ok(label) => println!("{label}"),
                Err(e) => println!("{e}"),
            },
            ShellCommand::LocalMkdir(path) => {
                if let Err(e) = self.local.create_directory(&path) {
                    println!("{e}");
                }
            }
        }
        true
    }

    fn servers(&self) {
        let group = match self.cfg.discovery.group() {
            Ok(group) => group,
            Err(e) => return println!("{e}"),
        };
        match discover_servers(group, self.cfg.discovery.window()) {
            Ok(servers) if servers.is_empty() => println!("no servers heard"),
            Ok(servers) => servers.iter().for_each(|ip| println!("{ip}")),
            Err(e) => println!("{e}"),
        }
    }

    fn get(&mut self, name: &str) {
        let file = match self.local.open_for_write(name) {
            Ok(file) => file,
            Err(e) => return println!("{e}"),
        };
        match self.remote.download(name, file) {
            Ok(handle) => println!("queued download of {} ({} bytes)", name, handle.status().total_size),
            Err(e) => {
                // Nothing was queued, so the empty local file is ours to remove.
                if let Err(rm) = self.local.remove_file(name) {
                    warn!("could not remove local {name}: {rm}");
                }
                self.report(&e);
            }
        }
    }

    fn put(&mut self, name: &str) {
        let (file, size) = match self.local.open_for_read(name) {
            Ok(opened) => opened,
            Err(e) => return println!("{e}"),
        };
        match self.remote.upload(name, file, size) {
            Ok(_) => println!("queued upload of {name} ({size} bytes)"),
            Err(e) => self.report(&e),
        }
    }

    fn show<T>(&self, result: Result<T, RemoteError>, on_ok: impl FnOnce(T)) {
        match result {
            Ok(value) => on_ok(value),
            Err(e) => self.report(&e),
        }
    }

    fn report(&self, e: &RemoteError) {
        match e {
            RemoteError::Connection(_) => {
                println!("{e}");
                println!("not connected; use connect <host>");
            }
            RemoteError::Protocol(_) => {
                error!("protocol violation: {e}");
                println!("{e}");
            }
            RemoteError::Application(_) | RemoteError::Validation(_) => println!("{e}"),
        }
    }

    /// Lets queued transfers finish, then closes the session.
    fn shutdown(&mut self) {
        let engine = self.remote.engine();
        if engine.is_busy() {
            println!("waiting for {} transfer(s) to finish...", engine.pending_len() + 1);
            if !engine.wait_idle(EXIT_DRAIN_TIMEOUT) {
                warn!("exiting with transfers unfinished");
            }
        }
        self.remote.transport_mut().disconnect(true);
        info!("client stopped");
    }
}

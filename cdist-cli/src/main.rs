//! `cdist-cli`: the `config` and `explore` subcommands (spec §6). This
//! binary is the "external collaborator" spec.md §1 calls out as out of
//! scope for the core: the command-line parser, the conf-dir merger, and
//! the on-disk Session layout all live here, built the way
//! `examples/original_source/cdist/cli/commands/{config,explore}.py` and
//! `cdist/session.py` do it.

mod config;
mod explore;
mod session;
mod target_util;

use std::io::Read;
use std::path::{Path, PathBuf};

use cdist_core::error::{CdistError, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cdist", about = "Declarative configuration management")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configure the given targets.
    Config(config::ConfigArgs),
    /// Explore the given target (default: the local machine).
    Explore(explore::ExploreArgs),
}

extern "C" fn handle_sigint(_signum: libc::c_int) {
    std::process::exit(2);
}

fn install_sigint_handler() {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    install_sigint_handler();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Config(args) => config::run(args).await,
        Command::Explore(args) => explore::run(args).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

/// Reads `--manifest`'s argument: `-` means stdin, a path is read verbatim,
/// `None` means "no manifest given" (a no-op initial manifest is written).
fn read_manifest_source(source: Option<&str>) -> Result<Option<Vec<u8>>> {
    match source {
        None => Ok(None),
        Some("-") => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .map_err(|e| CdistError::io(PathBuf::from("-"), e))?;
            Ok(Some(buf))
        }
        Some(path) => {
            let contents = std::fs::read(path).map_err(|e| CdistError::io(path, e))?;
            Ok(Some(contents))
        }
    }
}

/// Finds the `cdist-emulator` binary installed alongside this one, unless
/// `CDIST_EMULATOR_PATH` overrides the location (grounded in
/// `session.py`'s `exec_path = exec_path or sys.argv[0]`, adapted for a
/// workspace that ships the emulator as its own binary rather than a
/// subcommand of this one).
fn emulator_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CDIST_EMULATOR_PATH") {
        return Ok(PathBuf::from(path));
    }
    let self_path = std::env::current_exe().map_err(|e| CdistError::io(PathBuf::from("/proc/self/exe"), e))?;
    let dir = self_path
        .parent()
        .ok_or_else(|| CdistError::Other("could not determine directory of the running binary".to_string()))?;
    Ok(dir.join("cdist-emulator"))
}

/// Resolves which conf-dirs to merge: explicit `--conf-dir` flags first,
/// else `$CDIST_PATH` (colon-separated), else `~/.cdist/conf` if present.
fn resolve_conf_dirs(explicit: &[PathBuf]) -> Vec<PathBuf> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    if let Ok(path_var) = std::env::var("CDIST_PATH") {
        let dirs: Vec<PathBuf> = std::env::split_paths(&path_var).collect();
        if !dirs.is_empty() {
            return dirs;
        }
    }
    if let Some(home) = std::env::var_os("HOME") {
        let default_dir = Path::new(&home).join(".cdist/conf");
        if default_dir.is_dir() {
            return vec![default_dir];
        }
    }
    Vec::new()
}

/// Builds a fresh session id (spec §6 "Session id:
/// `YYYY-MM-DD-HH:MM:SS-<fqdn>-<pid>`"). `format_session_id` takes its `now`
/// string from the caller rather than calling `SystemTime::now()` itself, so
/// the core stays testable; we use seconds-since-epoch here rather than
/// pulling in a calendar-formatting crate the rest of the workspace has no
/// other use for (documented in DESIGN.md).
fn new_session_id() -> Result<String> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| CdistError::Other(e.to_string()))?
        .as_secs()
        .to_string();
    Ok(cdist_core::session_id::format_session_id(&now, &hostname(), std::process::id()))
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_string()))
        .unwrap_or_else(|| "localhost".to_string())
}

//! shline entrypoint: a minimal shell wrapped around the line editor.
//!
//! The editor owns the terminal while a command is composed; this binary
//! supplies the prompt, persists history, and runs submitted lines
//! through `sh -c`. Diagnostics go to a log file, never the terminal.

use anyhow::{Context, Result};
use clap::Parser;
use line_config::Config;
use line_editor::{describe_fatal, Editor, ReadOutcome};
use line_history::HistoryBackend;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::Command;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "shline", version, about = "Interactive line editor shell")]
struct Args {
    /// Configuration file path (overrides discovery of `shline.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// History file path.
    #[arg(long = "history", default_value = ".shline_history")]
    history: PathBuf,
    /// Log file path (also honored via SHLINE_LOG).
    #[arg(long = "log")]
    log: Option<PathBuf>,
}

/// Append-only history file, loaded once at startup.
struct FileHistory {
    path: PathBuf,
}

impl HistoryBackend for FileHistory {
    fn load(&mut self) -> std::io::Result<Vec<String>> {
        match std::fs::File::open(&self.path) {
            Ok(f) => BufReader::new(f).lines().collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn append(&mut self, command: &str) -> std::io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{command}")
    }
}

fn configure_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let trace_enabled = std::env::var("SHLINE_TRACE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let explicit_path = args
        .log
        .clone()
        .or_else(|| std::env::var_os("SHLINE_LOG").map(PathBuf::from));
    if !trace_enabled && explicit_path.is_none() {
        return Ok(None);
    }

    let path = explicit_path.unwrap_or_else(|| PathBuf::from("shline.log"));
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let file = path.file_name().context("log path has no file name")?;
    let appender = tracing_appender::rolling::never(
        dir.unwrap_or_else(|| std::path::Path::new(".")),
        file.to_os_string(),
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_env("SHLINE_LOG_FILTER")
        .unwrap_or_else(|_| EnvFilter::new("trace"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

fn install_panic_hook() {
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        // The terminal guard restores on unwind; keep the panic out of the
        // prompt area and in the log.
        error!(target: "runtime", %info, "panic");
        default(info);
    }));
}

fn prompt_for(status: i32) -> String {
    if status == 0 {
        "$ ".to_string()
    } else {
        format!("[{status}] $ ")
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = configure_logging(&args)?;
    install_panic_hook();
    info!(target: "runtime", "startup");

    let config = Config::discover(args.config.as_deref())?;
    let mut editor = Editor::new(config);

    let mut backend = FileHistory {
        path: args.history.clone(),
    };
    if let Err(err) = editor.history_mut().load_from(&mut backend) {
        error!(target: "runtime", %err, "history_load_failed");
    }

    let mut last_status = 0i32;
    loop {
        let prompt = prompt_for(last_status);
        match editor.read_line(&prompt, last_status) {
            Ok(ReadOutcome::Submitted(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" {
                    break;
                }
                if let Err(err) = backend.append(&line) {
                    error!(target: "runtime", %err, "history_append_failed");
                }
                last_status = run_command(&line);
            }
            Ok(ReadOutcome::Interrupted) => {
                last_status = 130;
            }
            Ok(ReadOutcome::Eof) => break,
            Err(err) => {
                // Terminal already restored by the guard; one line, no
                // backtrace.
                eprintln!("{}", describe_fatal(&err));
                error!(target: "runtime", %err, "fatal");
                std::process::exit(1);
            }
        }
    }
    info!(target: "runtime", "shutdown");
    Ok(())
}

fn run_command(line: &str) -> i32 {
    match Command::new("sh").arg("-c").arg(line).status() {
        Ok(status) => status.code().unwrap_or(1),
        Err(err) => {
            eprintln!("shline: cannot run command: {err}");
            127
        }
    }
}

//! Per-session log file plus the crate's `log_info!` / `log_warn!` /
//! `log_err!` macros.
//!
//! [`init`] truncates `Gesso/gesso.log` under the platform data directory
//! (`%APPDATA%`, `~/Library/Application Support` or `$XDG_DATA_HOME`);
//! [`init_at`] takes an explicit path.  Every line also goes to the `log`
//! facade, so hosts with their own backend see it without a file sink.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use log::Level;

struct Sink {
    path: PathBuf,
    file: Mutex<File>,
}

static SINK: OnceLock<Sink> = OnceLock::new();

impl Sink {
    /// I/O errors are swallowed; logging never fails a paint operation.
    fn append(&self, line: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{}", line);
        }
    }
}

pub fn log_path() -> Option<&'static Path> {
    SINK.get().map(|sink| sink.path.as_path())
}

pub fn write(level: Level, msg: &str) {
    log::log!(target: "gesso", level, "{}", msg);
    if let Some(sink) = SINK.get() {
        sink.append(&format!("[{}] [{}] {}", clock(unix_secs()), level, msg));
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write(::log::Level::Info, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write(::log::Level::Warn, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write(::log::Level::Error, &format!($($arg)*));
    };
}

pub fn init() {
    init_at(&data_dir().join("Gesso").join("gesso.log"));
}

/// Create or truncate the log at `path` and hook panics into it.  Only the
/// first successful call per process installs the sink.
pub fn init_at(path: &Path) {
    if SINK.get().is_some() {
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = match OpenOptions::new().create(true).write(true).truncate(true).open(path) {
        Ok(file) => file,
        Err(e) => {
            log::warn!(target: "gesso", "failed to open log file {:?}: {}", path, e);
            return;
        }
    };
    let sink = SINK.get_or_init(|| Sink {
        path: path.to_path_buf(),
        file: Mutex::new(file),
    });
    sink.append(&format!("=== Gesso session started (unix {}) ===", unix_secs()));
    sink.append(&format!("Log file: {}", path.display()));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(sink) = SINK.get() {
            sink.append(&format!("[{}] [PANIC] {}", clock(unix_secs()), info));
        }
        prev(info);
    }));
}

fn data_dir() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    if cfg!(target_os = "windows")
        && let Some(appdata) = std::env::var_os("APPDATA")
    {
        return PathBuf::from(appdata);
    }
    if cfg!(target_os = "macos")
        && let Some(home) = &home
    {
        return home.join("Library").join("Application Support");
    }
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| home.map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// HH:MM:SS within the UTC day.
fn clock(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", (secs % 86400) / 3600, (secs % 3600) / 60, secs % 60)
}

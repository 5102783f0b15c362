//! Crash handling and diagnostics
//!
//! Panics and fatal capture engine faults are appended to a dedicated
//! crash log, flushed synchronously so the record survives the process.

use std::any::Any;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{error, warn};

/// Global crash log file path, set during initialization
static CRASH_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

const CRASH_LOG_FILENAME: &str = "crash.log";

/// Install the panic hook. Call this early in main().
///
/// Returns the path to the crash log file.
pub fn init_crash_handler(log_dir: &Path) -> std::io::Result<PathBuf> {
    let crash_log_path = log_dir.join(CRASH_LOG_FILENAME);

    // Fail early if the log is not writable
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&crash_log_path)?;
    let _ = CRASH_LOG_PATH.set(crash_log_path.clone());

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let report = panic_report(panic_info.payload(), panic_info.location());
        append(&report, true);
        error!("PANIC: see crash.log for full backtrace");
        default_hook(panic_info);
    }));

    Ok(crash_log_path)
}

fn timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

fn panic_report(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic payload".to_string()
    };

    let location = match location {
        Some(loc) => format!("{}:{}:{}", loc.file(), loc.line(), loc.column()),
        None => "unknown location".to_string(),
    };

    let backtrace = std::backtrace::Backtrace::force_capture();
    let separator = "=".repeat(80);
    format!(
        "\n{sep}\n\
         PANIC at {ts}\n\
         {sep}\n\
         Location: {loc}\n\
         Message: {msg}\n\
         \n\
         Backtrace:\n\
         {bt}\n\
         {sep}\n",
        sep = separator,
        ts = timestamp(),
        loc = location,
        msg = message,
        bt = backtrace
    )
}

fn append(text: &str, sync: bool) {
    let Some(path) = CRASH_LOG_PATH.get() else {
        return;
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            let _ = file.write_all(text.as_bytes());
            let _ = file.flush();
            if sync {
                let _ = file.sync_all();
            }
        }
        Err(e) => warn!("Failed to open crash log {:?}: {}", path, e),
    }
}

/// Record a fatal capture engine fault. The process keeps running; the
/// orchestrator rebuilds the engine.
pub fn record_engine_fault(message: &str) {
    let separator = "=".repeat(80);
    let report = format!(
        "\n{sep}\nENGINE FAULT at {ts}\n{sep}\n{msg}\n",
        sep = separator,
        ts = timestamp(),
        msg = message
    );
    append(&report, true);
}

/// Log a critical operation marker to the crash log.
/// Call this before operations that might crash to help diagnose where crashes occur.
pub fn log_critical_operation(operation: &str) {
    append(&format!("[{}] CRITICAL_OP: {}\n", timestamp(), operation), false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_report_includes_message_and_location() {
        let payload: Box<dyn Any + Send> = Box::new("buffer exploded");
        let report = panic_report(payload.as_ref(), Some(Location::caller()));

        assert!(report.contains("Message: buffer exploded"));
        assert!(report.contains("crash.rs"));
    }
}

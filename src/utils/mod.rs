use std::env;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use git_version::git_version;

pub mod signals;

pub static IS_SYSTEMD_SERVICE: AtomicBool = AtomicBool::new(false);

pub fn version() -> String {
    format!(
        "{} ({})",
        env!("CARGO_PKG_VERSION"),
        git_version!(fallback = "unknown commit"),
    )
}

/// Name of the running executable, used as the inhibitor label and notification app name.
pub fn program_name() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| Some(path.file_name()?.to_string_lossy().into_owned()))
        .unwrap_or_else(|| String::from(env!("CARGO_PKG_NAME")))
}

/// Formats a duration for humans, e.g. `1h 30m`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total == 0 {
        return format!("{}ms", duration.as_millis());
    }

    let (hours, minutes, seconds) = (total / 3600, total / 60 % 60, total % 60);
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}

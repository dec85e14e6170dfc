use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::ReceivedFile;

/// Longest file name written to the download directory
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Fraction of `total` covered by `done`, clamped to `[0.0, 1.0]`.
/// A zero-sized transfer counts as complete.
pub fn progress_fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (done as f64 / total as f64).min(1.0)
}

/// Throughput in bytes per second, 0 before any time has elapsed
pub fn speed_bps(bytes_transferred: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        bytes_transferred as f64 / elapsed_secs
    } else {
        0.0
    }
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "Starting...".to_string();
    }

    let speed_bps = speed_bps(bytes_transferred, elapsed_secs);
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Human readable size, e.g. `1.5 MB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        let rounded = format!("{:.2}", value);
        let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
        format!("{} {}", trimmed, UNITS[unit])
    }
}

/// Open a new file with secure permissions (0o600 on Unix) for writing.
/// Fails if the file already exists.
pub async fn open_secure_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Sanitize file name to prevent path traversal attacks and ensure safety
pub fn sanitize_file_name(file_name: &str) -> String {
    // Only the last path component survives, whatever the separator
    let file_name = file_name
        .split(['/', '\\'])
        .next_back()
        .unwrap_or("unknown_file");

    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    // See: https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];

    if reserved_names
        .iter()
        .any(|&r| clean_name.eq_ignore_ascii_case(r))
    {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        let ext_len = clean_name
            .rfind('.')
            .map(|idx| clean_name.len() - idx)
            .filter(|&len| len < 20);

        match ext_len {
            Some(ext_len) => {
                let ext = clean_name[clean_name.len() - ext_len..].to_string();
                let mut base = clean_name[..clean_name.len() - ext_len].to_string();
                truncate_at_char_boundary(&mut base, MAX_FILENAME_LENGTH - ext_len);
                base.push_str(&ext);
                clean_name = base;
            }
            None => truncate_at_char_boundary(&mut clean_name, MAX_FILENAME_LENGTH),
        }
    }

    clean_name
}

fn truncate_at_char_boundary(s: &mut String, max_len: usize) {
    let mut cutoff = max_len.min(s.len());
    while !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s.truncate(cutoff);
}

/// First free path for `file_name` in `dir`: `name.ext`, `name (1).ext`, ...
pub fn unique_download_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
        _ => (file_name, ""),
    };

    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Write a received payload into `download_dir`, never overwriting.
/// Returns the path written.
pub async fn save_received_file(
    download_dir: &Path,
    file: &ReceivedFile,
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(download_dir).await?;

    let file_name = sanitize_file_name(&file.meta.name);
    let path = unique_download_path(download_dir, &file_name);

    let mut out = open_secure_file(&path).await?;
    out.write_all(&file.data).await?;
    out.flush().await?;

    Ok(path)
}

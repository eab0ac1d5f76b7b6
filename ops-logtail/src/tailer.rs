use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use ops_api::{Error, Result};
use tracing::warn;

/// Bytes read per poll, bounding memory use against a log that grows
/// faster than it is tailed.
const MAX_READ_BYTES: u64 = 2 * 1024 * 1024;

/// Tracks a read cursor into an append-only file that may be rotated
/// (truncated and recreated by the logger) out from under us.
pub struct LogTailer {
    path: PathBuf,
    tail_bytes: u64,
    last_pos: u64,
    initialized: bool,
}

impl LogTailer {
    /// `tail_bytes` of 0 starts the cursor at end-of-file (pure tail of new
    /// writes); a positive value backfills that many trailing bytes on the
    /// first poll.
    pub fn new(path: impl Into<PathBuf>, tail_bytes: u64) -> Self {
        Self {
            path: path.into(),
            tail_bytes,
            last_pos: 0,
            initialized: false,
        }
    }

    /// Read whatever complete lines have been appended since the last
    /// call. Offloads the blocking file I/O to a worker thread.
    pub async fn read_new_lines(&mut self) -> Result<Vec<String>> {
        let path = self.path.clone();
        let last_pos = self.last_pos;
        let initialized = self.initialized;
        let tail_bytes = self.tail_bytes;

        let (lines, new_pos, new_initialized) =
            tokio::task::spawn_blocking(move || read_sync(&path, last_pos, initialized, tail_bytes))
                .await
                .map_err(|e| Error::Internal(e.to_string()))??;

        self.last_pos = new_pos;
        self.initialized = new_initialized;
        Ok(lines)
    }
}

fn read_sync(
    path: &PathBuf,
    last_pos: u64,
    initialized: bool,
    tail_bytes: u64,
) -> Result<(Vec<String>, u64, bool)> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok((Vec::new(), last_pos, initialized)),
    };
    let current_size = metadata.len();

    if !initialized {
        let start = if tail_bytes > 0 {
            current_size.saturating_sub(tail_bytes)
        } else {
            current_size
        };
        if tail_bytes == 0 {
            return Ok((Vec::new(), start, true));
        }
        return read_from(path, start, current_size);
    }

    let last_pos = if current_size < last_pos { 0 } else { last_pos };
    if current_size == last_pos {
        return Ok((Vec::new(), last_pos, true));
    }

    read_from(path, last_pos, current_size)
}

fn read_from(path: &PathBuf, pos: u64, current_size: u64) -> Result<(Vec<String>, u64, bool)> {
    let mut file = File::open(path).map_err(|e| Error::Internal(e.to_string()))?;
    file.seek(SeekFrom::Start(pos))
        .map_err(|e| Error::Internal(e.to_string()))?;

    let to_read = current_size.saturating_sub(pos).min(MAX_READ_BYTES);
    let mut chunk = vec![0u8; to_read as usize];
    let read = file.read(&mut chunk).map_err(|e| Error::Internal(e.to_string()))?;
    chunk.truncate(read);

    if chunk.is_empty() {
        return Ok((Vec::new(), pos, true));
    }

    match chunk.iter().rposition(|&b| b == b'\n') {
        Some(last_newline) => {
            let valid = &chunk[..=last_newline];
            let text = String::from_utf8_lossy(valid);
            let lines: Vec<String> = text.lines().map(str::to_string).collect();
            Ok((lines, pos + valid.len() as u64, true))
        }
        None if (read as u64) < MAX_READ_BYTES => {
            // Partial trailing line with no terminator yet; wait for more data.
            Ok((Vec::new(), pos, true))
        }
        None => {
            warn!(path = %path.display(), bytes = read, "log tailer skipped an oversized line");
            Ok((Vec::new(), pos + read as u64, true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tmp_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ops-logtail-{name}-{nanos}.log"))
    }

    #[tokio::test]
    async fn first_poll_without_tail_starts_at_eof_and_reads_nothing() {
        let path = tmp_path("a");
        std::fs::write(&path, "line one\nline two\n").unwrap();

        let mut tailer = LogTailer::new(&path, 0);
        let lines = tailer.read_new_lines().await.unwrap();
        assert!(lines.is_empty());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "line three").unwrap();

        let lines = tailer.read_new_lines().await.unwrap();
        assert_eq!(lines, vec!["line three".to_string()]);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn tail_bytes_backfills_trailing_data_on_first_poll() {
        let path = tmp_path("b");
        std::fs::write(&path, "old\nrecent one\nrecent two\n").unwrap();

        let mut tailer = LogTailer::new(&path, 20);
        let lines = tailer.read_new_lines().await.unwrap();
        assert!(lines.iter().any(|l| l == "recent two"));
        assert!(!lines.iter().any(|l| l == "old"));

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn rotation_resets_cursor_to_start() {
        let path = tmp_path("c");
        std::fs::write(&path, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n").unwrap();

        let mut tailer = LogTailer::new(&path, 0);
        tailer.read_new_lines().await.unwrap();

        std::fs::write(&path, "fresh\n").unwrap();
        let lines = tailer.read_new_lines().await.unwrap();
        assert_eq!(lines, vec!["fresh".to_string()]);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn partial_trailing_line_is_not_consumed_until_terminated() {
        let path = tmp_path("d");
        std::fs::write(&path, "").unwrap();

        let mut tailer = LogTailer::new(&path, 0);
        tailer.read_new_lines().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "no newline yet").unwrap();
        drop(f);

        let lines = tailer.read_new_lines().await.unwrap();
        assert!(lines.is_empty());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, " now complete").unwrap();
        drop(f);

        let lines = tailer.read_new_lines().await.unwrap();
        assert_eq!(lines, vec!["no newline yet now complete".to_string()]);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn oversized_line_is_skipped_and_cursor_still_advances() {
        let path = tmp_path("e");
        let huge = "x".repeat((MAX_READ_BYTES as usize) + 10);
        std::fs::write(&path, &huge).unwrap();

        let mut tailer = LogTailer::new(&path, 0);
        tailer.read_new_lines().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "{huge}").unwrap();
        drop(f);

        let lines = tailer.read_new_lines().await.unwrap();
        assert!(lines.is_empty());

        std::fs::remove_file(&path).ok();
    }
}

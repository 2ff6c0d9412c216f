//! Log file lookup and tailing.
//!
//! PM2 writes `<name>-out.log` and `<name>-error.log` into its log directory.
//! Nothing here parses log contents; files are located by convention and the
//! trailing lines are returned as text. A missing file is a normal state (the
//! process may not have written anything yet), so reads degrade to empty content.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use strip_ansi_escapes::strip;
use tracing::{debug, warn};

use crate::errors::DashError;

/// Line counts offered by the web surface.
pub const LINE_CHOICES: [usize; 5] = [50, 100, 200, 500, 1000];
pub const DEFAULT_LINES: usize = 100;

const CHUNK_SIZE: u64 = 8 * 1024;
/// Upper bound on bytes read per requested line; longer lines are cut from the front.
const MAX_LINE_BYTES: u64 = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Error,
    Out,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Error => "error",
            LogKind::Out => "out",
        }
    }
}

impl FromStr for LogKind {
    type Err = DashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "out" => Ok(LogKind::Out),
            "error" => Ok(LogKind::Error),
            other => Err(DashError::InvalidLogType(other.to_string())),
        }
    }
}

/// A log file confirmed to exist at lookup time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileDescriptor {
    pub process_name: String,
    pub kind: LogKind,
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogReader {
    dir: PathBuf,
}

impl LogReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Existing log files for `name`, error log first.
    pub fn descriptors(&self, name: &str) -> Vec<LogFileDescriptor> {
        [LogKind::Error, LogKind::Out]
            .into_iter()
            .filter_map(|kind| self.descriptor(name, kind))
            .collect()
    }

    /// The `kind` log for `name`, if it exists right now.
    pub fn descriptor(&self, name: &str, kind: LogKind) -> Option<LogFileDescriptor> {
        if !is_safe_name(name) {
            return None;
        }
        let file_name = format!("{}-{}.log", name, kind.as_str());
        let path = self.dir.join(&file_name);
        if !path.is_file() {
            return None;
        }
        Some(LogFileDescriptor {
            process_name: name.to_string(),
            kind,
            file_name,
            path,
        })
    }

    /// Last `max_lines` lines of `path`; empty if the file is missing or unreadable.
    pub async fn tail(&self, path: &Path, max_lines: NonZeroUsize) -> String {
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || tail_file(&owned, max_lines)).await {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "log tail task failed");
                String::new()
            }
        }
    }
}

/// Synchronous tail used by [`LogReader::tail`].
pub fn tail_file(path: &Path, max_lines: NonZeroUsize) -> String {
    match read_tail(path, max_lines.get()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "log file not readable");
            String::new()
        }
    }
}

// Walks backwards from the end in fixed-size chunks until `max_lines` line breaks
// (not counting a terminating one) have been seen, or `max_lines * MAX_LINE_BYTES`
// bytes have been read, whichever comes first.
fn read_tail(path: &Path, max_lines: usize) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let budget = (max_lines as u64).saturating_mul(MAX_LINE_BYTES);

    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut pos = len;
    let mut read = 0u64;
    let mut breaks = 0usize;
    let mut at_end = true;
    while pos > 0 && breaks < max_lines && read < budget {
        let step = CHUNK_SIZE.min(pos).min(budget - read);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        read += step;

        let mut counted = chunk.iter().filter(|b| **b == b'\n').count();
        if at_end && chunk.last() == Some(&b'\n') {
            counted -= 1;
        }
        at_end = false;
        breaks += counted;
        chunks.push(chunk);
    }

    let mut buf = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
    for chunk in chunks.iter().rev() {
        buf.extend_from_slice(chunk);
    }

    let body_end = if buf.last() == Some(&b'\n') {
        buf.len() - 1
    } else {
        buf.len()
    };
    let start = buf[..body_end]
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, b)| **b == b'\n')
        .nth(max_lines - 1)
        .map(|(idx, _)| idx + 1)
        .unwrap_or(0);
    buf.drain(..start);
    Ok(buf)
}

/// Whether `name` can be used as a single file-name component.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Parses the `lines` query value; only the offered choices are accepted.
pub fn parse_line_count(raw: Option<&str>) -> Result<NonZeroUsize, DashError> {
    let value = match raw {
        None => DEFAULT_LINES,
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| LINE_CHOICES.contains(n))
            .ok_or_else(|| DashError::InvalidLineCount(raw.to_string()))?,
    };
    NonZeroUsize::new(value).ok_or_else(|| DashError::InvalidLineCount(value.to_string()))
}

/// Removes ANSI colour escapes; invalid UTF-8 is replaced.
pub fn strip_ansi(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn numbered(count: usize) -> String {
        (1..=count).map(|i| format!("line {}\n", i)).collect()
    }

    #[test]
    fn descriptors_only_list_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let reader = LogReader::new(dir.path());
        assert!(reader.descriptors("api").is_empty());

        fs::write(dir.path().join("api-out.log"), numbered(150)).unwrap();
        let found = reader.descriptors("api");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, LogKind::Out);
        assert_eq!(found[0].file_name, "api-out.log");
        assert_eq!(found[0].path, dir.path().join("api-out.log"));

        fs::write(dir.path().join("api-error.log"), "boom\n").unwrap();
        let kinds: Vec<_> = reader.descriptors("api").iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![LogKind::Error, LogKind::Out]);
    }

    #[test]
    fn unsafe_names_never_resolve() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        fs::write(dir.path().join("secret-out.log"), "x\n").unwrap();
        let reader = LogReader::new(dir.path().join("logs"));
        assert!(reader.descriptor("../secret", LogKind::Out).is_none());
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name(""));
        assert!(is_safe_name("api-v2.worker"));
    }

    #[test]
    fn tail_returns_last_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-out.log");
        fs::write(&path, numbered(150)).unwrap();

        let text = tail_file(&path, nz(50));
        let got: Vec<&str> = text.lines().collect();
        assert_eq!(got.len(), 50);
        assert_eq!(got[0], "line 101");
        assert_eq!(got[49], "line 150");
        assert!(text.ends_with("line 150\n"));
    }

    #[test]
    fn short_files_are_returned_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.log");
        fs::write(&path, "a\nb\nc").unwrap();
        assert_eq!(tail_file(&path, nz(100)), "a\nb\nc");
        assert_eq!(tail_file(&path, nz(2)), "b\nc");
        assert_eq!(tail_file(&path, nz(1)), "c");
    }

    #[test]
    fn tail_spans_chunk_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        let long_line = "x".repeat(3000);
        let content: String = (0..40).map(|i| format!("{} {}\n", i, long_line)).collect();
        fs::write(&path, &content).unwrap();

        let text = tail_file(&path, nz(10));
        let got: Vec<&str> = text.lines().collect();
        assert_eq!(got.len(), 10);
        assert!(got[0].starts_with("30 "));
        assert!(got[9].starts_with("39 "));
    }

    #[test]
    fn unbroken_lines_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.log");
        let mut content = "a".repeat(100 * 1024);
        content.push_str("END");
        fs::write(&path, &content).unwrap();

        let text = tail_file(&path, nz(1));
        assert_eq!(text.len() as u64, MAX_LINE_BYTES);
        assert!(text.ends_with("aaEND"));

        let text = tail_file(&path, nz(2));
        assert_eq!(text.len() as u64, 2 * MAX_LINE_BYTES);
    }

    #[test]
    fn missing_or_empty_files_give_empty_text() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(tail_file(&dir.path().join("nope.log"), nz(50)), "");
        let empty = dir.path().join("empty.log");
        fs::write(&empty, "").unwrap();
        assert_eq!(tail_file(&empty, nz(50)), "");
    }

    #[tokio::test]
    async fn async_tail_degrades_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let reader = LogReader::new(dir.path());
        let text = reader.tail(&dir.path().join("gone-out.log"), nz(100)).await;
        assert_eq!(text, "");
    }

    #[test]
    fn line_counts_come_from_the_menu() {
        assert_eq!(parse_line_count(None).unwrap().get(), 100);
        assert_eq!(parse_line_count(Some("500")).unwrap().get(), 500);
        assert_eq!(parse_line_count(Some("42")).unwrap_err().code(), "InvalidLineCount");
        assert!(parse_line_count(Some("lots")).is_err());
    }

    #[test]
    fn log_kinds_parse_from_route_segments() {
        assert_eq!("out".parse::<LogKind>().unwrap(), LogKind::Out);
        assert_eq!("error".parse::<LogKind>().unwrap(), LogKind::Error);
        assert_eq!("err".parse::<LogKind>().unwrap_err().code(), "InvalidLogType");
    }

    #[test]
    fn strips_ansi_colours() {
        assert_eq!(strip_ansi("\u{1b}[32monline\u{1b}[39m"), "online");
    }
}

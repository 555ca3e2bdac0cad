//! Text helpers: tolerant file reading, line splitting and template splicing.

use std::path::Path;

use anyhow::{Context, Result};

/// Read a text file, accepting UTF-8 (with or without BOM) and falling back
/// to Latin-1 for anything that is not valid UTF-8.
pub fn read_all_text(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let bytes = bytes
        .strip_prefix(&[0xEF, 0xBB, 0xBF])
        .unwrap_or(bytes.as_slice());
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            tracing::debug!(path = %path.display(), err = %e, "not UTF-8, decoding as Latin-1");
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
    }
}

/// Write `text` to `path`, creating missing parent directories.
pub fn write_all_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

/// Split text into lines after normalizing `\r\n` and lone `\r` to `\n`.
pub fn split_lines(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::to_string)
        .collect()
}

/// Like [`split_lines`], but every line is trimmed.
pub fn trimmed_lines(text: &str) -> Vec<String> {
    split_lines(text)
        .into_iter()
        .map(|l| l.trim().to_string())
        .collect()
}

/// Replace the first line ending with `mark` by `insert`.
pub fn insert_lines_at_mark(lines: &mut Vec<String>, mark: &str, insert: Vec<String>) -> Result<()> {
    let idx = lines
        .iter()
        .position(|l| l.ends_with(mark))
        .with_context(|| format!("template mark `{mark}` not found"))?;
    lines.splice(idx..=idx, insert);
    Ok(())
}

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

/// Text encoding used when reading tool logs. Several Java tools emit
/// Latin-1 output, which is not valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "iso-8859-1")]
    Latin1,
}

impl LogEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            LogEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            // Every Latin-1 byte maps to the code point of the same value.
            LogEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    // create_dir_all treats a concurrent creator winning the race as success.
    fs::create_dir_all(path)
}

/// Wipe `path` if present and recreate it empty.
pub fn fresh_dir(path: &Path) -> io::Result<()> {
    remove_path(path)?;
    fs::create_dir_all(path)
}

pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Names of the entries directly under `dir`, sorted. A missing directory
/// lists as empty.
pub fn list_dir(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        names.push(entry?.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}

pub fn count_files(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut count = 0;
    for entry in entries {
        if entry?.file_type()?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

pub fn read_lines(path: &Path, encoding: LogEncoding) -> io::Result<Vec<String>> {
    let bytes = fs::read(path)?;
    Ok(encoding
        .decode(&bytes)
        .lines()
        .map(|l| l.to_string())
        .collect())
}

pub fn write_lines<S: AsRef<str>>(lines: &[S], path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = fs::File::create(path)?;
    for line in lines {
        file.write_all(line.as_ref().as_bytes())?;
    }
    file.sync_all()
}

pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)
}

/// Replace `path` with `bytes` in one rename, so a reader sees either the
/// old record or the new one.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    ensure_dir(dir)?;
    let partial = partial_sibling(path);
    let written = fs::File::create(&partial).and_then(|mut out| {
        out.write_all(bytes)?;
        out.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&partial, path)) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    // Directory fsync is best effort; not every filesystem supports it.
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    Ok(())
}

fn partial_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    path.with_file_name(format!(
        ".{}.{}-{}.partial",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ))
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

/// Copy the tree under `src` into `dst`. Links to live files or directories
/// are copied as their targets; dangling links stay links.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    ensure_dir(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(rel);
        let kind = entry.file_type();
        if kind.is_dir() {
            ensure_dir(&target)?;
        } else if kind.is_symlink() {
            copy_link(entry.path(), &target)?;
        } else if kind.is_file() {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(from, to).map(|_| ())
}

fn copy_link(link: &Path, target: &Path) -> io::Result<()> {
    match fs::metadata(link) {
        Ok(meta) if meta.is_dir() => copy_dir_recursive(link, target),
        Ok(meta) if meta.is_file() => copy_file(link, target),
        Ok(_) => Ok(()),
        Err(_) => {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            let points_to = fs::read_link(link)?;
            remove_path(target)?;
            #[cfg(unix)]
            symlink(&points_to, target)?;
            #[cfg(not(unix))]
            let _ = points_to;
            Ok(())
        }
    }
}

/// Resolve `rest` below `root`, ignoring a leading `/` on `rest`.
pub fn join_under(root: &Path, rest: &str) -> PathBuf {
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rest)
    }
}

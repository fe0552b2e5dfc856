use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use md5::Md5;
use serde_json::{json, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use fstore_fs::{base_name, normalize};

use crate::error::StoreError;
use crate::store::Store;

/// Compacted output names fold to at most this many characters.
const COMPACT_MAX: usize = 64;

/// Statistics of one pack run.
#[derive(Debug, Default)]
pub struct PackReport {
    pub files: usize,
    pub bytes: u64,
}

/// Output naming for [`unpack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackMode {
    /// Mirror the archive tree below the destination.
    Folder,
    /// Fold each path into one compacted file name.
    Compact,
    /// Use only the final path segment.
    Basename,
}

#[derive(Debug)]
pub struct UnpackOptions {
    pub mode: UnpackMode,
    /// Place each file under a directory named after the element's
    /// `artifact` field, when present.
    pub prefix_artifact: bool,
    /// Shell-glob filter over archive paths (without the leading slash).
    pub pattern: Option<String>,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            mode: UnpackMode::Folder,
            prefix_artifact: false,
            pattern: None,
        }
    }
}

/// Import a host file or directory tree as evidence.
///
/// Every regular file is streamed into the archive (deduplicated via the
/// store), hashed on the way, and recorded as a `file` element carrying
/// `name`, `size`, `hashes` and `export_path`.
#[tracing::instrument(skip(store))]
pub fn pack(store: &Store, source: &Path) -> Result<PackReport, StoreError> {
    let meta = fs::metadata(source)?;
    let mut report = PackReport::default();
    if meta.is_dir() {
        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        for file in host_files(source)? {
            let relative = file
                .strip_prefix(source)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            pack_file(store, &file, &format!("{base}/{relative}"), &mut report)?;
        }
    } else {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        pack_file(store, source, &name, &mut report)?;
    }
    tracing::info!(files = report.files, bytes = report.bytes, "pack finished");
    Ok(report)
}

/// Regular files below `root`, in lexical order.
fn host_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries: Vec<PathBuf> = fs::read_dir(root)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<_>>()?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            files.extend(host_files(&path)?);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

fn pack_file(
    store: &Store,
    host_path: &Path,
    archive_path: &str,
    report: &mut PackReport,
) -> Result<(), StoreError> {
    let mut input = File::open(host_path)?;
    let (export_path, mut writer) = store.store_file(archive_path)?;

    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut size: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        sha1.update(&buf[..n]);
        sha256.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        size += n as u64;
    }
    writer.close()?;

    store.insert(json!({
        "type": "file",
        "name": base_name(&normalize(archive_path)),
        "size": size,
        "hashes": {
            "MD5": hex::encode(md5.finalize()),
            "SHA-1": hex::encode(sha1.finalize()),
            "SHA-256": hex::encode(sha256.finalize()),
        },
        "export_path": export_path,
    }))?;

    report.files += 1;
    report.bytes += size;
    tracing::debug!(path = %host_path.display(), size, "file packed");
    Ok(())
}

/// Extract every element-referenced archive file below `dest`.
///
/// Returns the number of files written. Referenced-but-missing archive
/// entries are skipped; the validator reports those.
#[tracing::instrument(skip(store))]
pub fn unpack(store: &Store, dest: &Path, options: &UnpackOptions) -> Result<usize, StoreError> {
    let matcher = options
        .pattern
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()?;

    let mut extracted = 0;
    for (_, element) in store.elements_in_insertion_order()? {
        let Some(object) = element.as_object() else {
            continue;
        };
        for (field, value) in object {
            if !field.ends_with("_path") {
                continue;
            }
            let Some(path) = value.as_str() else {
                continue;
            };
            let name = normalize(path);
            let trimmed = name.trim_start_matches('/');
            if let Some(matcher) = &matcher {
                if !matcher.matches(trimmed) {
                    continue;
                }
            }

            let relative = match options.mode {
                UnpackMode::Folder => trimmed.to_string(),
                UnpackMode::Compact => compact_path(&name),
                UnpackMode::Basename => base_name(&name).to_string(),
            };
            let relative = match object.get("artifact").and_then(Value::as_str) {
                Some(artifact) if options.prefix_artifact => {
                    format!("{artifact}/{relative}")
                }
                _ => relative,
            };

            let mut reader = match store.fs().open(&name) {
                Ok(reader) => reader,
                Err(e) if e.is_not_found() => {
                    tracing::warn!(name = %name, "referenced file missing from archive");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let out_path = dest.join(&relative);
            if let Some(dir) = out_path.parent() {
                fs::create_dir_all(dir)?;
            }
            let mut output = File::create(&out_path)?;
            io::copy(&mut reader, &mut output)?;
            extracted += 1;
        }
    }
    tracing::info!(files = extracted, "unpack finished");
    Ok(extracted)
}

/// List archive files in lexical order, optionally filtered by a
/// shell-glob pattern over the path without its leading slash.
pub fn ls(store: &Store, pattern: Option<&str>) -> Result<Vec<String>, StoreError> {
    let matcher = pattern.map(glob::Pattern::new).transpose()?;
    let mut names = Vec::new();
    for entry in store.fs().walk("/")? {
        if entry.is_dir {
            continue;
        }
        if let Some(matcher) = &matcher {
            if !matcher.matches(entry.name.trim_start_matches('/')) {
                continue;
            }
        }
        names.push(entry.name);
    }
    Ok(names)
}

/// Fold an archive path into a single file name of at most 64 characters.
///
/// Slashes become underscores. Over-long results successively truncate
/// each non-terminal segment to its first 4 characters, then the file name
/// stem (keeping the extension), and finally keep the last 64 characters.
/// Outputs already within the limit pass through unchanged.
pub fn compact_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let mut segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
    if char_count(&segments.join("_")) <= COMPACT_MAX {
        return segments.join("_");
    }

    let last = segments.len() - 1;
    for segment in segments.iter_mut().take(last) {
        *segment = segment.chars().take(4).collect();
    }
    let folded = segments.join("_");
    if char_count(&folded) <= COMPACT_MAX {
        return folded;
    }

    let file = &segments[last];
    segments[last] = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{}.{ext}", stem.chars().take(4).collect::<String>())
        }
        _ => file.chars().take(4).collect(),
    };
    let folded = segments.join("_");
    let count = char_count(&folded);
    if count <= COMPACT_MAX {
        folded
    } else {
        folded.chars().skip(count - COMPACT_MAX).collect()
    }
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

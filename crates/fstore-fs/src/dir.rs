use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use crate::error::FsError;
use crate::path::normalize;
use crate::{EntryStat, EvidenceFs, EvidenceReader, EvidenceWriter, FsHandle, OpenMode};

/// Host-directory backend: the same contract as the embedded archive, but
/// rooted at a directory beside the database file (legacy `elzp` layout).
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    /// Open a directory backend rooted at `root`, creating it if missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, FsError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, name: &str) -> PathBuf {
        let name = normalize(name);
        self.root.join(name.trim_start_matches('/'))
    }

    fn entry_stat(&self, name: &str, meta: &fs::Metadata) -> EntryStat {
        EntryStat {
            name: name.to_string(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            mode: host_mode(meta),
            mtime: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default(),
            is_dir: meta.is_dir(),
        }
    }

    fn not_found(name: &str, err: io::Error) -> FsError {
        if err.kind() == io::ErrorKind::NotFound {
            FsError::NotFound {
                name: name.to_string(),
            }
        } else {
            FsError::Io(err)
        }
    }
}

#[cfg(unix)]
fn host_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn host_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
fn set_host_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_host_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

impl EvidenceFs for DirFs {
    fn create(&self, name: &str) -> Result<Box<dyn EvidenceWriter>, FsError> {
        let normalized = normalize(name);
        let file = File::create(self.host_path(&normalized))
            .map_err(|e| Self::not_found(&normalized, e))?;
        Ok(Box::new(DirWriter {
            name: normalized,
            file,
        }))
    }

    fn open(&self, name: &str) -> Result<Box<dyn EvidenceReader>, FsError> {
        let normalized = normalize(name);
        let path = self.host_path(&normalized);
        let meta = fs::metadata(&path).map_err(|e| Self::not_found(&normalized, e))?;
        if meta.is_dir() {
            return Err(FsError::IsADirectory { name: normalized });
        }
        let file = File::open(path).map_err(|e| Self::not_found(&normalized, e))?;
        Ok(Box::new(DirReader { file }))
    }

    fn open_mode(&self, name: &str, mode: OpenMode) -> Result<FsHandle, FsError> {
        let normalized = normalize(name);
        match mode {
            OpenMode::Read => Ok(FsHandle::Reader(self.open(&normalized)?)),
            OpenMode::ReadWrite => {
                let stat = self.stat(&normalized)?;
                if stat.is_dir {
                    return Err(FsError::IsADirectory { name: normalized });
                }
                Ok(FsHandle::Writer(self.create(&normalized)?))
            }
            OpenMode::ReadCreate => Ok(FsHandle::Writer(self.create(&normalized)?)),
        }
    }

    fn stat(&self, name: &str) -> Result<EntryStat, FsError> {
        let normalized = normalize(name);
        let meta = fs::metadata(self.host_path(&normalized))
            .map_err(|e| Self::not_found(&normalized, e))?;
        Ok(self.entry_stat(&normalized, &meta))
    }

    fn readdir(&self, name: &str) -> Result<Vec<EntryStat>, FsError> {
        let dir = normalize(name);
        let path = self.host_path(&dir);
        let meta = fs::metadata(&path).map_err(|e| Self::not_found(&dir, e))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory { name: dir });
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let child_name = if dir == "/" {
                format!("/{}", entry.file_name().to_string_lossy())
            } else {
                format!("{dir}/{}", entry.file_name().to_string_lossy())
            };
            let meta = entry.metadata()?;
            entries.push(self.entry_stat(&child_name, &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn walk(&self, root: &str) -> Result<Vec<EntryStat>, FsError> {
        let root = normalize(root);
        let stat = self.stat(&root)?;
        let mut entries = Vec::new();
        walk_into(self, stat, &mut entries)?;
        Ok(entries)
    }

    fn mkdir(&self, name: &str, mode: u32) -> Result<(), FsError> {
        let normalized = normalize(name);
        let path = self.host_path(&normalized);
        fs::create_dir(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                FsError::AlreadyExists {
                    name: normalized.clone(),
                }
            } else {
                FsError::Io(e)
            }
        })?;
        set_host_mode(&path, mode)?;
        Ok(())
    }

    fn mkdir_all(&self, name: &str) -> Result<(), FsError> {
        fs::create_dir_all(self.host_path(&normalize(name)))?;
        Ok(())
    }

    fn chmod(&self, name: &str, mode: u32) -> Result<(), FsError> {
        let normalized = normalize(name);
        let path = self.host_path(&normalized);
        if !path.exists() {
            return Err(FsError::NotFound { name: normalized });
        }
        set_host_mode(&path, mode)?;
        Ok(())
    }

    fn chtimes(&self, name: &str, mtime: i64) -> Result<(), FsError> {
        let normalized = normalize(name);
        let path = self.host_path(&normalized);
        let file = File::options()
            .write(true)
            .open(&path)
            .map_err(|e| Self::not_found(&normalized, e))?;
        let when = UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64);
        file.set_modified(when)?;
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        let old_name = normalize(old);
        fs::rename(self.host_path(&old_name), self.host_path(new))
            .map_err(|e| Self::not_found(&old_name, e))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), FsError> {
        let normalized = normalize(name);
        let path = self.host_path(&normalized);
        let meta = fs::metadata(&path).map_err(|e| Self::not_found(&normalized, e))?;
        if meta.is_dir() {
            fs::remove_dir(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn remove_all(&self, name: &str) -> Result<(), FsError> {
        let normalized = normalize(name);
        let path = self.host_path(&normalized);
        match fs::metadata(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FsError::Io(e)),
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(&path)?;
                Ok(())
            }
            Ok(_) => {
                fs::remove_file(&path)?;
                Ok(())
            }
        }
    }
}

fn walk_into(fs: &DirFs, entry: EntryStat, out: &mut Vec<EntryStat>) -> Result<(), FsError> {
    let is_dir = entry.is_dir;
    let name = entry.name.clone();
    out.push(entry);
    if is_dir {
        for child in fs.readdir(&name)? {
            walk_into(fs, child, out)?;
        }
    }
    Ok(())
}

struct DirReader {
    file: File,
}

impl Read for DirReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl EvidenceReader for DirReader {}

struct DirWriter {
    name: String,
    file: File,
}

impl Write for DirWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl EvidenceWriter for DirWriter {
    fn close(self: Box<Self>) -> Result<(), FsError> {
        self.file.sync_all().map_err(|e| {
            tracing::warn!(name = %self.name, error = %e, "host file sync failed");
            FsError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, DirFs) {
        let tmp = TempDir::new().unwrap();
        let fs = DirFs::new(tmp.path().join("evidence")).unwrap();
        (tmp, fs)
    }

    #[test]
    fn write_read_round_trip() {
        let (_tmp, fs) = backend();
        let mut writer = fs.create("/note.txt").unwrap();
        writer.write_all(b"host bytes").unwrap();
        writer.close().unwrap();

        let mut out = Vec::new();
        fs.open("/note.txt").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"host bytes");
        assert_eq!(fs.stat("/note.txt").unwrap().size, 10);
    }

    #[test]
    fn directories_and_walk() {
        let (_tmp, fs) = backend();
        fs.mkdir_all("/a/b").unwrap();
        let mut writer = fs.create("/a/b/f.txt").unwrap();
        writer.write_all(b"1").unwrap();
        writer.close().unwrap();

        assert!(fs.stat("/a/b").unwrap().is_dir);
        let names: Vec<String> = fs.walk("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["/", "/a", "/a/b", "/a/b/f.txt"]);
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_tmp, fs) = backend();
        assert!(matches!(fs.open("/nope"), Err(FsError::NotFound { .. })));
        assert!(matches!(fs.stat("/nope"), Err(FsError::NotFound { .. })));
    }

    #[test]
    fn rename_and_remove_all() {
        let (_tmp, fs) = backend();
        fs.mkdir_all("/d").unwrap();
        let mut writer = fs.create("/d/x").unwrap();
        writer.write_all(b"x").unwrap();
        writer.close().unwrap();

        fs.rename("/d/x", "/d/y").unwrap();
        assert!(fs.stat("/d/x").is_err());
        assert!(fs.stat("/d/y").is_ok());

        fs.remove_all("/d").unwrap();
        assert!(fs.stat("/d").is_err());
        fs.remove_all("/d").unwrap();
    }
}

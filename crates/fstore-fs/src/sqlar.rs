use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};

use crate::error::FsError;
use crate::path::{is_child_of, normalize};
use crate::spool::SpooledBuffer;
use crate::{EntryStat, EvidenceFs, EvidenceReader, EvidenceWriter, FsHandle, OpenMode};

/// Default permission bits for created files and directories.
const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// The embedded archive backend: an sqlar-style table inside the store's
/// own SQLite database.
///
/// Rows are `(name, mode, mtime, sz, data)`; `data` holds a DEFLATE stream
/// and `sz` the uncompressed length. A directory is a row with `sz = 0 AND
/// data IS NULL`. The connection is shared with the document store, so both
/// live in one transaction domain.
pub struct SqlarFs {
    conn: Arc<Mutex<Connection>>,
}

impl SqlarFs {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Create the archive table if it does not exist yet.
    pub fn init(conn: &Connection) -> Result<(), FsError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sqlar (
                name  TEXT PRIMARY KEY,
                mode  INT,
                mtime INT,
                sz    INT,
                data  BLOB
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection lock poisoned")
    }

    /// Insert or truncate the row for `name` so the entry is visible while
    /// its body is still being written.
    fn touch(&self, name: &str) -> Result<(), FsError> {
        self.lock().execute(
            "INSERT OR REPLACE INTO sqlar (name, mode, mtime, sz, data) \
             VALUES (?1, ?2, ?3, 0, zeroblob(0))",
            params![name, FILE_MODE, epoch_now()],
        )?;
        Ok(())
    }

    fn writer(&self, name: String) -> Box<dyn EvidenceWriter> {
        Box::new(SqlarWriter {
            conn: Arc::clone(&self.conn),
            name,
            mode: FILE_MODE,
            encoder: Some(DeflateEncoder::new(SpooledBuffer::new(), Compression::default())),
            uncompressed: 0,
            closed: false,
        })
    }

    fn stat_row(&self, name: &str) -> Result<Option<EntryStat>, FsError> {
        if name == "/" {
            // The root is implicit; it has no row.
            return Ok(Some(EntryStat {
                name: "/".to_string(),
                size: 0,
                mode: DIR_MODE,
                mtime: 0,
                is_dir: true,
            }));
        }
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT name, mode, mtime, sz, data IS NULL FROM sqlar WHERE name = ?1",
        )?;
        let entry = stmt
            .query_row(params![name], row_to_stat)
            .optional()?;
        Ok(entry)
    }

    fn require_stat(&self, name: &str) -> Result<EntryStat, FsError> {
        self.stat_row(name)?.ok_or_else(|| FsError::NotFound {
            name: name.to_string(),
        })
    }
}

fn row_to_stat(row: &rusqlite::Row<'_>) -> Result<EntryStat, rusqlite::Error> {
    let sz: i64 = row.get(3)?;
    let data_is_null: bool = row.get(4)?;
    Ok(EntryStat {
        name: row.get(0)?,
        size: sz.max(0) as u64,
        mode: row.get::<_, i64>(1)? as u32,
        mtime: row.get(2)?,
        is_dir: sz == 0 && data_is_null,
    })
}

fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern with
/// `ESCAPE '\'`.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

impl EvidenceFs for SqlarFs {
    fn create(&self, name: &str) -> Result<Box<dyn EvidenceWriter>, FsError> {
        let name = normalize(name);
        self.touch(&name)?;
        Ok(self.writer(name))
    }

    fn open(&self, name: &str) -> Result<Box<dyn EvidenceReader>, FsError> {
        let name = normalize(name);
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached("SELECT rowid, data IS NULL FROM sqlar WHERE name = ?1")?;
        let row = stmt
            .query_row(params![name], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
            })
            .optional()?;
        drop(stmt);
        drop(conn);
        let (rowid, is_dir) = row.ok_or_else(|| FsError::NotFound { name: name.clone() })?;
        if is_dir {
            return Err(FsError::IsADirectory { name });
        }
        Ok(Box::new(SqlarReader {
            decoder: DeflateDecoder::new(BlobReader {
                conn: Arc::clone(&self.conn),
                rowid,
                pos: 0,
            }),
        }))
    }

    fn open_mode(&self, name: &str, mode: OpenMode) -> Result<FsHandle, FsError> {
        let normalized = normalize(name);
        match mode {
            OpenMode::Read => Ok(FsHandle::Reader(self.open(&normalized)?)),
            OpenMode::ReadWrite => {
                let stat = self.require_stat(&normalized)?;
                if stat.is_dir {
                    return Err(FsError::IsADirectory { name: normalized });
                }
                Ok(FsHandle::Writer(self.writer(normalized)))
            }
            OpenMode::ReadCreate => {
                if self.stat_row(&normalized)?.is_none() {
                    self.touch(&normalized)?;
                }
                Ok(FsHandle::Writer(self.writer(normalized)))
            }
        }
    }

    fn stat(&self, name: &str) -> Result<EntryStat, FsError> {
        self.require_stat(&normalize(name))
    }

    fn readdir(&self, name: &str) -> Result<Vec<EntryStat>, FsError> {
        let dir = normalize(name);
        let stat = self.require_stat(&dir)?;
        if !stat.is_dir {
            return Err(FsError::NotADirectory { name: dir });
        }
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        let pattern = format!("{}%", escape_like(&prefix));

        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT name, mode, mtime, sz, data IS NULL FROM sqlar \
             WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name",
        )?;
        let mut rows = stmt.query(params![pattern])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let entry = row_to_stat(row)?;
            if is_child_of(&entry.name, &dir) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn walk(&self, root: &str) -> Result<Vec<EntryStat>, FsError> {
        let root = normalize(root);
        let stat = self.require_stat(&root)?;
        let mut entries = Vec::new();
        walk_into(self, stat, &mut entries)?;
        Ok(entries)
    }

    fn mkdir(&self, name: &str, mode: u32) -> Result<(), FsError> {
        let name = normalize(name);
        if self.stat_row(&name)?.is_some() {
            return Err(FsError::AlreadyExists { name });
        }
        self.lock().execute(
            "INSERT INTO sqlar (name, mode, mtime, sz, data) VALUES (?1, ?2, ?3, 0, NULL)",
            params![name, mode, epoch_now()],
        )?;
        Ok(())
    }

    fn mkdir_all(&self, name: &str) -> Result<(), FsError> {
        let name = normalize(name);
        if name == "/" {
            return Ok(());
        }
        let mut ancestor = String::new();
        for segment in name.trim_start_matches('/').split('/') {
            ancestor.push('/');
            ancestor.push_str(segment);
            match self.stat_row(&ancestor)? {
                None => self.mkdir(&ancestor, DIR_MODE)?,
                Some(stat) if stat.is_dir => {}
                Some(_) => {
                    return Err(FsError::NotADirectory { name: ancestor });
                }
            }
        }
        Ok(())
    }

    fn chmod(&self, name: &str, mode: u32) -> Result<(), FsError> {
        let name = normalize(name);
        let updated = self.lock().execute(
            "UPDATE sqlar SET mode = ?2 WHERE name = ?1",
            params![name, mode],
        )?;
        if updated == 0 {
            return Err(FsError::NotFound { name });
        }
        Ok(())
    }

    fn chtimes(&self, name: &str, mtime: i64) -> Result<(), FsError> {
        let name = normalize(name);
        let updated = self.lock().execute(
            "UPDATE sqlar SET mtime = ?2 WHERE name = ?1",
            params![name, mtime],
        )?;
        if updated == 0 {
            return Err(FsError::NotFound { name });
        }
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        let old = normalize(old);
        let new = normalize(new);
        let updated = self.lock().execute(
            "UPDATE sqlar SET name = ?2 WHERE name = ?1",
            params![old, new],
        )?;
        if updated == 0 {
            return Err(FsError::NotFound { name: old });
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), FsError> {
        let name = normalize(name);
        let deleted = self
            .lock()
            .execute("DELETE FROM sqlar WHERE name = ?1", params![name])?;
        if deleted == 0 {
            return Err(FsError::NotFound { name });
        }
        Ok(())
    }

    fn remove_all(&self, name: &str) -> Result<(), FsError> {
        let name = normalize(name);
        let pattern = if name == "/" {
            "/%".to_string()
        } else {
            format!("{}/%", escape_like(&name))
        };
        self.lock().execute(
            "DELETE FROM sqlar WHERE name = ?1 OR name LIKE ?2 ESCAPE '\\'",
            params![name, pattern],
        )?;
        Ok(())
    }
}

fn walk_into(fs: &SqlarFs, entry: EntryStat, out: &mut Vec<EntryStat>) -> Result<(), FsError> {
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

// ---------------------------------------------------------------------------
// Read side: incremental blob reads under the shared connection lock
// ---------------------------------------------------------------------------

/// Reads the raw (compressed) blob of one row, taking the connection lock
/// only for the duration of each read call.
struct BlobReader {
    conn: Arc<Mutex<Connection>>,
    rowid: i64,
    pos: u64,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let conn = self.conn.lock().expect("connection lock poisoned");
        let mut blob = conn
            .blob_open(DatabaseName::Main, "sqlar", "data", self.rowid, true)
            .map_err(io::Error::other)?;
        blob.seek(SeekFrom::Start(self.pos))?;
        let n = blob.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

struct SqlarReader {
    decoder: DeflateDecoder<BlobReader>,
}

impl Read for SqlarReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

impl EvidenceReader for SqlarReader {}

// ---------------------------------------------------------------------------
// Write side: DEFLATE into a spooled buffer, finalize into a sized blob
// ---------------------------------------------------------------------------

/// Write handle for one archive entry.
///
/// Bytes compress into a spooled buffer as they arrive. Closing finalizes
/// the DEFLATE stream, rewrites the row with the uncompressed size and a
/// zero-blob of the compressed length, and streams the compressed bytes
/// into the blob.
struct SqlarWriter {
    conn: Arc<Mutex<Connection>>,
    name: String,
    mode: u32,
    encoder: Option<DeflateEncoder<SpooledBuffer>>,
    uncompressed: u64,
    closed: bool,
}

impl SqlarWriter {
    fn finalize(&mut self) -> Result<(), FsError> {
        if self.closed {
            return Err(FsError::HandleClosed {
                name: self.name.clone(),
            });
        }
        self.closed = true;
        let encoder = self.encoder.take().ok_or_else(|| FsError::HandleClosed {
            name: self.name.clone(),
        })?;
        let mut spool = encoder.finish()?;
        let compressed = spool.len()?;
        spool.rewind()?;

        let conn = self.conn.lock().expect("connection lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO sqlar (name, mode, mtime, sz, data) \
             VALUES (?1, ?2, ?3, ?4, zeroblob(?5))",
            params![
                self.name,
                self.mode,
                epoch_now(),
                self.uncompressed as i64,
                compressed as i64
            ],
        )?;
        let rowid = conn.last_insert_rowid();
        let mut blob = conn.blob_open(DatabaseName::Main, "sqlar", "data", rowid, false)?;
        io::copy(&mut spool, &mut blob)?;
        tracing::debug!(
            name = %self.name,
            uncompressed = self.uncompressed,
            compressed,
            "archive entry finalized"
        );
        Ok(())
    }
}

impl Write for SqlarWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| io::Error::other(format!("write to closed handle {}", self.name)))?;
        let n = encoder.write(buf)?;
        self.uncompressed += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.flush(),
            None => Ok(()),
        }
    }
}

impl EvidenceWriter for SqlarWriter {
    fn close(mut self: Box<Self>) -> Result<(), FsError> {
        self.finalize()
    }
}

impl Drop for SqlarWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.finalize() {
                tracing::warn!(name = %self.name, error = %e, "archive writer drop failed");
            }
        }
    }
}

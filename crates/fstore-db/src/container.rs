use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::Connection;

use fstore_fs::{DirFs, EvidenceFs, SqlarFs};
use fstore_schema::SchemaRegistry;

use crate::error::StoreError;
use crate::store::Store;
use crate::typemap::TypeMap;

/// ASCII `elem`: the default layout with the embedded archive.
pub const APPLICATION_ID: u32 = 0x656c_656d;

/// ASCII `elzp`: the legacy layout backed by a host directory beside the
/// database file.
pub const APPLICATION_ID_DIRECTORY: u32 = 0x656c_7a70;

/// Format version written on create.
pub const VERSION: u32 = 3;

/// Format versions accepted on open.
const ACCEPTED_VERSIONS: [u32; 2] = [2, 3];

/// The in-memory pseudo-path; skips all host filesystem steps.
const MEMORY_URL: &str = ":memory:";

impl Store {
    /// Create a fresh store file.
    ///
    /// Fails with `AlreadyExists` if `path` exists. Parent directories are
    /// created, the container header (`application_id`, `user_version`) is
    /// written exactly once, and the element and archive tables are
    /// initialized.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path.as_os_str() == MEMORY_URL {
            return Self::in_memory();
        }
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        configure_pragmas(&conn)?;
        write_header(&conn)?;
        create_schema(&conn)?;
        SqlarFs::init(&conn)?;
        tracing::info!(path = %path.display(), "store created");

        let conn = Arc::new(Mutex::new(conn));
        let fs = Box::new(SqlarFs::new(Arc::clone(&conn)));
        Self::assemble(conn, fs, VERSION)
    }

    /// Open an existing store file.
    ///
    /// Fails with `NotFound` if absent and `WrongFormat` unless the header
    /// carries an accepted `application_id` and `user_version`. The header
    /// decides the evidence backend: the embedded archive for `elem`, a
    /// host directory beside the database file for `elzp`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if path.as_os_str() == MEMORY_URL {
            return Self::in_memory();
        }
        if !path.exists() {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let conn = Connection::open(path)?;
        configure_pragmas(&conn)?;
        let (application_id, user_version) = read_header(&conn)?;
        let accepted_id =
            application_id == APPLICATION_ID || application_id == APPLICATION_ID_DIRECTORY;
        if !accepted_id || !ACCEPTED_VERSIONS.contains(&user_version) {
            return Err(StoreError::WrongFormat {
                application_id,
                user_version,
            });
        }
        // Version-2 stores predate some secondary indexes; anything missing
        // is created here, the header itself is never touched again.
        create_schema(&conn)?;

        let conn = Arc::new(Mutex::new(conn));
        let fs: Box<dyn EvidenceFs> = if application_id == APPLICATION_ID_DIRECTORY {
            Box::new(DirFs::new(path.with_extension(""))?)
        } else {
            SqlarFs::init(&conn.lock().expect("connection lock poisoned"))?;
            Box::new(SqlarFs::new(Arc::clone(&conn)))
        };
        tracing::debug!(path = %path.display(), user_version, "store opened");
        Self::assemble(conn, fs, user_version)
    }

    /// An ephemeral store that never touches the host filesystem.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        configure_pragmas(&conn)?;
        write_header(&conn)?;
        create_schema(&conn)?;
        SqlarFs::init(&conn)?;

        let conn = Arc::new(Mutex::new(conn));
        let fs = Box::new(SqlarFs::new(Arc::clone(&conn)));
        Self::assemble(conn, fs, VERSION)
    }

    fn assemble(
        conn: Arc<Mutex<Connection>>,
        fs: Box<dyn EvidenceFs>,
        version: u32,
    ) -> Result<Self, StoreError> {
        Ok(Store {
            conn,
            fs,
            registry: SchemaRegistry::bundled()?,
            types: RwLock::new(TypeMap::default()),
            version,
            closed: AtomicBool::new(false),
        })
    }
}

/// Read the container header straight from the file, without opening a
/// SQLite connection.
///
/// Returns `(application_id, user_version)`: per the SQLite file format,
/// `user_version` is big-endian at bytes [60..64) and `application_id` at
/// bytes [68..72).
pub fn raw_header(path: impl AsRef<Path>) -> Result<(u32, u32), StoreError> {
    use std::io::Read;

    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            StoreError::Io(e)
        }
    })?;
    let mut header = [0u8; 72];
    file.read_exact(&mut header)?;
    let user_version = u32::from_be_bytes([header[60], header[61], header[62], header[63]]);
    let application_id = u32::from_be_bytes([header[68], header[69], header[70], header[71]]);
    Ok((application_id, user_version))
}

fn configure_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\
         PRAGMA busy_timeout = 5000;\
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

fn read_header(conn: &Connection) -> Result<(u32, u32), StoreError> {
    let application_id: i64 =
        conn.pragma_query_value(None, "application_id", |row| row.get(0))?;
    let user_version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok((application_id as u32, user_version as u32))
}

fn write_header(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "application_id", APPLICATION_ID)?;
    conn.pragma_update(None, "user_version", VERSION)?;
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS elements (
            id          TEXT PRIMARY KEY,
            json        TEXT NOT NULL,
            insert_time TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_elements_type
            ON elements (json_extract(json, '$.type'));
        CREATE INDEX IF NOT EXISTS idx_elements_origin_path
            ON elements (json_extract(json, '$.origin.path'));
        CREATE INDEX IF NOT EXISTS idx_elements_path
            ON elements (json_extract(json, '$.path'));
        CREATE INDEX IF NOT EXISTS idx_elements_key
            ON elements (json_extract(json, '$.key'));
        CREATE INDEX IF NOT EXISTS idx_elements_errors
            ON elements (json_extract(json, '$.errors'));
        CREATE INDEX IF NOT EXISTS idx_elements_labels
            ON elements (json_extract(json, '$.labels'));
        CREATE INDEX IF NOT EXISTS idx_elements_artifact
            ON elements (json_extract(json, '$.artifact'));",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_then_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("case.forensicstore");

        let store = Store::create(&path).unwrap();
        store.close().unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(store.version(), VERSION);
    }

    #[test]
    fn create_existing_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("case.forensicstore");
        Store::create(&path).unwrap().close().unwrap();

        assert!(matches!(
            Store::create(&path),
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn open_missing_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            Store::open(tmp.path().join("absent.forensicstore")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn create_makes_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deep/nested/case.forensicstore");
        Store::create(&path).unwrap().close().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn header_is_checked_on_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("case.forensicstore");
        Store::create(&path).unwrap().close().unwrap();

        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 999u32).unwrap();
        }
        match Store::open(&path) {
            Err(StoreError::WrongFormat {
                application_id,
                user_version,
            }) => {
                assert_eq!(application_id, APPLICATION_ID);
                assert_eq!(user_version, 999);
            }
            other => panic!("expected WrongFormat, got {other:?}"),
        }

        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", VERSION).unwrap();
            conn.pragma_update(None, "application_id", 0x1234_5678u32)
                .unwrap();
        }
        assert!(matches!(
            Store::open(&path),
            Err(StoreError::WrongFormat { .. })
        ));
    }

    #[test]
    fn version_2_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("legacy.forensicstore");
        Store::create(&path).unwrap().close().unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 2u32).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn raw_header_matches_pragmas() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("case.forensicstore");
        Store::create(&path).unwrap().close().unwrap();

        let (application_id, user_version) = raw_header(&path).unwrap();
        assert_eq!(application_id, APPLICATION_ID);
        assert_eq!(user_version, VERSION);
        assert_eq!(application_id.to_be_bytes(), *b"elem");

        assert!(matches!(
            raw_header(tmp.path().join("absent")),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn in_memory_store_works() {
        let store = Store::create(":memory:").unwrap();
        let id = store
            .insert(serde_json::json!({"type": "test", "foo": "bar"}))
            .unwrap();
        assert!(store.get(&id).is_ok());
    }

    #[test]
    fn directory_layout_mounts_host_backend() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("legacy.forensicstore");
        Store::create(&path).unwrap().close().unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "application_id", APPLICATION_ID_DIRECTORY)
                .unwrap();
        }

        let store = Store::open(&path).unwrap();
        let mut writer = store.fs().create("/blob.bin").unwrap();
        use std::io::Write;
        writer.write_all(b"host backed").unwrap();
        writer.close().unwrap();
        drop(store);

        // The blob lives beside the database, not inside it.
        assert!(tmp.path().join("legacy/blob.bin").exists());
    }
}

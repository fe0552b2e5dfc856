use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;

use fstore_core::{now_rfc3339_nanos, require_discriminator, unflatten, CoreError};
use fstore_fs::{normalize, parent, EvidenceFs, EvidenceReader, EvidenceWriter};
use fstore_schema::SchemaRegistry;

use crate::error::StoreError;
use crate::typemap::TypeMap;

/// A single-file forensicstore: the document store, its evidence
/// filesystem, and the schema registry behind one SQLite database.
///
/// Elements are immutable once inserted; per-type views over the observed
/// fields are materialized when the store closes.
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) fs: Box<dyn EvidenceFs>,
    pub(crate) registry: SchemaRegistry,
    pub(crate) types: RwLock<TypeMap>,
    pub(crate) version: u32,
    pub(crate) closed: AtomicBool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("version", &self.version)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Store {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("connection lock poisoned")
    }

    /// The active evidence filesystem backend.
    pub fn fs(&self) -> &dyn EvidenceFs {
        self.fs.as_ref()
    }

    /// The schema registry this store validates against.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The container format version this store was opened with.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Insert one element and return its id.
    ///
    /// The element is validated against the registry, structurally checked,
    /// given a fresh `<type>--<uuid v4>` id when it has none, and written
    /// with the current RFC 3339 timestamp. Elements are immutable
    /// afterwards; there is no update.
    pub fn insert(&self, mut element: Value) -> Result<String, StoreError> {
        let flaws = self.registry.validate(&element);
        if !flaws.is_empty() {
            return Err(StoreError::ValidationFailed { flaws });
        }
        let kind = require_discriminator(&element)
            .map_err(|e| match e {
                CoreError::MissingDiscriminator => StoreError::ValidationFailed {
                    flaws: vec![e.to_string()],
                },
                other => StoreError::InvalidElement {
                    reason: other.to_string(),
                },
            })?
            .to_string();
        let id = fstore_core::ensure_id(&mut element).map_err(|e| StoreError::InvalidElement {
            reason: e.to_string(),
        })?;

        {
            let object = element.as_object().expect("checked by require_discriminator");
            let mut types = self.types.write().expect("type map lock poisoned");
            types.add_all(&kind, object.keys().map(String::as_str));
        }

        let json_text = serde_json::to_string(&element)?;
        self.lock().execute(
            "INSERT INTO elements (id, json, insert_time) VALUES (?1, ?2, ?3)",
            params![id, json_text, now_rfc3339_nanos()],
        )?;
        Ok(id)
    }

    /// Insert elements in order; the first failure aborts and is returned.
    pub fn insert_batch(&self, elements: Vec<Value>) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::with_capacity(elements.len());
        for element in elements {
            ids.push(self.insert(element)?);
        }
        Ok(ids)
    }

    /// Serialize a typed artifact and insert it through the normal path.
    pub fn insert_struct<T: serde::Serialize>(&self, artifact: &T) -> Result<String, StoreError> {
        self.insert(serde_json::to_value(artifact)?)
    }

    /// Total number of stored elements.
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.lock()
                .query_row("SELECT COUNT(*) FROM elements", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of stored elements of one type.
    pub fn count_type(&self, kind: &str) -> Result<usize, StoreError> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM elements WHERE json_extract(json, '$.type') = ?1",
            params![kind],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Fetch one element by id.
    pub fn get(&self, id: &str) -> Result<Value, StoreError> {
        let row: Option<String> = {
            let conn = self.lock();
            let mut stmt = conn.prepare_cached("SELECT json FROM elements WHERE id = ?1")?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        let json_text = row.ok_or_else(|| StoreError::ElementNotFound { id: id.to_string() })?;
        self.decode_row(id, &json_text)
    }

    /// All elements, equivalent to `select(&[])`.
    pub fn all(&self) -> Result<Vec<Value>, StoreError> {
        self.select(&[])
    }

    /// Filter elements by ORed groups of ANDed `field LIKE value`
    /// conditions on extracted JSON fields. Empty conditions return all
    /// rows.
    pub fn select(&self, conditions: &[HashMap<String, String>]) -> Result<Vec<Value>, StoreError> {
        let mut sql = String::from("SELECT id, json FROM elements");
        let mut values: Vec<String> = Vec::new();
        let mut groups: Vec<String> = Vec::new();
        for group in conditions {
            if group.is_empty() {
                continue;
            }
            let mut fields: Vec<(&String, &String)> = group.iter().collect();
            fields.sort();
            let clauses: Vec<String> = fields
                .into_iter()
                .map(|(field, value)| {
                    values.push(value.clone());
                    format!("json_extract(json, {}) LIKE ?", quote_json_path(field))
                })
                .collect();
            groups.push(format!("({})", clauses.join(" AND ")));
        }
        if !groups.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&groups.join(" OR "));
        }
        self.rows(&sql, values)
    }

    /// Full-text substring search over the raw JSON column.
    pub fn search(&self, query: &str) -> Result<Vec<Value>, StoreError> {
        self.rows(
            "SELECT id, json FROM elements WHERE json LIKE ?1",
            vec![format!("%{query}%")],
        )
    }

    /// Raw SQL passthrough for `SELECT json FROM elements …` queries; only
    /// the first column is returned.
    pub fn query(&self, sql: &str) -> Result<Vec<Value>, StoreError> {
        if !sql.trim_start().get(..6).is_some_and(|s| s.eq_ignore_ascii_case("select")) {
            return Err(StoreError::UnsupportedQuery {
                reason: "only SELECT statements are supported".to_string(),
            });
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut elements = Vec::new();
        while let Some(row) = rows.next()? {
            let json_text: String = row.get(0)?;
            elements.push(serde_json::from_str(&json_text)?);
        }
        Ok(elements)
    }

    /// Store an evidence file, deduplicating the name with `_0`, `_1`, …
    /// before the extension. Returns the actual archive-relative path (no
    /// leading slash, ready for a `*_path` field) and the write handle.
    pub fn store_file(
        &self,
        path: &str,
    ) -> Result<(String, Box<dyn EvidenceWriter>), StoreError> {
        let normalized = normalize(path);
        let dir = parent(&normalized);
        if dir != "/" {
            self.fs.mkdir_all(dir)?;
        }
        let mut candidate = normalized.clone();
        let mut index = 0;
        loop {
            match self.fs.stat(&candidate) {
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e.into()),
                Ok(_) => {
                    candidate = dedup_name(&normalized, index);
                    index += 1;
                }
            }
        }
        let writer = self.fs.create(&candidate)?;
        Ok((candidate.trim_start_matches('/').to_string(), writer))
    }

    /// Open an evidence file referenced by a `*_path` field.
    pub fn load_file(&self, path: &str) -> Result<Box<dyn EvidenceReader>, StoreError> {
        Ok(self.fs.open(path)?)
    }

    /// Materialize per-type views and release the store.
    pub fn close(self) -> Result<(), StoreError> {
        self.finalize()
    }

    /// All elements with their ids, in insertion order.
    pub(crate) fn elements_in_insertion_order(
        &self,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let rows: Vec<(String, String)> = {
            let conn = self.lock();
            let mut stmt =
                conn.prepare_cached("SELECT id, json FROM elements ORDER BY rowid")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push((row.get(0)?, row.get(1)?));
            }
            out
        };
        rows.into_iter()
            .map(|(id, json_text)| {
                let element = self.decode_row(&id, &json_text)?;
                Ok((id, element))
            })
            .collect()
    }

    fn rows(&self, sql: &str, values: Vec<String>) -> Result<Vec<Value>, StoreError> {
        let raw: Vec<(String, String)> = {
            let conn = self.lock();
            let mut stmt = conn.prepare_cached(sql)?;
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push((row.get(0)?, row.get(1)?));
            }
            out
        };
        raw.into_iter()
            .map(|(id, json_text)| self.decode_row(&id, &json_text))
            .collect()
    }

    /// Parse one stored row. Rows of version-2 stores may use the legacy
    /// flattened layout with dotted keys; those are unflattened on read.
    fn decode_row(&self, id: &str, json_text: &str) -> Result<Value, StoreError> {
        let element: Value =
            serde_json::from_str(json_text).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        if self.version == 2 && fstore_core::has_dotted_keys(&element) {
            return Ok(unflatten(&element));
        }
        Ok(element)
    }

    fn finalize(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let types = self.types.write().expect("type map lock poisoned");
        if !types.changed() {
            return Ok(());
        }
        let snapshot = types.all();
        drop(types);

        let conn = self.lock();
        for (kind, fields) in &snapshot {
            if kind == "elements" || kind == "sqlar" {
                tracing::warn!(kind = %kind, "skipping view that would shadow a core table");
                continue;
            }
            let columns: Vec<String> = fields
                .iter()
                .map(|field| {
                    format!(
                        "json_extract(json, {}) AS {}",
                        quote_json_path(field),
                        quote_ident(field)
                    )
                })
                .collect();
            let sql = format!(
                "DROP VIEW IF EXISTS {ident}; \
                 CREATE VIEW {ident} AS SELECT {columns} FROM elements \
                 WHERE json_extract(json, '$.type') = {literal};",
                ident = quote_ident(kind),
                columns = columns.join(", "),
                literal = quote_literal(kind),
            );
            conn.execute_batch(&sql)?;
        }
        tracing::debug!(views = snapshot.len(), "per-type views materialized");
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            tracing::warn!(error = %e, "store close failed");
        }
    }
}

/// `"ident"` quoting for view and column names.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `'literal'` quoting for string comparisons.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `'$.field'` JSON path literal for `json_extract`.
fn quote_json_path(field: &str) -> String {
    format!("'$.{}'", field.replace('\'', "''"))
}

/// `/dir/base.ext` → `/dir/base_<index>.ext`
fn dedup_name(name: &str, index: usize) -> String {
    let (dir, file) = name.rsplit_once('/').unwrap_or(("", name));
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{dir}/{stem}_{index}.{ext}"),
        _ => format!("{dir}/{file}_{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn store() -> Store {
        Store::in_memory().unwrap()
    }

    #[test]
    fn insert_assigns_type_prefixed_uuid() {
        let store = store();
        let id = store.insert(json!({"type": "test", "foo": "bar"})).unwrap();
        let (kind, uuid) = id.split_once("--").unwrap();
        assert_eq!(kind, "test");
        assert_eq!(uuid.len(), 36);

        let second = store.insert(json!({"type": "test", "foo": "bar"})).unwrap();
        assert_ne!(id, second);
    }

    #[test]
    fn get_round_trips_modulo_id() {
        let store = store();
        let element = json!({"type": "test", "foo": "bar", "n": 3});
        let id = store.insert(element.clone()).unwrap();

        let mut expected = element;
        expected["id"] = json!(id.clone());
        assert_eq!(store.get(&id).unwrap(), expected);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get("test--0000"),
            Err(StoreError::ElementNotFound { .. })
        ));
    }

    #[test]
    fn self_titled_field_is_rejected() {
        let store = store();
        assert!(matches!(
            store.insert(json!({"type": "foo", "foo": 1})),
            Err(StoreError::InvalidElement { .. })
        ));
    }

    #[test]
    fn missing_type_is_a_validation_failure() {
        let store = store();
        match store.insert(json!({"foo": 1})) {
            Err(StoreError::ValidationFailed { flaws }) => {
                assert_eq!(flaws, ["element needs to have a type"]);
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn schema_violations_abort_insert() {
        let store = store();
        assert!(matches!(
            store.insert(json!({"type": "file", "foo": "foo.txt"})),
            Err(StoreError::ValidationFailed { .. })
        ));
        store
            .insert(json!({
                "type": "file",
                "name": "foo.txt",
                "hashes": {"MD5": "0356a89e11fcbed1288a0553377541af"},
            }))
            .unwrap();
    }

    #[test]
    fn select_matches_get_over_all_rows() {
        let store = store();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                store
                    .insert(json!({"type": "test", "index": i.to_string()}))
                    .unwrap(),
            );
        }
        let selected = store.select(&[]).unwrap();
        assert_eq!(selected.len(), ids.len());
        let fetched: Vec<Value> = ids.iter().map(|id| store.get(id).unwrap()).collect();
        for element in &fetched {
            assert!(selected.contains(element));
        }
    }

    #[test]
    fn select_with_conditions() {
        let store = store();
        store
            .insert(json!({"type": "process", "name": "iptables"}))
            .unwrap();
        store
            .insert(json!({"type": "process", "name": "sshd"}))
            .unwrap();
        store
            .insert(json!({"type": "test", "name": "iptables"}))
            .unwrap();

        let both = HashMap::from([
            ("type".to_string(), "process".to_string()),
            ("name".to_string(), "iptables".to_string()),
        ]);
        let rows = store.select(&[both]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "iptables");
        assert_eq!(rows[0]["type"], "process");

        // ORed groups
        let process = HashMap::from([("type".to_string(), "process".to_string())]);
        let test = HashMap::from([("type".to_string(), "test".to_string())]);
        assert_eq!(store.select(&[process, test]).unwrap().len(), 3);
    }

    #[test]
    fn search_substring() {
        let store = store();
        store
            .insert(json!({"type": "test", "payload": "needle in json"}))
            .unwrap();
        store.insert(json!({"type": "test", "payload": "hay"})).unwrap();
        assert_eq!(store.search("needle").unwrap().len(), 1);
        assert!(store.search("absent").unwrap().is_empty());
    }

    #[test]
    fn raw_query_passthrough() {
        let store = store();
        store.insert(json!({"type": "test", "n": "1"})).unwrap();
        let rows = store
            .query("SELECT json FROM elements WHERE json_extract(json, '$.n') = '1'")
            .unwrap();
        assert_eq!(rows.len(), 1);

        assert!(matches!(
            store.query("DELETE FROM elements"),
            Err(StoreError::UnsupportedQuery { .. })
        ));
    }

    #[test]
    fn store_file_deduplicates() {
        let store = store();
        let (first, writer) = store.store_file("dir/evidence.txt").unwrap();
        writer.close().unwrap();
        let (second, writer) = store.store_file("dir/evidence.txt").unwrap();
        writer.close().unwrap();
        let (third, writer) = store.store_file("dir/evidence.txt").unwrap();
        writer.close().unwrap();

        assert_eq!(first, "dir/evidence.txt");
        assert_eq!(second, "dir/evidence_0.txt");
        assert_eq!(third, "dir/evidence_1.txt");
    }

    #[test]
    fn store_and_load_file() {
        let store = store();
        let (path, mut writer) = store.store_file("out/stdout.log").unwrap();
        writer.write_all(b"captured output").unwrap();
        writer.close().unwrap();

        let mut out = Vec::new();
        store.load_file(&path).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"captured output");
    }

    #[test]
    fn views_are_materialized_on_close() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("views.forensicstore");
        let store = Store::create(&path).unwrap();
        store
            .insert(json!({"type": "process", "name": "iptables", "pid": 1}))
            .unwrap();
        store
            .insert(json!({"type": "process", "name": "sshd", "ppid": 2}))
            .unwrap();
        store.close().unwrap();

        let conn = Connection::open(&path).unwrap();
        let name: String = conn
            .query_row(
                "SELECT name FROM process WHERE name = 'iptables'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "iptables");

        // Every field ever seen under the type becomes a column.
        let mut stmt = conn.prepare("SELECT pid, ppid FROM process").unwrap();
        let count = stmt.query([]).unwrap().mapped(|_| Ok(())).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn version_2_rows_are_unflattened_on_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("legacy.forensicstore");
        Store::create(&path).unwrap().close().unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 2u32).unwrap();
            let flat = fstore_core::flatten(&json!({
                "type": "file",
                "name": "a.txt",
                "origin": {"path": "/etc/a.txt"},
            }));
            let mut flat = flat;
            flat["id"] = json!("file--legacy");
            conn.execute(
                "INSERT INTO elements (id, json, insert_time) VALUES (?1, ?2, ?3)",
                params![
                    "file--legacy",
                    serde_json::to_string(&flat).unwrap(),
                    "2020-01-01T00:00:00.000000000Z"
                ],
            )
            .unwrap();
        }

        let store = Store::open(&path).unwrap();
        let element = store.get("file--legacy").unwrap();
        assert_eq!(element["origin"]["path"], "/etc/a.txt");
    }

    #[test]
    fn typed_artifacts_insert_through_the_same_path() {
        use fstore_core::artifacts::Process;

        let store = store();
        let mut process = Process::new();
        process.name = "sshd".to_string();
        process.command_line = Some("/usr/sbin/sshd -D".to_string());
        let id = store.insert_struct(&process).unwrap();
        assert!(id.starts_with("process--"));

        let element = store.get(&id).unwrap();
        assert_eq!(element["name"], "sshd");
        let back: Process = serde_json::from_value(element).unwrap();
        assert_eq!(back.id, Some(id));
        assert_eq!(back.command_line, process.command_line);
    }

    #[test]
    fn counts_track_inserts() {
        let store = store();
        assert_eq!(store.count().unwrap(), 0);
        store.insert(json!({"type": "test", "n": "1"})).unwrap();
        store.insert(json!({"type": "test", "n": "2"})).unwrap();
        store
            .insert(json!({"type": "process", "name": "sh"}))
            .unwrap();
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.count_type("test").unwrap(), 2);
        assert_eq!(store.count_type("absent").unwrap(), 0);
    }

    #[test]
    fn batch_insert_preserves_order_and_aborts_on_failure() {
        let store = store();
        let ids = store
            .insert_batch(vec![
                json!({"type": "test", "n": "0"}),
                json!({"type": "test", "n": "1"}),
            ])
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.get(&ids[0]).unwrap()["n"], "0");

        let result = store.insert_batch(vec![
            json!({"type": "test", "n": "2"}),
            json!({"no_type": true}),
        ]);
        assert!(result.is_err());
        // The first element of the failed batch was still inserted.
        assert_eq!(store.all().unwrap().len(), 3);
    }
}

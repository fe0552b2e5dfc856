use std::collections::{BTreeMap, BTreeSet};

/// Records every top-level field name observed per element type during a
/// session. Drives per-type view materialization at close time.
#[derive(Debug, Default)]
pub(crate) struct TypeMap {
    inner: BTreeMap<String, BTreeSet<String>>,
    changed: bool,
}

impl TypeMap {
    /// Record one field under a type.
    pub fn add(&mut self, kind: &str, field: &str) {
        let fields = self.inner.entry(kind.to_string()).or_default();
        if fields.insert(field.to_string()) {
            self.changed = true;
        }
    }

    /// Record every field of one element under its type.
    pub fn add_all<'a>(&mut self, kind: &str, fields: impl IntoIterator<Item = &'a str>) {
        for field in fields {
            self.add(kind, field);
        }
    }

    /// True once anything new was recorded this session.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// A snapshot of the whole map; callers hold the surrounding lock while
    /// taking it.
    pub fn all(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.inner.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_fields_per_type() {
        let mut map = TypeMap::default();
        assert!(!map.changed());
        map.add_all("file", ["name", "size"]);
        map.add_all("file", ["name", "hashes"]);
        map.add("process", "name");

        let snapshot = map.all();
        assert_eq!(snapshot.len(), 2);
        let file_fields: Vec<&str> =
            snapshot["file"].iter().map(String::as_str).collect();
        assert_eq!(file_fields, ["hashes", "name", "size"]);
        assert!(map.changed());
    }

    #[test]
    fn snapshot_is_detached() {
        let mut map = TypeMap::default();
        map.add("file", "name");
        let snapshot = map.all();
        map.add("file", "size");
        assert_eq!(snapshot["file"].len(), 1);
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::Validator;
use serde_json::Value;

use crate::error::SchemaError;

/// Internal URI scheme for cross-references between registered schemas.
const REF_SCHEME: &str = "elementary:";

/// Schemas bundled with the store, embedded at compile time.
const BUNDLED: &[(&str, &str)] = &[
    ("hashes", include_str!("../schemas/hashes.json")),
    ("file", include_str!("../schemas/file.json")),
    ("directory", include_str!("../schemas/directory.json")),
    ("process", include_str!("../schemas/process.json")),
    ("registry-key", include_str!("../schemas/registry-key.json")),
    ("cookie", include_str!("../schemas/cookie.json")),
    ("prefetch", include_str!("../schemas/prefetch.json")),
    ("shell-history", include_str!("../schemas/shell-history.json")),
    ("uninstall-entry", include_str!("../schemas/uninstall-entry.json")),
    (
        "windows-network-interface",
        include_str!("../schemas/windows-network-interface.json"),
    ),
];

/// An immutable mapping from element type to a compiled JSON schema.
///
/// Bare-file `$ref`s (`foo.json`, optionally with a fragment) are rewritten
/// once to the internal `elementary:` scheme and resolved against the
/// registry itself, so the frozen registry needs no file or network access.
/// Safe for concurrent readers.
pub struct SchemaRegistry {
    validators: HashMap<String, Validator>,
}

impl SchemaRegistry {
    /// Build a registry from `(name, json source)` pairs. The schema `title`
    /// keys the validator; cross-references use the file name stem.
    pub fn new(sources: &[(&str, &str)]) -> Result<Self, SchemaError> {
        let mut resources: HashMap<String, Value> = HashMap::new();
        let mut titled: Vec<(String, Value)> = Vec::new();
        for (name, source) in sources.iter().copied() {
            let mut schema: Value =
                serde_json::from_str(source).map_err(|e| SchemaError::Parse {
                    name: name.to_string(),
                    source: e,
                })?;
            rewrite_refs(&mut schema);
            let title = schema
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string();
            resources.insert(format!("{REF_SCHEME}{name}"), schema.clone());
            titled.push((title, schema));
        }

        let retriever = RegistryRetriever {
            resources: Arc::new(resources),
        };
        let mut validators = HashMap::new();
        for (title, schema) in titled {
            let validator = jsonschema::options()
                .with_retriever(retriever.clone())
                .build(&schema)
                .map_err(|e| SchemaError::Compile {
                    name: title.clone(),
                    reason: e.to_string(),
                })?;
            validators.insert(title, validator);
        }
        tracing::debug!(schemas = validators.len(), "schema registry frozen");
        Ok(Self { validators })
    }

    /// The registry of schemas shipped with the store.
    pub fn bundled() -> Result<Self, SchemaError> {
        Self::new(BUNDLED)
    }

    /// Registered type names.
    pub fn names(&self) -> Vec<&str> {
        self.validators.keys().map(String::as_str).collect()
    }

    /// Validate one element, returning a flaw string per violation.
    ///
    /// Elements of unregistered types produce no flaws; schemas are
    /// advisory for types the registry does not know.
    pub fn validate(&self, element: &Value) -> Vec<String> {
        let Some(kind) = element.get("type").and_then(Value::as_str) else {
            return vec!["element needs to have a type".to_string()];
        };
        match self.validators.get(kind) {
            Some(validator) => validator
                .iter_errors(element)
                .map(|error| error.to_string())
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Rewrite every bare-file `$ref` (`foo.json`, `foo.json#/ptr`) to the
/// registry-internal scheme (`elementary:foo`, `elementary:foo#/ptr`).
fn rewrite_refs(schema: &mut Value) {
    match schema {
        Value::Object(object) => {
            for (key, child) in object.iter_mut() {
                if key == "$ref" {
                    if let Some(target) = child.as_str() {
                        if let Some(rewritten) = rewrite_ref_target(target) {
                            *child = Value::String(rewritten);
                            continue;
                        }
                    }
                }
                rewrite_refs(child);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                rewrite_refs(item);
            }
        }
        _ => {}
    }
}

fn rewrite_ref_target(target: &str) -> Option<String> {
    if target.starts_with('#') || target.contains("://") || target.starts_with(REF_SCHEME) {
        return None;
    }
    let (base, fragment) = match target.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (target, None),
    };
    let stem = base.strip_suffix(".json")?;
    Some(match fragment {
        Some(fragment) => format!("{REF_SCHEME}{stem}#{fragment}"),
        None => format!("{REF_SCHEME}{stem}"),
    })
}

/// Resolves `elementary:` references out of the frozen registry.
#[derive(Clone)]
struct RegistryRetriever {
    resources: Arc<HashMap<String, Value>>,
}

impl jsonschema::Retrieve for RegistryRetriever {
    fn retrieve(
        &self,
        uri: &jsonschema::Uri<String>,
    ) -> Result<Value, Box<dyn core::error::Error + Send + Sync>> {
        self.resources
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| format!("unresolved schema reference {}", uri.as_str()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ref_target_rewriting() {
        assert_eq!(
            rewrite_ref_target("hashes.json"),
            Some("elementary:hashes".to_string())
        );
        assert_eq!(
            rewrite_ref_target("file.json#/properties/name"),
            Some("elementary:file#/properties/name".to_string())
        );
        assert_eq!(rewrite_ref_target("#/definitions/x"), None);
        assert_eq!(rewrite_ref_target("https://example.com/s.json"), None);
        assert_eq!(rewrite_ref_target("elementary:file"), None);
    }

    #[test]
    fn missing_type_is_a_flaw() {
        let registry = SchemaRegistry::bundled().unwrap();
        let flaws = registry.validate(&json!({"name": "x"}));
        assert_eq!(flaws, ["element needs to have a type"]);
    }

    #[test]
    fn unknown_type_passes() {
        let registry = SchemaRegistry::bundled().unwrap();
        assert!(registry.validate(&json!({"type": "custom", "x": 1})).is_empty());
    }

    #[test]
    fn file_requires_name() {
        let registry = SchemaRegistry::bundled().unwrap();
        let flaws = registry.validate(&json!({"type": "file", "foo": "foo.txt"}));
        assert!(!flaws.is_empty());

        let flaws = registry.validate(&json!({
            "type": "file",
            "name": "foo.txt",
            "hashes": {"MD5": "0356a89e11fcbed1288a0553377541af"},
        }));
        assert!(flaws.is_empty(), "unexpected flaws: {flaws:?}");
    }

    #[test]
    fn cross_referenced_schema_is_enforced() {
        // file.json pulls in hashes.json; digests must be strings.
        let registry = SchemaRegistry::bundled().unwrap();
        let flaws = registry.validate(&json!({
            "type": "file",
            "name": "foo.txt",
            "hashes": {"MD5": 5},
        }));
        assert!(!flaws.is_empty());
    }

    #[test]
    fn registered_names_use_titles() {
        let registry = SchemaRegistry::bundled().unwrap();
        let mut names = registry.names();
        names.sort_unstable();
        assert_eq!(
            names,
            [
                "cookie",
                "directory",
                "file",
                "hashes",
                "prefetch",
                "process",
                "registry-key",
                "shell-history",
                "uninstall-entry",
                "windows-network-interface",
            ]
        );
    }

    #[test]
    fn every_bundled_artifact_schema_names_its_required_field() {
        let registry = SchemaRegistry::bundled().unwrap();
        for (kind, sample) in [
            ("cookie", json!({"type": "cookie", "name": "session"})),
            ("prefetch", json!({"type": "prefetch", "name": "CMD.EXE-1234.pf"})),
            ("shell-history", json!({"type": "shell-history", "command": "ls"})),
            ("uninstall-entry", json!({"type": "uninstall-entry", "name": "App"})),
            (
                "windows-network-interface",
                json!({"type": "windows-network-interface", "name": "eth0"}),
            ),
        ] {
            assert!(
                registry.validate(&sample).is_empty(),
                "{kind} sample should validate"
            );
            let missing = json!({"type": kind});
            assert!(
                !registry.validate(&missing).is_empty(),
                "{kind} without its required field should flaw"
            );
        }
    }

    #[test]
    fn title_falls_back_to_name() {
        let registry =
            SchemaRegistry::new(&[("untitled", r#"{"type": "object"}"#)]).unwrap();
        assert_eq!(registry.names(), ["untitled"]);
    }
}

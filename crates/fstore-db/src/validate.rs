use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};

use md5::Md5;
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use fstore_core::HashAlgorithm;
use fstore_fs::normalize;

use crate::error::StoreError;
use crate::store::Store;

/// Validate the whole store: schema conformance of every element plus the
/// referential integrity between `*_path` fields and archive files.
///
/// Flaws accumulate and are returned as human-readable strings; only real
/// I/O failures abort. Schema flaws appear in element-insertion order; the
/// aggregate missing-file and additional-file flaws list paths in lexical
/// order.
#[tracing::instrument(skip(store), fields(flaw_count))]
pub fn validate(store: &Store) -> Result<Vec<String>, StoreError> {
    let mut flaws = Vec::new();
    let mut expected: BTreeSet<String> = BTreeSet::new();

    for (_, element) in store.elements_in_insertion_order()? {
        flaws.extend(store.registry().validate(&element));
        validate_element_paths(store, &element, &mut expected, &mut flaws)?;
    }

    let mut present: BTreeSet<String> = BTreeSet::new();
    for entry in store.fs().walk("/")? {
        if !entry.is_dir {
            present.insert(entry.name);
        }
    }

    let missing: Vec<&str> = expected
        .difference(&present)
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        flaws.push(format!("missing files: {}", missing.join(", ")));
    }
    let additional: Vec<&str> = present
        .difference(&expected)
        .map(String::as_str)
        .collect();
    if !additional.is_empty() {
        flaws.push(format!("additional files: {}", additional.join(", ")));
    }

    tracing::Span::current().record("flaw_count", flaws.len());
    Ok(flaws)
}

/// Check every `*_path` field of one element against the evidence
/// filesystem: traversal guard, declared size, declared digests.
fn validate_element_paths(
    store: &Store,
    element: &Value,
    expected: &mut BTreeSet<String>,
    flaws: &mut Vec<String>,
) -> Result<(), StoreError> {
    let Some(object) = element.as_object() else {
        return Ok(());
    };
    for (field, value) in object {
        if !field.ends_with("_path") {
            continue;
        }
        let Some(path) = value.as_str() else {
            continue;
        };
        if path.contains("..") {
            flaws.push(format!("'..' in {path}"));
            continue;
        }
        let name = normalize(path);
        expected.insert(name.clone());

        let stat = match store.fs().stat(&name) {
            Ok(stat) => stat,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };

        if let Some(declared) = object.get("size").and_then(Value::as_u64) {
            if declared != stat.size {
                flaws.push(format!(
                    "wrong size for {path}: expected {declared} got {}",
                    stat.size
                ));
            }
        }

        if let Some(hashes) = object.get("hashes").and_then(Value::as_object) {
            let mut wanted: BTreeMap<HashAlgorithm, (&str, &str)> = BTreeMap::new();
            for (algorithm_name, digest) in hashes {
                match HashAlgorithm::from_name(algorithm_name) {
                    Some(algorithm) => {
                        let declared = digest.as_str().unwrap_or_default();
                        wanted.insert(algorithm, (algorithm_name, declared));
                    }
                    None => {
                        flaws.push(format!(
                            "unknown hash algorithm {algorithm_name} for {path}"
                        ));
                    }
                }
            }
            if wanted.is_empty() {
                continue;
            }
            let algorithms: BTreeSet<HashAlgorithm> = wanted.keys().copied().collect();
            let mut reader = store.fs().open(&name)?;
            let actual = stream_digests(&mut reader, &algorithms)?;
            for (algorithm, (algorithm_name, declared)) in wanted {
                if actual[&algorithm] != declared.to_ascii_lowercase() {
                    flaws.push(format!("hashvalue mismatch {algorithm_name} for {path}"));
                }
            }
        }
    }
    Ok(())
}

/// Stream a file once, feeding every requested digest.
fn stream_digests<R: Read>(
    reader: &mut R,
    algorithms: &BTreeSet<HashAlgorithm>,
) -> io::Result<BTreeMap<HashAlgorithm, String>> {
    let mut md5 = algorithms.contains(&HashAlgorithm::Md5).then(Md5::new);
    let mut sha1 = algorithms.contains(&HashAlgorithm::Sha1).then(Sha1::new);
    let mut sha256 = algorithms.contains(&HashAlgorithm::Sha256).then(Sha256::new);

    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if let Some(hasher) = md5.as_mut() {
            hasher.update(&buf[..n]);
        }
        if let Some(hasher) = sha1.as_mut() {
            hasher.update(&buf[..n]);
        }
        if let Some(hasher) = sha256.as_mut() {
            hasher.update(&buf[..n]);
        }
    }

    let mut out = BTreeMap::new();
    if let Some(hasher) = md5 {
        out.insert(HashAlgorithm::Md5, hex::encode(hasher.finalize()));
    }
    if let Some(hasher) = sha1 {
        out.insert(HashAlgorithm::Sha1, hex::encode(hasher.finalize()));
    }
    if let Some(hasher) = sha256 {
        out.insert(HashAlgorithm::Sha256, hex::encode(hasher.finalize()));
    }
    Ok(out)
}

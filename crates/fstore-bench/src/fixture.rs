use std::fs;
use std::io::Write;
use std::path::Path;

use fstore_core::artifacts::{File, Process, RegistryKey, RegistryValue};
use fstore_db::Store;

/// Create a store populated with a small mixed-type investigation:
/// a process with captured output, an exported file with digests, and a
/// registry key. The result validates cleanly.
pub fn create_investigation_store(path: &Path) -> Store {
    let store = Store::create(path).unwrap();
    populate(&store);
    store
}

/// Insert the sample investigation into an existing store.
pub fn populate(store: &Store) {
    let (stdout_path, mut writer) = store.store_file("proc/iptables_stdout").unwrap();
    writer.write_all(b"Chain INPUT (policy ACCEPT)\n").unwrap();
    writer.close().unwrap();
    let mut process = Process::new();
    process.name = "iptables".to_string();
    process.command_line = Some("iptables -L".to_string());
    process.return_code = Some(0);
    process.stdout_path = Some(stdout_path);
    store.insert_struct(&process).unwrap();

    let (export_path, mut writer) = store.store_file("exported/hosts").unwrap();
    writer.write_all(b"127.0.0.1 localhost\n").unwrap();
    writer.close().unwrap();
    let mut hosts = File::new();
    hosts.name = "hosts".to_string();
    hosts.size = Some(20);
    hosts.hashes.insert(
        "MD5".to_string(),
        "0eea71665fb6890c06421fd13aa3f849".to_string(),
    );
    hosts.hashes.insert(
        "SHA-1".to_string(),
        "c7f9a550b77ece79052aa1a630098b911883abde".to_string(),
    );
    hosts.export_path = Some(export_path);
    store.insert_struct(&hosts).unwrap();

    let mut run_key = RegistryKey::new();
    run_key.key =
        "HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run".to_string();
    run_key.values.push(RegistryValue {
        name: "loader".to_string(),
        data: Some("C:\\run.exe".to_string()),
        data_type: Some("REG_SZ".to_string()),
    });
    store.insert_struct(&run_key).unwrap();
}

/// Create a host directory tree used by pack tests.
pub fn create_evidence_tree(root: &Path) {
    let logs = root.join("logs");
    fs::create_dir_all(&logs).unwrap();
    fs::write(logs.join("auth.log"), b"Accepted publickey for root\n").unwrap();
    fs::write(logs.join("syslog"), b"kernel: init\n").unwrap();
    fs::write(root.join("note.txt"), b"collected on scene\n").unwrap();
}

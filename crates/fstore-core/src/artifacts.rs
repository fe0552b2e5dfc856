use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Algorithm-name → hex-digest mapping carried by blob-bearing artifacts.
pub type Hashes = BTreeMap<String, String>;

/// A file observed or exported during an investigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: Hashes,
    /// Archive path of the exported body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl File {
    pub fn new() -> Self {
        Self {
            element_type: "file".to_string(),
            ..Self::default()
        }
    }
}

/// A directory observed during an investigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            element_type: "directory".to_string(),
            ..Self::default()
        }
    }
}

/// A process execution, typically with captured output streams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Process {
    pub fn new() -> Self {
        Self {
            element_type: "process".to_string(),
            ..Self::default()
        }
    }
}

/// One value below a registry key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryValue {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// A Windows registry key and its values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryKey {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<RegistryValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RegistryKey {
    pub fn new() -> Self {
        Self {
            element_type: "registry-key".to_string(),
            ..Self::default()
        }
    }
}

/// A browser cookie.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Cookie {
    pub fn new() -> Self {
        Self {
            element_type: "cookie".to_string(),
            ..Self::default()
        }
    }
}

/// A Windows prefetch entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prefetch {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Prefetch {
    pub fn new() -> Self {
        Self {
            element_type: "prefetch".to_string(),
            ..Self::default()
        }
    }
}

/// One line of an interactive shell history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellHistoryEntry {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ShellHistoryEntry {
    pub fn new() -> Self {
        Self {
            element_type: "shell-history".to_string(),
            ..Self::default()
        }
    }
}

/// An installed-software uninstall entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UninstallEntry {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl UninstallEntry {
    pub fn new() -> Self {
        Self {
            element_type: "uninstall-entry".to_string(),
            ..Self::default()
        }
    }
}

/// A network interface configuration captured from a Windows host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl NetworkInterface {
    pub fn new() -> Self {
        Self {
            element_type: "windows-network-interface".to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_serializes_with_type_discriminator() {
        let mut file = File::new();
        file.name = "hosts".to_string();
        file.size = Some(20);
        file.hashes
            .insert("MD5".to_string(), "0eea71665fb6890c06421fd13aa3f849".to_string());

        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["type"], "file");
        assert_eq!(value["name"], "hosts");
        assert_eq!(value["size"], 20);
        // Unset options are absent, not null.
        assert!(value.get("created").is_none());
        assert!(value.get("id").is_none());
    }

    #[test]
    fn process_round_trips_through_json() {
        let mut process = Process::new();
        process.name = "iptables".to_string();
        process.command_line = Some("iptables -L".to_string());
        process.return_code = Some(0);
        process.stdout_path = Some("proc/stdout".to_string());

        let value = serde_json::to_value(&process).unwrap();
        let back: Process = serde_json::from_value(value).unwrap();
        assert_eq!(back, process);
    }

    #[test]
    fn registry_key_with_values() {
        let mut key = RegistryKey::new();
        key.key = "HKEY_LOCAL_MACHINE\\Run".to_string();
        key.values.push(RegistryValue {
            name: "loader".to_string(),
            data: Some("C:\\run.exe".to_string()),
            data_type: Some("REG_SZ".to_string()),
        });

        let value = serde_json::to_value(&key).unwrap();
        assert_eq!(value["type"], "registry-key");
        assert_eq!(value["values"][0]["name"], "loader");
    }

    #[test]
    fn deserializes_from_stored_json() {
        let stored = json!({
            "type": "cookie",
            "id": "cookie--abc",
            "name": "session",
            "domain": "example.com",
        });
        let cookie: Cookie = serde_json::from_value(stored).unwrap();
        assert_eq!(cookie.element_type, "cookie");
        assert_eq!(cookie.id.as_deref(), Some("cookie--abc"));
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn constructors_set_discriminators() {
        assert_eq!(Directory::new().element_type, "directory");
        assert_eq!(Prefetch::new().element_type, "prefetch");
        assert_eq!(ShellHistoryEntry::new().element_type, "shell-history");
        assert_eq!(UninstallEntry::new().element_type, "uninstall-entry");
        assert_eq!(
            NetworkInterface::new().element_type,
            "windows-network-interface"
        );
    }
}

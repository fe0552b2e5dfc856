use serde::{Deserialize, Serialize};

/// Digest algorithms understood by the validator.
///
/// Element `hashes` mappings use the uppercase names as keys; digests are
/// compared as case-insensitive hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Map an element `hashes` key to an algorithm. Accepts the dashed and
    /// undashed spellings seen in the wild.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "MD5" => Some(Self::Md5),
            "SHA-1" | "SHA1" => Some(Self::Sha1),
            "SHA-256" | "SHA256" => Some(Self::Sha256),
            _ => None,
        }
    }

    /// The canonical uppercase key for this algorithm.
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
        }
    }
}

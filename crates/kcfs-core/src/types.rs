use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 64-bit key identifier derived from a raw secret.
///
/// Not secret: it is the store lookup tag and the value shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(u64);

impl KeyId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Parse the 16-digit hex form produced by `Display`.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Self)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Cipher a key is meant for. `Invalid` marks decoys and chain terminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Invalid,
    Aes128Xts,
    Aes256Xts,
    Camellia128Xts,
    Camellia256Xts,
}

impl KeyAlgorithm {
    /// Algorithms a passphrase can be derived for, in display order.
    pub const SUPPORTED: [KeyAlgorithm; 4] = [
        KeyAlgorithm::Aes128Xts,
        KeyAlgorithm::Aes256Xts,
        KeyAlgorithm::Camellia128Xts,
        KeyAlgorithm::Camellia256Xts,
    ];

    pub const DEFAULT: KeyAlgorithm = KeyAlgorithm::Aes256Xts;

    pub fn name(self) -> &'static str {
        match self {
            KeyAlgorithm::Invalid => "<invalid algorithm>",
            KeyAlgorithm::Aes128Xts => "aes128-xts",
            KeyAlgorithm::Aes256Xts => "aes256-xts",
            KeyAlgorithm::Camellia128Xts => "camellia128-xts",
            KeyAlgorithm::Camellia256Xts => "camellia256-xts",
        }
    }

    /// Full XTS key size in bits (two cipher keys).
    pub fn key_bits(self) -> usize {
        match self {
            KeyAlgorithm::Invalid => 0,
            KeyAlgorithm::Aes128Xts | KeyAlgorithm::Camellia128Xts => 256,
            KeyAlgorithm::Aes256Xts | KeyAlgorithm::Camellia256Xts => 512,
        }
    }

    pub fn key_len(self) -> usize {
        self.key_bits() / 8
    }

    pub fn is_valid(self) -> bool {
        self != KeyAlgorithm::Invalid
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::SUPPORTED.into_iter().find(|alg| alg.name() == name)
    }

    pub fn valid_names() -> Vec<&'static str> {
        Self::SUPPORTED.iter().map(|alg| alg.name()).collect()
    }

    /// Wire tag used inside encrypted link payloads.
    pub fn to_byte(self) -> u8 {
        match self {
            KeyAlgorithm::Invalid => 0,
            KeyAlgorithm::Aes128Xts => 1,
            KeyAlgorithm::Aes256Xts => 2,
            KeyAlgorithm::Camellia128Xts => 3,
            KeyAlgorithm::Camellia256Xts => 4,
        }
    }

    pub fn from_byte(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(KeyAlgorithm::Invalid),
            1 => Some(KeyAlgorithm::Aes128Xts),
            2 => Some(KeyAlgorithm::Aes256Xts),
            3 => Some(KeyAlgorithm::Camellia128Xts),
            4 => Some(KeyAlgorithm::Camellia256Xts),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How chain resolution treats a root key with no stored link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainMode {
    /// The root must have a stored link; absence is "not found".
    Use,
    /// A root without a link resolves to a one-element chain.
    #[default]
    IgnoreMissing,
}

impl FromStr for ChainMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "use" => Ok(ChainMode::Use),
            "ignore-missing" => Ok(ChainMode::IgnoreMissing),
            other => Err(format!(
                "invalid chain mode: {other} (expected: use, ignore-missing)"
            )),
        }
    }
}

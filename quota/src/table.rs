use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::errors::QuotaError;

/// Hash of an application identifier as used for quota lookup.
///
/// Distinct names with the same CRC-32 share one quota. Config files are
/// authored against this key so it cannot be changed.
pub fn key(name: &str) -> u32 {
    crc32fast::hash(name.as_bytes())
}

/// Printable ASCII other than space is part of a token; everything else splits.
fn is_token_byte(byte: u8) -> bool {
    (0x21..=0x7E).contains(&byte)
}

fn tokens(text: &[u8]) -> impl Iterator<Item = &[u8]> {
    text.split(|&b| !is_token_byte(b))
        .filter(|token| !token.is_empty())
}

/// Read-only map from hashed application identifier to a limit in bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuotaTable {
    limits: BTreeMap<u32, u64>,
}

impl QuotaTable {
    /// Build from alternating `identifier limit` tokens.
    pub fn parse(text: &[u8]) -> Self {
        let mut limits = BTreeMap::new();
        let mut tokens = tokens(text);
        while let Some(name) = tokens.next() {
            let name = String::from_utf8_lossy(name);
            let Some(limit) = tokens.next() else {
                warn!(app = %name, "Ignoring quota entry without a limit");
                break;
            };
            let limit = String::from_utf8_lossy(limit);
            let Ok(limit) = limit.parse::<u64>() else {
                warn!(app = %name, limit = %limit, "Ignoring quota entry with invalid limit");
                continue;
            };
            match limits.entry(key(&name)) {
                Entry::Vacant(slot) => {
                    debug!(app = %name, limit, "Quota entry");
                    slot.insert(limit);
                }
                Entry::Occupied(_) => {
                    warn!(app = %name, "Ignoring duplicate quota entry");
                }
            }
        }
        Self { limits }
    }

    pub fn load(path: &Path) -> Result<Self, QuotaError> {
        let text = fs::read(path).map_err(|err| QuotaError::Read {
            path: path.to_path_buf(),
            err,
        })?;
        if text.is_empty() {
            return Err(QuotaError::Empty(path.to_path_buf()));
        }
        let table = Self::parse(&text);
        if table.is_empty() {
            return Err(QuotaError::NoEntries(path.to_path_buf()));
        }
        info!(path = %path.display(), entries = table.len(), "Loaded quota table");
        Ok(table)
    }

    pub fn limit(&self, name: &str) -> Option<u64> {
        self.limits.get(&key(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

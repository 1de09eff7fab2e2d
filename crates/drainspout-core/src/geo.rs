//! Address-to-country resolution behind a pluggable trait.
//!
//! The aggregator only needs `address → country code`; the database behind
//! that lookup is deployment-specific, so it sits behind [`GeoResolver`].
//! Production deployments without a database run [`NullGeo`]; small
//! deployments and tests use [`StaticGeo`], an exact-match table loadable
//! from a JSON object file (`{"197.248.10.42": "KE", ...}`).

use std::collections::HashMap;
use std::path::Path;

use crate::error::Error;

/// Opaque geolocation collaborator.
///
/// A failed or unknown lookup returns `None`; implementations never block
/// for long and never panic.
pub trait GeoResolver: Send + Sync {
    /// Country code for a client address, if known.
    fn country(&self, addr: &str) -> Option<String>;
}

/// Resolver that knows nothing. Used when no geo table is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGeo;

impl GeoResolver for NullGeo {
    fn country(&self, _addr: &str) -> Option<String> {
        None
    }
}

/// Exact-match address table.
#[derive(Debug, Clone, Default)]
pub struct StaticGeo {
    table: HashMap<String, String>,
}

impl StaticGeo {
    /// Build from an in-memory table.
    #[must_use]
    pub fn new(table: HashMap<String, String>) -> Self {
        Self { table }
    }

    /// Load a JSON object file mapping addresses to country codes.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Geo(format!("{}: {e}", path.display())))?;
        let table: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| Error::Geo(format!("{}: {e}", path.display())))?;
        Ok(Self { table })
    }

    /// Number of known addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl GeoResolver for StaticGeo {
    fn country(&self, addr: &str) -> Option<String> {
        self.table.get(addr).cloned()
    }
}

//! Identifier newtypes shared across components.
//!
//! Land and tenant identifiers are opaque strings owned by the surrounding
//! platform. Wrapping them keeps a land ID from being passed where a tenant
//! ID is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a farm parcel ("land").
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandId(String);

impl LandId {
    /// Creates a land ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string value of this ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LandId({})", self.0)
    }
}

impl fmt::Display for LandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LandId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LandId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a tenant (customer organisation).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string value of this ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

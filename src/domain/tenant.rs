//! Tenant identity and resolution.
//!
//! [`TenantId`] is a newtype wrapper around the tenant string so that tenant
//! identifiers cannot be confused with other strings (event names, URLs).
//! [`TenantResolver`] derives the active tenant from the locally persisted
//! session record, falling back to a configured default.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of the tenant a live connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a `TenantId`, trimming surrounding whitespace.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id: String = id.into();
        let trimmed = id.trim();
        if trimmed.len() == id.len() {
            Self(id)
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Shape of the persisted session record. Only the tenant is read.
#[derive(Debug, Deserialize)]
struct SessionRecord {
    #[serde(default)]
    tenant: Option<TenantRecord>,
}

#[derive(Debug, Deserialize)]
struct TenantRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    tenant_id: Option<Value>,
}

/// Extracts the tenant from a session record's JSON text.
///
/// Looks for `tenant.id`, then `tenant.tenant_id`; string and integer values
/// are accepted. Returns `None` for a missing record, malformed JSON, or a
/// blank identifier.
#[must_use]
pub fn resolve_from_record(record: Option<&str>) -> Option<TenantId> {
    let record: SessionRecord = serde_json::from_str(record?).ok()?;
    let tenant = record.tenant?;
    [tenant.id, tenant.tenant_id]
        .into_iter()
        .flatten()
        .find_map(|value| id_from_value(&value))
}

fn id_from_value(value: &Value) -> Option<TenantId> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!raw.is_empty()).then(|| TenantId::new(raw))
}

/// Resolves the active tenant for `ensure_connection`.
///
/// Never fails: every read or parse problem falls back to the configured
/// default tenant.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    session_file: Option<PathBuf>,
    default_tenant: TenantId,
}

impl TenantResolver {
    /// Creates a resolver reading `session_file` (if any) and falling back
    /// to `default_tenant`.
    #[must_use]
    pub const fn new(session_file: Option<PathBuf>, default_tenant: TenantId) -> Self {
        Self {
            session_file,
            default_tenant,
        }
    }

    /// Returns the tenant named by the session record, or the default.
    ///
    /// Reads the session file synchronously. The record is a small local
    /// file, so this does not wait on the network.
    #[must_use]
    pub fn resolve(&self) -> TenantId {
        let record = self.session_file.as_deref().and_then(read_record);
        match resolve_from_record(record.as_deref()) {
            Some(tenant) => tenant,
            None => {
                tracing::debug!(
                    fallback = %self.default_tenant,
                    "no tenant in session record, using default"
                );
                self.default_tenant.clone()
            }
        }
    }
}

fn read_record(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "session record unreadable");
            None
        }
    }
}

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::compactor;
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::suite::AllocationPolicy;

/// Identifier of an isolated customer organization.
///
/// Every record carries one and every query filters on one; there is no
/// fallback tenant. Names double as WAL file names, so only ASCII
/// alphanumerics, `_` and `-` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(name: &str) -> Result<Self, EngineError> {
        if name.is_empty() {
            return Err(EngineError::TenantContext("empty tenant id".into()));
        }
        if name.len() > MAX_TENANT_NAME_LEN {
            return Err(EngineError::TenantContext("tenant id too long".into()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(EngineError::TenantContext(format!(
                "invalid tenant id: {name}"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL + compactor,
/// so no read or write can reach another tenant's records.
pub struct TenantManager {
    engines: DashMap<TenantId, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    policy: Arc<AllocationPolicy>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, policy: Arc<AllocationPolicy>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            policy,
        }
    }

    pub fn policy(&self) -> &Arc<AllocationPolicy> {
        &self.policy
    }

    /// Get or lazily create the engine for `tenant`.
    pub fn get_or_create(&self, tenant: &TenantId) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(EngineError::LimitExceeded("too many tenants"));
        }

        // The entry guard keeps two first requests from opening the same WAL twice.
        let entry = self.engines.entry(tenant.clone()).or_try_insert_with(|| {
            let wal_path = self.data_dir.join(format!("{tenant}.wal"));
            let engine = Arc::new(Engine::new(tenant.clone(), wal_path, self.policy.clone())?);

            let compactor_engine = engine.clone();
            let threshold = self.compact_threshold;
            tokio::spawn(async move {
                compactor::run_compactor(compactor_engine, threshold).await;
            });

            info!(%tenant, "tenant engine loaded");
            Ok::<_, EngineError>(engine)
        })?;
        let engine = entry.value().clone();
        drop(entry);

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}

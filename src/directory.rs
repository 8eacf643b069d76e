use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashSet;
use serde::Deserialize;
use ulid::Ulid;

use crate::tenant::TenantId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("registry tenant {name:?}: {reason}")]
    Tenant { name: String, reason: String },
}

/// Identity lookups owned by the customer service.
///
/// The allocation core never stores customers or pets; it only asks whether
/// an id exists inside a tenant.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn verify_customer(&self, tenant: &TenantId, customer_id: Ulid) -> Result<(), DirectoryError>;

    async fn verify_pet(&self, tenant: &TenantId, pet_id: Ulid) -> Result<(), DirectoryError>;

    /// Add-on services (baths, walks, ...) attached to a stay.
    async fn verify_add_on(&self, tenant: &TenantId, service_id: Ulid) -> Result<(), DirectoryError>;
}

/// Accepts every id. For deployments where the calling controller has
/// already verified identities.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustedDirectory;

#[async_trait]
impl Directory for TrustedDirectory {
    async fn verify_customer(&self, _tenant: &TenantId, _customer_id: Ulid) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn verify_pet(&self, _tenant: &TenantId, _pet_id: Ulid) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn verify_add_on(&self, _tenant: &TenantId, _service_id: Ulid) -> Result<(), DirectoryError> {
        Ok(())
    }
}

/// In-process registry, keyed by tenant.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    customers: DashSet<(TenantId, Ulid)>,
    pets: DashSet<(TenantId, Ulid)>,
    add_ons: DashSet<(TenantId, Ulid)>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryEntries {
    #[serde(default)]
    customers: Vec<Ulid>,
    #[serde(default)]
    pets: Vec<Ulid>,
    #[serde(default)]
    add_ons: Vec<Ulid>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry exported by the customer service:
    /// `{"<tenant>": {"customers": [..], "pets": [..], "add_ons": [..]}}`.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let tenants: HashMap<String, RegistryEntries> = serde_json::from_str(json)?;
        let directory = Self::new();
        for (name, entries) in tenants {
            let tenant = TenantId::new(&name).map_err(|e| RegistryError::Tenant {
                reason: e.to_string(),
                name,
            })?;
            for id in entries.customers {
                directory.add_customer(&tenant, id);
            }
            for id in entries.pets {
                directory.add_pet(&tenant, id);
            }
            for id in entries.add_ons {
                directory.add_add_on(&tenant, id);
            }
        }
        Ok(directory)
    }

    pub fn add_customer(&self, tenant: &TenantId, id: Ulid) {
        self.customers.insert((tenant.clone(), id));
    }

    pub fn add_pet(&self, tenant: &TenantId, id: Ulid) {
        self.pets.insert((tenant.clone(), id));
    }

    pub fn add_add_on(&self, tenant: &TenantId, id: Ulid) {
        self.add_ons.insert((tenant.clone(), id));
    }

    fn lookup(
        set: &DashSet<(TenantId, Ulid)>,
        entity: &'static str,
        tenant: &TenantId,
        id: Ulid,
    ) -> Result<(), DirectoryError> {
        if set.contains(&(tenant.clone(), id)) {
            Ok(())
        } else {
            Err(DirectoryError::NotFound { entity, id })
        }
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn verify_customer(&self, tenant: &TenantId, customer_id: Ulid) -> Result<(), DirectoryError> {
        Self::lookup(&self.customers, "customer", tenant, customer_id)
    }

    async fn verify_pet(&self, tenant: &TenantId, pet_id: Ulid) -> Result<(), DirectoryError> {
        Self::lookup(&self.pets, "pet", tenant, pet_id)
    }

    async fn verify_add_on(&self, tenant: &TenantId, service_id: Ulid) -> Result<(), DirectoryError> {
        Self::lookup(&self.add_ons, "add-on service", tenant, service_id)
    }
}

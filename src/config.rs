//! Component factory for startup configuration
//!
//! Builds the storage backend, the tenant resolver and the shared API state
//! from an explicit [`ServiceConfig`].

use crate::api::ApiState;
use crate::ingester::{IdentityResolver, Ingester, LabelResolver, TenantResolver};
use crate::store::{MeteringStore, PgStore};
use crate::{Result, ServiceConfig, StorageConfig, TenancyConfig, TenantMode};

use std::sync::Arc;
use tracing::{info, warn};

pub struct ComponentFactory;

impl ComponentFactory {
    /// Connect to PostgreSQL and verify it answers.
    pub async fn create_store(config: &StorageConfig) -> Result<Arc<dyn MeteringStore>> {
        let store = PgStore::connect(config).await?;
        Ok(Arc::new(store))
    }

    /// Create the tenant resolver for the configured mode.
    pub fn create_tenant_resolver(config: &TenancyConfig) -> Arc<dyn TenantResolver> {
        match config.mode {
            TenantMode::Identity => {
                let static_org_id = config
                    .static_org_id
                    .as_ref()
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty());
                match &static_org_id {
                    Some(org_id) => info!(
                        static_org_id = %org_id,
                        "Using identity tenant mode with static fallback"
                    ),
                    None => warn!(
                        "Using identity tenant mode without ORG_ID: requests without a client certificate will be rejected"
                    ),
                }
                Arc::new(IdentityResolver::new(static_org_id))
            }
            TenantMode::Label => {
                info!("Using label tenant mode");
                Arc::new(LabelResolver)
            }
        }
    }

    /// Wire the ingester and query engine around a single store.
    pub fn create_api_state(store: Arc<dyn MeteringStore>, tenancy: &TenancyConfig) -> ApiState {
        let ingester = Ingester::new(store.clone(), Self::create_tenant_resolver(tenancy));
        ApiState::new(store, ingester)
    }

    /// Connect to storage and build the API state.
    pub async fn build(config: &ServiceConfig) -> Result<ApiState> {
        let store = Self::create_store(&config.storage).await?;
        Ok(Self::create_api_state(store, &config.tenancy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingester::RequestContext;
    use crate::store::LocalStore;
    use crate::Error;

    #[test]
    fn test_resolver_per_mode() {
        let identity = ComponentFactory::create_tenant_resolver(&TenancyConfig {
            mode: TenantMode::Identity,
            static_org_id: Some(" acme ".to_string()),
        });
        assert_eq!(identity.mode(), TenantMode::Identity);
        assert!(identity.resolve(&RequestContext::default()).is_ok());

        let label = ComponentFactory::create_tenant_resolver(&TenancyConfig {
            mode: TenantMode::Label,
            static_org_id: Some("ignored".to_string()),
        });
        assert_eq!(label.mode(), TenantMode::Label);
    }

    #[test]
    fn test_blank_static_org_is_unset() {
        let resolver = ComponentFactory::create_tenant_resolver(&TenancyConfig {
            mode: TenantMode::Identity,
            static_org_id: Some("   ".to_string()),
        });
        assert!(matches!(
            resolver.resolve(&RequestContext::default()),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn test_api_state_shares_store() {
        let store: Arc<dyn MeteringStore> = Arc::new(LocalStore::new());
        let state = ComponentFactory::create_api_state(store.clone(), &TenancyConfig::default());
        assert!(Arc::ptr_eq(&state.store, &store));
        assert_eq!(state.ingester.resolver().mode(), TenantMode::Identity);
    }
}

//! Tenant resolution strategies
//!
//! A deployment runs exactly one [`TenantResolver`], chosen at startup:
//!
//! - [`IdentityResolver`] binds the whole request to the organization of the
//!   verified client certificate, or to a static fallback when the request
//!   did not come through client-certificate TLS.
//! - [`LabelResolver`] reads the `external_organization` label of every
//!   series independently.

use crate::schema::{Metric, TENANT_LABEL};
use crate::{Error, Result, TenantMode};

/// Verified client certificate identity.
///
/// Inserted as a request extension by the TLS terminator after chain
/// verification; absent on plain HTTP connections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientIdentity {
    /// Subject organization (`O`) values, in certificate order
    pub organizations: Vec<String>,
}

impl ClientIdentity {
    pub fn new(organizations: Vec<String>) -> Self {
        Self { organizations }
    }
}

/// Per-request inputs to tenant resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext<'a> {
    pub client_identity: Option<&'a ClientIdentity>,
}

/// Outcome of resolving a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantBinding {
    /// Every series belongs to this organization
    Request(String),
    /// Each series names its organization in this label
    PerSeries { label: &'static str },
}

impl TenantBinding {
    /// Organization for the series at `index`.
    pub fn org_for(&self, index: usize, metric: &Metric) -> Result<String> {
        match self {
            TenantBinding::Request(org_id) => Ok(org_id.clone()),
            TenantBinding::PerSeries { label } => match metric.label(label) {
                Some(org_id) if !org_id.is_empty() => Ok(org_id.to_string()),
                _ => Err(Error::Validation(format!(
                    "series {} ('{}') is missing required label '{}'",
                    index, metric.name, label
                ))),
            },
        }
    }
}

/// Determines which organization owns a write request
pub trait TenantResolver: Send + Sync {
    fn mode(&self) -> TenantMode;

    /// Resolve the tenant binding before the body is decoded.
    fn resolve(&self, ctx: &RequestContext<'_>) -> Result<TenantBinding>;
}

/// Organization from the client certificate, else a static fallback
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    static_org_id: Option<String>,
}

impl IdentityResolver {
    pub fn new(static_org_id: Option<String>) -> Self {
        Self {
            static_org_id: static_org_id.filter(|id| !id.is_empty()),
        }
    }
}

impl TenantResolver for IdentityResolver {
    fn mode(&self) -> TenantMode {
        TenantMode::Identity
    }

    fn resolve(&self, ctx: &RequestContext<'_>) -> Result<TenantBinding> {
        if let Some(identity) = ctx.client_identity {
            return match identity.organizations.first() {
                Some(org_id) if !org_id.is_empty() => Ok(TenantBinding::Request(org_id.clone())),
                _ => Err(Error::Auth(
                    "no organization in client certificate".to_string(),
                )),
            };
        }

        match &self.static_org_id {
            Some(org_id) => Ok(TenantBinding::Request(org_id.clone())),
            None => Err(Error::Auth(
                "no client certificate provided and no static organization configured"
                    .to_string(),
            )),
        }
    }
}

/// Organization from each series' `external_organization` label
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelResolver;

impl TenantResolver for LabelResolver {
    fn mode(&self) -> TenantMode {
        TenantMode::Label
    }

    fn resolve(&self, _ctx: &RequestContext<'_>) -> Result<TenantBinding> {
        Ok(TenantBinding::PerSeries {
            label: TENANT_LABEL,
        })
    }
}

//! Explicit client construction
//!
//! Reconcilers receive a [`ClientFactory`] at startup and build platform
//! clients per reconciliation from the resolved credentials. Ownership is
//! explicit; there is no process-wide client registry.

use std::sync::Arc;

use strata_common::Error;

use crate::client::{HealthChecker, OrganizationClient, SpaceClient};
use crate::credentials::Credentials;
use crate::http::PlatformClient;

/// Builds platform clients from credentials
pub trait ClientFactory: Send + Sync {
    /// Build an organization-scoped client
    ///
    /// Uses the elevated org user when the credentials carry one.
    fn organization_client(
        &self,
        credentials: &Credentials,
        organization: &str,
    ) -> Result<Arc<dyn OrganizationClient>, Error>;

    /// Build a client scoped to one space
    fn space_client(
        &self,
        credentials: &Credentials,
        organization: &str,
        space_id: &str,
    ) -> Result<Arc<dyn SpaceClient>, Error>;

    /// Build a workspace health checker
    fn health_checker(
        &self,
        credentials: &Credentials,
        organization: &str,
    ) -> Result<Arc<dyn HealthChecker>, Error>;
}

/// Factory producing [`PlatformClient`] instances over a shared
/// connection pool
pub struct HttpClientFactory {
    http: reqwest::Client,
}

impl HttpClientFactory {
    /// Create a factory with its own connection pool
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for HttpClientFactory {
    fn organization_client(
        &self,
        credentials: &Credentials,
        organization: &str,
    ) -> Result<Arc<dyn OrganizationClient>, Error> {
        let (username, password) = credentials.org_auth();
        Ok(Arc::new(PlatformClient::organization_scoped(
            self.http.clone(),
            &credentials.url,
            username,
            password,
            organization,
        )))
    }

    fn space_client(
        &self,
        credentials: &Credentials,
        organization: &str,
        space_id: &str,
    ) -> Result<Arc<dyn SpaceClient>, Error> {
        Ok(Arc::new(PlatformClient::space_scoped(
            self.http.clone(),
            &credentials.url,
            &credentials.username,
            &credentials.password,
            organization,
            space_id,
        )))
    }

    fn health_checker(
        &self,
        credentials: &Credentials,
        organization: &str,
    ) -> Result<Arc<dyn HealthChecker>, Error> {
        Ok(Arc::new(PlatformClient::organization_scoped(
            self.http.clone(),
            &credentials.url,
            &credentials.username,
            &credentials.password,
            organization,
        )))
    }
}

//! Remote resource facade for the Strata operator
//!
//! Abstracts the target platform as capability traits returning typed
//! domain records, plus:
//!
//! - **credentials**: parsing of the platform credentials secret
//! - **http**: the thin REST adapter implementing the capability traits
//! - **cache**: a best-effort TTL cache over remote records
//! - **factory**: explicit client construction, injected into reconcilers

#![deny(missing_docs)]

pub mod cache;
pub mod client;
pub mod credentials;
pub mod factory;
pub mod http;
pub mod model;

pub use cache::ResourceCache;
pub use client::{
    BindingChanges, BindingRequest, HealthChecker, InstanceChanges, InstanceRequest,
    OrganizationClient, SpaceClient,
};
pub use credentials::Credentials;
pub use factory::{ClientFactory, HttpClientFactory};
pub use model::{Binding, Instance, LastOperation, RemoteState, Space};

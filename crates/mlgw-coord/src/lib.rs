//! mlgw-coord: tenant registry, namespace layout, schema provisioning.
//!
//! Decides whether a tenant exists yet and, on first sight, creates its
//! schema in the shared relational store and its artifact directory.

pub mod ledger;
pub mod namespace;
pub mod pg;
pub mod provision;
pub mod tenant;

pub use ledger::TenantLedger;
pub use namespace::{Namespace, NamespaceLayout};
pub use pg::PgNamespaceStore;
pub use provision::{
    ArtifactStore, FsArtifactStore, MemoryNamespaceStore, NamespaceStore, Provisioner,
};
pub use tenant::{Tenant, TenantRegistry, TenantState};

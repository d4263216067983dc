//! `keppel` is a multi-tenant OCI/Docker container image registry.
//!
//! # Overview
//!
//! keppel implements the Docker/OCI Distribution v2 HTTP API on top of a pluggable storage
//! backend, with built-in multi-tenancy, quota enforcement, lazy replication from peer
//! deployments or external registries, and federation of globally unique account names across
//! peer deployments. It handles:
//! - Blob upload, manifest push/pull and the registry v2 HTTP surface
//! - Account, repository, tag and quota metadata, backed by Postgres or SQLite
//! - Pluggable storage, auth, federation and inbound-cache drivers
//! - Background reconciliation via a janitor of independent periodic jobs
//!
//! # Architecture
//!
//! keppel consists of several key components:
//!
//! - **models**: the persisted data model (accounts, repositories, blobs, manifests, tags, ...)
//! - **db**: the Postgres/SQLite-backed metadata store and its typed queries
//! - **storage**: the Storage Driver trait and its implementations
//! - **auth**/**token**: the Auth Driver trait, user identities and bearer token issuance
//! - **federation**/**inbound_cache**: cross-deployment account-name claims and pull caching
//! - **processor**: the data-plane orchestration tying all of the above together
//! - **api**: the Registry v2 and `/keppel/v1/` HTTP surface
//! - **janitor**: the background reconciliation job scheduler
//! - **cli**: command-line argument parsing and subcommand dispatch
//!
//! # Modules
//!
//! - [`config`] - Environment-derived configuration and driver-config parsing
//! - [`models`] - The persisted data model
//! - [`db`] - Metadata store and typed queries
//! - [`storage`] - Storage driver trait and implementations
//! - [`auth`] - Auth driver trait and user identity
//! - [`token`] - Bearer token issuance and scope filtering
//! - [`federation`] - Federation driver trait and implementations
//! - [`inbound_cache`] - Inbound cache driver
//! - [`processor`] - Data-plane orchestration
//! - [`api`] - HTTP surface
//! - [`janitor`] - Background reconciliation jobs
//! - [`cli`] - Command-line interface and argument parsing

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod federation;
pub mod inbound_cache;
pub mod janitor;
pub mod models;
pub mod processor;
pub mod storage;
pub mod token;

pub use error::*;

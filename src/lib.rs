//! Client library for a geographic data store API.
//!
//! The store exposes uploads, stored data, configurations, offerings and
//! their satellites through a uniform REST surface. This crate wraps it
//! behind a typed [`store::StoreClient`] over a mockable
//! [`requester::Requester`] boundary, plus a layered configuration, a
//! placeholder resolver pipeline, a cascade delete engine and a small
//! workflow runner. The `geostore` binary in this crate is a thin clap
//! front-end over the same modules.

pub mod cli;
pub mod config;
pub mod delete;
pub mod entity;
pub mod error;
pub mod requester;
pub mod resolver;
pub mod store;
pub mod workflow;

pub use cli::{run, Cli, Commands};
pub use config::Config;
pub use entity::{Entity, EntityType};
pub use error::{ConfigError, RequestError, ResolverError, StoreError, WorkflowError};
pub use requester::{HttpRequester, Requester};
pub use store::StoreClient;

//! Error taxonomy, one enum per layer. Lower layers convert upward with
//! `#[from]` so call sites can use `?` without manual mapping.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration loading and lookup failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("embedded default configuration is invalid: {0}")]
    InvalidDefault(String),

    #[error("unsupported configuration format '{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("cannot parse configuration file {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("unresolvable reference {reference} in [{section}] {option}")]
    Interpolation {
        section: String,
        option: String,
        reference: String,
    },

    #[error("option [{section}] {option} is not a valid {expected}: '{value}'")]
    Coercion {
        section: String,
        option: String,
        expected: &'static str,
        value: String,
    },
}

/// HTTP-level failures below the API abstraction.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request on route '{route}' failed: {detail}")]
    Request { route: String, detail: String },

    #[error("route '{route}' answered {status}: {detail}")]
    Status {
        route: String,
        status: u16,
        detail: String,
    },

    #[error("no route named '{0}' in configuration")]
    RouteNotFound(String),

    #[error("route '{route}' needs a value for '{param}'")]
    MissingRouteParam { route: String, param: String },

    #[error("cannot read file {path}: {detail}")]
    File { path: PathBuf, detail: String },
}

/// Outcome of one routed request. A 404 is its own variant so callers
/// can attach the entity they were after.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("resource not found on route '{route}'")]
    NotFound { route: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of entity-level operations against the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{count} {kind} entities match, expected exactly one")]
    MultipleFound { kind: &'static str, count: usize },

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    StateConflict(String),

    #[error("invalid filter '{0}', expected name=value")]
    FilterFormat(String),

    #[error("invalid log page window: {0}")]
    PageWindow(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Placeholder resolution failures.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("no resolver named '{0}' is registered")]
    NotFound(String),

    #[error("document is not valid JSON after resolution: {detail}")]
    Resolution { detail: String },

    #[error("resolver '{resolver}' cannot solve '{to_solve}': {message}")]
    Resolve {
        resolver: String,
        to_solve: String,
        message: String,
    },

    #[error("resolver '{resolver}' found no entity for '{to_solve}'")]
    NoEntityFound { resolver: String, to_solve: String },

    #[error("resolver '{resolver}' cannot solve '{to_solve}': file {path} not found")]
    FileNotFound {
        resolver: String,
        to_solve: String,
        path: PathBuf,
    },

    #[error("resolver '{resolver}' cannot solve '{to_solve}': file content is invalid")]
    FileInvalid { resolver: String, to_solve: String },

    #[error("resolver '{resolver}' has no user attribute '{to_solve}'")]
    UserAttribute { resolver: String, to_solve: String },
}

/// Workflow parsing and execution failures.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("cannot read workflow file {path}: {detail}")]
    File { path: PathBuf, detail: String },

    #[error("workflow is missing the '{0}' key")]
    MissingKey(&'static str),

    #[error("workflow has no step named '{0}'")]
    UnknownStep(String),

    #[error("action {index} of step '{context}' is invalid after resolution: {detail}")]
    InvalidAfterResolution {
        context: String,
        index: usize,
        detail: String,
    },

    #[error("invalid workflow: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

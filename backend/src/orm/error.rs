//! Error taxonomy for the graph persistence layer
//!
//! Validation errors are raised before any I/O. Constraint violations are
//! re-wrapped from driver errors the driver classifies as uniqueness or
//! foreign-key failures. `NotFound` / `NotSingular` are ordinary values; the
//! only aborting helper lives in [`crate::prototype`].

use thiserror::Error;

/// Boxed error returned by an execution collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the ORM.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A mutation or query was rejected before reaching the database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{entity}: missing required field \"{field}\"")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity}: validator failed for field \"{field}\": {cause}")]
    InvalidField {
        entity: &'static str,
        field: &'static str,
        cause: String,
    },

    #[error("{entity}: field \"{field}\" expects {expected}, got {got}")]
    TypeMismatch {
        entity: &'static str,
        field: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    #[error("{entity}: unknown field \"{field}\"")]
    UnknownField { entity: &'static str, field: String },

    #[error("{entity}: unknown edge \"{edge}\"")]
    UnknownEdge { entity: &'static str, edge: String },

    #[error("{entity}: field \"{field}\" is not nullable")]
    NotNullable {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity}: field \"{field}\" is not numeric")]
    NotNumeric {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity}: increments on field \"{field}\" overflow")]
    Overflow {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity}: field \"{field}\" is immutable")]
    Immutable {
        entity: &'static str,
        field: &'static str,
    },

    #[error("{entity}: multiple targets staged on unique edge \"{edge}\"")]
    UniqueEdge {
        entity: &'static str,
        edge: &'static str,
    },

    #[error("{entity}: missing required edge \"{edge}\"")]
    MissingEdge {
        entity: &'static str,
        edge: &'static str,
    },

    #[error("{entity}: clearing required unique edge \"{edge}\"")]
    ClearedRequiredEdge {
        entity: &'static str,
        edge: &'static str,
    },

    #[error("{entity}: unique edge \"{edge}\" cannot be added to {nodes} nodes at once")]
    EdgeOnManyNodes {
        entity: &'static str,
        edge: &'static str,
        nodes: usize,
    },

    #[error("{entity}: missing ID for update")]
    MissingId { entity: &'static str },

    #[error("{entity}: invalid id \"{id}\"")]
    InvalidId { entity: &'static str, id: String },

    #[error("{entity}: {op} is only supported when selecting a single field")]
    MultipleFields {
        entity: &'static str,
        op: &'static str,
    },

    #[error("{entity}: invalid pagination: {reason}")]
    InvalidPagination {
        entity: &'static str,
        reason: &'static str,
    },
}

/// Errors returned by builders, queries and the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{entity}: constraint failed: {message}")]
    Constraint {
        entity: &'static str,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{entity} not singular")]
    NotSingular { entity: &'static str },

    #[error("{entity}: edge \"{edge}\" was not loaded")]
    NotLoaded {
        entity: &'static str,
        edge: &'static str,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("transaction already committed or rolled back")]
    TxClosed,

    #[error("unsupported by driver: {0}")]
    Unsupported(&'static str),

    #[error("driver error: {0}")]
    Driver(#[source] BoxError),
}

impl Error {
    /// Wrap a raw collaborator error.
    pub fn driver<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Driver(Box::new(err))
    }

    /// True for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_not_singular(&self) -> bool {
        matches!(self, Error::NotSingular { .. })
    }

    pub fn is_not_loaded(&self) -> bool {
        matches!(self, Error::NotLoaded { .. })
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, Error::Constraint { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

//! Error types for the DQX query engine.
//!
//! All public APIs return `DqxResult<T>`; no panics in library code.

use thiserror::Error;

/// Unified error type for all DQX operations.
#[derive(Debug, Error)]
pub enum DqxError {
    /// Malformed predicate or mutate object
    #[error("query parse error: {message}\nQuery: {query}")]
    QueryParse { message: String, query: String },

    /// Index substitution failed (never escapes the visitor)
    #[error("index selection error: {0}")]
    IndexSelection(String),

    /// Bytecode compilation error
    #[error("compile error: {message}\nContext: {context}")]
    Compile { message: String, context: String },

    /// Opcode handler failure
    #[error("execution error in '{opcode}': {message}")]
    Execution { message: String, opcode: String },

    /// Broken index tree invariant
    #[error("index tree corrupted: {0}")]
    TreeCorruption(String),

    /// Requested collection does not exist
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    /// Collection name already taken
    #[error("collection '{0}' already exists")]
    CollectionAlreadyExists(String),

    /// Index already registered
    #[error("index '{index}' already exists on collection '{collection}'")]
    IndexAlreadyExists { collection: String, index: String },

    /// Requested document does not exist
    #[error("document {0} not found")]
    DocumentNotFound(u64),

    /// Document shape rejected by the collection
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Engine configuration rejected
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for all DQX operations.
pub type DqxResult<T> = Result<T, DqxError>;

impl DqxError {
    pub(crate) fn parse(message: impl Into<String>, query: &serde_json::Value) -> Self {
        DqxError::QueryParse {
            message: message.into(),
            query: query.to_string(),
        }
    }

    pub(crate) fn compile(message: impl Into<String>, context: &serde_json::Value) -> Self {
        DqxError::Compile {
            message: message.into(),
            context: context.to_string(),
        }
    }

    pub(crate) fn execution(opcode: &str, message: impl Into<String>) -> Self {
        DqxError::Execution {
            message: message.into(),
            opcode: opcode.to_string(),
        }
    }
}

impl From<serde_json::Error> for DqxError {
    fn from(err: serde_json::Error) -> Self {
        DqxError::Serialization(err.to_string())
    }
}

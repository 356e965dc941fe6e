//! This module defines the error type for this crate.

use thiserror::Error;

use crate::bpmn::NodeType;

/// Result type alias for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while generating, decoding, or serializing process models.
///
/// None of these are transient: every variant reflects either a malformed
/// input seed or an internal bug, so retrying is never appropriate.
#[derive(Debug, Error)]
pub enum Error {
    /// A seed token does not parse, or its declared sub-seed lengths
    /// disagree with the tokens actually available during decode.
    #[error("seed token `{token}` at position {index} does not match the seed grammar")]
    StructureMismatch { token: String, index: usize },

    /// The recursive generator reached a state it promises never to reach,
    /// e.g. a zero node budget or a composition step without a head/tail pair.
    #[error("generator invariant violated: {0}")]
    InvariantViolation(String),

    /// The serializer encountered a node variant it cannot render.
    #[error("unsupported node type in serializer: {0:?}")]
    UnsupportedNodeType(NodeType),

    /// An IO operation failed while persisting a model.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing a model to XML failed.
    #[error("error serializing XML: {0}")]
    Xml(#[from] quick_xml::se::SeError),
}

//! Errors that abort a translation pass
//!
//! Problems with a single policy, route, or consumer never surface here;
//! they are reported through [`crate::status::ObjectStatus`]. A
//! `TranslationError` means the snapshot breaks an invariant the API server
//! guarantees (object identity, listener name uniqueness), so no output
//! built from it can be trusted.

use thiserror::Error;

/// Error aborting a whole translation pass
#[derive(Debug, Error)]
pub enum TranslationError {
    /// The same gateway object appears more than once in the snapshot
    #[error("integrity error: gateway {gateway} appears more than once in the snapshot")]
    DuplicateGateway {
        /// `namespace/name` of the gateway
        gateway: String,
    },

    /// One gateway declares the same listener name with different data
    #[error("integrity error: gateway {gateway} declares listener {section} with ports {first} and {second}")]
    DuplicateListener {
        /// `namespace/name` of the gateway
        gateway: String,
        /// Listener name
        section: String,
        /// Port of the first declaration
        first: u16,
        /// Port of the conflicting declaration
        second: u16,
    },

    /// A validated plugin configuration could not be rendered
    #[error("failed to render plugin {plugin}: {message}")]
    Render {
        /// Plugin name
        plugin: String,
        /// Renderer message
        message: String,
    },

    /// A generated artifact could not be serialized
    #[error("serialization error for {artifact}: {message}")]
    Serialization {
        /// Name of the artifact being rendered
        artifact: String,
        /// Serializer message
        message: String,
    },
}

impl TranslationError {
    /// Create a serialization error for a named artifact
    pub fn serialization(artifact: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            artifact: artifact.into(),
            message: err.to_string(),
        }
    }

    /// Create a render error for a plugin
    pub fn render(plugin: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Render {
            plugin: plugin.into(),
            message: err.to_string(),
        }
    }

    /// Whether the error reports an inconsistent snapshot
    pub fn is_integrity(&self) -> bool {
        !matches!(self, Self::Serialization { .. } | Self::Render { .. })
    }
}

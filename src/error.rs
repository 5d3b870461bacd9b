//! Error types shared across the crate.

use thiserror::Error;

/// Shared `Result` alias for the crate.
pub type Result<T> = std::result::Result<T, ScreenError>;

/// Top-level error type.
///
/// Capability and resolution errors are fatal to the call that raised them.
/// Connection errors are recoverable: the scheduler retries with backoff and
/// signals attention for the lifetime of the outage. Render input errors are
/// isolated per element and normally only logged.
#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("driver lacks required capability: {details}")]
    Capability { details: String },

    #[error("no theme file for model {model} variant {variant:?} under {dir}")]
    ThemeResolution {
        dir: String,
        model: String,
        variant: Option<String>,
    },

    #[error("driver connection failed: {details}")]
    Connection { details: String },

    #[error("malformed render input in {element}: {details}")]
    Render { element: String, details: String },

    #[error("template parse failure: {details}")]
    TemplateParse { details: String },

    #[error("screen queue closed")]
    ChannelClosed,
}

impl ScreenError {
    /// Whether the scheduler should retry after this failure.
    pub const fn recoverable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(ScreenError::Connection {
            details: "usb gone".into()
        }
        .recoverable());
        assert!(!ScreenError::Capability {
            details: "no pixels".into()
        }
        .recoverable());
    }
}

//! Error Types
//!
//! Errors are split by who can recover from them:
//!
//! - [`RenderError`] is raised by a render function. Fault boundaries catch it.
//! - [`UsageError`] is hook misuse. It fails the offending instance and is
//!   never retried.
//! - [`RuntimeError`] is what the host sees from `mount`, `unmount` and `flush`.

use std::fmt;

use thiserror::Error;

use crate::graph::{Generation, InstanceId};

/// Raised when a channel is resolved with no provider and no default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no provider for context channel `{channel}` and no default registered")]
pub struct MissingProviderError {
    /// Debug name of the channel.
    pub channel: &'static str,
}

/// An error produced while rendering a component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    MissingProvider(#[from] MissingProviderError),

    /// The render is waiting on an asynchronous value. Not a failure.
    #[error("render suspended on a pending value")]
    Suspended,
}

impl RenderError {
    /// Build a render error from any message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }
}

/// Hook misuse detected while replaying cells positionally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("hook #{index} was a {previous} cell on the previous render but is now a {current} cell")]
    HookOrder {
        index: usize,
        previous: &'static str,
        current: &'static str,
    },

    #[error("render declared {current} hooks but the previous render declared {previous}")]
    HookCountChanged { previous: usize, current: usize },

    #[error("dependency list of hook #{index} changed length from {previous} to {current}")]
    DependencyLengthChanged {
        index: usize,
        previous: usize,
        current: usize,
    },

    #[error("hook #{index} was read back with a different value type")]
    HookTypeMismatch { index: usize },
}

/// Error returned by an effect callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EffectError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + 'static>>,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it as the source.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self {
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

/// Errors surfaced to the host.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("render of `{component}` ({instance}) failed: {source}")]
    Render {
        instance: InstanceId,
        component: &'static str,
        #[source]
        source: RenderError,
    },

    #[error("invalid hook usage in `{component}` ({instance}): {source}")]
    Usage {
        instance: InstanceId,
        component: &'static str,
        #[source]
        source: UsageError,
    },

    #[error("effect of `{component}` ({instance}) failed: {source}")]
    Effect {
        instance: InstanceId,
        component: &'static str,
        #[source]
        source: EffectError,
    },

    #[error("too many nested updates: `{component}` ({instance}) re-rendered more than {limit} times in one tick")]
    TooManyUpdates {
        instance: InstanceId,
        component: &'static str,
        limit: usize,
    },

    #[error("stale resumption for {instance} (generation {generation}): instance is no longer mounted")]
    StaleResumption {
        instance: InstanceId,
        generation: Generation,
    },

    #[error("unknown root {0}")]
    UnknownRoot(InstanceId),

    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),
}

impl RuntimeError {
    /// Whether a fault boundary may catch this error.
    ///
    /// Only render-phase failures qualify; usage errors, effect errors and
    /// scheduler diagnostics always reach the host.
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Render { .. })
    }

    /// The instance the error is attributed to, if any.
    pub fn instance(&self) -> Option<InstanceId> {
        match self {
            Self::Render { instance, .. }
            | Self::Usage { instance, .. }
            | Self::Effect { instance, .. }
            | Self::TooManyUpdates { instance, .. }
            | Self::StaleResumption { instance, .. } => Some(*instance),
            Self::UnknownRoot(_) | Self::UnknownInstance(_) => None,
        }
    }
}

/// What gets handed to an [`ErrorSink`].
pub struct ErrorReport<'a> {
    pub error: &'a RuntimeError,
    /// True when a fault boundary caught the error and rendered its fallback.
    pub caught: bool,
}

impl fmt::Debug for ErrorReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReport")
            .field("error", &self.error.to_string())
            .field("caught", &self.caught)
            .finish()
    }
}

/// Logging / telemetry collaborator for errors the runtime observes.
pub trait ErrorSink {
    fn report(&self, report: &ErrorReport<'_>);
}

/// Default sink: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, report: &ErrorReport<'_>) {
        if report.caught {
            tracing::error!(error = %report.error, "render error caught by fault boundary");
        } else {
            tracing::error!(error = %report.error, "uncaught runtime error");
        }
    }
}

impl<F> ErrorSink for F
where
    F: Fn(&ErrorReport<'_>),
{
    fn report(&self, report: &ErrorReport<'_>) {
        self(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_provider_converts_into_render_error() {
        let err: RenderError = MissingProviderError { channel: "theme" }.into();
        assert!(matches!(err, RenderError::MissingProvider(_)));
        assert!(err.to_string().contains("theme"));
    }

    #[test]
    fn only_render_errors_are_catchable() {
        let id = InstanceId::new();
        let render = RuntimeError::Render {
            instance: id,
            component: "Post",
            source: RenderError::message("boom"),
        };
        let usage = RuntimeError::Usage {
            instance: id,
            component: "Post",
            source: UsageError::HookCountChanged {
                previous: 2,
                current: 3,
            },
        };
        let effect = RuntimeError::Effect {
            instance: id,
            component: "Post",
            source: EffectError::new("fetch failed"),
        };

        assert!(render.is_catchable());
        assert!(!usage.is_catchable());
        assert!(!effect.is_catchable());
        assert_eq!(render.instance(), Some(id));
    }

    #[test]
    fn effect_error_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let err = EffectError::from_error(io);
        assert_eq!(err.to_string(), "socket closed");
        assert!(err.source().is_some());

        let plain = EffectError::new("fetch failed");
        assert_eq!(plain.to_string(), "fetch failed");
        assert!(plain.source().is_none());
    }
}

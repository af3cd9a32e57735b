#![doc(hidden)]

//! The error taxonomy from the design: construction-time wiring failures,
//! runtime binding failures, node eval failures, resource exhaustion, and
//! clock misuse. All five are carried as variants of one [`GraphError`] so
//! that embedders only ever match on one type.

use crate::engine::Time as EngineTime;
use crate::recordable::NodePath;
use derive_more::{Display, Error};

pub type Result<T, E = GraphError> = std::result::Result<T, E>;

/// One of the five error kinds from the design's taxonomy.
#[derive(Debug, Display, Error)]
pub enum GraphError {
    /// Construction-time: missing builder, incompatible TSMeta, unresolved
    /// generic, cycle in a mesh key dependency graph, missing ancestor
    /// `recordable_id`. Fatal; aborts graph construction.
    #[display("wiring error: {message}")]
    Wiring {
        message: String,
        #[error(source)]
        cause: Option<anyhow::Error>,
    },

    /// Runtime binding between an input and an output of incompatible
    /// shape. Fatal for the offending input but may be caught by an
    /// enclosing try/except.
    #[display("binding error at {path}: {message}")]
    Binding {
        path: NodePath,
        message: String,
        #[error(source)]
        cause: Option<anyhow::Error>,
    },

    /// Raised from inside a node's `eval`. Captured at a try/except
    /// boundary if one encloses the node; otherwise unwinds out of the
    /// engine and terminates the run.
    #[display("eval error in {path} at {time:?}: {message}")]
    Eval {
        path: NodePath,
        time: EngineTime,
        message: String,
        #[error(source)]
        cause: Option<anyhow::Error>,
    },

    /// Allocation or arena exhaustion. Fatal.
    #[display("resource error: {message}")]
    Resource { message: String },

    /// Attempt to schedule a time <= current (other than "now", see
    /// `Scheduler::wake_at`) or beyond `MAX_DT`. Fatal.
    #[display("clock error: {message}")]
    Clock { message: String },
}

impl GraphError {
    pub fn wiring(message: impl Into<String>) -> Self {
        GraphError::Wiring {
            message: message.into(),
            cause: None,
        }
    }

    pub fn binding(path: NodePath, message: impl Into<String>) -> Self {
        GraphError::Binding {
            path,
            message: message.into(),
            cause: None,
        }
    }

    pub fn eval(path: NodePath, time: EngineTime, cause: anyhow::Error) -> Self {
        GraphError::Eval {
            path,
            time,
            message: cause.to_string(),
            cause: Some(cause),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        GraphError::Resource {
            message: message.into(),
        }
    }

    pub fn clock(message: impl Into<String>) -> Self {
        GraphError::Clock {
            message: message.into(),
        }
    }

    /// The node path associated with this error, if any (wiring and
    /// resource errors have no single offending node).
    pub fn path(&self) -> Option<&NodePath> {
        match self {
            GraphError::Binding { path, .. } | GraphError::Eval { path, .. } => Some(path),
            _ => None,
        }
    }
}

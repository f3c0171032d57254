use thiserror::Error;

/// Errors that reject a task before it runs.
///
/// Runtime evaluation failures (bad predicate input, handler transport
/// errors) are not represented here; those are logged and the node keeps
/// processing. Anything below is fatal to task construction or linking.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The DSL source could not be tokenized.
    #[error("lex error at offset {pos}: {msg}")]
    Lex { pos: usize, msg: String },

    /// The DSL source tokenized but is not a valid script or expression.
    #[error("parse error at offset {pos}: {msg}")]
    Parse { pos: usize, msg: String },

    /// The pipeline could not be materialized into runtime nodes.
    #[error("link error: {0}")]
    Link(String),

    /// A node was configured with invalid parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A batch-only operation was invoked on a stream task or vice versa.
    #[error("wrong task type")]
    WrongTaskType,

    /// No output is registered under the requested name.
    #[error("unknown output {0}")]
    UnknownOutput(String),
}

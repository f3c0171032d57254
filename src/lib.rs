pub mod dsl;
pub mod errors;
pub mod expr;
pub mod models;
pub mod nodes;
pub mod pipeline;
pub mod runtime;
pub mod services;

pub use errors::EngineError;
pub use models::{Batch, FieldValue, Point};
pub use runtime::engine::Engine;
pub use runtime::task::{Task, TaskSnapshot, TaskType};

//! Concrete grading providers.

pub mod chat;
pub mod synthetic;

pub use chat::ChatCompletionsProvider;
pub use synthetic::SyntheticProvider;

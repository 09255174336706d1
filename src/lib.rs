//! Kestrel - an embeddable scripting language
//!
//! Kestrel scripts are interpreted directly from the syntax tree. The host
//! registers native functions and host types on an [`Engine`]; script classes
//! may extend host types and override their virtual methods.

pub mod token;
pub mod lexer;
pub mod parser;
pub mod ast;
pub mod value;
pub mod environment;
pub mod interpreter;
pub mod natives;
pub mod host;
pub mod engine;
pub mod error;
mod gc;
mod stack;

pub use engine::{Engine, EngineConfig, Handoff, Job, QueueScheduler, Runtime, Scheduler, Task, ThreadScheduler};
pub use error::{ErrorKind, KestrelError, Result};
pub use host::{HostClass, HostData, HostError, HostObject, HostRef, HostType};
pub use interpreter::Interpreter;
pub use lexer::Lexer;
pub use parser::Parser;
pub use value::Value;

/// Convenience function to run Kestrel code on a fresh engine
pub fn run(source: &str) -> Result<Value> {
    Engine::new().execute(source)
}

/// Version of the Kestrel language
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

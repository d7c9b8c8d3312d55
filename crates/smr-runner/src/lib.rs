//! Reconstructs compiled-function descriptors, invokes them and wraps the
//! outcome in a JSON-RPC style response.
//!
//! ```text
//! record ──from_record──▶ CodeDescriptor ──ReconstructionEngine──▶ Function
//!                                                     │
//!                    Response ◀──respond── InvocationExecutor ◀──┘
//! ```
//!
//! Every failure on the way becomes a [`RunnerError`] with a stable code.

pub mod engine;
pub mod error;
pub mod executor;
pub mod inspect;
pub mod overlay;
pub mod response;

pub use engine::ReconstructionEngine;
pub use error::RunnerError;
pub use executor::{Arguments, InvocationExecutor};
pub use inspect::inspect_fault;
pub use overlay::EnvironmentOverlay;
pub use response::{ErrorRecord, Outcome, Response};
pub use smr_stackvm::{InterpreterGeneration, DEFAULT_MAX_DEPTH};

pub type Result<T> = std::result::Result<T, RunnerError>;

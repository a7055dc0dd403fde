//! Priority-based arbitration between media sources.
//!
//! The engine is a pure, synchronous state transform over a [`Registry`]:
//! every operation stages a copy, applies the transition plus its auto-pause
//! and auto-resume side effects, checks the registry invariants and commits.
//! It returns the commands the caller must send to the player backend. No I/O
//! happens here.

mod command;
mod engine;
mod error;

pub use command::{BackendCommand, PlayerCommand};
pub use engine::{Arbiter, Decision, InvariantRecovery};
pub use error::ArbiterError;

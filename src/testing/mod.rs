//! Testing utilities and mock implementations
//!
//! Scripted handlers for exercising the router without real specialists.

pub mod mocks;

pub use mocks::*;

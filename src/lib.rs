//! FalconEye endpoint resolver.
//!
//! Decides, continuously and without user intervention, which base address
//! the FalconEye client should use to reach its backend: a server found on
//! the local network, a configured local fallback, an operator override, or
//! the public cloud relay.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod network;
pub mod probe;
pub mod selector;
pub mod settings;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use engine::{Engine, EngineError};
pub use selector::{EndpointSelector, LinkKind, Mode, ResolutionResult, Trigger};

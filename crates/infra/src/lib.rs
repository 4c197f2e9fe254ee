//! Infrastructure layer: directory and identity adapters, configuration.

pub mod config;
pub mod directory;
pub mod identity;

pub use config::EngineConfig;
pub use directory::{InMemoryDirectory, ReadHold};
pub use identity::InMemoryIdentityProvider;

//! Network configuration.
//!
//! [`NetworkConfig`] describes a network as towers of typed stages; [`Architecture`]
//! provides the named presets.

mod network;
mod presets;
mod stage;

pub use network::{NetworkConfig, TowerConfig};
pub use presets::Architecture;
pub use stage::{DecoderStageConfig, EncoderStageConfig, SkipMode, StageConfig};

//! # SegNet-Burn
//!
//! Encoder-decoder networks for pixel-wise semantic segmentation, built with the
//! Burn deep learning framework.
//!
//! ## Modules
//!
//! - `config`: Network descriptions. A network is a list of towers, each tower an
//!   ordered list of stage descriptors (encoder, decoder, bridge, dropout, fuse)
//!   interpreted by one generic assembler. The named architectures (SegNet, its
//!   deeper variant, UpNet, U-Net and the dual-tower multi-modal SegNet) are
//!   presets of that description.
//! - `error`: Error types for validation and weight transfer.
//! - `models`: The Burn modules: `Block`, `EncoderBlock`, `DecoderBlock` and the
//!   assembled `SegmentationNetwork`.
//!
//! ## Key Components
//!
//! - `NetworkConfig`: validated description from which a network is built.
//! - `SegmentationNetwork`: the assembled network; implements `SegmentationModel`.
//! - `SegmentationNetwork::init_encoder`: seeds encoder convolutions from a
//!   pretrained [`WeightBank`](segnet_backbones::WeightBank).

mod config;
mod error;
mod models;

#[doc(inline)]
pub use config::{
    Architecture, DecoderStageConfig, EncoderStageConfig, NetworkConfig, SkipMode, StageConfig,
    TowerConfig,
};
#[doc(inline)]
pub use error::{SegNetError, SegNetResult};
#[doc(inline)]
pub use models::{
    Block, BlockConfig, BlockStack, BlockStackConfig, DecoderBlock, DecoderBlockConfig,
    DecoderStage, EncoderBlock, EncoderBlockConfig, EncoderStage, SegmentationModel,
    SegmentationNetwork, SegmentationNetworkRecord, Stage, Tower,
};

//! Stage descriptors.
//!
//! A tower is an ordered list of stages. Encoders record what their decoder needs
//! under a tag; decoders name the tag they consume. Pairing is by name, never by
//! position.

use burn::prelude::*;

use crate::models::{BlockConfig, BlockStackConfig, DecoderBlockConfig, EncoderBlockConfig};

/// How an encoder hands information to its decoder.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum SkipMode {
    /// Record pooling indices; the decoder unpools with them (SegNet family).
    Indices,
    /// Record pre-pool features; the decoder concatenates them (U-Net family).
    Concat,
}

/// An encoder stage.
#[derive(Config, Debug)]
pub struct EncoderStageConfig {
    /// Name under which the stage's capture is stored.
    pub tag: String,
    /// The encoder block.
    pub block: EncoderBlockConfig,
    /// What the stage captures.
    #[config(default = "SkipMode::Indices")]
    pub skip: SkipMode,
}

/// A decoder stage.
#[derive(Config, Debug)]
pub struct DecoderStageConfig {
    /// Tag of the encoder stage whose capture this stage consumes.
    pub source: String,
    /// The decoder block.
    pub block: DecoderBlockConfig,
    /// Must match the source encoder's skip mode.
    #[config(default = "SkipMode::Indices")]
    pub skip: SkipMode,
}

/// One step of a tower.
#[derive(Config, Debug)]
pub enum StageConfig {
    /// Blocks, then pooling; records a capture.
    Encoder(EncoderStageConfig),
    /// Upsampling with a capture, then blocks.
    Decoder(DecoderStageConfig),
    /// Blocks without any resampling.
    Bridge(BlockStackConfig),
    /// Dropout with the given probability.
    Dropout(f64),
    /// A single block, typically the classification head.
    Fuse(BlockConfig),
}

impl StageConfig {
    /// Index-recording encoder stage.
    pub fn encoder(tag: &str, in_channels: usize, out_channels: usize, repeat: usize) -> Self {
        Self::Encoder(EncoderStageConfig::new(
            tag.to_string(),
            EncoderBlockConfig::new(in_channels, out_channels, repeat),
        ))
    }

    /// Unpooling decoder stage consuming `source`.
    pub fn decoder(source: &str, in_channels: usize, out_channels: usize, repeat: usize) -> Self {
        Self::Decoder(DecoderStageConfig::new(
            source.to_string(),
            DecoderBlockConfig::new(in_channels, out_channels, repeat),
        ))
    }

    /// Feature-capturing encoder stage.
    pub fn concat_encoder(
        tag: &str,
        in_channels: usize,
        out_channels: usize,
        repeat: usize,
    ) -> Self {
        Self::Encoder(
            EncoderStageConfig::new(
                tag.to_string(),
                EncoderBlockConfig::new(in_channels, out_channels, repeat),
            )
            .with_skip(SkipMode::Concat),
        )
    }

    /// Concatenating decoder stage consuming `source`. `in_channels` includes the
    /// skip features.
    pub fn concat_decoder(
        source: &str,
        in_channels: usize,
        out_channels: usize,
        repeat: usize,
    ) -> Self {
        Self::Decoder(
            DecoderStageConfig::new(
                source.to_string(),
                DecoderBlockConfig::new(in_channels, out_channels, repeat),
            )
            .with_skip(SkipMode::Concat),
        )
    }

    /// Plain block stack.
    pub fn bridge(in_channels: usize, out_channels: usize, repeat: usize) -> Self {
        Self::Bridge(BlockStackConfig::new(in_channels, out_channels, repeat))
    }

    /// Single block with the given kernel size.
    pub fn fuse(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self::Fuse(BlockConfig::new(in_channels, out_channels).with_kernel_size(kernel_size))
    }
}

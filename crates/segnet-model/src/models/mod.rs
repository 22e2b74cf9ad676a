mod block;
mod decoder;
mod encoder;
mod network;
mod transfer;

pub use block::{Block, BlockConfig, BlockStack, BlockStackConfig};
pub use decoder::{DecoderBlock, DecoderBlockConfig};
pub use encoder::{EncoderBlock, EncoderBlockConfig};
pub use network::{
    DecoderStage, EncoderStage, SegmentationModel, SegmentationNetwork, SegmentationNetworkRecord,
    Stage, Tower,
};

//! Network description and its validation.

use std::collections::HashMap;

use burn::{module::Ignored, nn::DropoutConfig, prelude::*};

use super::stage::{SkipMode, StageConfig};
use crate::{
    error::{SegNetError, SegNetResult},
    models::{BlockConfig, DecoderStage, EncoderStage, SegmentationNetwork, Stage, Tower},
};

/// One encoder-decoder chain over one input modality.
#[derive(Config, Debug)]
pub struct TowerConfig {
    /// Channels of the modality this tower reads.
    pub in_channels: usize,
    /// Stages in forward order.
    pub stages: Vec<StageConfig>,
}

/// Full network description.
///
/// Single-tower networks output the last stage of their tower. Multi-tower networks
/// concatenate the towers' score maps along channels and pass them through `fuse`.
#[derive(Config, Debug)]
pub struct NetworkConfig {
    /// Towers in input-channel order.
    pub towers: Vec<TowerConfig>,
    /// Number of classes scored per pixel.
    pub num_classes: usize,
    /// Block reducing the concatenated tower outputs to `num_classes`.
    #[config(default = "None")]
    pub fuse: Option<BlockConfig>,
}

struct Capture {
    skip: SkipMode,
    channels: usize,
    depth: usize,
    consumed: bool,
}

impl NetworkConfig {
    /// Total input channels over all towers.
    pub fn in_channels(&self) -> usize {
        self.towers.iter().map(|tower| tower.in_channels).sum()
    }

    /// Check the whole description and report every violated rule at once.
    ///
    /// # Errors
    ///
    /// Returns `Err(SegNetError::InvalidConfiguration)` listing all problems found.
    pub fn validate(&self) -> SegNetResult<()> {
        let mut issues = Vec::new();

        if self.num_classes == 0 {
            issues.push("num_classes must be at least 1".to_string());
        }
        if self.towers.is_empty() {
            issues.push("at least one tower is required".to_string());
        }

        for (index, tower) in self.towers.iter().enumerate() {
            validate_tower(index, tower, self.num_classes, &mut issues);
        }

        match (&self.fuse, self.towers.len()) {
            (None, towers) if towers > 1 => {
                issues.push(format!("{towers} towers need a fuse block"));
            }
            (Some(_), towers) if towers <= 1 => {
                issues.push("a fuse block requires more than one tower".to_string());
            }
            (Some(fuse), towers) => {
                let expected = towers * self.num_classes;
                if fuse.in_channels != expected {
                    issues.push(format!(
                        "fuse block reads {} channels, towers produce {expected}",
                        fuse.in_channels
                    ));
                }
                if fuse.out_channels != self.num_classes {
                    issues.push(format!(
                        "fuse block outputs {} channels, expected {}",
                        fuse.out_channels, self.num_classes
                    ));
                }
                check_kernel("fuse block", fuse.kernel_size, &mut issues);
            }
            _ => {}
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(SegNetError::InvalidConfiguration {
                reason: issues.join("; "),
            })
        }
    }

    /// Validate, then build the network.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the description is inconsistent.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegNetResult<SegmentationNetwork<B>> {
        self.validate()?;

        let towers = self
            .towers
            .iter()
            .map(|tower| tower.init(device))
            .collect();
        let fuse = self.fuse.as_ref().map(|fuse| fuse.init(device));

        Ok(SegmentationNetwork::new(towers, fuse, self.num_classes))
    }
}

impl TowerConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> Tower<B> {
        let stages = self
            .stages
            .iter()
            .map(|stage| match stage {
                StageConfig::Encoder(config) => Stage::Encoder(EncoderStage {
                    block: config.block.init(device),
                    tag: Ignored(config.tag.clone()),
                    skip: Ignored(config.skip.clone()),
                }),
                StageConfig::Decoder(config) => Stage::Decoder(DecoderStage {
                    block: config.block.init(device),
                    source: Ignored(config.source.clone()),
                    skip: Ignored(config.skip.clone()),
                }),
                StageConfig::Bridge(config) => Stage::Bridge(config.init(device)),
                StageConfig::Dropout(prob) => Stage::Dropout(DropoutConfig::new(*prob).init()),
                StageConfig::Fuse(config) => Stage::Fuse(config.init(device)),
            })
            .collect();

        Tower {
            stages,
            in_channels: self.in_channels,
        }
    }
}

fn check_kernel(what: &str, kernel_size: usize, issues: &mut Vec<String>) {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        issues.push(format!("{what}: kernel size must be odd, got {kernel_size}"));
    }
}

fn check_block(
    what: &str,
    in_channels: usize,
    out_channels: usize,
    repeat: usize,
    issues: &mut Vec<String>,
) {
    if in_channels == 0 || out_channels == 0 {
        issues.push(format!("{what}: channel counts must be positive"));
    }
    if repeat == 0 {
        issues.push(format!("{what}: repeat count must be positive"));
    }
}

fn validate_tower(index: usize, tower: &TowerConfig, num_classes: usize, issues: &mut Vec<String>) {
    let name = format!("tower {index}");

    if tower.in_channels == 0 {
        issues.push(format!("{name}: in_channels must be positive"));
    }
    if tower.stages.is_empty() {
        issues.push(format!("{name}: no stages"));
        return;
    }

    let mut captures: HashMap<&str, Capture> = HashMap::new();
    let mut channels = tower.in_channels;
    let mut depth = 0;

    for (position, stage) in tower.stages.iter().enumerate() {
        let what = format!("{name} stage {position}");

        match stage {
            StageConfig::Encoder(config) => {
                let block = &config.block;
                check_block(&what, block.in_channels, block.out_channels, block.repeat, issues);
                check_kernel(&what, block.kernel_size, issues);
                if block.in_channels != channels {
                    issues.push(format!(
                        "{what}: encoder '{}' reads {} channels, previous stage produces {channels}",
                        config.tag, block.in_channels
                    ));
                }
                let capture = Capture {
                    skip: config.skip.clone(),
                    channels: block.out_channels,
                    depth,
                    consumed: false,
                };
                if captures.insert(config.tag.as_str(), capture).is_some() {
                    issues.push(format!("{what}: duplicate encoder tag '{}'", config.tag));
                }
                channels = block.out_channels;
                depth += 1;
            }
            StageConfig::Decoder(config) => {
                let block = &config.block;
                check_block(&what, block.in_channels, block.out_channels, block.repeat, issues);
                check_kernel(&what, block.kernel_size, issues);

                match captures.get_mut(config.source.as_str()) {
                    None => issues.push(format!(
                        "{what}: decoder source '{}' is not an earlier encoder",
                        config.source
                    )),
                    Some(capture) if capture.consumed => issues.push(format!(
                        "{what}: capture '{}' is consumed twice",
                        config.source
                    )),
                    Some(capture) if capture.skip != config.skip => {
                        capture.consumed = true;
                        issues.push(format!(
                            "{what}: decoder expects a {:?} capture, '{}' records {:?}",
                            config.skip, config.source, capture.skip
                        ));
                    }
                    Some(capture) => {
                        capture.consumed = true;
                        match config.skip {
                            SkipMode::Indices => {
                                if depth != capture.depth + 1 {
                                    issues.push(format!(
                                        "{what}: unpooling with '{}' at depth {depth}, indices were recorded at depth {}",
                                        config.source,
                                        capture.depth + 1
                                    ));
                                }
                                if channels != capture.channels {
                                    issues.push(format!(
                                        "{what}: unpooling {channels} channels with indices over {} channels",
                                        capture.channels
                                    ));
                                }
                                if block.in_channels != channels {
                                    issues.push(format!(
                                        "{what}: decoder reads {} channels, previous stage produces {channels}",
                                        block.in_channels
                                    ));
                                }
                            }
                            SkipMode::Concat => {
                                let joined = channels + capture.channels;
                                if block.in_channels != joined {
                                    issues.push(format!(
                                        "{what}: decoder reads {} channels, concatenation produces {joined}",
                                        block.in_channels
                                    ));
                                }
                            }
                        }
                        depth = capture.depth;
                    }
                }
                channels = block.out_channels;
            }
            StageConfig::Bridge(config) => {
                check_block(&what, config.in_channels, config.out_channels, config.repeat, issues);
                check_kernel(&what, config.kernel_size, issues);
                if config.in_channels != channels {
                    issues.push(format!(
                        "{what}: bridge reads {} channels, previous stage produces {channels}",
                        config.in_channels
                    ));
                }
                channels = config.out_channels;
            }
            StageConfig::Dropout(prob) => {
                if !(0.0..1.0).contains(prob) {
                    issues.push(format!("{what}: dropout probability {prob} is outside [0, 1)"));
                }
            }
            StageConfig::Fuse(config) => {
                check_block(&what, config.in_channels, config.out_channels, 1, issues);
                check_kernel(&what, config.kernel_size, issues);
                if config.in_channels != channels {
                    issues.push(format!(
                        "{what}: block reads {} channels, previous stage produces {channels}",
                        config.in_channels
                    ));
                }
                channels = config.out_channels;
            }
        }
    }

    let mut unconsumed: Vec<&str> = captures
        .iter()
        .filter(|(_, capture)| !capture.consumed)
        .map(|(tag, _)| *tag)
        .collect();
    if !unconsumed.is_empty() {
        unconsumed.sort_unstable();
        issues.push(format!(
            "{name}: captures never consumed: {}",
            unconsumed.join(", ")
        ));
    }
    if depth != 0 {
        issues.push(format!(
            "{name}: output is {depth} pooling steps below the input resolution"
        ));
    }
    if channels != num_classes {
        issues.push(format!(
            "{name}: produces {channels} channels, expected {num_classes} class scores"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::Architecture;

    fn tiny_segnet() -> NetworkConfig {
        NetworkConfig::new(
            vec![TowerConfig::new(
                3,
                vec![
                    StageConfig::encoder("enc1", 3, 4, 1),
                    StageConfig::encoder("enc2", 4, 8, 1),
                    StageConfig::decoder("enc2", 8, 4, 1),
                    StageConfig::decoder("enc1", 4, 2, 1),
                ],
            )],
            2,
        )
    }

    fn reason(config: &NetworkConfig) -> String {
        match config.validate() {
            Err(SegNetError::InvalidConfiguration { reason }) => reason,
            other => panic!("expected invalid configuration, got {other:?}"),
        }
    }

    #[test]
    fn presets_are_valid() {
        for architecture in [
            Architecture::SegNet,
            Architecture::SegNetDeep,
            Architecture::UpNet,
            Architecture::UNet,
            Architecture::MultiSegNet(1),
        ] {
            let config = architecture.config(3, 5);
            assert!(
                config.validate().is_ok(),
                "{architecture:?}: {:?}",
                config.validate()
            );
        }
    }

    #[test]
    fn tiny_segnet_is_valid() {
        assert!(tiny_segnet().validate().is_ok());
    }

    #[test]
    fn reordered_decoders_are_rejected() {
        let mut config = tiny_segnet();
        config.towers[0].stages.swap(2, 3);

        let reason = reason(&config);
        assert!(reason.contains("depth"), "{reason}");
    }

    #[test]
    fn unknown_source_is_rejected() {
        let mut config = tiny_segnet();
        config.towers[0].stages[3] = StageConfig::decoder("enc9", 4, 2, 1);

        let reason = reason(&config);
        assert!(reason.contains("'enc9' is not an earlier encoder"), "{reason}");
        assert!(reason.contains("captures never consumed: enc1"), "{reason}");
    }

    #[test]
    fn every_problem_is_reported() {
        let mut config = tiny_segnet();
        config.num_classes = 3;
        config.towers[0].stages[1] = StageConfig::encoder("enc2", 5, 8, 0);

        let reason = reason(&config);
        assert!(reason.contains("repeat count must be positive"), "{reason}");
        assert!(reason.contains("reads 5 channels"), "{reason}");
        assert!(reason.contains("expected 3 class scores"), "{reason}");
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let mut config = tiny_segnet();
        config.towers[0].stages[1] = StageConfig::encoder("enc1", 4, 8, 1);

        assert!(reason(&config).contains("duplicate encoder tag 'enc1'"));
    }

    #[test]
    fn skip_kinds_must_agree() {
        let mut config = tiny_segnet();
        config.towers[0].stages[3] = StageConfig::concat_decoder("enc1", 8, 2, 1);

        assert!(reason(&config).contains("expects a Concat capture"));
    }

    #[test]
    fn multi_tower_requires_matching_fuse() {
        let mut config = Architecture::MultiSegNet(1).config(3, 4);
        config.fuse = None;
        assert!(reason(&config).contains("2 towers need a fuse block"));

        config.fuse = Some(BlockConfig::new(4, 4));
        assert!(reason(&config).contains("towers produce 8"));
    }

    #[test]
    fn dropout_probability_is_bounded() {
        let mut config = tiny_segnet();
        config.towers[0].stages.insert(2, StageConfig::Dropout(1.0));

        assert!(reason(&config).contains("outside [0, 1)"));
    }

    #[test]
    fn even_kernels_are_rejected() {
        let mut config = tiny_segnet();
        config.towers[0].stages.push(StageConfig::fuse(2, 2, 2));

        assert!(reason(&config).contains("kernel size must be odd"));
    }
}

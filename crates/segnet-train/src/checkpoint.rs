//! Best-epoch checkpoints on disk.
//!
//! A checkpoint directory holds `model.mpk`, `optimizer.mpk` and a
//! `checkpoint.json` manifest naming the epoch, both record files and the
//! mean IoU that triggered the save. Every save overwrites the previous one.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    module::{AutodiffModule, Module},
    optim::Optimizer,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RoutineError, RoutineResult};

const MODEL_FILE: &str = "model";
const OPTIMIZER_FILE: &str = "optimizer";
const MANIFEST_FILE: &str = "checkpoint.json";
const RECORD_EXTENSION: &str = "mpk";

type FileRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Content of `checkpoint.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub epoch: usize,
    /// Model record file, relative to the checkpoint directory.
    pub model_state: PathBuf,
    /// Optimizer record file, relative to the checkpoint directory.
    pub optimizer_state: PathBuf,
    pub mean_iou: f64,
}

fn record_error(path: &Path, err: impl std::fmt::Display) -> RoutineError {
    RoutineError::Record {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Writes and restores checkpoints in one directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointer {
    directory: PathBuf,
    recorder: FileRecorder,
}

impl FileCheckpointer {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            recorder: FileRecorder::new(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_FILE)
    }

    /// Persist the model, the optimizer state and the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a file cannot be
    /// written.
    pub fn save<B, M, O>(
        &self,
        epoch: usize,
        mean_iou: f64,
        model: &M,
        optimizer: &O,
    ) -> RoutineResult<CheckpointManifest>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        fs::create_dir_all(&self.directory).map_err(|source| RoutineError::Io {
            path: self.directory.clone(),
            source,
        })?;

        let model_path = self.directory.join(MODEL_FILE);
        model
            .clone()
            .save_file(model_path.clone(), &self.recorder)
            .map_err(|err| record_error(&model_path, err))?;

        let optimizer_path = self.directory.join(OPTIMIZER_FILE);
        Recorder::<B>::record(&self.recorder, optimizer.to_record(), optimizer_path.clone())
            .map_err(|err| record_error(&optimizer_path, err))?;

        let manifest = CheckpointManifest {
            epoch,
            model_state: Path::new(MODEL_FILE).with_extension(RECORD_EXTENSION),
            optimizer_state: Path::new(OPTIMIZER_FILE).with_extension(RECORD_EXTENSION),
            mean_iou,
        };
        let manifest_path = self.manifest_path();
        let json =
            serde_json::to_string_pretty(&manifest).map_err(|source| RoutineError::Manifest {
                path: manifest_path.clone(),
                source,
            })?;
        fs::write(&manifest_path, json).map_err(|source| RoutineError::Io {
            path: manifest_path.clone(),
            source,
        })?;

        info!(epoch, mean_iou, directory = %self.directory.display(), "checkpoint saved");
        Ok(manifest)
    }

    /// Read `checkpoint.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is missing or malformed.
    pub fn manifest(&self) -> RoutineResult<CheckpointManifest> {
        let path = self.manifest_path();
        let json = fs::read_to_string(&path).map_err(|source| RoutineError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| RoutineError::Manifest { path, source })
    }

    /// Load the checkpointed parameters into `model`.
    ///
    /// Works for any backend, so a model trained with autodiff can be restored
    /// for evaluation on the inner backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest or the model record cannot be read, or
    /// if the record does not fit the model.
    pub fn restore<B, M>(
        &self,
        model: M,
        device: &B::Device,
    ) -> RoutineResult<(M, CheckpointManifest)>
    where
        B: Backend,
        M: Module<B>,
    {
        let manifest = self.manifest()?;
        let path = self.directory.join(&manifest.model_state);
        let model = model
            .load_file(path.clone(), &self.recorder, device)
            .map_err(|err| record_error(&path, err))?;

        Ok((model, manifest))
    }

    /// Load the checkpointed optimizer state into `optimizer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest or the optimizer record cannot be read.
    pub fn restore_optimizer<B, M, O>(&self, optimizer: O, device: &B::Device) -> RoutineResult<O>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let manifest = self.manifest()?;
        let path = self.directory.join(&manifest.optimizer_state);
        let record = Recorder::<B>::load(&self.recorder, path.clone(), device)
            .map_err(|err| record_error(&path, err))?;

        Ok(optimizer.load_record(record))
    }
}

#[cfg(test)]
mod tests {
    use burn::{
        nn::{Linear, LinearConfig},
        optim::{AdamConfig, GradientsParams},
        prelude::*,
    };

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    #[derive(Module, Debug)]
    struct TinyModel<B: Backend> {
        linear: Linear<B>,
    }

    fn tiny_model<B: Backend>(device: &B::Device) -> TinyModel<B> {
        TinyModel {
            linear: LinearConfig::new(2, 2).init(device),
        }
    }

    #[test]
    fn save_then_restore_round_trips_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = tiny_model::<TestAutodiffBackend>(&device);
        let mut optimizer =
            AdamConfig::new().init::<TestAutodiffBackend, TinyModel<TestAutodiffBackend>>();

        let input = Tensor::<TestAutodiffBackend, 2>::ones([1, 2], &device);
        let loss = model.linear.forward(input).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let model = optimizer.step(1e-2, model, grads);

        let checkpointer = FileCheckpointer::new(dir.path().join("best"));
        let manifest = checkpointer.save(3, 0.75, &model, &optimizer).unwrap();

        assert_eq!(manifest.epoch, 3);
        assert_eq!(manifest.model_state, PathBuf::from("model.mpk"));
        assert!(dir.path().join("best/model.mpk").is_file());
        assert!(dir.path().join("best/optimizer.mpk").is_file());
        assert_eq!(checkpointer.manifest().unwrap(), manifest);

        let (restored, manifest) = checkpointer
            .restore::<TestBackend, _>(tiny_model::<TestBackend>(&device), &device)
            .unwrap();
        assert_eq!(manifest.mean_iou, 0.75);
        restored
            .linear
            .weight
            .val()
            .into_data()
            .assert_eq(&model.linear.weight.val().into_data(), true);

        let fresh =
            AdamConfig::new().init::<TestAutodiffBackend, TinyModel<TestAutodiffBackend>>();
        checkpointer
            .restore_optimizer::<TestAutodiffBackend, TinyModel<TestAutodiffBackend>, _>(
                fresh, &device,
            )
            .unwrap();
    }

    #[test]
    fn missing_manifest_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = FileCheckpointer::new(dir.path());

        assert!(matches!(
            checkpointer.manifest(),
            Err(RoutineError::Io { .. })
        ));
    }

    #[test]
    fn malformed_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("checkpoint.json"), "{ \"epoch\": 1 }").unwrap();
        let checkpointer = FileCheckpointer::new(dir.path());

        assert!(matches!(
            checkpointer.manifest(),
            Err(RoutineError::Manifest { .. })
        ));
    }
}

//! Backend selection for SegNet-Burn.
//!
//! The backend is picked at compile time from cargo features, in the order
//! `cuda`, `wgpu`, then `ndarray`.

pub mod burn_backend_types {
    use burn::backend::Autodiff;
    use cfg_if::cfg_if;

    cfg_if! {
        if #[cfg(feature = "cuda")] {
            use burn::backend::cuda::{Cuda, CudaDevice};

            /// Backend used for evaluation.
            pub type InferenceBackend = Cuda;
            /// Device of [`InferenceBackend`].
            pub type InferenceDevice = CudaDevice;
            /// Backend name for logging.
            pub const NAME: &str = "CUDA (NVIDIA GPU)";
        } else if #[cfg(feature = "wgpu")] {
            use burn::backend::wgpu::{Wgpu, WgpuDevice};

            /// Backend used for evaluation.
            pub type InferenceBackend = Wgpu;
            /// Device of [`InferenceBackend`].
            pub type InferenceDevice = WgpuDevice;
            /// Backend name for logging.
            pub const NAME: &str = "WGPU (GPU)";
        } else {
            use burn::backend::ndarray::{NdArray, NdArrayDevice};

            /// Backend used for evaluation.
            pub type InferenceBackend = NdArray;
            /// Device of [`InferenceBackend`].
            pub type InferenceDevice = NdArrayDevice;
            /// Backend name for logging.
            pub const NAME: &str = "NdArray (CPU)";
        }
    }

    /// Backend used for training.
    pub type TrainingBackend = Autodiff<InferenceBackend>;
}

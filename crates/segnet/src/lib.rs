//! `SegNet`: encoder/decoder networks for semantic segmentation.
//!
//! This crate ties the network, metric and training crates together behind a
//! single interface and a command line tool, on the backend picked by cargo
//! features.

pub mod backend;
pub mod training;

#[doc(inline)]
pub use backend::burn_backend_types;
#[doc(inline)]
pub use segnet_backbones as backbones;
#[doc(inline)]
pub use segnet_extra_ops as ops;
#[doc(inline)]
pub use segnet_metric as metric;
#[doc(inline)]
pub use segnet_model as model;
#[doc(inline)]
pub use segnet_train as train;

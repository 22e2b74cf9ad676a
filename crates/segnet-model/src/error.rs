use thiserror::Error;

/// The error type for network construction and weight transfer.
#[derive(Error, Debug)]
pub enum SegNetError {
    /// The network description is inconsistent.
    ///
    /// Every problem found by validation is listed in `reason`.
    #[error("Invalid network configuration: {reason}")]
    InvalidConfiguration {
        /// All violated rules, separated by `; `.
        reason: String,
    },

    /// The weight bank and the encoder hold a different number of convolutions.
    #[error("Weight transfer expects {expected} convolutions in the weight bank, found {actual}")]
    WeightTransferLength {
        /// Convolutions in the encoder.
        expected: usize,
        /// Convolutions in the weight bank.
        actual: usize,
    },

    /// A convolution pair disagrees on a parameter shape.
    #[error(
        "Weight transfer shape mismatch at convolution {index} ({parameter}): encoder has {expected}, weight bank has {actual}"
    )]
    WeightTransferShape {
        /// Position of the pair in traversal order.
        index: usize,
        /// `weight` or `bias`.
        parameter: &'static str,
        /// Shape on the encoder side.
        expected: String,
        /// Shape on the weight bank side.
        actual: String,
    },

    /// An input tensor does not fit the network.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },
}

/// A specialized `Result` type for network operations.
pub type SegNetResult<T> = Result<T, SegNetError>;

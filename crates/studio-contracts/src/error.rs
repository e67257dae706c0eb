use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("edit history is empty; import an image first")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a generation is already pending")]
    Busy,
    #[error("variation count must be at least 1")]
    InvalidCount,
    #[error("no variation candidates are ready for review")]
    NotReady,
    #[error("preview index {index} is out of range for {len} candidates")]
    PreviewOutOfRange { index: usize, len: usize },
    #[error("nothing to cancel")]
    NothingToCancel,
    #[error("no generation failure to dismiss")]
    NoFailure,
    #[error("You have reached your daily generation limit.")]
    UsageLimitReached { used: u32, limit: u32 },
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Settings that cannot be submitted for generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("object swap needs an uploaded reference asset")]
    MissingSwapAsset,
    #[error("object swap needs a preset selection")]
    MissingSwapPreset,
    #[error("variation count {0} is outside 1..=4")]
    VariationCount(usize),
    #[error("unknown {field} '{value}'")]
    UnknownValue { field: &'static str, value: String },
}

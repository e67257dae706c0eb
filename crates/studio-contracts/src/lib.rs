//! Domain types for the studio editing session: image buffers, the edit
//! history, the variation review state machine, settings and the prompt
//! compiler, plus the on-disk records a session writes.

pub mod chat;
pub mod error;
pub mod events;
pub mod flags;
pub mod history;
pub mod image;
pub mod prompt;
pub mod runs;
pub mod settings;
pub mod variations;

pub use error::{HistoryError, SessionError, SettingsError};
pub use history::EditHistory;
pub use image::ImageBuffer;
pub use prompt::{compile, compile_mask_replacement, AspectRatio, CompiledPrompt, MASK_VARIATIONS};
pub use settings::{AdjustmentSettings, BackdropStyle, Intensity, ObjectPreset, SwapType};
pub use variations::{Completion, GenerationToken, SessionStatus, VariationSession};

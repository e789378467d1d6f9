//! Audio input handling.
//!
//! Validation of source paths, ffmpeg normalization, temp-file ownership and
//! WAV I/O for the separation model.

pub mod artifact;
pub mod normalize;
pub mod validate;
pub mod wav;

// Re-export commonly used items
pub use artifact::TempArtifact;
pub use normalize::{AudioNormalizer, NormalizedAudio};
pub use validate::Validator;
pub use wav::{read_mono_f32, samples_to_duration, write_wav_mono_f32, MonoAudio};

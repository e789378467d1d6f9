//! Backend abstraction for separation models.
//!
//! The inference worker only talks to these traits, so the ONNX model and
//! test doubles are interchangeable.

use std::path::Path;

use crate::error::Result;

/// A loaded separation model.
///
/// Lives on the inference worker thread; calls are never concurrent.
pub trait Separator {
    /// Separates the mono WAV at `mix` and writes one
    /// `index<N>.wav` file per stem into `out_dir`.
    ///
    /// `out_dir` already exists when this is called.
    fn separate(&mut self, mix: &Path, out_dir: &Path) -> Result<()>;

    /// Name of the device inference runs on.
    fn device_name(&self) -> &str;
}

/// Produces a [`Separator`]. Runs once, on the inference worker thread.
pub trait SeparatorLoader: Send {
    /// Loads the model. May block for a long time (downloads, graph setup).
    fn load(&self) -> Result<Box<dyn Separator>>;
}

impl<F> SeparatorLoader for F
where
    F: Fn() -> Result<Box<dyn Separator>> + Send,
{
    fn load(&self) -> Result<Box<dyn Separator>> {
        self()
    }
}

//! Frame and crop outputs.
//!
//! Output URIs:
//! - `log://<name>`: log-only sink, always live
//! - `dir://<path>` or a bare path: JPEG files on disk (feature: output-image)
//! - `none` or empty: no output
//!
//! Failing to open an output is never fatal. Callers log the error and run without it.

#[cfg(feature = "output-image")]
pub mod image_dir;
pub mod log_sink;

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use crate::frame::{CropBuffer, Frame};
use crate::overlay::Overlay;

#[cfg(feature = "output-image")]
pub use image_dir::ImageDirOutput;
pub use log_sink::LogOutput;

/// Sink for full frames (display, recording).
pub trait FrameOutput {
    fn name(&self) -> &str;

    /// Render one uncropped frame. Overlays are drawn on the output's own copy.
    fn render(&mut self, frame: &Frame, overlay: &Overlay<'_>) -> Result<()>;

    /// Status annotation (backend, precision, rate). Display-only.
    fn set_status(&mut self, status: &str);

    /// False once the sink has been closed (window closed, disk write failed, ...).
    fn is_live(&self) -> bool;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink for fixed-size region-of-interest crops.
pub trait CropOutput {
    fn name(&self) -> &str;

    fn render_crop(&mut self, crop: &CropBuffer) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Parsed output URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputUri {
    None,
    Log(String),
    Dir(PathBuf),
}

impl OutputUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() || uri.eq_ignore_ascii_case("none") {
            return Ok(OutputUri::None);
        }
        if let Some(name) = uri.strip_prefix("log://") {
            return Ok(OutputUri::Log(name.to_string()));
        }
        if let Some(path) = uri.strip_prefix("dir://") {
            if path.is_empty() {
                return Err(anyhow!("dir:// output needs a path"));
            }
            return Ok(OutputUri::Dir(PathBuf::from(path)));
        }
        if uri.contains("://") {
            return Err(anyhow!("unsupported output uri '{}'", uri));
        }
        Ok(OutputUri::Dir(PathBuf::from(uri)))
    }
}

/// Open a frame output. `Ok(None)` means no output was requested.
pub fn open_frame_output(uri: Option<&str>) -> Result<Option<Box<dyn FrameOutput>>> {
    match OutputUri::parse(uri.unwrap_or_default())? {
        OutputUri::None => Ok(None),
        OutputUri::Log(name) => Ok(Some(Box::new(LogOutput::new(name)))),
        #[cfg(feature = "output-image")]
        OutputUri::Dir(path) => Ok(Some(Box::new(ImageDirOutput::create(path, "frame")?))),
        #[cfg(not(feature = "output-image"))]
        OutputUri::Dir(path) => Err(anyhow!(
            "image output to {} requires the output-image feature",
            path.display()
        )),
    }
}

/// Open a crop output. `Ok(None)` means no output was requested.
pub fn open_crop_output(uri: Option<&str>) -> Result<Option<Box<dyn CropOutput>>> {
    match OutputUri::parse(uri.unwrap_or_default())? {
        OutputUri::None => Ok(None),
        OutputUri::Log(name) => Ok(Some(Box::new(LogOutput::new(name)))),
        #[cfg(feature = "output-image")]
        OutputUri::Dir(path) => Ok(Some(Box::new(ImageDirOutput::create(path, "crop")?))),
        #[cfg(not(feature = "output-image"))]
        OutputUri::Dir(path) => Err(anyhow!(
            "image output to {} requires the output-image feature",
            path.display()
        )),
    }
}

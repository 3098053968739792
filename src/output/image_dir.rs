use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

use super::{CropOutput, FrameOutput};
use crate::frame::{CropBuffer, Frame};
use crate::overlay::Overlay;

/// Writes frames or crops as numbered JPEG files into a directory.
///
/// A failed write closes the sink: `is_live` turns false and further renders are
/// refused, which ends the control loop when this is the frame output.
pub struct ImageDirOutput {
    dir: PathBuf,
    prefix: &'static str,
    name: String,
    written: u64,
    status: String,
    closed: bool,
}

impl ImageDirOutput {
    pub fn create(dir: impl Into<PathBuf>, prefix: &'static str) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        let name = format!("dir://{}", dir.display());
        log::info!("ImageDirOutput: writing {} images to {}", prefix, dir.display());
        Ok(Self {
            dir,
            prefix,
            name,
            written: 0,
            status: String::new(),
            closed: false,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    fn write(
        &mut self,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        frame_index: Option<u64>,
    ) -> Result<()> {
        if self.closed {
            return Err(anyhow!("{} is closed", self.name));
        }
        let path = match frame_index {
            Some(index) => self
                .dir
                .join(format!("{}_{:06}_f{:08}.jpg", self.prefix, self.written + 1, index)),
            None => self
                .dir
                .join(format!("{}_{:06}.jpg", self.prefix, self.written + 1)),
        };
        let result = image::RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))
            .and_then(|img| {
                img.save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))
            });
        match result {
            Ok(()) => {
                self.written += 1;
                Ok(())
            }
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }
}

impl FrameOutput for ImageDirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&mut self, frame: &Frame, overlay: &Overlay<'_>) -> Result<()> {
        let mut pixels = frame.pixels().to_vec();
        overlay.draw(&mut pixels, frame.width, frame.height);
        self.write(pixels, frame.width, frame.height, None)
    }

    fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
    }

    fn is_live(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        log::info!("ImageDirOutput: {} images in {}", self.written, self.dir.display());
        Ok(())
    }
}

impl CropOutput for ImageDirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn render_crop(&mut self, crop: &CropBuffer) -> Result<()> {
        self.write(
            crop.pixels().to_vec(),
            crop.width(),
            crop.height(),
            crop.source_frame(),
        )
    }

    fn close(&mut self) -> Result<()> {
        FrameOutput::close(self)
    }
}

use anyhow::Result;
use std::time::{Duration, Instant};

use super::{CropOutput, FrameOutput};
use crate::frame::{CropBuffer, Frame};
use crate::overlay::Overlay;

/// Status lines are logged at info no more often than this.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Log-only sink (`log://<name>`). Usable as a frame or a crop output.
pub struct LogOutput {
    name: String,
    frames: u64,
    crops: u64,
    status: String,
    last_status_log: Option<Instant>,
}

impl LogOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            crops: 0,
            status: String::new(),
            last_status_log: None,
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn crops_rendered(&self) -> u64 {
        self.crops
    }

    pub fn status(&self) -> &str {
        &self.status
    }
}

impl FrameOutput for LogOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&mut self, frame: &Frame, overlay: &Overlay<'_>) -> Result<()> {
        self.frames += 1;
        let captions: Vec<String> = overlay
            .detections
            .iter()
            .filter_map(|detection| overlay.caption(detection))
            .collect();
        log::debug!(
            "[{}] frame {}x{} ({} ms old) {}",
            self.name,
            frame.width,
            frame.height,
            frame.age_ms(),
            captions.join(", ")
        );
        Ok(())
    }

    fn set_status(&mut self, status: &str) {
        if self.status != status {
            self.status = status.to_string();
        }
        let due = self
            .last_status_log
            .map_or(true, |at| at.elapsed() >= STATUS_LOG_INTERVAL);
        if due {
            log::info!("[{}] {}", self.name, self.status);
            self.last_status_log = Some(Instant::now());
        }
    }

    fn is_live(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<()> {
        log::info!(
            "[{}] closed after {} frames, {} crops",
            self.name,
            self.frames,
            self.crops
        );
        Ok(())
    }
}

impl CropOutput for LogOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn render_crop(&mut self, crop: &CropBuffer) -> Result<()> {
        self.crops += 1;
        log::info!(
            "[{}] crop #{} {}x{} from frame {}",
            self.name,
            self.crops,
            crop.width(),
            crop.height(),
            crop.source_frame().unwrap_or_default()
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        FrameOutput::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_output_counts_renders() -> Result<()> {
        let mut output = LogOutput::new("test");
        let frame = Frame::new(vec![0u8; 12], 2, 2)?;
        let crop = CropBuffer::new(1, 1)?;

        output.render(&frame, &Overlay::empty())?;
        output.render_crop(&crop)?;
        output.set_status("cpu | FP32 | Network 30 FPS");

        assert_eq!(output.frames_rendered(), 1);
        assert_eq!(output.crops_rendered(), 1);
        assert_eq!(output.status(), "cpu | FP32 | Network 30 FPS");
        assert!(output.is_live());
        Ok(())
    }
}

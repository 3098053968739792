use anyhow::Result;

use crate::detect::result::{Detection, Precision};
use crate::frame::Frame;

/// Object detector backend.
///
/// The control loop calls `detect` once per captured frame, on the loop thread, with
/// no deadline imposed by the call itself. Backends own any hardware acceleration they
/// use; the loop does not see it.
pub trait DetectorBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Returned labels must already be resolved.
    ///
    /// An empty vector means nothing was detected.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Human-readable label for a class id.
    fn class_label(&self, class_id: u32) -> String;

    /// Inference precision, for status display.
    fn precision(&self) -> Precision {
        Precision::Fp32
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DetectorBackend + ?Sized> DetectorBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn class_label(&self, class_id: u32) -> String {
        (**self).class_label(class_id)
    }

    fn precision(&self) -> Precision {
        (**self).precision()
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}

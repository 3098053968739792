mod backend;
pub mod backends;
mod labels;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, ScriptedBackend};
pub use labels::ClassLabels;
pub use registry::{BackendFactory, BackendRegistry};
pub use result::{BoundingBox, Detection, Precision};

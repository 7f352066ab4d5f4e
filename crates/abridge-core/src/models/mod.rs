//! Native model implementations and registry.

pub mod bart;
pub mod device;
pub mod registry;

pub use bart::{BartConfig, BartSummaryModel};
pub use device::{DeviceKind, DeviceProfile, DeviceSelector};
pub use registry::{LoadProgress, ModelLoader, ModelRegistry};

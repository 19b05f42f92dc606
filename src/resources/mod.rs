//! GPU capacity accounting per placement domain.

pub mod gpu;
pub mod probe;

pub use gpu::{GpuAccountant, GpuResources, WORKER_GPU_PATH};
pub use probe::{GpuProbe, NvidiaSmiProbe, StaticGpuProbe};

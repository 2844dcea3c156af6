//! Model lifecycle: device selection, loading, exclusive inference.

pub mod device;
pub mod engine;
pub mod lifecycle;

pub use device::{ComputeDevice, DeviceInfoProvider, SystemDeviceInfo};
pub use engine::{
    EngineBackend, EngineError, EngineMemory, GenerationParams, InferenceEngine, LoadPhase, LoadPlan,
    LoadedModel, Tokenizer,
};
pub use lifecycle::{MemoryUsage, ModelLifecycle, ModelState};

use crate::{DescriptorHeapKind, PipelineId, ResourceId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the {0} descriptor heap has no free slots")]
    DescriptorHeapExhausted(DescriptorHeapKind),
    #[error("{kind} descriptor slot {index} is already in use")]
    DescriptorSlotInUse { kind: DescriptorHeapKind, index: u32 },
    #[error("{kind} descriptor slot {index} is out of range (capacity {capacity})")]
    DescriptorIndexOutOfRange {
        kind: DescriptorHeapKind,
        index: u32,
        capacity: u32,
    },
    #[error("failed to compile shader `{path}`: {message}")]
    ShaderCompilation { path: String, message: String },
    #[error("no live resource for {0:?}")]
    UnknownResource(ResourceId),
    #[error("no live pipeline for {0:?}")]
    UnknownPipeline(PipelineId),
    #[error("device error: {0}")]
    Device(String),
    #[cfg(target_os = "windows")]
    #[error(transparent)]
    Windows(#[from] windows::core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

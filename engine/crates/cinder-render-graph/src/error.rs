//! 渲染图的错误类型
//!
//! 分为三类：
//! - 配置错误：名字无法解析、binding 与 shader 反射不一致等，在 build 阶段报告
//! - 设备错误：native 对象创建失败、设备丢失、内存不足
//! - 同步错误：acquire / present 返回 out-of-date 或 surface lost，调用者应当重建 graph

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RgError {
    // ========================================================================
    // 配置错误
    // ========================================================================
    /// 名字在 resolve table 中不存在
    #[error("unknown resource \"{name}\"")]
    UnknownResource { name: String },

    /// binding slot 不在 shader 反射信息中
    #[error("pass \"{pass}\" binds slot {slot}, which the shader does not declare")]
    UnknownBindingSlot { pass: String, slot: u32 },

    /// output attachment 没有被任何 pass 声明
    #[error("pass \"{pass}\" renders to \"{name}\", which no pass declares as an attachment")]
    UnknownOutputAttachment { pass: String, name: String },

    /// 同名 attachment 的描述不一致，或与 import 的资源重名
    #[error("attachment \"{name}\" is declared more than once with different descriptions")]
    AttachmentRedeclared { name: String },

    /// 只允许 vertex + fragment 或者单独的 compute
    #[error("pass \"{pass}\" has an invalid shader stage combination: {stages:?}")]
    InvalidShaderStages { pass: String, stages: vk::ShaderStageFlags },

    /// graphics 管线必须至少有一个 output attachment
    #[error("pass \"{pass}\" has a graphics pipeline but no output attachment")]
    MissingRenderTarget { pass: String },

    #[error("pass \"{pass}\" has more than one depth output")]
    MultipleDepthOutputs { pass: String },

    #[error("pass \"{pass}\" renders to layer {layer} of \"{name}\", which has {layer_count} layer(s)")]
    OutputLayerOutOfRange { pass: String, name: String, layer: u32, layer_count: u32 },

    /// 不同 stage 在同一个 binding 上声明了不同的类型或数量
    #[error("binding {binding} is declared with conflicting descriptor types or counts")]
    ConflictingBinding { binding: u32 },

    /// `Resolved` 策略下只能绑定直接 handle
    #[error("pass \"{pass}\" binds named resource \"{name}\" in a set that is marked resolved")]
    NamedInResolvedSet { pass: String, name: String },

    /// buffer 与 image 混用
    #[error("resource \"{name}\" is not a {expected}")]
    ResourceKindMismatch { name: String, expected: &'static str },

    #[error("the graph has no output attachment to present")]
    NoOutputAttachment,

    /// output attachment 没有被任何 pass 使用，呈现前后的 layout 无法确定
    #[error("output attachment \"{name}\" is not used by any pass")]
    UnusedOutputAttachment { name: String },

    #[error("pass \"{name}\" is added more than once")]
    DuplicatePass { name: String },

    // ========================================================================
    // 设备错误
    // ========================================================================
    #[error("out of host memory")]
    OutOfHostMemory,

    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("device lost")]
    DeviceLost,

    #[error("timed out waiting for the device")]
    Timeout,

    /// swapchain 需要重建，调用者应当重建 swapchain 与 graph
    #[error("surface is out of date")]
    SurfaceOutOfDate,

    #[error("surface lost")]
    SurfaceLost,

    #[error("vulkan error: {0:?}")]
    Vulkan(vk::Result),

    // ========================================================================
    // 运行时错误
    // ========================================================================
    #[error("upload arena exhausted: requested {requested} bytes, {used}/{capacity} used")]
    UploadArenaExhausted { requested: u64, used: u64, capacity: u64 },

    #[error("upload alignment {align} is not a power of two")]
    InvalidUploadAlignment { align: u64 },

    #[error("frame slot {slot} is in an unexpected state: {detail}")]
    InvalidFrameState { slot: usize, detail: String },

    /// 两个 pass 共享同一个 descriptor set，却在同一帧对同一个 binding 写入不同的资源
    #[error("passes \"{first}\" and \"{second}\" share a descriptor set but bind different resources to binding {binding}")]
    SharedDescriptorConflict { first: String, second: String, binding: u32 },
}

impl From<vk::Result> for RgError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_POOL_MEMORY => Self::OutOfDeviceMemory,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutOfDate,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            other => Self::Vulkan(other),
        }
    }
}

impl RgError {
    /// 需要重建 swapchain 与 graph 的错误
    #[inline]
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, Self::SurfaceOutOfDate | Self::SurfaceLost)
    }
}

pub type RgResult<T> = Result<T, RgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_mapping() {
        assert_eq!(RgError::from(vk::Result::ERROR_DEVICE_LOST), RgError::DeviceLost);
        assert_eq!(RgError::from(vk::Result::TIMEOUT), RgError::Timeout);
        assert_eq!(RgError::from(vk::Result::ERROR_OUT_OF_POOL_MEMORY), RgError::OutOfDeviceMemory);
        assert_eq!(
            RgError::from(vk::Result::ERROR_FORMAT_NOT_SUPPORTED),
            RgError::Vulkan(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)
        );
        assert!(RgError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).requires_rebuild());
        assert!(!RgError::DeviceLost.requires_rebuild());
    }
}

use ash::vk;

/// host 可见、持久映射的 buffer
///
/// 写入与 flush 通过 [`crate::device::GfxDevice`] 完成，自身只是一个 handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxHostBuffer {
    pub handle: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

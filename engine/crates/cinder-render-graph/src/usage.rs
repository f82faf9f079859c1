//! 资源用法标签
//!
//! pass 声明依赖时只说明"怎么用"，stage、access、layout 全部由用法推导。

use ash::vk;
use bitflags::bitflags;

use crate::state::{RgBufferState, RgImageState};

bitflags! {
    /// 资源在一个 pass 中的用法，同一 pass 内的多次声明按位或合并
    ///
    /// 空集合表示 UNKNOWN：资源尚未被使用，内容可以丢弃
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RgUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const UNIFORM_BUFFER = 1 << 2;
        const STORAGE_BUFFER = 1 << 3;
        const VERTEX_BUFFER = 1 << 4;
        const INDEX_BUFFER = 1 << 5;
        const INDIRECT_BUFFER = 1 << 6;
        const COLOR_ATTACHMENT = 1 << 7;
        const DEPTH_ATTACHMENT = 1 << 8;
        const SAMPLED_IMAGE = 1 << 9;
        const STORAGE_IMAGE = 1 << 10;
        const PRESENT = 1 << 11;
    }
}

/// 单个用法对应的图像状态，buffer 专属的用法没有图像状态
const IMAGE_STATES: &[(RgUsage, RgImageState)] = &[
    (RgUsage::TRANSFER_SRC, RgImageState::TRANSFER_SRC),
    (RgUsage::TRANSFER_DST, RgImageState::TRANSFER_DST),
    (RgUsage::COLOR_ATTACHMENT, RgImageState::COLOR_ATTACHMENT),
    (RgUsage::DEPTH_ATTACHMENT, RgImageState::DEPTH_ATTACHMENT),
    (RgUsage::SAMPLED_IMAGE, RgImageState::SHADER_READ),
    (RgUsage::STORAGE_IMAGE, RgImageState::STORAGE),
    (RgUsage::PRESENT, RgImageState::PRESENT),
];

const BUFFER_STATES: &[(RgUsage, RgBufferState)] = &[
    (RgUsage::TRANSFER_SRC, RgBufferState::TRANSFER_SRC),
    (RgUsage::TRANSFER_DST, RgBufferState::TRANSFER_DST),
    (RgUsage::UNIFORM_BUFFER, RgBufferState::UNIFORM),
    (RgUsage::STORAGE_BUFFER, RgBufferState::STORAGE),
    (RgUsage::VERTEX_BUFFER, RgBufferState::VERTEX_BUFFER),
    (RgUsage::INDEX_BUFFER, RgBufferState::INDEX_BUFFER),
    (RgUsage::INDIRECT_BUFFER, RgBufferState::INDIRECT_BUFFER),
];

impl RgUsage {
    pub const UNKNOWN: Self = Self::empty();

    /// 会写入资源内容的用法
    pub const WRITE_USAGES: Self = Self::from_bits_retain(
        Self::TRANSFER_DST.bits()
            | Self::STORAGE_BUFFER.bits()
            | Self::STORAGE_IMAGE.bits()
            | Self::COLOR_ATTACHMENT.bits()
            | Self::DEPTH_ATTACHMENT.bits(),
    );

    #[inline]
    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE_USAGES)
    }

    #[inline]
    pub fn is_unknown(self) -> bool {
        self.is_empty()
    }

    /// 用法集合对应的图像状态；需要不同 layout 的组合退化为 GENERAL
    pub fn image_state(self) -> RgImageState {
        self.iter()
            .filter_map(|bit| IMAGE_STATES.iter().find(|(usage, _)| *usage == bit).map(|(_, state)| *state))
            .fold(RgImageState::UNDEFINED, RgImageState::merge)
    }

    pub fn buffer_state(self) -> RgBufferState {
        self.iter()
            .filter_map(|bit| BUFFER_STATES.iter().find(|(usage, _)| *usage == bit).map(|(_, state)| *state))
            .fold(RgBufferState::UNDEFINED, RgBufferState::merge)
    }

    /// shader 反射出的 descriptor 类型对应的用法
    ///
    /// sampler、acceleration structure 等不参与状态跟踪，返回 UNKNOWN
    pub fn from_descriptor_type(ty: vk::DescriptorType) -> Self {
        match ty {
            vk::DescriptorType::UNIFORM_BUFFER | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => Self::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => Self::STORAGE_BUFFER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::INPUT_ATTACHMENT => Self::SAMPLED_IMAGE,
            vk::DescriptorType::STORAGE_IMAGE => Self::STORAGE_IMAGE,
            _ => Self::UNKNOWN,
        }
    }

    /// 创建 image 时需要的 usage
    pub fn image_usage_flags(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(Self::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(Self::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::COLOR_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(Self::DEPTH_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(Self::SAMPLED_IMAGE) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(Self::STORAGE_IMAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        flags
    }

    /// 创建 buffer 时需要的 usage
    pub fn buffer_usage_flags(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if self.contains(Self::TRANSFER_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(Self::TRANSFER_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::UNIFORM_BUFFER) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(Self::STORAGE_BUFFER) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(Self::VERTEX_BUFFER) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(Self::INDEX_BUFFER) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(Self::INDIRECT_BUFFER) {
            flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        flags
    }
}

impl std::fmt::Display for RgUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "UNKNOWN");
        }
        let names = self.iter_names().map(|(name, _)| name).collect::<Vec<_>>();
        write!(f, "{}", names.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_usage_states() {
        assert_eq!(RgUsage::UNKNOWN.image_state(), RgImageState::UNDEFINED);
        assert_eq!(RgUsage::SAMPLED_IMAGE.image_state().layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(RgUsage::COLOR_ATTACHMENT.image_state().layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(RgUsage::PRESENT.image_state(), RgImageState::PRESENT);
        assert_eq!(RgUsage::UNIFORM_BUFFER.buffer_state(), RgBufferState::UNIFORM);
        // buffer 用法不影响图像状态
        assert_eq!(RgUsage::UNIFORM_BUFFER.image_state(), RgImageState::UNDEFINED);
    }

    #[test]
    fn test_combined_usage_uses_general_layout() {
        let usage = RgUsage::SAMPLED_IMAGE | RgUsage::COLOR_ATTACHMENT;
        let state = usage.image_state();
        assert_eq!(state.layout, vk::ImageLayout::GENERAL);
        assert!(state.access.contains(vk::AccessFlags2::SHADER_SAMPLED_READ));
        assert!(state.access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));

        // 同一 layout 的组合保持原 layout
        let storage = (RgUsage::STORAGE_IMAGE | RgUsage::STORAGE_BUFFER).image_state();
        assert_eq!(storage.layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn test_is_write() {
        assert!(RgUsage::COLOR_ATTACHMENT.is_write());
        assert!(RgUsage::STORAGE_BUFFER.is_write());
        assert!(!RgUsage::SAMPLED_IMAGE.is_write());
        assert!(!(RgUsage::UNIFORM_BUFFER | RgUsage::TRANSFER_SRC).is_write());
    }

    #[test]
    fn test_from_descriptor_type() {
        assert_eq!(RgUsage::from_descriptor_type(vk::DescriptorType::UNIFORM_BUFFER), RgUsage::UNIFORM_BUFFER);
        assert_eq!(
            RgUsage::from_descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            RgUsage::SAMPLED_IMAGE
        );
        assert_eq!(RgUsage::from_descriptor_type(vk::DescriptorType::SAMPLER), RgUsage::UNKNOWN);
    }

    #[test]
    fn test_usage_flags() {
        let usage = RgUsage::COLOR_ATTACHMENT | RgUsage::SAMPLED_IMAGE | RgUsage::TRANSFER_SRC;
        assert_eq!(
            usage.image_usage_flags(),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            (RgUsage::VERTEX_BUFFER | RgUsage::SAMPLED_IMAGE).buffer_usage_flags(),
            vk::BufferUsageFlags::VERTEX_BUFFER
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(RgUsage::UNKNOWN.to_string(), "UNKNOWN");
        assert_eq!((RgUsage::TRANSFER_SRC | RgUsage::PRESENT).to_string(), "TRANSFER_SRC | PRESENT");
    }
}

//! Barrier 合成
//!
//! 每个 pass 之前最多录制一次 `vkCmdPipelineBarrier2`。需要 barrier 的条件：
//! 用法发生变化，或者本 pass 会写入资源（写后写、读后写都需要同步）。

use ash::vk;
use cinder_gfx::{
    commands::barrier::{GfxBarrierBatch, GfxBufferBarrier, GfxImageBarrier},
    device::GfxDevice,
};
use itertools::Itertools;

use crate::{
    error::RgResult,
    resolver::RgTransition,
    resource::{RgBuffer, RgImage, RgResolveTable, RgResource, RgResourceKey, RgResourceRef},
    usage::RgUsage,
};

/// image 从一种用法转换到另一种用法，覆盖全部 mip 与 layer
pub fn image_barrier(image: vk::Image, aspect: vk::ImageAspectFlags, from: RgUsage, to: RgUsage) -> GfxImageBarrier {
    let src = from.image_state();
    let dst = to.image_state();
    GfxImageBarrier::new()
        .image(image)
        .layout_transfer(src.layout, dst.layout)
        .src_mask(src.stage, src.src_access())
        .dst_mask(dst.stage, dst.access)
        .image_aspect_flag(aspect)
}

/// buffer 从一种用法转换到另一种用法，覆盖整个 buffer
pub fn buffer_barrier(buffer: vk::Buffer, from: RgUsage, to: RgUsage) -> GfxBufferBarrier {
    let src = from.buffer_state();
    let dst = to.buffer_state();
    GfxBufferBarrier::new().buffer(buffer).src_mask(src.stage, src.src_access()).dst_mask(dst.stage, dst.access)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgBarrierEntry {
    pub key: RgResourceKey,
    pub resource: RgResourceRef,
    pub transition: RgTransition,
}

/// 一个 pass 之前需要的全部 barrier
///
/// 构建时只记录资源引用，具名资源在每一帧录制时才解析成 handle
#[derive(Clone, Debug, Default)]
pub struct RgPassBarrier {
    entries: Vec<RgBarrierEntry>,
}

impl RgPassBarrier {
    #[inline]
    pub fn needs_barrier(transition: RgTransition) -> bool {
        transition.initial_usage != transition.final_usage || transition.final_usage.is_write()
    }

    pub fn new(entries: impl IntoIterator<Item = RgBarrierEntry>) -> Self {
        Self {
            entries: entries.into_iter().filter(|entry| Self::needs_barrier(entry.transition)).collect_vec(),
        }
    }

    #[inline]
    pub fn entries(&self) -> &[RgBarrierEntry] {
        &self.entries
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 解析资源并生成 barrier，所有元素共享 stage 并集
    pub fn batch(&self, resolve: &RgResolveTable) -> RgResult<GfxBarrierBatch> {
        let mut batch = GfxBarrierBatch::new();
        for entry in &self.entries {
            let RgTransition {
                initial_usage,
                final_usage,
            } = entry.transition;
            match entry.resource.resolve(resolve)? {
                RgResource::Image(RgImage { image, .. }) => {
                    batch.image_barriers.push(image_barrier(image.handle, image.aspect(), initial_usage, final_usage));
                }
                RgResource::Buffer(RgBuffer { handle, .. }) => {
                    batch.buffer_barriers.push(buffer_barrier(handle, initial_usage, final_usage));
                }
            }
        }
        batch.unify_stages();
        Ok(batch)
    }

    pub fn record(&self, device: &dyn GfxDevice, cmd: vk::CommandBuffer, resolve: &RgResolveTable) -> RgResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let batch = self.batch(resolve)?;
        device.cmd_pipeline_barrier(cmd, &batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use cinder_gfx::{
        device::headless::{HeadlessDevice, RecordedCommand},
        resources::image::GfxImage,
    };

    use super::*;
    use crate::error::RgError;

    fn image(raw: u64, format: vk::Format) -> RgImage {
        RgImage {
            image: GfxImage {
                handle: vk::Image::from_raw(raw),
                format,
                extent: vk::Extent2D {
                    width: 4,
                    height: 4,
                },
                mip_levels: 1,
                array_layers: 1,
            },
            view: vk::ImageView::from_raw(raw + 100),
        }
    }

    fn entry(resource: RgResourceRef, from: RgUsage, to: RgUsage) -> RgBarrierEntry {
        RgBarrierEntry {
            key: resource.key(),
            resource,
            transition: RgTransition::new(from, to),
        }
    }

    #[test]
    fn test_needs_barrier_rule() {
        use RgUsage as U;
        assert!(!RgPassBarrier::needs_barrier(RgTransition::new(U::SAMPLED_IMAGE, U::SAMPLED_IMAGE)));
        assert!(!RgPassBarrier::needs_barrier(RgTransition::new(U::UNIFORM_BUFFER, U::UNIFORM_BUFFER)));
        assert!(RgPassBarrier::needs_barrier(RgTransition::new(U::COLOR_ATTACHMENT, U::SAMPLED_IMAGE)));
        // 写后写仍然需要 barrier
        assert!(RgPassBarrier::needs_barrier(RgTransition::new(U::COLOR_ATTACHMENT, U::COLOR_ATTACHMENT)));
        assert!(RgPassBarrier::needs_barrier(RgTransition::new(U::STORAGE_BUFFER, U::STORAGE_BUFFER)));
    }

    #[test]
    fn test_read_only_pass_records_nothing() {
        let device = HeadlessDevice::new(vk::Extent2D {
            width: 4,
            height: 4,
        });
        let cmd = device.allocate_command_buffer("cmd").unwrap();
        device.begin_command_buffer(cmd).unwrap();

        let barrier = RgPassBarrier::new([entry(
            image(1, vk::Format::R8G8B8A8_UNORM).into(),
            RgUsage::SAMPLED_IMAGE,
            RgUsage::SAMPLED_IMAGE,
        )]);
        assert!(barrier.is_empty());
        barrier.record(&device, cmd, &RgResolveTable::new()).unwrap();
        assert!(device.commands(cmd).is_empty());
    }

    #[test]
    fn test_single_batched_barrier() {
        let device = HeadlessDevice::new(vk::Extent2D {
            width: 4,
            height: 4,
        });
        let cmd = device.allocate_command_buffer("cmd").unwrap();
        device.begin_command_buffer(cmd).unwrap();

        let mut resolve = RgResolveTable::new();
        resolve.insert("depth", image(2, vk::Format::D32_SFLOAT).into());

        let barrier = RgPassBarrier::new([
            entry(image(1, vk::Format::R8G8B8A8_UNORM).into(), RgUsage::COLOR_ATTACHMENT, RgUsage::SAMPLED_IMAGE),
            entry(RgResourceRef::named("depth"), RgUsage::SAMPLED_IMAGE, RgUsage::DEPTH_ATTACHMENT),
            entry(
                RgBuffer::whole(vk::Buffer::from_raw(3)).into(),
                RgUsage::TRANSFER_DST,
                RgUsage::UNIFORM_BUFFER,
            ),
        ]);
        barrier.record(&device, cmd, &resolve).unwrap();

        let commands = device.commands(cmd);
        assert_eq!(commands.len(), 1);
        let RecordedCommand::Barrier(batch) = &commands[0] else {
            panic!("expected a barrier");
        };
        assert_eq!(batch.image_barriers.len(), 2);
        assert_eq!(batch.buffer_barriers.len(), 1);

        let src = vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
            | RgUsage::SAMPLED_IMAGE.image_state().stage
            | vk::PipelineStageFlags2::TRANSFER;
        for b in &batch.image_barriers {
            assert_eq!(b.inner().src_stage_mask, src);
        }
        assert_eq!(batch.buffer_barriers[0].inner().src_stage_mask, src);

        let color = batch.image_barriers[0].inner();
        assert_eq!(color.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(color.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(color.subresource_range.level_count, vk::REMAINING_MIP_LEVELS);
        let depth = batch.image_barriers[1].inner();
        assert_eq!(depth.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth.new_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_unresolved_name_fails() {
        let barrier = RgPassBarrier::new([entry(
            RgResourceRef::named("ghost"),
            RgUsage::SAMPLED_IMAGE,
            RgUsage::COLOR_ATTACHMENT,
        )]);
        assert_eq!(
            barrier.batch(&RgResolveTable::new()).err(),
            Some(RgError::UnknownResource {
                name: "ghost".to_string()
            })
        );
    }
}

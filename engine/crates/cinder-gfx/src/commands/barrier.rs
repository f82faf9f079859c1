use ash::vk;

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// 便捷创建 image memory barrier 的结构体
#[derive(Clone, Copy, Debug)]
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'static> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// 只替换 stage，access 保持不变
    ///
    /// 批量 barrier 中所有元素共享同一组 stage mask
    #[inline]
    pub fn stages(mut self, src_stage_mask: vk::PipelineStageFlags2, dst_stage_mask: vk::PipelineStageFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.dst_stage_mask = dst_stage_mask;
        self
    }

    /// builder
    ///
    /// 默认覆盖所有 mip level 和所有 layer
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                offset: 0,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            },
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'static> {
        &self.inner
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.inner.src_stage_mask = mask.src_stage;
        self.inner.dst_stage_mask = mask.dst_stage;
        self.inner.src_access_mask = mask.src_access;
        self.inner.dst_access_mask = mask.dst_access;
        self
    }

    #[inline]
    pub fn stages(mut self, src_stage_mask: vk::PipelineStageFlags2, dst_stage_mask: vk::PipelineStageFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.dst_stage_mask = dst_stage_mask;
        self
    }

    /// 整个 buffer
    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = 0;
        self.inner.size = vk::WHOLE_SIZE;
        self
    }
}

/// 一次 `vkCmdPipelineBarrier2` 所携带的全部 barrier
#[derive(Clone, Debug, Default)]
pub struct GfxBarrierBatch {
    pub image_barriers: Vec<GfxImageBarrier>,
    pub buffer_barriers: Vec<GfxBufferBarrier>,
}

impl GfxBarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.image_barriers.len() + self.buffer_barriers.len()
    }

    /// 所有 barrier 的 src stage 取并集
    pub fn src_stage_union(&self) -> vk::PipelineStageFlags2 {
        self.image_barriers
            .iter()
            .map(|b| b.inner().src_stage_mask)
            .chain(self.buffer_barriers.iter().map(|b| b.inner().src_stage_mask))
            .fold(vk::PipelineStageFlags2::NONE, |acc, s| acc | s)
    }

    /// 所有 barrier 的 dst stage 取并集
    pub fn dst_stage_union(&self) -> vk::PipelineStageFlags2 {
        self.image_barriers
            .iter()
            .map(|b| b.inner().dst_stage_mask)
            .chain(self.buffer_barriers.iter().map(|b| b.inner().dst_stage_mask))
            .fold(vk::PipelineStageFlags2::NONE, |acc, s| acc | s)
    }

    /// 把 stage 并集写回每一个元素
    ///
    /// 合并后的 barrier 在同一个同步作用域内生效
    pub fn unify_stages(&mut self) {
        let src = self.src_stage_union();
        let dst = self.dst_stage_union();
        for barrier in &mut self.image_barriers {
            *barrier = barrier.stages(src, dst);
        }
        for barrier in &mut self.buffer_barriers {
            *barrier = barrier.stages(src, dst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_image_barrier_covers_all_subresources() {
        let barrier = GfxImageBarrier::new();
        let range = barrier.inner().subresource_range;
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
        assert_eq!(barrier.inner().src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn test_unify_stages() {
        let mut batch = GfxBarrierBatch::new();
        batch.image_barriers.push(
            GfxImageBarrier::new()
                .src_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
                .dst_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ),
        );
        batch.buffer_barriers.push(
            GfxBufferBarrier::new()
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::VERTEX_SHADER, vk::AccessFlags2::UNIFORM_READ),
        );
        batch.unify_stages();

        let src = vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags2::TRANSFER;
        let dst = vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::VERTEX_SHADER;
        assert_eq!(batch.image_barriers[0].inner().src_stage_mask, src);
        assert_eq!(batch.buffer_barriers[0].inner().dst_stage_mask, dst);
        // access 不受影响
        assert_eq!(batch.buffer_barriers[0].inner().src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(batch.len(), 2);
    }
}

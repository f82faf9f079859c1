//! 设备抽象
//!
//! 渲染图只通过 [`GfxDevice`] 访问 GPU。调用者持有 [`GfxDeviceRef`]，
//! 在构建 graph、创建 descriptor 缓存、创建 frame provider 时显式传入。

pub mod ash_device;
pub mod headless;

use std::rc::Rc;

use ash::{prelude::VkResult, vk};

use crate::{
    commands::{
        barrier::GfxBarrierBatch,
        render_pass_begin::{GfxImageBlit, GfxRenderPassBegin},
        submit_info::GfxSubmitInfo,
    },
    resources::{
        buffer::GfxHostBuffer,
        descriptor::{GfxDescriptorBinding, GfxDescriptorWrite},
        image::{GfxImage, GfxImageDesc, GfxImageViewDesc},
        pipeline::{GfxComputePipelineDesc, GfxFramebufferDesc, GfxGraphicsPipelineDesc, GfxRenderPassDesc},
    },
};

pub type GfxDeviceRef = Rc<dyn GfxDevice>;

/// swapchain acquire 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxAcquiredImage {
    pub image_index: u32,
    pub suboptimal: bool,
}

/// 单线程使用的设备接口
///
/// - 所有可失败的调用返回 [`VkResult`]，由调用者决定如何处理
/// - `destroy_*` 不会失败；传入 null handle 时什么都不做
/// - `cmd_*` 只是录制，不会失败
pub trait GfxDevice {
    // ---------------- image / buffer ----------------
    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> VkResult<GfxImage>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(&self, image: vk::Image, desc: &GfxImageViewDesc, name: &str) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    /// host 可见、持久映射的 buffer
    fn create_host_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags, name: &str)
    -> VkResult<GfxHostBuffer>;
    fn destroy_host_buffer(&self, buffer: vk::Buffer);
    /// 写入映射内存，越界时返回 `ERROR_MEMORY_MAP_FAILED`
    fn write_host_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VkResult<()>;
    fn flush_host_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<()>;

    // ---------------- pass / pipeline ----------------
    fn create_render_pass(&self, desc: &GfxRenderPassDesc, name: &str) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, desc: &GfxFramebufferDesc, name: &str) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GfxGraphicsPipelineDesc, name: &str) -> VkResult<vk::Pipeline>;
    fn create_compute_pipeline(&self, desc: &GfxComputePipelineDesc, name: &str) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // ---------------- descriptor ----------------
    fn create_descriptor_set_layout(&self, bindings: &[GfxDescriptorBinding]) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn allocate_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet>;
    fn free_descriptor_set(&self, set: vk::DescriptorSet);
    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[GfxDescriptorWrite]);

    // ---------------- sync ----------------
    fn create_fence(&self, signaled: bool, name: &str) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn create_semaphore(&self, name: &str) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // ---------------- command buffer ----------------
    fn allocate_command_buffer(&self, name: &str) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, cmd: vk::CommandBuffer);
    /// 重置并以 ONE_TIME_SUBMIT 开始录制
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, batch: &GfxBarrierBatch);
    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &GfxRenderPassBegin);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32);
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_count: [u32; 3]);
    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, blit: &GfxImageBlit);
    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, color: [f32; 4]);
    fn cmd_end_label(&self, cmd: vk::CommandBuffer);

    // ---------------- queue / swapchain ----------------
    fn queue_submit(&self, submit: &GfxSubmitInfo, fence: vk::Fence) -> VkResult<()>;
    fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout_ns: u64) -> VkResult<GfxAcquiredImage>;
    /// 返回值表示 suboptimal
    fn queue_present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> VkResult<bool>;
    fn surface_extent(&self) -> vk::Extent2D;
    fn surface_format(&self) -> vk::Format;
    fn swapchain_images(&self) -> Vec<vk::Image>;
    fn wait_idle(&self) -> VkResult<()>;
}

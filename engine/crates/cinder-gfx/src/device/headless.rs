//! 不访问 GPU 的设备实现
//!
//! 所有对象只是递增的 handle，命令被录制成 [`RecordedCommand`] 列表，
//! submit 会立即 signal 对应的 fence。可以用来 dry-run 一张渲染图、打印执行计划，
//! 也是单元测试使用的设备。

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
};

use ash::{
    prelude::VkResult,
    vk::{self, Handle},
};

use crate::{
    commands::{
        barrier::GfxBarrierBatch,
        render_pass_begin::{GfxImageBlit, GfxRenderPassBegin},
        submit_info::GfxSubmitInfo,
    },
    device::{GfxAcquiredImage, GfxDevice},
    resources::{
        buffer::GfxHostBuffer,
        descriptor::{GfxDescriptorBinding, GfxDescriptorWrite},
        image::{GfxImage, GfxImageDesc, GfxImageViewDesc},
        pipeline::{GfxComputePipelineDesc, GfxFramebufferDesc, GfxGraphicsPipelineDesc, GfxRenderPassDesc},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxObjectKind {
    Image,
    ImageView,
    Buffer,
    RenderPass,
    Framebuffer,
    PipelineLayout,
    Pipeline,
    DescriptorSetLayout,
    DescriptorSet,
    Fence,
    Semaphore,
    CommandBuffer,
}

/// 录制下来的一条命令
#[derive(Clone, Debug)]
pub enum RecordedCommand {
    Barrier(GfxBarrierBatch),
    BeginRenderPass(GfxRenderPassBegin),
    EndRenderPass,
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSet {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    PushConstants {
        stages: vk::ShaderStageFlags,
        offset: u32,
        size: usize,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch([u32; 3]),
    Blit(GfxImageBlit),
    BeginLabel(String),
    EndLabel,
}

#[derive(Default)]
struct HeadlessState {
    next_handle: u64,
    live: HashMap<GfxObjectKind, usize>,
    created: HashMap<GfxObjectKind, usize>,
    fail_next: Option<(GfxObjectKind, vk::Result)>,
    names: HashMap<u64, String>,

    images: HashMap<vk::Image, GfxImageDesc>,
    image_views: HashMap<vk::ImageView, GfxImageViewDesc>,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    flushes: Vec<(vk::Buffer, vk::DeviceSize, vk::DeviceSize)>,
    render_passes: HashMap<vk::RenderPass, GfxRenderPassDesc>,
    framebuffers: HashMap<vk::Framebuffer, GfxFramebufferDesc>,
    graphics_pipelines: HashMap<vk::Pipeline, GfxGraphicsPipelineDesc>,
    set_layouts: HashMap<vk::DescriptorSetLayout, Vec<GfxDescriptorBinding>>,
    descriptor_writes: Vec<(vk::DescriptorSet, GfxDescriptorWrite)>,

    fences: HashMap<vk::Fence, bool>,
    commands: HashMap<vk::CommandBuffer, Vec<RecordedCommand>>,
    recording: HashMap<vk::CommandBuffer, bool>,
    submissions: Vec<(GfxSubmitInfo, vk::Fence)>,
    presents: Vec<(u32, vk::Semaphore)>,

    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    next_image: u32,
    surface_extent: vk::Extent2D,
    surface_format: vk::Format,
    swapchain_images: Vec<vk::Image>,
}

impl HeadlessState {
    fn alloc<H: Handle>(&mut self, kind: GfxObjectKind, name: &str) -> VkResult<H> {
        match self.fail_next {
            Some((fail_kind, result)) if fail_kind == kind => {
                self.fail_next = None;
                return Err(result);
            }
            _ => {}
        }

        self.next_handle += 1;
        *self.live.entry(kind).or_default() += 1;
        *self.created.entry(kind).or_default() += 1;
        if !name.is_empty() {
            self.names.insert(self.next_handle, name.to_string());
        }
        Ok(H::from_raw(self.next_handle))
    }

    fn release<H: Handle + Copy>(&mut self, kind: GfxObjectKind, handle: H) -> bool {
        if handle.is_null() {
            return false;
        }
        let raw = handle.as_raw();
        let live = self.live.entry(kind).or_default();
        *live = live.saturating_sub(1);
        self.names.remove(&raw);
        true
    }

    fn push_command(&mut self, cmd: vk::CommandBuffer, command: RecordedCommand) {
        if !self.recording.get(&cmd).copied().unwrap_or(false) {
            log::warn!("headless: command recorded outside begin/end on {:?}", cmd);
        }
        self.commands.entry(cmd).or_default().push(command);
    }
}

pub struct HeadlessDevice {
    state: RefCell<HeadlessState>,
}

// new & init
impl HeadlessDevice {
    /// 默认 3 张 swapchain image，格式 B8G8R8A8_SRGB
    pub fn new(surface_extent: vk::Extent2D) -> Self {
        Self::with_swapchain(surface_extent, vk::Format::B8G8R8A8_SRGB, 3)
    }

    pub fn with_swapchain(surface_extent: vk::Extent2D, surface_format: vk::Format, image_count: u32) -> Self {
        let mut state = HeadlessState {
            surface_extent,
            surface_format,
            ..Default::default()
        };
        // swapchain image 不属于任何人，不计入 live 统计
        state.swapchain_images = (0..image_count)
            .map(|_| {
                state.next_handle += 1;
                vk::Image::from_raw(state.next_handle)
            })
            .collect();
        Self {
            state: RefCell::new(state),
        }
    }
}

// 测试与 dry-run 使用的控制接口
impl HeadlessDevice {
    /// 模拟窗口大小变化
    pub fn set_surface_extent(&self, extent: vk::Extent2D) {
        self.state.borrow_mut().surface_extent = extent;
    }

    /// 下一次 acquire 返回给定结果，SUCCESS 与 SUBOPTIMAL 仍然会给出 image index
    pub fn push_acquire_result(&self, result: vk::Result) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    pub fn push_present_result(&self, result: vk::Result) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    /// 下一次创建 `kind` 类型对象时失败
    pub fn fail_next_create(&self, kind: GfxObjectKind, result: vk::Result) {
        self.state.borrow_mut().fail_next = Some((kind, result));
    }
}

// getters
impl HeadlessDevice {
    #[inline]
    pub fn live_count(&self, kind: GfxObjectKind) -> usize {
        self.state.borrow().live.get(&kind).copied().unwrap_or(0)
    }

    /// 累计创建过的数量，不随销毁减少
    #[inline]
    pub fn created_count(&self, kind: GfxObjectKind) -> usize {
        self.state.borrow().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn debug_name(&self, handle: impl Handle) -> Option<String> {
        self.state.borrow().names.get(&handle.as_raw()).cloned()
    }

    pub fn commands(&self, cmd: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.state.borrow().commands.get(&cmd).cloned().unwrap_or_default()
    }

    pub fn image_desc(&self, image: vk::Image) -> Option<GfxImageDesc> {
        self.state.borrow().images.get(&image).copied()
    }

    pub fn image_view_desc(&self, view: vk::ImageView) -> Option<GfxImageViewDesc> {
        self.state.borrow().image_views.get(&view).copied()
    }

    pub fn render_pass_desc(&self, render_pass: vk::RenderPass) -> Option<GfxRenderPassDesc> {
        self.state.borrow().render_passes.get(&render_pass).cloned()
    }

    pub fn framebuffer_desc(&self, framebuffer: vk::Framebuffer) -> Option<GfxFramebufferDesc> {
        self.state.borrow().framebuffers.get(&framebuffer).cloned()
    }

    pub fn graphics_pipeline_desc(&self, pipeline: vk::Pipeline) -> Option<GfxGraphicsPipelineDesc> {
        self.state.borrow().graphics_pipelines.get(&pipeline).cloned()
    }

    pub fn set_layout_bindings(&self, layout: vk::DescriptorSetLayout) -> Option<Vec<GfxDescriptorBinding>> {
        self.state.borrow().set_layouts.get(&layout).cloned()
    }

    pub fn descriptor_writes(&self) -> Vec<(vk::DescriptorSet, GfxDescriptorWrite)> {
        self.state.borrow().descriptor_writes.clone()
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).cloned()
    }

    pub fn flushes(&self) -> Vec<(vk::Buffer, vk::DeviceSize, vk::DeviceSize)> {
        self.state.borrow().flushes.clone()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state.borrow().fences.get(&fence).copied()
    }

    pub fn submissions(&self) -> Vec<(GfxSubmitInfo, vk::Fence)> {
        self.state.borrow().submissions.clone()
    }

    pub fn presents(&self) -> Vec<(u32, vk::Semaphore)> {
        self.state.borrow().presents.clone()
    }
}

impl GfxDevice for HeadlessDevice {
    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> VkResult<GfxImage> {
        let mut state = self.state.borrow_mut();
        let handle: vk::Image = state.alloc(GfxObjectKind::Image, name)?;
        state.images.insert(handle, *desc);
        Ok(GfxImage {
            handle,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
        })
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::Image, image) {
            state.images.remove(&image);
        }
    }

    fn create_image_view(&self, _image: vk::Image, desc: &GfxImageViewDesc, name: &str) -> VkResult<vk::ImageView> {
        let mut state = self.state.borrow_mut();
        let view: vk::ImageView = state.alloc(GfxObjectKind::ImageView, name)?;
        state.image_views.insert(view, *desc);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::ImageView, view) {
            state.image_views.remove(&view);
        }
    }

    fn create_host_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> VkResult<GfxHostBuffer> {
        let mut state = self.state.borrow_mut();
        let handle: vk::Buffer = state.alloc(GfxObjectKind::Buffer, name)?;
        state.buffers.insert(handle, vec![0; size as usize]);
        Ok(GfxHostBuffer { handle, size, usage })
    }

    fn destroy_host_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::Buffer, buffer) {
            state.buffers.remove(&buffer);
        }
    }

    fn write_host_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let memory = state.buffers.get_mut(&buffer).ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        let begin = offset as usize;
        let end = begin + data.len();
        if end > memory.len() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        memory[begin..end].copy_from_slice(data);
        Ok(())
    }

    fn flush_host_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<()> {
        self.state.borrow_mut().flushes.push((buffer, offset, size));
        Ok(())
    }

    fn create_render_pass(&self, desc: &GfxRenderPassDesc, name: &str) -> VkResult<vk::RenderPass> {
        let mut state = self.state.borrow_mut();
        let render_pass: vk::RenderPass = state.alloc(GfxObjectKind::RenderPass, name)?;
        state.render_passes.insert(render_pass, desc.clone());
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::RenderPass, render_pass) {
            state.render_passes.remove(&render_pass);
        }
    }

    fn create_framebuffer(&self, desc: &GfxFramebufferDesc, name: &str) -> VkResult<vk::Framebuffer> {
        let mut state = self.state.borrow_mut();
        let framebuffer: vk::Framebuffer = state.alloc(GfxObjectKind::Framebuffer, name)?;
        state.framebuffers.insert(framebuffer, desc.clone());
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::Framebuffer, framebuffer) {
            state.framebuffers.remove(&framebuffer);
        }
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> VkResult<vk::PipelineLayout> {
        self.state.borrow_mut().alloc(GfxObjectKind::PipelineLayout, name)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.borrow_mut().release(GfxObjectKind::PipelineLayout, layout);
    }

    fn create_graphics_pipeline(&self, desc: &GfxGraphicsPipelineDesc, name: &str) -> VkResult<vk::Pipeline> {
        let mut state = self.state.borrow_mut();
        let pipeline: vk::Pipeline = state.alloc(GfxObjectKind::Pipeline, name)?;
        state.graphics_pipelines.insert(pipeline, desc.clone());
        Ok(pipeline)
    }

    fn create_compute_pipeline(&self, _desc: &GfxComputePipelineDesc, name: &str) -> VkResult<vk::Pipeline> {
        self.state.borrow_mut().alloc(GfxObjectKind::Pipeline, name)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::Pipeline, pipeline) {
            state.graphics_pipelines.remove(&pipeline);
        }
    }

    fn create_descriptor_set_layout(&self, bindings: &[GfxDescriptorBinding]) -> VkResult<vk::DescriptorSetLayout> {
        let mut state = self.state.borrow_mut();
        let layout: vk::DescriptorSetLayout = state.alloc(GfxObjectKind::DescriptorSetLayout, "")?;
        state.set_layouts.insert(layout, bindings.to_vec());
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::DescriptorSetLayout, layout) {
            state.set_layouts.remove(&layout);
        }
    }

    fn allocate_descriptor_set(&self, _layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet> {
        self.state.borrow_mut().alloc(GfxObjectKind::DescriptorSet, "")
    }

    fn free_descriptor_set(&self, set: vk::DescriptorSet) {
        self.state.borrow_mut().release(GfxObjectKind::DescriptorSet, set);
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[GfxDescriptorWrite]) {
        self.state.borrow_mut().descriptor_writes.extend(writes.iter().map(|write| (set, *write)));
    }

    fn create_fence(&self, signaled: bool, name: &str) -> VkResult<vk::Fence> {
        let mut state = self.state.borrow_mut();
        let fence: vk::Fence = state.alloc(GfxObjectKind::Fence, name)?;
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::Fence, fence) {
            state.fences.remove(&fence);
        }
    }

    /// 没有 GPU 在运行，未 signal 的 fence 永远不会被 signal，直接返回 TIMEOUT
    fn wait_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        match self.state.borrow().fences.get(&fence) {
            Some(true) => Ok(()),
            Some(false) => Err(vk::Result::TIMEOUT),
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let signaled = state.fences.get_mut(&fence).ok_or(vk::Result::ERROR_UNKNOWN)?;
        *signaled = false;
        Ok(())
    }

    fn create_semaphore(&self, name: &str) -> VkResult<vk::Semaphore> {
        self.state.borrow_mut().alloc(GfxObjectKind::Semaphore, name)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().release(GfxObjectKind::Semaphore, semaphore);
    }

    fn allocate_command_buffer(&self, name: &str) -> VkResult<vk::CommandBuffer> {
        self.state.borrow_mut().alloc(GfxObjectKind::CommandBuffer, name)
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        let mut state = self.state.borrow_mut();
        if state.release(GfxObjectKind::CommandBuffer, cmd) {
            state.commands.remove(&cmd);
            state.recording.remove(&cmd);
        }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        state.commands.insert(cmd, Vec::new());
        state.recording.insert(cmd, true);
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        match state.recording.get_mut(&cmd) {
            Some(recording) if *recording => {
                *recording = false;
                Ok(())
            }
            _ => Err(vk::Result::ERROR_VALIDATION_FAILED_EXT),
        }
    }

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, batch: &GfxBarrierBatch) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::Barrier(batch.clone()));
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &GfxRenderPassBegin) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::BeginRenderPass(begin.clone()));
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::BindPipeline { bind_point, pipeline });
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::BindDescriptorSet { bind_point, layout, set });
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.state.borrow_mut().push_command(
            cmd,
            RecordedCommand::PushConstants {
                stages,
                offset,
                size: data.len(),
            },
        );
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::BindVertexBuffer { binding, buffer, offset });
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        self.state.borrow_mut().push_command(
            cmd,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_count: [u32; 3]) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::Dispatch(group_count));
    }

    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, blit: &GfxImageBlit) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::Blit(*blit));
    }

    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, _color: [f32; 4]) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::BeginLabel(label.to_string()));
    }

    fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        self.state.borrow_mut().push_command(cmd, RecordedCommand::EndLabel);
    }

    fn queue_submit(&self, submit: &GfxSubmitInfo, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.borrow_mut();
        let still_recording =
            submit.command_buffers.iter().find(|cmd| state.recording.get(*cmd).copied().unwrap_or(false)).copied();
        if let Some(cmd) = still_recording {
            log::error!("headless: submitting {:?} while it is still recording", cmd);
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        if let Some(signaled) = state.fences.get_mut(&fence) {
            *signaled = true;
        }
        state.submissions.push((submit.clone(), fence));
        Ok(())
    }

    fn acquire_next_image(&self, _semaphore: vk::Semaphore, _timeout_ns: u64) -> VkResult<GfxAcquiredImage> {
        let mut state = self.state.borrow_mut();
        let suboptimal = match state.acquire_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(err) => return Err(err),
        };
        let image_count = state.swapchain_images.len().max(1) as u32;
        let image_index = state.next_image;
        state.next_image = (image_index + 1) % image_count;
        Ok(GfxAcquiredImage {
            image_index,
            suboptimal,
        })
    }

    fn queue_present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> VkResult<bool> {
        let mut state = self.state.borrow_mut();
        let suboptimal = match state.present_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(err) => return Err(err),
        };
        state.presents.push((image_index, wait_semaphore));
        Ok(suboptimal)
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.state.borrow().surface_extent
    }

    fn surface_format(&self) -> vk::Format {
        self.state.borrow().surface_format
    }

    fn swapchain_images(&self) -> Vec<vk::Image> {
        self.state.borrow().swapchain_images.clone()
    }

    fn wait_idle(&self) -> VkResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 64, height: 32 };

    #[test]
    fn test_object_accounting() {
        let device = HeadlessDevice::new(EXTENT);
        let fence = device.create_fence(true, "fence").unwrap();
        let semaphore = device.create_semaphore("semaphore").unwrap();
        assert_eq!(device.live_count(GfxObjectKind::Fence), 1);
        assert_eq!(device.debug_name(fence).as_deref(), Some("fence"));

        device.destroy_fence(fence);
        device.destroy_semaphore(semaphore);
        device.destroy_semaphore(vk::Semaphore::null());
        // 释放之后名字也被移除
        assert_eq!(device.debug_name(fence), None);
        assert_eq!(device.live_count(GfxObjectKind::Fence), 0);
        assert_eq!(device.live_count(GfxObjectKind::Semaphore), 0);
        assert_eq!(device.created_count(GfxObjectKind::Fence), 1);
    }

    #[test]
    fn test_submit_signals_fence() {
        let device = HeadlessDevice::new(EXTENT);
        let fence = device.create_fence(false, "").unwrap();
        assert_eq!(device.wait_fence(fence, u64::MAX), Err(vk::Result::TIMEOUT));

        let cmd = device.allocate_command_buffer("cmd").unwrap();
        device.begin_command_buffer(cmd).unwrap();
        device.cmd_draw(cmd, 3, 1);
        // 还在录制中，不允许提交
        assert!(device.queue_submit(&GfxSubmitInfo::new(&[cmd]), fence).is_err());
        device.end_command_buffer(cmd).unwrap();
        device.queue_submit(&GfxSubmitInfo::new(&[cmd]), fence).unwrap();

        assert_eq!(device.wait_fence(fence, u64::MAX), Ok(()));
        assert_eq!(device.commands(cmd).len(), 1);
    }

    #[test]
    fn test_scripted_acquire() {
        let device = HeadlessDevice::with_swapchain(EXTENT, vk::Format::B8G8R8A8_UNORM, 2);
        device.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);
        device.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);

        let first = device.acquire_next_image(vk::Semaphore::null(), u64::MAX).unwrap();
        assert_eq!(first.image_index, 0);
        assert!(first.suboptimal);
        assert_eq!(
            device.acquire_next_image(vk::Semaphore::null(), u64::MAX),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
        let second = device.acquire_next_image(vk::Semaphore::null(), u64::MAX).unwrap();
        assert_eq!(second.image_index, 1);
        let third = device.acquire_next_image(vk::Semaphore::null(), u64::MAX).unwrap();
        assert_eq!(third.image_index, 0);
    }

    #[test]
    fn test_host_buffer_bounds() {
        let device = HeadlessDevice::new(EXTENT);
        let buffer = device.create_host_buffer(8, vk::BufferUsageFlags::UNIFORM_BUFFER, "ubo").unwrap();
        device.write_host_buffer(buffer.handle, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            device.write_host_buffer(buffer.handle, 6, &[1, 2, 3]),
            Err(vk::Result::ERROR_MEMORY_MAP_FAILED)
        );
        assert_eq!(device.buffer_contents(buffer.handle).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_fail_next_create() {
        let device = HeadlessDevice::new(EXTENT);
        device.fail_next_create(GfxObjectKind::Pipeline, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let desc = GfxComputePipelineDesc {
            layout: vk::PipelineLayout::null(),
            stage: crate::resources::pipeline::GfxShaderStage {
                stage: vk::ShaderStageFlags::COMPUTE,
                module: vk::ShaderModule::null(),
                entry_point: "main".to_string(),
            },
        };
        assert_eq!(device.create_compute_pipeline(&desc, "cs"), Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert!(device.create_compute_pipeline(&desc, "cs").is_ok());
    }
}

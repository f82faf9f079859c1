//! 基于 ash + vk-mem 的 [`GfxDevice`] 实现
//!
//! instance、physical device、logical device 以及 swapchain 的创建不在这里，
//! 由应用层完成后交给 [`AshDevice::new`]。`AshDevice` 只负责自己创建的 pool 和 allocator。

use std::{cell::RefCell, collections::HashMap, ffi::CString};

use ash::{prelude::VkResult, vk};
use itertools::Itertools;
use vk_mem::Alloc;

use crate::{
    commands::{
        barrier::GfxBarrierBatch,
        render_pass_begin::{GfxImageBlit, GfxRenderPassBegin},
        submit_info::GfxSubmitInfo,
    },
    device::{GfxAcquiredImage, GfxDevice},
    resources::{
        buffer::GfxHostBuffer,
        descriptor::{GfxDescriptorBinding, GfxDescriptorResource, GfxDescriptorWrite},
        image::{GfxImage, GfxImageDesc, GfxImageViewDesc},
        pipeline::{GfxComputePipelineDesc, GfxFramebufferDesc, GfxGraphicsPipelineDesc, GfxRenderPassDesc},
    },
};

/// 应用层创建好的 swapchain
#[derive(Clone, Debug)]
pub struct AshSwapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

#[derive(Clone, Debug)]
pub struct AshDeviceSettings {
    pub descriptor_pool_max_sets: u32,
    pub descriptor_pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl Default for AshDeviceSettings {
    fn default() -> Self {
        let size = |ty: vk::DescriptorType, descriptor_count: u32| vk::DescriptorPoolSize { ty, descriptor_count };
        Self {
            descriptor_pool_max_sets: 256,
            descriptor_pool_sizes: vec![
                size(vk::DescriptorType::UNIFORM_BUFFER, 256),
                size(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 64),
                size(vk::DescriptorType::STORAGE_BUFFER, 256),
                size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 256),
                size(vk::DescriptorType::SAMPLED_IMAGE, 128),
                size(vk::DescriptorType::STORAGE_IMAGE, 128),
                size(vk::DescriptorType::INPUT_ATTACHMENT, 32),
            ],
        }
    }
}

struct HostAllocation {
    allocation: vk_mem::Allocation,
    mapped: *mut u8,
    size: vk::DeviceSize,
}

pub struct AshDevice {
    device: ash::Device,
    swapchain_loader: ash::khr::swapchain::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    allocator: vk_mem::Allocator,

    queue: vk::Queue,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,

    swapchain: RefCell<AshSwapchain>,

    images: RefCell<HashMap<vk::Image, vk_mem::Allocation>>,
    buffers: RefCell<HashMap<vk::Buffer, HostAllocation>>,
}

// new & init
impl AshDevice {
    /// - `queue_family_index`：graphics + present 所在的 queue family，使用其中第 0 个 queue
    /// - `enable_debug_utils`：instance 是否启用了 `VK_EXT_debug_utils`
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
        swapchain: AshSwapchain,
        enable_debug_utils: bool,
        settings: &AshDeviceSettings,
    ) -> VkResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);
        let debug_utils = enable_debug_utils.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, &device, physical_device);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci)? };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let command_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )?
        };

        let descriptor_pool = unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(settings.descriptor_pool_max_sets)
                    .pool_sizes(&settings.descriptor_pool_sizes),
                None,
            )
        };
        let descriptor_pool = match descriptor_pool {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };

        log::info!(
            "AshDevice created: swapchain {}x{} {:?}, {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format,
            swapchain.images.len()
        );

        Ok(Self {
            device,
            swapchain_loader,
            debug_utils,
            allocator,
            queue,
            command_pool,
            descriptor_pool,
            swapchain: RefCell::new(swapchain),
            images: RefCell::new(HashMap::new()),
            buffers: RefCell::new(HashMap::new()),
        })
    }

    /// resize 之后由应用层重建 swapchain 并替换进来，返回旧的 swapchain 由调用者销毁
    pub fn replace_swapchain(&self, swapchain: AshSwapchain) -> AshSwapchain {
        log::info!(
            "swapchain replaced: {}x{}, {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len()
        );
        self.swapchain.replace(swapchain)
    }
}

// getters
impl AshDevice {
    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    #[inline]
    pub fn swapchain_handle(&self) -> vk::SwapchainKHR {
        self.swapchain.borrow().handle
    }
}

// tools
impl AshDevice {
    fn set_debug_name(&self, handle: impl vk::Handle, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        if name.is_empty() {
            return;
        }
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(name.as_c_str());
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    fn entry_point(name: &str) -> VkResult<CString> {
        CString::new(name).map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)
    }
}

impl GfxDevice for AshDevice {
    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> VkResult<GfxImage> {
        let image_info = vk::ImageCreateInfo::default()
            .flags(desc.flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, allocation) = unsafe { self.allocator.create_image(&image_info, &alloc_info)? };
        self.images.borrow_mut().insert(image, allocation);
        self.set_debug_name(image, &format!("Image::{name}"));

        Ok(GfxImage {
            handle: image,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
        })
    }

    fn destroy_image(&self, image: vk::Image) {
        let allocation = self.images.borrow_mut().remove(&image);
        if let Some(mut allocation) = allocation {
            unsafe { self.allocator.destroy_image(image, &mut allocation) };
        }
    }

    fn create_image_view(&self, image: vk::Image, desc: &GfxImageViewDesc, name: &str) -> VkResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: desc.base_array_layer,
                layer_count: desc.layer_count,
            });
        let view = unsafe { self.device.create_image_view(&view_info, None)? };
        self.set_debug_name(view, &format!("ImageView::{name}"));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_host_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> VkResult<GfxHostBuffer> {
        let buffer_info = vk::BufferCreateInfo::default().size(size).usage(usage);
        let alloc_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ..Default::default()
        };

        let (buffer, mut allocation) = unsafe { self.allocator.create_buffer(&buffer_info, &alloc_info)? };
        let mapped = match unsafe { self.allocator.map_memory(&mut allocation) } {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                return Err(e);
            }
        };
        self.buffers.borrow_mut().insert(
            buffer,
            HostAllocation {
                allocation,
                mapped,
                size,
            },
        );
        self.set_debug_name(buffer, &format!("Buffer::{name}"));

        Ok(GfxHostBuffer {
            handle: buffer,
            size,
            usage,
        })
    }

    fn destroy_host_buffer(&self, buffer: vk::Buffer) {
        let host = self.buffers.borrow_mut().remove(&buffer);
        if let Some(mut host) = host {
            unsafe {
                self.allocator.unmap_memory(&mut host.allocation);
                self.allocator.destroy_buffer(buffer, &mut host.allocation);
            }
        }
    }

    fn write_host_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> VkResult<()> {
        let buffers = self.buffers.borrow();
        let host = buffers.get(&buffer).ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        if offset + data.len() as vk::DeviceSize > host.size {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), host.mapped.add(offset as usize), data.len());
        }
        Ok(())
    }

    fn flush_host_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> VkResult<()> {
        let buffers = self.buffers.borrow();
        let host = buffers.get(&buffer).ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
        self.allocator.flush_allocation(&host.allocation, offset, size)
    }

    fn create_render_pass(&self, desc: &GfxRenderPassDesc, name: &str) -> VkResult<vk::RenderPass> {
        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&desc.color_refs);
        if let Some(depth_ref) = desc.depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let view_masks = [desc.view_mask];
        let mut multiview_info =
            vk::RenderPassMultiviewCreateInfo::default().view_masks(&view_masks).correlation_masks(&view_masks);

        let mut render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&desc.attachments)
            .subpasses(std::slice::from_ref(&subpass));
        if desc.view_mask != 0 {
            render_pass_info = render_pass_info.push_next(&mut multiview_info);
        }

        let render_pass = unsafe { self.device.create_render_pass(&render_pass_info, None)? };
        self.set_debug_name(render_pass, &format!("RenderPass::{name}"));
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&self, desc: &GfxFramebufferDesc, name: &str) -> VkResult<vk::Framebuffer> {
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(desc.render_pass)
            .attachments(&desc.attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(desc.layers);
        let framebuffer = unsafe { self.device.create_framebuffer(&framebuffer_info, None)? };
        self.set_debug_name(framebuffer, &format!("Framebuffer::{name}"));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> VkResult<vk::PipelineLayout> {
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info, None)? };
        self.set_debug_name(layout, &format!("PipelineLayout::{name}"));
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &GfxGraphicsPipelineDesc, name: &str) -> VkResult<vk::Pipeline> {
        let entry_points =
            desc.stages.iter().map(|stage| Self::entry_point(&stage.entry_point)).collect::<VkResult<Vec<_>>>()?;
        let stages = desc
            .stages
            .iter()
            .zip(&entry_points)
            .map(|(stage, entry)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(entry.as_c_str())
            })
            .collect_vec();

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_input.bindings)
            .vertex_attribute_descriptions(&desc.vertex_input.attributes);
        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        // viewport 与 scissor 固定为 render area
        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: desc.extent.width as f32,
            height: desc.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: desc.extent,
        }];
        let viewport_info = vk::PipelineViewportStateCreateInfo::default().viewports(&viewports).scissors(&scissors);

        let rasterize_info = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .line_width(1.0);
        let msaa_info =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_compare.is_some())
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(desc.depth_compare.unwrap_or(vk::CompareOp::ALWAYS))
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        // 混合设置：需要为每个 color attachment 分别指定
        let blend_states = (0..desc.color_attachment_count)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(desc.blend_enable)
                    .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                    .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(vk::BlendFactor::ONE)
                    .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect_vec();
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_info)
            .multisample_state(&msaa_info)
            .depth_stencil_state(&depth_stencil_info)
            .color_blend_state(&color_blend_info)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
                .map_err(|(_, e)| e)?
        };
        let pipeline = pipelines.first().copied().ok_or(vk::Result::ERROR_UNKNOWN)?;
        self.set_debug_name(pipeline, &format!("GraphicsPipeline::{name}"));
        Ok(pipeline)
    }

    fn create_compute_pipeline(&self, desc: &GfxComputePipelineDesc, name: &str) -> VkResult<vk::Pipeline> {
        let entry_point = Self::entry_point(&desc.stage.entry_point)?;
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(desc.stage.module)
            .name(entry_point.as_c_str());
        let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(desc.layout);

        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
                .map_err(|(_, e)| e)?
        };
        let pipeline = pipelines.first().copied().ok_or(vk::Result::ERROR_UNKNOWN)?;
        self.set_debug_name(pipeline, &format!("ComputePipeline::{name}"));
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_descriptor_set_layout(&self, bindings: &[GfxDescriptorBinding]) -> VkResult<vk::DescriptorSetLayout> {
        let bindings = bindings.iter().map(GfxDescriptorBinding::to_vk).collect_vec();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn allocate_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> VkResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(self.descriptor_pool).set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        sets.first().copied().ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    fn free_descriptor_set(&self, set: vk::DescriptorSet) {
        if set == vk::DescriptorSet::null() {
            return;
        }
        if let Err(e) = unsafe { self.device.free_descriptor_sets(self.descriptor_pool, &[set]) } {
            log::warn!("failed to free descriptor set {:?}: {:?}", set, e);
        }
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[GfxDescriptorWrite]) {
        enum DescriptorInfo {
            Buffer([vk::DescriptorBufferInfo; 1]),
            Image([vk::DescriptorImageInfo; 1]),
        }

        let infos = writes
            .iter()
            .map(|write| match write.resource {
                GfxDescriptorResource::Buffer { buffer, offset, range } => {
                    DescriptorInfo::Buffer([vk::DescriptorBufferInfo { buffer, offset, range }])
                }
                GfxDescriptorResource::Image { view, layout, sampler } => {
                    DescriptorInfo::Image([vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: layout,
                    }])
                }
            })
            .collect_vec();

        let vk_writes = writes
            .iter()
            .zip(&infos)
            .map(|(write, info)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(write.descriptor_type);
                match info {
                    DescriptorInfo::Buffer(buffer_info) => vk_write.buffer_info(buffer_info),
                    DescriptorInfo::Image(image_info) => vk_write.image_info(image_info),
                }
            })
            .collect_vec();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_fence(&self, signaled: bool, name: &str) -> VkResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)? };
        self.set_debug_name(fence, &format!("Fence::{name}"));
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(std::slice::from_ref(&fence)) }
    }

    fn create_semaphore(&self, name: &str) -> VkResult<vk::Semaphore> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        self.set_debug_name(semaphore, &format!("Semaphore::{name}"));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn allocate_command_buffer(&self, name: &str) -> VkResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmds = unsafe { self.device.allocate_command_buffers(&alloc_info)? };
        let cmd = cmds.first().copied().ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;
        self.set_debug_name(cmd, &format!("CommandBuffer::{name}"));
        Ok(cmd)
    }

    fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(self.command_pool, &[cmd]) };
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        // pool 带有 RESET_COMMAND_BUFFER，begin 会隐式 reset
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_pipeline_barrier(&self, cmd: vk::CommandBuffer, batch: &GfxBarrierBatch) {
        let image_barriers = batch.image_barriers.iter().map(|b| *b.inner()).collect_vec();
        let buffer_barriers = batch.buffer_barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency_info) };
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &GfxRenderPassBegin) {
        let clear_values = begin.clear_values.iter().map(|c| c.to_vk()).collect_vec();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(begin.render_area)
            .clear_values(&clear_values);
        unsafe { self.device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE) };
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) };
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) };
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe { self.device.cmd_bind_descriptor_sets(cmd, bind_point, layout, 0, &[set], &[]) };
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, offset, data) };
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, binding, &[buffer], &[offset]) };
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, instance_count, 0, 0) };
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_count: [u32; 3]) {
        unsafe { self.device.cmd_dispatch(cmd, group_count[0], group_count[1], group_count[2]) };
    }

    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, blit: &GfxImageBlit) {
        unsafe {
            self.device.cmd_blit_image(
                cmd,
                blit.src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                blit.dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit.to_vk()],
                blit.filter,
            )
        };
    }

    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, color: [f32; 4]) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(label) else {
            return;
        };
        unsafe {
            debug_utils
                .cmd_begin_debug_utils_label(cmd, &vk::DebugUtilsLabelEXT::default().label_name(&name).color(color));
        }
    }

    fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(cmd) };
        }
    }

    fn queue_submit(&self, submit: &GfxSubmitInfo, fence: vk::Fence) -> VkResult<()> {
        let command_buffer_infos = submit.command_buffer_infos();
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .wait_semaphore_infos(&submit.wait_infos)
            .signal_semaphore_infos(&submit.signal_infos);
        unsafe { self.device.queue_submit2(self.queue, std::slice::from_ref(&submit_info), fence) }
    }

    fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout_ns: u64) -> VkResult<GfxAcquiredImage> {
        let swapchain = self.swapchain.borrow().handle;
        let (image_index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())?
        };
        Ok(GfxAcquiredImage {
            image_index,
            suboptimal,
        })
    }

    fn queue_present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> VkResult<bool> {
        let swapchains = [self.swapchain.borrow().handle];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.swapchain_loader.queue_present(self.queue, &present_info) }
    }

    fn surface_extent(&self) -> vk::Extent2D {
        self.swapchain.borrow().extent
    }

    fn surface_format(&self) -> vk::Format {
        self.swapchain.borrow().format
    }

    fn swapchain_images(&self) -> Vec<vk::Image> {
        self.swapchain.borrow().images.clone()
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for AshDevice {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("device_wait_idle failed while dropping AshDevice: {:?}", e);
        }

        let leaked_images = self.images.get_mut().drain().collect_vec();
        if !leaked_images.is_empty() {
            log::warn!("{} images were not destroyed before AshDevice drop", leaked_images.len());
        }
        for (image, mut allocation) in leaked_images {
            unsafe { self.allocator.destroy_image(image, &mut allocation) };
        }

        let leaked_buffers = self.buffers.get_mut().drain().collect_vec();
        if !leaked_buffers.is_empty() {
            log::warn!("{} buffers were not destroyed before AshDevice drop", leaked_buffers.len());
        }
        for (buffer, mut host) in leaked_buffers {
            unsafe {
                self.allocator.unmap_memory(&mut host.allocation);
                self.allocator.destroy_buffer(buffer, &mut host.allocation);
            }
        }

        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

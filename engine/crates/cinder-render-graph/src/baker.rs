//! Pass 烘焙
//!
//! 把 pass 的声明变成 native 对象：render pass、framebuffer、pipeline layout、pipeline。
//! descriptor set layout 来自 [`RgDescriptorLayoutCache`]，不归 pass 所有。

use ash::vk::{self, Handle};
use cinder_gfx::{
    commands::render_pass_begin::GfxClearValue,
    device::GfxDevice,
    resources::{
        image::{GfxImage, GfxImageViewDesc, is_depth_format},
        pipeline::{
            GfxComputePipelineDesc, GfxFramebufferDesc, GfxGraphicsPipelineDesc, GfxRenderPassDesc,
            GfxVertexInputDesc,
        },
    },
};

use crate::{
    declaration::{RgLoadOp, RgPassDecl, RgVertexBindingGroup},
    descriptor_cache::{RgDescriptor, RgDescriptorLayoutCache},
    error::{RgError, RgResult},
    shader::RgVertexAttribute,
    usage::RgUsage,
};

/// 已经解析到实际 image 的 output attachment
#[derive(Clone, Debug)]
pub(crate) struct RgOutputTarget {
    pub name: String,
    pub load_op: RgLoadOp,
    pub layer: Option<u32>,
    pub image: GfxImage,
    /// 覆盖全部 layer 的 view
    pub view: vk::ImageView,
    /// 本 pass 结束时的用法，决定 attachment 的 layout
    pub usage: RgUsage,
}

/// `layers` 个 view 的 multiview mask
#[inline]
pub fn view_mask_for_layers(layers: u32) -> u32 {
    if layers >= 32 { u32::MAX } else { (1u32 << layers) - 1 }
}

/// 按 binding group 把顶点属性划分到各个 vertex binding
///
/// - location 从 0 开始连续分配，offset 在 binding 内累加，stride 为 binding 内属性大小之和
/// - 没有 group 时所有属性属于 binding 0（逐顶点）
/// - 末尾没有凑满一个 group 的属性并入最后一个完整的 binding
pub fn build_vertex_input(attributes: &[RgVertexAttribute], groups: &[RgVertexBindingGroup]) -> GfxVertexInputDesc {
    let mut desc = GfxVertexInputDesc::default();
    if attributes.is_empty() {
        return desc;
    }

    let groups = groups.iter().filter(|group| group.attribute_count > 0).collect::<Vec<_>>();
    let mut binding = 0u32;
    let mut offset = 0u32;
    let mut count = 0u32;
    for (location, attribute) in attributes.iter().enumerate() {
        desc.attributes.push(vk::VertexInputAttributeDescription {
            location: location as u32,
            binding,
            format: attribute.format,
            offset,
        });
        offset += attribute.size;
        count += 1;

        if let Some(group) = groups.get(binding as usize) {
            if count == group.attribute_count {
                desc.bindings.push(vk::VertexInputBindingDescription {
                    binding,
                    stride: offset,
                    input_rate: group.input_rate,
                });
                binding += 1;
                offset = 0;
                count = 0;
            }
        }
    }

    if count > 0 {
        let trailing = desc.attributes.len() - count as usize;
        match desc.bindings.last_mut() {
            Some(last) => {
                for attribute in &mut desc.attributes[trailing..] {
                    attribute.binding = last.binding;
                    attribute.offset += last.stride;
                }
                last.stride += offset;
            }
            None => {
                let input_rate = groups.first().map(|group| group.input_rate).unwrap_or(vk::VertexInputRate::VERTEX);
                desc.bindings.push(vk::VertexInputBindingDescription {
                    binding: 0,
                    stride: offset,
                    input_rate,
                });
            }
        }
    }

    desc
}

/// 烘焙完成的 pass
///
/// render pass、framebuffer、pipeline、pipeline layout 以及单 layer 的 view 归 pass 所有，
/// 由 graph 在销毁时调用 [`RgBakedPass::destroy`]
#[derive(Debug)]
pub struct RgBakedPass {
    name: String,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    render_area: vk::Rect2D,
    view_mask: u32,
    clear_values: Vec<GfxClearValue>,
    color_count: u32,
    has_depth: bool,

    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    descriptor: Option<RgDescriptor>,
    vertex_input: GfxVertexInputDesc,

    output_layouts: Vec<(String, vk::ImageLayout)>,
    owned_views: Vec<vk::ImageView>,
}

// new & bake
impl RgBakedPass {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            render_area: vk::Rect2D::default(),
            view_mask: 0,
            clear_values: vec![],
            color_count: 0,
            has_depth: false,
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            descriptor: None,
            vertex_input: GfxVertexInputDesc::default(),
            output_layouts: vec![],
            owned_views: vec![],
        }
    }

    /// 失败时已经创建的对象会被销毁
    pub(crate) fn bake(
        device: &dyn GfxDevice,
        cache: &mut RgDescriptorLayoutCache,
        decl: &RgPassDecl,
        targets: &[RgOutputTarget],
    ) -> RgResult<Self> {
        let mut baked = Self::empty(&decl.name);
        let result = baked.bake_render_pass(device, decl, targets).and_then(|_| baked.bake_pipeline(device, cache, decl));
        match result {
            Ok(()) => Ok(baked),
            Err(e) => {
                log::error!("failed to bake pass \"{}\": {}", decl.name, e);
                baked.destroy(device);
                Err(e)
            }
        }
    }

    fn bake_render_pass(
        &mut self,
        device: &dyn GfxDevice,
        decl: &RgPassDecl,
        targets: &[RgOutputTarget],
    ) -> RgResult<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let mut desc = GfxRenderPassDesc::default();
        let mut views = Vec::with_capacity(targets.len());
        let mut extent = vk::Extent2D::default();

        for (index, target) in targets.iter().enumerate() {
            let layout = target.usage.image_state().layout;
            let initial_layout = match target.load_op {
                RgLoadOp::Load => layout,
                RgLoadOp::Discard | RgLoadOp::Clear(_) => vk::ImageLayout::UNDEFINED,
            };
            let has_stencil = target.image.aspect().contains(vk::ImageAspectFlags::STENCIL);
            let (stencil_load_op, stencil_store_op) = if has_stencil {
                (target.load_op.to_vk(), vk::AttachmentStoreOp::STORE)
            } else {
                (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
            };
            desc.attachments.push(vk::AttachmentDescription {
                flags: vk::AttachmentDescriptionFlags::empty(),
                format: target.image.format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: target.load_op.to_vk(),
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op,
                stencil_store_op,
                initial_layout,
                final_layout: layout,
            });

            let reference = vk::AttachmentReference {
                attachment: index as u32,
                layout,
            };
            let is_depth = is_depth_format(target.image.format);
            if is_depth {
                if desc.depth_ref.is_some() {
                    return Err(RgError::MultipleDepthOutputs {
                        pass: decl.name.clone(),
                    });
                }
                desc.depth_ref = Some(reference);
            } else {
                desc.color_refs.push(reference);
            }

            self.clear_values.push(match target.load_op {
                RgLoadOp::Clear(value) => value,
                _ if is_depth => GfxClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                },
                _ => GfxClearValue::Color([0.0; 4]),
            });

            match target.layer {
                Some(layer) => {
                    if layer >= target.image.array_layers {
                        return Err(RgError::OutputLayerOutOfRange {
                            pass: decl.name.clone(),
                            name: target.name.clone(),
                            layer,
                            layer_count: target.image.array_layers,
                        });
                    }
                    let view = device.create_image_view(
                        target.image.handle,
                        &GfxImageViewDesc::single_layer(&target.image, layer),
                        &format!("{}-{}-layer{}", decl.name, target.name, layer),
                    )?;
                    self.owned_views.push(view);
                    views.push(view);
                }
                None => {
                    if target.image.array_layers > 1 {
                        desc.view_mask |= view_mask_for_layers(target.image.array_layers);
                    }
                    views.push(target.view);
                }
            }

            extent.width = extent.width.max(target.image.extent.width);
            extent.height = extent.height.max(target.image.extent.height);
            self.output_layouts.push((target.name.clone(), layout));
        }

        self.view_mask = desc.view_mask;
        self.color_count = desc.color_refs.len() as u32;
        self.has_depth = desc.depth_ref.is_some();
        self.render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };

        self.render_pass = device.create_render_pass(&desc, &decl.name)?;
        self.framebuffer = device.create_framebuffer(
            &GfxFramebufferDesc {
                render_pass: self.render_pass,
                attachments: views,
                extent,
                layers: 1,
            },
            &decl.name,
        )?;
        Ok(())
    }

    fn bake_pipeline(
        &mut self,
        device: &dyn GfxDevice,
        cache: &mut RgDescriptorLayoutCache,
        decl: &RgPassDecl,
    ) -> RgResult<()> {
        let Some(program) = &decl.shader else {
            return Ok(());
        };
        if !program.is_valid_combination() {
            return Err(RgError::InvalidShaderStages {
                pass: decl.name.clone(),
                stages: program.stage_flags(),
            });
        }
        if !program.is_compute() && self.render_pass.is_null() {
            return Err(RgError::MissingRenderTarget {
                pass: decl.name.clone(),
            });
        }

        let spec = program.layout_spec();
        if !spec.is_empty() {
            self.descriptor = Some(cache.get_descriptor(device, &spec)?);
        }
        let set_layouts = self.descriptor.iter().map(|descriptor| descriptor.layout).collect::<Vec<_>>();
        self.pipeline_layout = device.create_pipeline_layout(&set_layouts, &decl.push_constants, &decl.name)?;
        self.bind_point = program.bind_point();

        let mut stages = program.gfx_stages();
        self.pipeline = if program.is_compute() {
            let desc = GfxComputePipelineDesc {
                layout: self.pipeline_layout,
                stage: stages.remove(0),
            };
            device.create_compute_pipeline(&desc, &decl.name)?
        } else {
            self.vertex_input = build_vertex_input(&program.vertex_attributes, &decl.vertex_groups);
            let state = &decl.pipeline_state;
            let desc = GfxGraphicsPipelineDesc {
                layout: self.pipeline_layout,
                render_pass: self.render_pass,
                stages,
                vertex_input: self.vertex_input.clone(),
                topology: state.topology,
                cull_mode: state.cull_mode,
                front_face: state.front_face,
                depth_compare: self.has_depth.then_some(state.depth_compare),
                depth_write: self.has_depth && state.depth_write,
                blend_enable: state.blend_enable,
                color_attachment_count: self.color_count,
                extent: self.render_area.extent,
            };
            device.create_graphics_pipeline(&desc, &decl.name)?
        };
        Ok(())
    }

    /// 可以重复调用
    pub(crate) fn destroy(&mut self, device: &dyn GfxDevice) {
        device.destroy_pipeline(std::mem::replace(&mut self.pipeline, vk::Pipeline::null()));
        device.destroy_pipeline_layout(std::mem::replace(&mut self.pipeline_layout, vk::PipelineLayout::null()));
        device.destroy_framebuffer(std::mem::replace(&mut self.framebuffer, vk::Framebuffer::null()));
        device.destroy_render_pass(std::mem::replace(&mut self.render_pass, vk::RenderPass::null()));
        for view in self.owned_views.drain(..) {
            device.destroy_image_view(view);
        }
        self.descriptor = None;
    }
}

// getters
impl RgBakedPass {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 没有 output 的 pass 为 null
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// 所有 output 的最大宽高
    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        self.render_area
    }

    #[inline]
    pub fn view_mask(&self) -> u32 {
        self.view_mask
    }

    #[inline]
    pub fn clear_values(&self) -> &[GfxClearValue] {
        &self.clear_values
    }

    /// 没有 shader 的 pass 为 null
    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    #[inline]
    pub fn descriptor(&self) -> Option<RgDescriptor> {
        self.descriptor
    }

    #[inline]
    pub fn vertex_input(&self) -> &GfxVertexInputDesc {
        &self.vertex_input
    }

    #[inline]
    pub fn has_depth(&self) -> bool {
        self.has_depth
    }

    /// output attachment 在本 pass 中的 layout
    pub fn output_layout(&self, name: &str) -> Option<vk::ImageLayout> {
        self.output_layouts.iter().find(|(n, _)| n == name).map(|(_, layout)| *layout)
    }
}

#[cfg(test)]
mod tests {
    use cinder_gfx::device::headless::{GfxObjectKind, HeadlessDevice};

    use super::*;
    use crate::{
        declaration::{RgClearValue, RgPassBuilder},
        shader::{RgShaderBinding, RgShaderProgram},
    };

    fn attr(format: vk::Format) -> RgVertexAttribute {
        RgVertexAttribute::new(format).unwrap()
    }

    fn group(attribute_count: u32, input_rate: vk::VertexInputRate) -> RgVertexBindingGroup {
        RgVertexBindingGroup {
            attribute_count,
            input_rate,
        }
    }

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(vk::Extent2D {
            width: 800,
            height: 600,
        })
    }

    fn target(device: &HeadlessDevice, name: &str, format: vk::Format, layers: u32, load_op: RgLoadOp) -> RgOutputTarget {
        let image = device
            .create_image(
                &cinder_gfx::resources::image::GfxImageDesc {
                    format,
                    extent: vk::Extent2D {
                        width: 256,
                        height: 128,
                    },
                    mip_levels: 1,
                    array_layers: layers,
                    usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    flags: vk::ImageCreateFlags::empty(),
                },
                name,
            )
            .unwrap();
        let view = device.create_image_view(image.handle, &GfxImageViewDesc::whole(&image), name).unwrap();
        let usage = if is_depth_format(format) { RgUsage::DEPTH_ATTACHMENT } else { RgUsage::COLOR_ATTACHMENT };
        RgOutputTarget {
            name: name.to_string(),
            load_op,
            layer: None,
            image,
            view,
            usage,
        }
    }

    fn graphics_program() -> RgShaderProgram {
        RgShaderProgram::new()
            .with_stage(
                vk::ShaderStageFlags::VERTEX,
                vk::ShaderModule::null(),
                "main",
                vec![RgShaderBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER)],
            )
            .with_stage(vk::ShaderStageFlags::FRAGMENT, vk::ShaderModule::null(), "main", vec![])
            .with_vertex_attributes(vec![attr(vk::Format::R32G32B32_SFLOAT), attr(vk::Format::R32G32_SFLOAT)])
    }

    #[test]
    fn test_vertex_input_exact_groups() {
        let desc = build_vertex_input(
            &[attr(vk::Format::R32G32B32_SFLOAT), attr(vk::Format::R32G32_SFLOAT), attr(vk::Format::R32G32B32A32_SFLOAT)],
            &[group(2, vk::VertexInputRate::VERTEX), group(1, vk::VertexInputRate::INSTANCE)],
        );
        assert_eq!(desc.bindings.len(), 2);
        assert_eq!(desc.bindings[0].stride, 20);
        assert_eq!(desc.bindings[1].stride, 16);
        assert_eq!(desc.bindings[1].input_rate, vk::VertexInputRate::INSTANCE);
        let offsets = desc.attributes.iter().map(|a| (a.location, a.binding, a.offset)).collect::<Vec<_>>();
        assert_eq!(offsets, vec![(0, 0, 0), (1, 0, 12), (2, 1, 0)]);
    }

    #[test]
    fn test_vertex_input_trailing_attributes_fold_into_last_binding() {
        let desc = build_vertex_input(
            &[attr(vk::Format::R32G32B32_SFLOAT), attr(vk::Format::R32G32_SFLOAT), attr(vk::Format::R32_SFLOAT)],
            &[group(1, vk::VertexInputRate::VERTEX)],
        );
        assert_eq!(desc.bindings.len(), 1);
        assert_eq!(desc.bindings[0].stride, 24);
        let offsets = desc.attributes.iter().map(|a| (a.binding, a.offset)).collect::<Vec<_>>();
        assert_eq!(offsets, vec![(0, 0), (0, 12), (0, 20)]);
    }

    #[test]
    fn test_vertex_input_without_groups() {
        let desc = build_vertex_input(&[attr(vk::Format::R32G32B32_SFLOAT), attr(vk::Format::R8G8B8A8_UNORM)], &[]);
        assert_eq!(desc.bindings.len(), 1);
        assert_eq!(desc.bindings[0].stride, 16);
        assert_eq!(desc.bindings[0].input_rate, vk::VertexInputRate::VERTEX);

        assert!(build_vertex_input(&[], &[group(2, vk::VertexInputRate::VERTEX)]).bindings.is_empty());
    }

    #[test]
    fn test_view_mask() {
        assert_eq!(view_mask_for_layers(1), 0b1);
        assert_eq!(view_mask_for_layers(6), 0b11_1111);
        assert_eq!(view_mask_for_layers(32), u32::MAX);
    }

    #[test]
    fn test_bake_graphics_pass() {
        let device = device();
        let mut cache = RgDescriptorLayoutCache::new();
        let decl = RgPassBuilder::new("forward").shader(graphics_program()).build();
        let targets = vec![
            target(&device, "color", vk::Format::R8G8B8A8_UNORM, 1, RgLoadOp::Clear(RgClearValue::Color([1.0; 4]))),
            target(&device, "depth", vk::Format::D32_SFLOAT, 1, RgLoadOp::Load),
        ];

        let mut baked = RgBakedPass::bake(&device, &mut cache, &decl, &targets).unwrap();
        let rp = device.render_pass_desc(baked.render_pass()).unwrap();
        assert_eq!(rp.attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(rp.attachments[0].initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(rp.attachments[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(rp.attachments[1].initial_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(rp.color_refs.len(), 1);
        assert_eq!(rp.depth_ref.map(|r| r.attachment), Some(1));
        assert_eq!(rp.view_mask, 0);

        let pipeline = device.graphics_pipeline_desc(baked.pipeline()).unwrap();
        assert_eq!(pipeline.depth_compare, Some(vk::CompareOp::LESS));
        assert!(pipeline.depth_write);
        assert_eq!(pipeline.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(pipeline.color_attachment_count, 1);
        assert_eq!(pipeline.vertex_input.bindings.len(), 1);
        assert!(baked.descriptor().is_some());
        assert_eq!(baked.output_layout("depth"), Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
        assert_eq!(baked.clear_values()[0], GfxClearValue::Color([1.0; 4]));
        assert_eq!(baked.render_area().extent.width, 256);

        baked.destroy(&device);
        assert_eq!(device.live_count(GfxObjectKind::RenderPass), 0);
        assert_eq!(device.live_count(GfxObjectKind::Pipeline), 0);
        assert_eq!(device.live_count(GfxObjectKind::PipelineLayout), 0);
        cache.destroy(&device);
    }

    #[test]
    fn test_bake_layered_outputs() {
        let device = device();
        let mut cache = RgDescriptorLayoutCache::new();
        let decl = RgPassBuilder::new("cube").build();

        let whole = target(&device, "cube", vk::Format::R16G16B16A16_SFLOAT, 6, RgLoadOp::Discard);
        let mut single = target(&device, "faces", vk::Format::R16G16B16A16_SFLOAT, 6, RgLoadOp::Discard);
        single.layer = Some(2);

        let views_before = device.live_count(GfxObjectKind::ImageView);
        let mut baked = RgBakedPass::bake(&device, &mut cache, &decl, &[whole, single]).unwrap();
        assert_eq!(baked.view_mask(), 0b11_1111);
        assert_eq!(device.live_count(GfxObjectKind::ImageView), views_before + 1);
        // 没有 shader 就没有 pipeline
        assert!(baked.pipeline().is_null());

        let framebuffer = device.framebuffer_desc(baked.framebuffer()).unwrap();
        let layer_view = device.image_view_desc(framebuffer.attachments[1]).unwrap();
        assert_eq!(layer_view.base_array_layer, 2);
        assert_eq!(layer_view.layer_count, 1);

        baked.destroy(&device);
        assert_eq!(device.live_count(GfxObjectKind::ImageView), views_before);
    }

    #[test]
    fn test_bake_errors_release_partial_objects() {
        let device = device();
        let mut cache = RgDescriptorLayoutCache::new();

        // graphics 管线没有 output
        let decl = RgPassBuilder::new("no-target").shader(graphics_program()).build();
        assert_eq!(
            RgBakedPass::bake(&device, &mut cache, &decl, &[]).err(),
            Some(RgError::MissingRenderTarget {
                pass: "no-target".to_string()
            })
        );

        // pipeline 创建失败时 render pass 与 framebuffer 被回收
        let decl = RgPassBuilder::new("fails").shader(graphics_program()).build();
        let targets = vec![target(&device, "color", vk::Format::R8G8B8A8_UNORM, 1, RgLoadOp::Discard)];
        device.fail_next_create(GfxObjectKind::Pipeline, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(
            RgBakedPass::bake(&device, &mut cache, &decl, &targets).err(),
            Some(RgError::OutOfDeviceMemory)
        );
        assert_eq!(device.live_count(GfxObjectKind::RenderPass), 0);
        assert_eq!(device.live_count(GfxObjectKind::Framebuffer), 0);
        assert_eq!(device.live_count(GfxObjectKind::PipelineLayout), 0);
        cache.destroy(&device);
    }

    #[test]
    fn test_bake_rejects_two_depth_outputs() {
        let device = device();
        let mut cache = RgDescriptorLayoutCache::new();
        let decl = RgPassBuilder::new("depth2").build();
        let targets = vec![
            target(&device, "d0", vk::Format::D32_SFLOAT, 1, RgLoadOp::Discard),
            target(&device, "d1", vk::Format::D16_UNORM, 1, RgLoadOp::Discard),
        ];
        assert!(matches!(
            RgBakedPass::bake(&device, &mut cache, &decl, &targets),
            Err(RgError::MultipleDepthOutputs { .. })
        ));
    }
}

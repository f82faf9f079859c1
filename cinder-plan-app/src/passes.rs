//! 示例渲染图中的 pass
//!
//! ```text
//! shadow (6 layer multiview) ──┐
//! gbuffer ── albedo, depth ────┼── composite ── final ── [ present ]
//!          └── ssao (compute) ─┘
//! ```

use ash::vk;
use bytemuck::{Pod, Zeroable};
use cinder_gfx::resources::image::format_aspect;
use cinder_render_graph::{
    RgAttachmentDecl, RgLoadOp, RgPassBuilder, RgPassHooks, RgResolvePolicy, RgResult,
    declaration::{RgAttachmentFlags, RgClearValue, RgPassDecl},
    graph::RenderGraphBuilder,
    resource::RgBuffer,
    settings::DefaultRenderGraphSettings,
    shader::{RgShaderBinding, RgShaderProgram, RgVertexAttribute},
};

/// 每帧写入 upload arena 的 uniform
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view_proj: glam::Mat4,
    pub light_pos: glam::Vec4,
    pub time: f32,
    pub _padding: [f32; 3],
}

/// 每帧替换为 upload arena 中的分配
pub const FRAME_UNIFORMS: &str = "frame_uniforms";

const SHADOW_MAP_SIZE: u32 = 512;
const SSAO_GROUP_SIZE: u32 = 8;

/// 不带 stencil 的深度格式，需要被采样
fn depth_format() -> vk::Format {
    DefaultRenderGraphSettings::DEPTH_FORMAT_CANDIDATES
        .iter()
        .copied()
        .find(|format| !format_aspect(*format).contains(vk::ImageAspectFlags::STENCIL))
        .unwrap_or(vk::Format::D32_SFLOAT)
}

fn ubo(slot: u32) -> RgShaderBinding {
    RgShaderBinding::new(slot, vk::DescriptorType::UNIFORM_BUFFER)
}

fn sampled(slot: u32) -> RgShaderBinding {
    RgShaderBinding::new(slot, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
}

fn graphics_program(vertex: Vec<RgShaderBinding>, fragment: Vec<RgShaderBinding>) -> RgShaderProgram {
    // shader module 由外部编译，dry-run 使用 null module
    RgShaderProgram::new()
        .with_stage(vk::ShaderStageFlags::VERTEX, vk::ShaderModule::null(), "main", vertex)
        .with_stage(vk::ShaderStageFlags::FRAGMENT, vk::ShaderModule::null(), "main", fragment)
}

fn mesh_attributes() -> Vec<RgVertexAttribute> {
    [vk::Format::R32G32B32_SFLOAT, vk::Format::R32G32B32_SFLOAT, vk::Format::R32G32_SFLOAT]
        .into_iter()
        .filter_map(RgVertexAttribute::new)
        .collect()
}

/// 点光源的 cube shadow，一次 draw 通过 multiview 写入 6 个面
fn shadow_pass() -> RgPassDecl {
    RgPassBuilder::new("shadow")
        .attachment(
            RgAttachmentDecl::new("shadow_cube", depth_format())
                .extent(SHADOW_MAP_SIZE, SHADOW_MAP_SIZE)
                .array_layers(6)
                .flags(RgAttachmentFlags::CUBE_COMPATIBLE),
        )
        .output(
            "shadow_cube",
            RgLoadOp::Clear(RgClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            }),
        )
        .shader(graphics_program(vec![ubo(0)], vec![]).with_vertex_attributes(mesh_attributes()))
        .vertex_binding(3, vk::VertexInputRate::VERTEX)
        .binding_set(RgResolvePolicy::EveryFrame, |set| set.bind(0, FRAME_UNIFORMS))
        .hooks(RgPassHooks::new().on_render(|ctx| {
            ctx.device.cmd_draw(ctx.cmd, 36, 1);
            Ok(())
        }))
        .build()
}

fn gbuffer_pass() -> RgPassDecl {
    RgPassBuilder::new("gbuffer")
        .attachment(RgAttachmentDecl::new("albedo", vk::Format::R8G8B8A8_UNORM))
        .attachment(RgAttachmentDecl::new("depth", depth_format()))
        .output("albedo", RgLoadOp::Clear(RgClearValue::Color([0.0, 0.0, 0.0, 1.0])))
        .output(
            "depth",
            RgLoadOp::Clear(RgClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            }),
        )
        .shader(graphics_program(vec![ubo(0)], vec![]).with_vertex_attributes(mesh_attributes()))
        .vertex_binding(3, vk::VertexInputRate::VERTEX)
        .push_constants(vk::ShaderStageFlags::VERTEX, 0, size_of::<glam::Mat4>() as u32)
        .binding_set(RgResolvePolicy::EveryFrame, |set| set.bind(0, FRAME_UNIFORMS))
        .hooks(RgPassHooks::new().on_render(|ctx| {
            let model = glam::Mat4::from_rotation_y(ctx.frame_id as f32 * 0.1);
            ctx.device.cmd_push_constants(
                ctx.cmd,
                ctx.pass.pipeline_layout(),
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&model),
            );
            ctx.device.cmd_draw(ctx.cmd, 36, 1);
            Ok(())
        }))
        .build()
}

/// 读深度，写 storage image
fn ssao_pass() -> RgPassDecl {
    let program = RgShaderProgram::new().with_stage(
        vk::ShaderStageFlags::COMPUTE,
        vk::ShaderModule::null(),
        "main",
        vec![sampled(0), RgShaderBinding::new(1, vk::DescriptorType::STORAGE_IMAGE)],
    );
    RgPassBuilder::new("ssao")
        .attachment(RgAttachmentDecl::new("ao", vk::Format::R8G8B8A8_UNORM).flags(RgAttachmentFlags::SAMPLED))
        .shader(program)
        .binding_set(RgResolvePolicy::EveryFrame, |set| {
            set.bind_sampled(0, "depth", vk::Sampler::null()).bind(1, "ao")
        })
        .hooks(RgPassHooks::new().on_render(|ctx| {
            let ao = ctx.resolve.image("ao")?;
            let groups = [
                ao.image.extent.width.div_ceil(SSAO_GROUP_SIZE),
                ao.image.extent.height.div_ceil(SSAO_GROUP_SIZE),
                1,
            ];
            ctx.device.cmd_dispatch(ctx.cmd, groups);
            Ok(())
        }))
        .build()
}

fn composite_pass() -> RgPassDecl {
    RgPassBuilder::new("composite")
        .attachment(RgAttachmentDecl::new("final", DefaultRenderGraphSettings::DEFAULT_SURFACE_FORMAT.format))
        .output("final", RgLoadOp::Discard)
        .shader(graphics_program(vec![], vec![sampled(0), sampled(1), sampled(2)]))
        .binding_set(RgResolvePolicy::EveryFrame, |set| {
            set.bind_sampled(0, "albedo", vk::Sampler::null())
                .bind_sampled(1, "ao", vk::Sampler::null())
                .bind_sampled(2, "shadow_cube", vk::Sampler::null())
        })
        // 全屏三角形
        .hooks(RgPassHooks::new().on_render(|ctx| {
            ctx.device.cmd_draw(ctx.cmd, 3, 1);
            Ok(())
        }))
        .build()
}

/// 声明整张图
pub fn declare_graph() -> RgResult<RenderGraphBuilder> {
    let mut builder = RenderGraphBuilder::new();
    builder.import(FRAME_UNIFORMS, RgBuffer::whole(vk::Buffer::null()));
    builder
        .add_pass(shadow_pass())?
        .add_pass(gbuffer_pass())?
        .add_pass(ssao_pass())?
        .add_pass(composite_pass())?
        .set_output("final");
    log::debug!("declared {} passes, depth format {:?}", builder.pass_count(), depth_format());
    Ok(builder)
}

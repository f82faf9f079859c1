//! Pass 的声明式描述
//!
//! [`RgPassBuilder`] 收集一个 pass 的全部声明：资源依赖、attachment、输出、binding、
//! shader 与管线状态以及回调。声明本身不访问设备，校验与推断在加入 graph 时进行。

use std::rc::Rc;

use ash::vk;
use bitflags::bitflags;
use cinder_gfx::{commands::render_pass_begin::GfxClearValue, device::GfxDevice};

use crate::{
    baker::RgBakedPass,
    error::RgResult,
    resource::{RgResolveTable, RgResourceRef},
    shader::RgShaderProgram,
    upload::RgUploadArena,
    usage::RgUsage,
};

pub type RgClearValue = GfxClearValue;

/// binding set 中名字的解析时机
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RgResolvePolicy {
    /// 每一帧都查找，资源 handle 可以逐帧变化
    #[default]
    EveryFrame,
    /// 构建 graph 时查找一次
    AtBuild,
    /// 只包含直接 handle，不需要查找
    Resolved,
}

/// output attachment 在 render pass 开始时的处理方式
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum RgLoadOp {
    #[default]
    Discard,
    Load,
    Clear(RgClearValue),
}

impl RgLoadOp {
    #[inline]
    pub fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            Self::Discard => vk::AttachmentLoadOp::DONT_CARE,
            Self::Load => vk::AttachmentLoadOp::LOAD,
            Self::Clear(_) => vk::AttachmentLoadOp::CLEAR,
        }
    }
}

bitflags! {
    /// attachment 在作为 output 之外的额外用途
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct RgAttachmentFlags: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const TRANSFER_SRC = 1 << 2;
        const CUBE_COMPATIBLE = 1 << 3;
    }
}

impl RgAttachmentFlags {
    pub fn image_usage_flags(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(Self::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(Self::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(Self::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        flags
    }

    pub fn image_create_flags(self) -> vk::ImageCreateFlags {
        if self.contains(Self::CUBE_COMPATIBLE) {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        }
    }
}

/// graph 负责创建的 attachment
///
/// extent 为 0 的维度在构建时取 surface 的大小
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgAttachmentDecl {
    pub name: String,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub flags: RgAttachmentFlags,
}

impl RgAttachmentDecl {
    pub fn new(name: impl Into<String>, format: vk::Format) -> Self {
        Self {
            name: name.into(),
            format,
            extent: vk::Extent2D::default(),
            mip_levels: 1,
            array_layers: 1,
            flags: RgAttachmentFlags::empty(),
        }
    }

    #[inline]
    pub fn extent(mut self, width: u32, height: u32) -> Self {
        self.extent = vk::Extent2D { width, height };
        self
    }

    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    #[inline]
    pub fn flags(mut self, flags: RgAttachmentFlags) -> Self {
        self.flags = flags;
        self
    }

    /// 0 表示跟随 surface
    pub fn resolved_extent(&self, surface: vk::Extent2D) -> vk::Extent2D {
        vk::Extent2D {
            width: if self.extent.width == 0 { surface.width } else { self.extent.width },
            height: if self.extent.height == 0 { surface.height } else { self.extent.height },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RgOutputAttachment {
    pub name: String,
    pub load_op: RgLoadOp,
    /// 只渲染到某一个 layer；None 表示全部 layer（多层时启用 multiview）
    pub layer: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgDependency {
    pub resource: RgResourceRef,
    pub usage: RgUsage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgBinding {
    pub slot: u32,
    pub resource: RgResourceRef,
    /// 只对 combined image sampler 有意义
    pub sampler: vk::Sampler,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RgBindingSet {
    pub policy: RgResolvePolicy,
    pub bindings: Vec<RgBinding>,
}

impl RgBindingSet {
    pub fn new(policy: RgResolvePolicy) -> Self {
        Self {
            policy,
            bindings: vec![],
        }
    }

    #[inline]
    pub fn bind(mut self, slot: u32, resource: impl Into<RgResourceRef>) -> Self {
        self.bindings.push(RgBinding {
            slot,
            resource: resource.into(),
            sampler: vk::Sampler::null(),
        });
        self
    }

    #[inline]
    pub fn bind_sampled(mut self, slot: u32, resource: impl Into<RgResourceRef>, sampler: vk::Sampler) -> Self {
        self.bindings.push(RgBinding {
            slot,
            resource: resource.into(),
            sampler,
        });
        self
    }
}

/// 连续 `attribute_count` 个顶点属性组成一个 vertex binding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgVertexBindingGroup {
    pub attribute_count: u32,
    pub input_rate: vk::VertexInputRate,
}

/// 图形管线的固定状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgPipelineState {
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    /// 只在 pass 有 depth output 时生效
    pub depth_compare: vk::CompareOp,
    pub depth_write: bool,
    pub blend_enable: bool,
}

impl Default for RgPipelineState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_compare: vk::CompareOp::LESS,
            depth_write: true,
            blend_enable: false,
        }
    }
}

/// 回调在执行时拿到的上下文
pub struct RgPassContext<'a> {
    pub device: &'a dyn GfxDevice,
    pub cmd: vk::CommandBuffer,
    pub pass: &'a RgBakedPass,
    pub resolve: &'a RgResolveTable,
    pub upload: &'a RgUploadArena,
    pub frame_id: u64,
}

/// setup 回调在 graph 构建完成后调用一次
pub struct RgSetupContext<'a> {
    pub device: &'a dyn GfxDevice,
    pub pass: &'a RgBakedPass,
    pub resolve: &'a RgResolveTable,
}

pub type RgSetupHook = Rc<dyn Fn(&RgSetupContext<'_>) -> RgResult<()>>;
pub type RgRenderHook = Rc<dyn Fn(&RgPassContext<'_>) -> RgResult<()>>;

/// pass 的四个可选回调
#[derive(Clone, Default)]
pub struct RgPassHooks {
    pub setup: Option<RgSetupHook>,
    pub before_render: Option<RgRenderHook>,
    pub on_render: Option<RgRenderHook>,
    pub after_render: Option<RgRenderHook>,
}

impl RgPassHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup(mut self, f: impl Fn(&RgSetupContext<'_>) -> RgResult<()> + 'static) -> Self {
        self.setup = Some(Rc::new(f));
        self
    }

    pub fn before_render(mut self, f: impl Fn(&RgPassContext<'_>) -> RgResult<()> + 'static) -> Self {
        self.before_render = Some(Rc::new(f));
        self
    }

    pub fn on_render(mut self, f: impl Fn(&RgPassContext<'_>) -> RgResult<()> + 'static) -> Self {
        self.on_render = Some(Rc::new(f));
        self
    }

    pub fn after_render(mut self, f: impl Fn(&RgPassContext<'_>) -> RgResult<()> + 'static) -> Self {
        self.after_render = Some(Rc::new(f));
        self
    }
}

impl std::fmt::Debug for RgPassHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgPassHooks")
            .field("setup", &self.setup.is_some())
            .field("before_render", &self.before_render.is_some())
            .field("on_render", &self.on_render.is_some())
            .field("after_render", &self.after_render.is_some())
            .finish()
    }
}

/// 一个 pass 的完整声明
#[derive(Clone, Debug, Default)]
pub struct RgPassDecl {
    pub name: String,
    pub dependencies: Vec<RgDependency>,
    pub attachments: Vec<RgAttachmentDecl>,
    pub outputs: Vec<RgOutputAttachment>,
    pub binding_set: Option<RgBindingSet>,
    pub shader: Option<RgShaderProgram>,
    pub vertex_groups: Vec<RgVertexBindingGroup>,
    pub pipeline_state: RgPipelineState,
    pub push_constants: Vec<vk::PushConstantRange>,
    pub hooks: RgPassHooks,
}

/// pass 声明的 builder
pub struct RgPassBuilder {
    decl: RgPassDecl,
}

impl RgPassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            decl: RgPassDecl {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// 声明对 buffer 的使用
    #[inline]
    pub fn buffer(self, resource: impl Into<RgResourceRef>, usage: RgUsage) -> Self {
        self.dependency(resource, usage)
    }

    /// 声明对 image 的使用
    #[inline]
    pub fn image(self, resource: impl Into<RgResourceRef>, usage: RgUsage) -> Self {
        self.dependency(resource, usage)
    }

    fn dependency(mut self, resource: impl Into<RgResourceRef>, usage: RgUsage) -> Self {
        self.decl.dependencies.push(RgDependency {
            resource: resource.into(),
            usage,
        });
        self
    }

    /// 声明由 graph 创建的 attachment
    #[inline]
    pub fn attachment(mut self, decl: RgAttachmentDecl) -> Self {
        self.decl.attachments.push(decl);
        self
    }

    /// 渲染到 attachment 的全部 layer
    #[inline]
    pub fn output(mut self, name: impl Into<String>, load_op: RgLoadOp) -> Self {
        self.decl.outputs.push(RgOutputAttachment {
            name: name.into(),
            load_op,
            layer: None,
        });
        self
    }

    /// 只渲染到 attachment 的某一个 layer
    #[inline]
    pub fn output_layer(mut self, name: impl Into<String>, load_op: RgLoadOp, layer: u32) -> Self {
        self.decl.outputs.push(RgOutputAttachment {
            name: name.into(),
            load_op,
            layer: Some(layer),
        });
        self
    }

    /// 每个 pass 至多一个 binding set，多次调用时后者覆盖前者
    pub fn binding_set(mut self, policy: RgResolvePolicy, f: impl FnOnce(RgBindingSet) -> RgBindingSet) -> Self {
        self.decl.binding_set = Some(f(RgBindingSet::new(policy)));
        self
    }

    #[inline]
    pub fn shader(mut self, program: RgShaderProgram) -> Self {
        self.decl.shader = Some(program);
        self
    }

    #[inline]
    pub fn vertex_binding(mut self, attribute_count: u32, input_rate: vk::VertexInputRate) -> Self {
        self.decl.vertex_groups.push(RgVertexBindingGroup {
            attribute_count,
            input_rate,
        });
        self
    }

    #[inline]
    pub fn pipeline_state(mut self, state: RgPipelineState) -> Self {
        self.decl.pipeline_state = state;
        self
    }

    #[inline]
    pub fn push_constants(mut self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.decl.push_constants.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        });
        self
    }

    #[inline]
    pub fn hooks(mut self, hooks: RgPassHooks) -> Self {
        self.decl.hooks = hooks;
        self
    }

    #[inline]
    pub fn build(self) -> RgPassDecl {
        self.decl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_declarations() {
        let decl = RgPassBuilder::new("shadow")
            .attachment(RgAttachmentDecl::new("shadow_map", vk::Format::D32_SFLOAT).extent(1024, 1024))
            .output("shadow_map", RgLoadOp::Clear(RgClearValue::DepthStencil { depth: 1.0, stencil: 0 }))
            .image("albedo", RgUsage::SAMPLED_IMAGE)
            .binding_set(RgResolvePolicy::AtBuild, |set| set.bind(0, "camera"))
            .push_constants(vk::ShaderStageFlags::VERTEX, 0, 64)
            .build();

        assert_eq!(decl.name, "shadow");
        assert_eq!(decl.attachments.len(), 1);
        assert_eq!(decl.outputs[0].layer, None);
        assert_eq!(decl.dependencies.len(), 1);
        let set = decl.binding_set.as_ref().unwrap();
        assert_eq!(set.policy, RgResolvePolicy::AtBuild);
        assert_eq!(set.bindings[0].resource, RgResourceRef::named("camera"));
        assert_eq!(decl.push_constants[0].size, 64);
    }

    #[test]
    fn test_attachment_extent_follows_surface() {
        let surface = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let decl = RgAttachmentDecl::new("color", vk::Format::R8G8B8A8_UNORM);
        assert_eq!(decl.resolved_extent(surface), surface);
        let fixed = decl.clone().extent(256, 0);
        assert_eq!(
            fixed.resolved_extent(surface),
            vk::Extent2D {
                width: 256,
                height: 1080
            }
        );
    }

    #[test]
    fn test_load_op() {
        assert_eq!(RgLoadOp::Discard.to_vk(), vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(RgLoadOp::Load.to_vk(), vk::AttachmentLoadOp::LOAD);
        assert_eq!(RgLoadOp::Clear(RgClearValue::Color([0.0; 4])).to_vk(), vk::AttachmentLoadOp::CLEAR);
    }
}

use ash::vk;

/// 单 subpass 的 render pass 描述
#[derive(Clone, Debug, Default)]
pub struct GfxRenderPassDesc {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub color_refs: Vec<vk::AttachmentReference>,
    pub depth_ref: Option<vk::AttachmentReference>,
    /// multiview 的 view mask，0 表示不启用 multiview
    pub view_mask: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxFramebufferDesc {
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    /// multiview 下必须为 1
    pub layers: u32,
}

/// 已经编译好的 shader module 以及入口
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

#[derive(Clone, Debug, Default)]
pub struct GfxVertexInputDesc {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// 图形管线的固定状态
///
/// viewport 与 scissor 是静态的，等于 extent；graph 在 resize 时整体重建
#[derive(Clone, Debug)]
pub struct GfxGraphicsPipelineDesc {
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub stages: Vec<GfxShaderStage>,
    pub vertex_input: GfxVertexInputDesc,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    /// None 表示关闭深度测试
    pub depth_compare: Option<vk::CompareOp>,
    pub depth_write: bool,
    pub blend_enable: bool,
    pub color_attachment_count: u32,
    pub extent: vk::Extent2D,
}

#[derive(Clone, Debug)]
pub struct GfxComputePipelineDesc {
    pub layout: vk::PipelineLayout,
    pub stage: GfxShaderStage,
}

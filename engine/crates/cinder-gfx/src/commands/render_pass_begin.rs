use ash::vk;

/// clear value 的纯数据形式，`vk::ClearValue` 是 union，不方便比较与打印
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl GfxClearValue {
    #[inline]
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// `vkCmdBeginRenderPass` 的参数
///
/// clear_values 与 render pass 的 attachment 一一对应，不需要 clear 的位置可以填任意值
#[derive(Clone, Debug)]
pub struct GfxRenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    pub clear_values: Vec<GfxClearValue>,
}

/// 整张图像的 blit，src 处于 TRANSFER_SRC_OPTIMAL，dst 处于 TRANSFER_DST_OPTIMAL
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxImageBlit {
    pub src_image: vk::Image,
    pub src_extent: vk::Extent2D,
    pub dst_image: vk::Image,
    pub dst_extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    pub filter: vk::Filter,
}

impl GfxImageBlit {
    pub fn to_vk(&self) -> vk::ImageBlit {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: self.aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let corner = |extent: vk::Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        vk::ImageBlit {
            src_subresource: subresource,
            src_offsets: [vk::Offset3D::default(), corner(self.src_extent)],
            dst_subresource: subresource,
            dst_offsets: [vk::Offset3D::default(), corner(self.dst_extent)],
        }
    }
}

use ash::vk;

/// 创建 device local image 的参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub flags: vk::ImageCreateFlags,
}

impl GfxImageDesc {
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        format_aspect(self.format)
    }
}

/// 已经创建好的 image，只携带 handle 与描述信息，不负责销毁
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxImage {
    pub handle: vk::Image,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub array_layers: u32,
}

impl GfxImage {
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        format_aspect(self.format)
    }
}

/// image view 的参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxImageViewDesc {
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub mip_levels: u32,
}

impl GfxImageViewDesc {
    /// 覆盖全部 layer：单层为 2D，多层为 2D_ARRAY（cube 兼容的 6 层也按 array 处理，供 multiview 使用）
    pub fn whole(image: &GfxImage) -> Self {
        Self {
            view_type: if image.array_layers > 1 { vk::ImageViewType::TYPE_2D_ARRAY } else { vk::ImageViewType::TYPE_2D },
            format: image.format,
            aspect: image.aspect(),
            base_array_layer: 0,
            layer_count: image.array_layers,
            mip_levels: image.mip_levels,
        }
    }

    /// 只看其中一个 layer
    pub fn single_layer(image: &GfxImage, layer: u32) -> Self {
        Self {
            view_type: vk::ImageViewType::TYPE_2D,
            format: image.format,
            aspect: image.aspect(),
            base_array_layer: layer,
            layer_count: 1,
            mip_levels: image.mip_levels,
        }
    }
}

/// 根据 format 推断 aspect
pub fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }

        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,

        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }

        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// depth 或 stencil 格式
#[inline]
pub fn is_depth_format(format: vk::Format) -> bool {
    format_aspect(format).intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
}

/// 每个 texel 的字节数，用于顶点属性 offset 的累加
///
/// 只覆盖顶点输入里常见的格式，未知格式返回 None
pub fn format_byte_size(format: vk::Format) -> Option<u32> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SNORM | vk::Format::R8_UINT | vk::Format::R8_SINT => 1,
        vk::Format::R8G8_UNORM | vk::Format::R8G8_UINT | vk::Format::R16_SFLOAT | vk::Format::R16_UINT => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::A2B10G10R10_UNORM_PACK32 => 4,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT | vk::Format::R32G32_UINT | vk::Format::R32G32_SINT => 8,
        vk::Format::R32G32B32_SFLOAT | vk::Format::R32G32B32_UINT | vk::Format::R32G32B32_SINT => 12,
        vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT | vk::Format::R32G32B32A32_SINT => 16,
        _ => return None,
    };
    Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_aspect() {
        assert_eq!(format_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            format_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(format_aspect(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert!(is_depth_format(vk::Format::S8_UINT));
        assert!(!is_depth_format(vk::Format::R16G16B16A16_SFLOAT));
    }

    #[test]
    fn test_view_desc_for_layered_image() {
        let image = GfxImage {
            handle: vk::Image::null(),
            format: vk::Format::R16G16B16A16_SFLOAT,
            extent: vk::Extent2D { width: 64, height: 64 },
            mip_levels: 1,
            array_layers: 6,
        };
        let whole = GfxImageViewDesc::whole(&image);
        assert_eq!(whole.view_type, vk::ImageViewType::TYPE_2D_ARRAY);
        assert_eq!(whole.layer_count, 6);

        let single = GfxImageViewDesc::single_layer(&image, 3);
        assert_eq!(single.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(single.base_array_layer, 3);
        assert_eq!(single.layer_count, 1);
    }

    #[test]
    fn test_format_byte_size() {
        assert_eq!(format_byte_size(vk::Format::R32G32B32_SFLOAT), Some(12));
        assert_eq!(format_byte_size(vk::Format::R32G32_SFLOAT), Some(8));
        assert_eq!(format_byte_size(vk::Format::BC7_UNORM_BLOCK), None);
    }
}

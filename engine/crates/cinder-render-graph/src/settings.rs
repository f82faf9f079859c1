use ash::vk;

/// 渲染图默认配置
pub struct DefaultRenderGraphSettings;
impl DefaultRenderGraphSettings {
    pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        // shader 输出会被自动改变： liner -> sRGB
        format: vk::Format::R8G8B8A8_SRGB,
        // 通知 OS，将数值按照 sRGB 空间进行处理和显示
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    pub const DEPTH_FORMAT_CANDIDATES: &'static [vk::Format] = &[
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ];

    /// debug label 颜色
    pub const PASS_LABEL_COLOR: [f32; 4] = [0.2, 0.6, 0.9, 1.0];
    pub const PRESENT_LABEL_COLOR: [f32; 4] = [0.9, 0.5, 0.2, 1.0];
}

/// frame provider 配置
#[derive(Copy, Clone, Debug)]
pub struct RgFrameSettings {
    /// frames in flight 的数量
    pub fif_count: usize,
    /// 每个 frame slot 的 upload arena 大小
    pub upload_arena_size: vk::DeviceSize,
    /// 等待 frame fence 的超时，u64::MAX 表示无限等待
    pub fence_timeout_ns: u64,
    /// acquire swapchain image 的超时
    pub acquire_timeout_ns: u64,
}

impl Default for RgFrameSettings {
    fn default() -> Self {
        Self {
            fif_count: 3,
            upload_arena_size: 4 * 1024 * 1024,
            fence_timeout_ns: u64::MAX,
            acquire_timeout_ns: u64::MAX,
        }
    }
}

//! Cinder GFX 层
//!
//! - [`device::GfxDevice`]：渲染图所依赖的全部设备能力，显式传递，不存在全局单例
//! - [`device::ash_device::AshDevice`]：基于 ash + vk-mem 的 Vulkan 后端
//! - [`device::headless::HeadlessDevice`]：只录制命令、不访问 GPU 的后端，用于 dry-run 和测试
//! - [`commands`]：barrier、submit 等命令相关的描述
//! - [`resources`]：image、buffer、pipeline、descriptor 的纯数据描述

pub mod commands;
pub mod device;
pub mod resources;

//! Cinder 渲染图
//!
//! 声明式地描述一帧中的所有 pass，由 graph 负责：
//! - 推导每个资源在每个 pass 中的用法转换（[`resolver`]），跨帧闭环
//! - 在 pass 之间插入最少的 pipeline barrier（[`barrier`]）
//! - 创建 attachment，烘焙 render pass、framebuffer、pipeline（[`baker`]）
//! - 复用 descriptor set layout 与 descriptor set（[`descriptor_cache`]）
//! - 多帧并行时的 command buffer、fence 与 upload arena 轮转（[`frame`]）
//!
//! 所有 GPU 访问都通过 [`cinder_gfx::device::GfxDevice`]，graph 本身是单线程的。

pub mod baker;
pub mod barrier;
pub mod declaration;
pub mod descriptor_cache;
pub mod error;
pub mod frame;
pub mod graph;
mod profiling;
pub mod resolver;
pub mod resource;
pub mod settings;
pub mod shader;
pub mod state;
pub mod upload;
pub mod usage;

pub use declaration::{RgAttachmentDecl, RgLoadOp, RgPassBuilder, RgPassHooks, RgResolvePolicy};
pub use error::{RgError, RgResult};
pub use frame::{RgFrame, RgFrameProvider, RgPresentStatus};
pub use graph::{RenderGraph, RenderGraphBuilder};
pub use usage::RgUsage;

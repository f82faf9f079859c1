//! 渲染图中的资源引用
//!
//! pass 既可以直接持有 handle，也可以只给出名字，在执行时由 [`RgResolveTable`] 查找。

use std::fmt::{Display, Formatter};

use ash::vk::{self, Handle};
use cinder_gfx::resources::image::GfxImage;
use indexmap::IndexMap;

use crate::error::{RgError, RgResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBuffer {
    pub handle: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl RgBuffer {
    /// 整个 buffer
    #[inline]
    pub fn whole(handle: vk::Buffer) -> Self {
        Self {
            handle,
            offset: 0,
            size: vk::WHOLE_SIZE,
        }
    }
}

/// image 以及用于 descriptor 的 view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgImage {
    pub image: GfxImage,
    pub view: vk::ImageView,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgResource {
    Buffer(RgBuffer),
    Image(RgImage),
}

impl RgResource {
    #[inline]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
        }
    }

    #[inline]
    pub fn as_image(&self) -> Option<&RgImage> {
        match self {
            Self::Image(image) => Some(image),
            Self::Buffer(_) => None,
        }
    }

    #[inline]
    pub fn as_buffer(&self) -> Option<&RgBuffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            Self::Image(_) => None,
        }
    }
}

impl From<RgBuffer> for RgResource {
    fn from(buffer: RgBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<RgImage> for RgResource {
    fn from(image: RgImage) -> Self {
        Self::Image(image)
    }
}

/// 状态跟踪的 key
///
/// 直接 handle 以 native handle 的数值为 key，同一个 handle 无论以何种方式引用都是同一个资源
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RgResourceKey {
    Named(String),
    Buffer(u64),
    Image(u64),
}

impl Display for RgResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, "\"{}\"", name),
            Self::Buffer(raw) => write!(f, "Buffer(0x{:x})", raw),
            Self::Image(raw) => write!(f, "Image(0x{:x})", raw),
        }
    }
}

/// pass 对资源的引用
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RgResourceRef {
    Direct(RgResource),
    Named(String),
}

impl RgResourceRef {
    #[inline]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn key(&self) -> RgResourceKey {
        match self {
            Self::Named(name) => RgResourceKey::Named(name.clone()),
            Self::Direct(RgResource::Buffer(buffer)) => RgResourceKey::Buffer(buffer.handle.as_raw()),
            Self::Direct(RgResource::Image(image)) => RgResourceKey::Image(image.image.handle.as_raw()),
        }
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Direct(_) => None,
        }
    }

    /// 得到当前 frame 的实际资源
    pub fn resolve(&self, table: &RgResolveTable) -> RgResult<RgResource> {
        match self {
            Self::Direct(resource) => Ok(*resource),
            Self::Named(name) => table.get(name),
        }
    }
}

impl From<&str> for RgResourceRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for RgResourceRef {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<RgResource> for RgResourceRef {
    fn from(resource: RgResource) -> Self {
        Self::Direct(resource)
    }
}

impl From<RgBuffer> for RgResourceRef {
    fn from(buffer: RgBuffer) -> Self {
        Self::Direct(RgResource::Buffer(buffer))
    }
}

impl From<RgImage> for RgResourceRef {
    fn from(image: RgImage) -> Self {
        Self::Direct(RgResource::Image(image))
    }
}

/// 名字到资源的映射，每一帧重新构建
#[derive(Clone, Debug, Default)]
pub struct RgResolveTable {
    entries: IndexMap<String, RgResource>,
}

impl RgResolveTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn insert(&mut self, name: impl Into<String>, resource: RgResource) {
        self.entries.insert(name.into(), resource);
    }

    pub fn get(&self, name: &str) -> RgResult<RgResource> {
        self.entries.get(name).copied().ok_or_else(|| RgError::UnknownResource { name: name.to_string() })
    }

    pub fn image(&self, name: &str) -> RgResult<RgImage> {
        match self.get(name)? {
            RgResource::Image(image) => Ok(image),
            RgResource::Buffer(_) => Err(RgError::ResourceKindMismatch {
                name: name.to_string(),
                expected: "image",
            }),
        }
    }

    pub fn buffer(&self, name: &str) -> RgResult<RgBuffer> {
        match self.get(name)? {
            RgResource::Buffer(buffer) => Ok(buffer),
            RgResource::Image(_) => Err(RgError::ResourceKindMismatch {
                name: name.to_string(),
                expected: "buffer",
            }),
        }
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(raw: u64) -> RgBuffer {
        RgBuffer::whole(vk::Buffer::from_raw(raw))
    }

    #[test]
    fn test_key_of_direct_and_named() {
        let direct = RgResourceRef::from(buffer(7));
        assert_eq!(direct.key(), RgResourceKey::Buffer(7));
        assert_eq!(RgResourceRef::from("gbuffer").key(), RgResourceKey::Named("gbuffer".to_string()));
        // 同一 handle 的两次引用是同一个 key
        assert_eq!(direct.key(), RgResourceRef::from(buffer(7)).key());
    }

    #[test]
    fn test_resolve_table() {
        let mut table = RgResolveTable::new();
        table.insert("camera", buffer(3).into());

        assert_eq!(RgResourceRef::named("camera").resolve(&table), Ok(RgResource::Buffer(buffer(3))));
        assert_eq!(
            RgResourceRef::named("missing").resolve(&table),
            Err(RgError::UnknownResource {
                name: "missing".to_string()
            })
        );
        assert!(matches!(table.image("camera"), Err(RgError::ResourceKindMismatch { .. })));
        assert_eq!(table.buffer("camera"), Ok(buffer(3)));
    }
}

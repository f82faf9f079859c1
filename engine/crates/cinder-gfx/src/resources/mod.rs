pub mod buffer;
pub mod descriptor;
pub mod image;
pub mod pipeline;

//! Cinder 工具集
//!
//! 目前只包含日志初始化。

pub mod init_log;

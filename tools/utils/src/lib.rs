//! 命令行工具依赖的通用组件.

pub mod loader;

//! 核心模块
//!
//! 包含初始化器配置。

pub mod config;

pub use config::{CoordinatorConfig, InitConfig, InitConfigBuilder, LogConfig, ViolationAction};

//! # Chips Init - 薯片模块初始化协调器
//!
//! 在任何模块被使用之前，按依赖关系完成所有模块的初始化：
//!
//! - **注册表**: 收集模块及其依赖声明，冻结为不可变快照
//! - **依赖图**: 拓扑排序与环检测，同层按注册顺序稳定排列
//! - **初始化守卫**: 每个模块至多初始化一次，未完成即使用立即终止进程
//! - **协调器**: 按解析出的顺序执行初始化，生成初始化报告
//! - **清单加载**: 从 YAML / JSON 清单注册模块
//!
//! ## 快速开始
//!
//! ```rust
//! use chips_init::{InitCoordinator, ModuleRegistry};
//!
//! let registry = ModuleRegistry::new();
//! let tbase = registry.register("tbase", || Ok(()), &[]).unwrap();
//! let base = tbase.clone();
//! registry
//!     .register("tdep", move || { base.use_module(); Ok(()) }, &["tbase"])
//!     .unwrap();
//!
//! let set = registry.finalize().unwrap();
//! let report = InitCoordinator::new(set).run().unwrap();
//! assert_eq!(report.order, vec!["tbase", "tdep"]);
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 注册表、守卫、依赖图、协调器与清单
//! - `core` - 配置
//! - `utils` - 错误类型与日志

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    Dependency, DependencyGraph, DiagnosticSink, GuardSnapshot, InitContext, InitCoordinator,
    InitGuard, InitReport, InitState, ManifestLoader, ManifestParser, MemorySink, ModuleDescriptor,
    ModuleHandle, ModuleLoader, ModuleManifest, ModuleRegistry, ModuleSet, StdoutSink,
};

pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, CoreError, Result};

pub use core::config::{CoordinatorConfig, InitConfig, InitConfigBuilder, LogConfig, ViolationAction};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

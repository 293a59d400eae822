//! 模块初始化管理
//!
//! 包含初始化顺序协调的核心组件：
//! - 模块元数据与依赖声明
//! - 初始化守卫
//! - 依赖图
//! - 注册表与协调器
//! - 模块运行时接口
//! - 清单解析与加载器

pub mod coordinator;
pub mod dependency;
pub mod fixture;
pub mod guard;
pub mod loader;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod runtime;

// 重导出常用类型
pub use coordinator::{InitCoordinator, InitReport};
pub use dependency::DependencyGraph;
pub use guard::{GuardSnapshot, InitGuard};
pub use loader::{ManifestLoader, ModuleLoader};
pub use metadata::{Dependency, InitState, ModuleDescriptor};
pub use parser::{ManifestEntry, ManifestParser, ModuleManifest};
pub use registry::{ModuleRegistry, ModuleSet};
pub use runtime::{
    abort_process, panic_on_violation, DiagnosticSink, FatalHandler, InitContext, Initializer,
    MemorySink, ModuleHandle, StdoutSink,
};

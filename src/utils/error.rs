//! 初始化协调器错误类型定义
//!
//! 本模块定义了协调器中使用的所有错误类型。
//!
//! 错误分为两类：
//! - 配置期错误（注册、`finalize()`、`run()` 启动前），调用方可以修正后重试
//! - 致命错误（[`CoreError::is_fatal`]），表示依赖声明存在结构性缺陷，进程随即中止

use thiserror::Error;

/// 初始化协调器核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 注册错误 ====================

    /// 模块重复注册
    #[error("模块重复注册: '{0}'")]
    DuplicateModule(String),

    /// 模块 ID 格式无效
    #[error("模块 ID 格式无效: '{0}'，只允许字母开头，包含字母、数字、下划线和连字符")]
    InvalidModuleId(String),

    /// 注册表已冻结，不再接受注册
    #[error("注册表已冻结，无法注册模块: '{0}'")]
    RegistryFinalized(String),

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    // ==================== 依赖错误 ====================

    /// 循环依赖
    #[error("检测到循环依赖: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// 闭合的循环路径（首尾为同一模块）
        cycle: Vec<String>,
    },

    /// 依赖未找到
    #[error("模块 '{module}' 的依赖 '{dependency}' 未注册")]
    DependencyNotFound {
        /// 声明依赖的模块
        module: String,
        /// 缺失的依赖
        dependency: String,
    },

    /// 版本不匹配
    #[error("版本不匹配: 模块 '{module}' 需要版本 {required}, 但找到版本 {found}")]
    VersionMismatch {
        /// 被依赖的模块
        module: String,
        /// 版本要求
        required: String,
        /// 实际版本
        found: String,
    },

    /// 强制指定的初始化顺序无效
    #[error("初始化顺序无效: {0}")]
    InvalidOrder(String),

    // ==================== 初始化错误 ====================

    /// 初始化过程中被重入
    #[error("检测到重入初始化: '{0}' 正在初始化中")]
    ReentrantInitialization(String),

    /// 初始化顺序违规：模块在初始化过程中使用了尚未完成初始化的模块
    #[error("{used}: not initialized yet, aborted.")]
    OrderingViolation {
        /// 正在初始化、发起违规调用的模块
        module: String,
        /// 被提前使用的模块
        used: String,
    },

    /// 模块在初始化之前被使用
    #[error("{0}: not initialized yet, aborted.")]
    UseBeforeInit(String),

    /// 模块初始化函数返回错误
    #[error("模块初始化失败: '{module}' - {reason}")]
    InitializerFailed {
        /// 初始化失败的模块
        module: String,
        /// 初始化函数返回的错误
        reason: String,
    },

    // ==================== 清单与配置错误 ====================

    /// 模块清单无效
    #[error("模块清单无效: {0}")]
    InvalidManifest(String),

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        /// 配置项
        key: String,
        /// 无效原因
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败（日志系统等基础设施）
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 协调器操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
#[allow(missing_docs)]
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_DUPLICATE: &str = "MODULE-002";
    pub const MODULE_INVALID_ID: &str = "MODULE-003";
    pub const MODULE_REGISTRY_FINALIZED: &str = "MODULE-004";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-005";
    pub const MODULE_DEPENDENCY_NOT_FOUND: &str = "MODULE-006";
    pub const MODULE_VERSION_MISMATCH: &str = "MODULE-007";

    // 初始化错误 (INIT-xxx)
    pub const INIT_INVALID_ORDER: &str = "INIT-001";
    pub const INIT_REENTRANT: &str = "INIT-002";
    pub const INIT_ORDERING_VIOLATION: &str = "INIT-003";
    pub const INIT_USE_BEFORE_INIT: &str = "INIT-004";
    pub const INIT_INITIALIZER_FAILED: &str = "INIT-005";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
    pub const CONFIG_INVALID_MANIFEST: &str = "CONFIG-003";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::DuplicateModule(_) => error_code::MODULE_DUPLICATE,
            CoreError::InvalidModuleId(_) => error_code::MODULE_INVALID_ID,
            CoreError::RegistryFinalized(_) => error_code::MODULE_REGISTRY_FINALIZED,
            CoreError::CyclicDependency { .. } => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::DependencyNotFound { .. } => error_code::MODULE_DEPENDENCY_NOT_FOUND,
            CoreError::VersionMismatch { .. } => error_code::MODULE_VERSION_MISMATCH,
            CoreError::InvalidOrder(_) => error_code::INIT_INVALID_ORDER,
            CoreError::ReentrantInitialization(_) => error_code::INIT_REENTRANT,
            CoreError::OrderingViolation { .. } => error_code::INIT_ORDERING_VIOLATION,
            CoreError::UseBeforeInit(_) => error_code::INIT_USE_BEFORE_INIT,
            CoreError::InitializerFailed { .. } => error_code::INIT_INITIALIZER_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::InvalidManifest(_) => error_code::CONFIG_INVALID_MANIFEST,
            _ => "UNKNOWN",
        }
    }

    /// 是否为致命错误
    ///
    /// 致命错误表示依赖声明存在结构性缺陷，不会返回给调用方，
    /// 而是交给 [`FatalHandler`](crate::module::runtime::FatalHandler) 中止进程。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::OrderingViolation { .. }
                | CoreError::UseBeforeInit(_)
                | CoreError::InitializerFailed { .. }
        )
    }
}

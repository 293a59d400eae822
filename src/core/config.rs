//! 初始化器配置
//!
//! 定义日志、协调器与清单的配置结构和加载逻辑。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::module::runtime::{
    abort_process, panic_on_violation, DiagnosticSink, FatalHandler, InitContext, StdoutSink,
};
use crate::utils::logger::RotationStrategy;
use crate::utils::{CoreError, Result};

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略（minutely / hourly / daily / never）
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 检测到顺序违规后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationAction {
    /// 立即终止进程
    #[default]
    Abort,
    /// 触发 panic（测试用）
    Panic,
}

impl ViolationAction {
    /// 对应的致命错误处理函数
    pub fn handler(self) -> FatalHandler {
        match self {
            ViolationAction::Abort => abort_process,
            ViolationAction::Panic => panic_on_violation,
        }
    }
}

/// 协调器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// 初始化每个模块前是否检查其依赖已完成
    #[serde(default = "default_true")]
    pub verify_dependencies: bool,

    /// 违规处理方式
    #[serde(default)]
    pub on_violation: ViolationAction,
}

fn default_true() -> bool {
    true
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            verify_dependencies: true,
            on_violation: ViolationAction::default(),
        }
    }
}

impl CoordinatorConfig {
    /// 使用给定的诊断输出创建运行时上下文
    pub fn context_with_sink(&self, sink: Arc<dyn DiagnosticSink>) -> InitContext {
        InitContext::new(sink, self.on_violation.handler())
    }

    /// 创建输出到标准输出的运行时上下文
    pub fn context(&self) -> InitContext {
        self.context_with_sink(Arc::new(StdoutSink))
    }
}

/// 初始化器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 协调器配置
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// 模块清单路径
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

impl InitConfig {
    /// 创建配置构建器
    pub fn builder() -> InitConfigBuilder {
        InitConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    /// 清单路径为相对路径时，相对配置文件所在目录解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
        })?;

        let mut config: InitConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        if let (Some(manifest), Some(dir)) = (config.manifest.as_mut(), path.parent()) {
            if manifest.is_relative() {
                *manifest = dir.join(&*manifest);
            }
        }

        config.config_path = Some(path);
        config.validate()?;
        Ok(config)
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(CoreError::InvalidConfigValue {
                key: "logging.level".to_string(),
                reason: format!("未知的日志级别 '{}'", self.logging.level),
            });
        }
        // 与日志系统使用同一套解析，大小写不敏感
        self.logging.rotation.parse::<RotationStrategy>()?;
        if self.logging.file_output && self.logging.log_dir.is_none() {
            return Err(CoreError::InvalidConfigValue {
                key: "logging.log_dir".to_string(),
                reason: "启用文件日志时必须指定目录".to_string(),
            });
        }
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: InitConfig) {
        // 只覆盖非默认值的配置
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.logging.rotation != default_rotation() {
            self.logging.rotation = other.logging.rotation;
        }
        if !other.coordinator.verify_dependencies {
            self.coordinator.verify_dependencies = false;
        }
        if other.coordinator.on_violation != ViolationAction::default() {
            self.coordinator.on_violation = other.coordinator.on_violation;
        }
        if other.manifest.is_some() {
            self.manifest = other.manifest;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct InitConfigBuilder {
    config: InitConfig,
}

impl InitConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置配置文件路径
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置是否检查依赖
    pub fn verify_dependencies(mut self, verify: bool) -> Self {
        self.config.coordinator.verify_dependencies = verify;
        self
    }

    /// 设置违规处理方式
    pub fn on_violation(mut self, action: ViolationAction) -> Self {
        self.config.coordinator.on_violation = action;
        self
    }

    /// 设置模块清单路径
    pub fn manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.manifest = Some(path.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> InitConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::runtime::MemorySink;

    #[test]
    fn test_default_config() {
        let config = InitConfig::default();
        assert_eq!(config.logging.level, "warn");
        assert!(config.coordinator.verify_dependencies);
        assert_eq!(config.coordinator.on_violation, ViolationAction::Abort);
        assert!(config.manifest.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = InitConfig::builder()
            .log_level("debug")
            .verify_dependencies(false)
            .on_violation(ViolationAction::Panic)
            .manifest("modules.yaml")
            .build();

        assert_eq!(config.logging.level, "debug");
        assert!(!config.coordinator.verify_dependencies);
        assert_eq!(config.coordinator.on_violation, ViolationAction::Panic);
        assert_eq!(config.manifest, Some(PathBuf::from("modules.yaml")));
    }

    #[test]
    fn test_config_merge() {
        let mut base = InitConfig::default();
        let override_config = InitConfig::builder()
            .log_level("debug")
            .verify_dependencies(false)
            .build();

        base.merge(override_config);

        assert_eq!(base.logging.level, "debug");
        assert!(!base.coordinator.verify_dependencies);
        assert_eq!(base.coordinator.on_violation, ViolationAction::Abort);
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let config = InitConfig::builder().log_level("loud").build();
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfigValue { key, .. }) if key == "logging.level"
        ));
    }

    #[test]
    fn test_validate_rotation_ignores_case() {
        let mut config = InitConfig::default();
        config.logging.rotation = "Daily".to_string();
        assert!(config.validate().is_ok());

        config.logging.rotation = "HOURLY".to_string();
        assert!(config.validate().is_ok());

        config.logging.rotation = "weekly".to_string();
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfigValue { key, .. }) if key == "logging.rotation"
        ));
    }

    #[test]
    fn test_validate_file_output_requires_dir() {
        let mut config = InitConfig::default();
        config.logging.file_output = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_violation_action_yaml() {
        let config: CoordinatorConfig =
            serde_yaml::from_str("on_violation: panic\n").unwrap();
        assert_eq!(config.on_violation, ViolationAction::Panic);
        assert!(config.verify_dependencies);
    }

    #[test]
    fn test_context_with_panic_handler() {
        let sink = Arc::new(MemorySink::new());
        let config = CoordinatorConfig {
            on_violation: ViolationAction::Panic,
            ..Default::default()
        };
        let ctx = config.context_with_sink(sink.clone());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.fatal(&CoreError::UseBeforeInit("tbase".to_string()))
        }));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_from_file_resolves_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.yaml");
        tokio::fs::write(
            &path,
            "logging:\n  level: info\ncoordinator:\n  verify_dependencies: false\nmanifest: modules.yaml\n",
        )
        .await
        .unwrap();

        let config = InitConfig::from_file(&path).await.unwrap();

        assert_eq!(config.logging.level, "info");
        assert!(!config.coordinator.verify_dependencies);
        assert_eq!(config.manifest, Some(dir.path().join("modules.yaml")));
        assert_eq!(config.config_path, Some(path));
    }

    #[tokio::test]
    async fn test_from_file_missing() {
        let result = InitConfig::from_file("/nonexistent/init.yaml").await;
        assert!(matches!(result, Err(CoreError::ConfigLoadFailed(_))));
    }
}

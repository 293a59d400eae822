//! 模块元数据定义
//!
//! 定义模块描述、依赖声明和初始化状态。

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::utils::{CoreError, Result};

/// 初始化状态
///
/// 只允许 `NotStarted -> Running -> Done` 单向转换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InitState {
    /// 尚未开始初始化
    #[default]
    NotStarted = 0,
    /// 初始化函数正在执行
    Running = 1,
    /// 初始化完成
    Done = 2,
}

impl InitState {
    /// 从原子存储的数值还原
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => InitState::NotStarted,
            1 => InitState::Running,
            _ => InitState::Done,
        }
    }
}

impl std::fmt::Display for InitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitState::NotStarted => write!(f, "not_started"),
            InitState::Running => write!(f, "running"),
            InitState::Done => write!(f, "done"),
        }
    }
}

/// 依赖声明
///
/// 清单中既可以写成字符串 `tbase`，也可以写成
/// `{ module_id: tbase, version: "^1.0" }`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DependencyRepr")]
pub struct Dependency {
    /// 依赖模块 ID
    pub module_id: String,

    /// 版本要求（semver 格式，默认 `*`）
    pub version: String,
}

fn default_version_req() -> String {
    "*".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DependencyRepr {
    Short(String),
    Full {
        module_id: String,
        #[serde(default = "default_version_req")]
        version: String,
    },
}

impl From<DependencyRepr> for Dependency {
    fn from(repr: DependencyRepr) -> Self {
        match repr {
            DependencyRepr::Short(module_id) => Dependency::new(module_id),
            DependencyRepr::Full { module_id, version } => Dependency { module_id, version },
        }
    }
}

impl Dependency {
    /// 创建不限版本的依赖
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            version: default_version_req(),
        }
    }

    /// 设置版本要求
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 检查版本是否满足要求
    ///
    /// `*` 总是满足，目标未声明版本时也一样；其他要求需要目标声明了匹配的版本。
    ///
    /// # Errors
    ///
    /// 版本要求不是合法的 semver 表达式时返回 `VersionParse`
    pub fn version_matches(&self, version: Option<&Version>) -> Result<bool> {
        if self.version.trim() == "*" {
            return Ok(true);
        }
        let req = VersionReq::parse(&self.version)?;
        Ok(version.map(|v| req.matches(v)).unwrap_or(false))
    }
}

impl From<&str> for Dependency {
    fn from(module_id: &str) -> Self {
        Dependency::new(module_id)
    }
}

impl From<String> for Dependency {
    fn from(module_id: String) -> Self {
        Dependency::new(module_id)
    }
}

impl From<&String> for Dependency {
    fn from(module_id: &String) -> Self {
        Dependency::new(module_id.clone())
    }
}

/// 模块描述
///
/// 注册时提交给 [`ModuleRegistry`](super::registry::ModuleRegistry) 的静态信息。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// 模块唯一标识
    pub id: String,

    /// 模块版本（semver 格式，可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// 依赖列表
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl ModuleDescriptor {
    /// 创建模块描述
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            dependencies: Vec::new(),
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// 添加依赖
    pub fn depends_on(mut self, dependency: impl Into<Dependency>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// 依赖的模块 ID 列表（按声明顺序）
    pub fn dependency_ids(&self) -> Vec<String> {
        self.dependencies.iter().map(|d| d.module_id.clone()).collect()
    }

    /// 解析后的版本
    pub fn parsed_version(&self) -> Result<Option<Version>> {
        self.version
            .as_deref()
            .map(Version::parse)
            .transpose()
            .map_err(CoreError::from)
    }
}

/// 检查模块 ID 格式是否有效
///
/// 有效格式：字母开头，只包含字母、数字、下划线和连字符
pub fn is_valid_module_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

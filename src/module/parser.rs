//! 模块清单解析器
//!
//! 负责从 YAML / JSON 清单解析模块列表。
//!
//! ```yaml
//! modules:
//!   - id: tbase
//!     version: 1.0.0
//!   - id: tdep
//!     dependencies:
//!       - tbase
//!     uses: [tbase]
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::module::metadata::{is_valid_module_id, ModuleDescriptor};
use crate::utils::{CoreError, Result};

/// 清单中的单个模块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// 模块描述
    #[serde(flatten)]
    pub descriptor: ModuleDescriptor,

    /// 初始化函数中会调用 `use_module()` 的模块
    #[serde(default)]
    pub uses: Vec<String>,
}

/// 模块清单
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// 模块列表（按注册顺序）
    #[serde(default)]
    pub modules: Vec<ManifestEntry>,
}

/// 模块清单解析器
#[derive(Debug, Clone, Default)]
pub struct ManifestParser;

impl ManifestParser {
    /// 从文件解析清单
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 内容格式错误时返回 `Json` / `Yaml` 错误
    /// - 校验失败时返回 `InvalidManifest` 错误
    pub async fn parse_file(path: &Path) -> Result<ModuleManifest> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_with_format(&content, is_json(path))
    }

    /// 从文件同步解析清单
    pub fn parse_file_sync(path: &Path) -> Result<ModuleManifest> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_with_format(&content, is_json(path))
    }

    /// 从 YAML 字符串解析清单
    pub fn parse_string(content: &str) -> Result<ModuleManifest> {
        Self::parse_with_format(content, false)
    }

    fn parse_with_format(content: &str, json: bool) -> Result<ModuleManifest> {
        let manifest: ModuleManifest = if json {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        Self::validate(&manifest)?;
        Ok(manifest)
    }

    /// 校验清单
    ///
    /// 执行以下校验，并一次性报告所有问题：
    /// - 至少包含一个模块
    /// - 模块 ID 格式有效且不重复
    /// - 版本号与依赖版本要求符合 semver
    /// - `uses` 引用的模块存在于清单中
    ///
    /// 依赖是否存在、是否成环由注册表在冻结时检查。
    pub fn validate(manifest: &ModuleManifest) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if manifest.modules.is_empty() {
            errors.push("清单中没有任何模块".to_string());
        }

        let declared: HashSet<&str> = manifest
            .modules
            .iter()
            .map(|m| m.descriptor.id.as_str())
            .collect();
        let mut seen = HashSet::new();

        for (index, entry) in manifest.modules.iter().enumerate() {
            let desc = &entry.descriptor;

            if !is_valid_module_id(&desc.id) {
                errors.push(format!("第 {} 个模块的 ID '{}' 格式无效", index + 1, desc.id));
            }
            if !seen.insert(desc.id.as_str()) {
                errors.push(format!("模块 '{}' 重复声明", desc.id));
            }

            if let Some(version) = &desc.version {
                if semver::Version::parse(version).is_err() {
                    errors.push(format!(
                        "模块 '{}' 的版本号 '{}' 无效，请使用 semver 格式 (如 1.0.0)",
                        desc.id, version
                    ));
                }
            }

            for dep in &desc.dependencies {
                if dep.module_id.is_empty() {
                    errors.push(format!("模块 '{}' 存在空的依赖 ID", desc.id));
                }
                if semver::VersionReq::parse(&dep.version).is_err() {
                    errors.push(format!(
                        "模块 '{}' 对 '{}' 的版本要求 '{}' 无效",
                        desc.id, dep.module_id, dep.version
                    ));
                }
            }

            for used in &entry.uses {
                if !declared.contains(used.as_str()) {
                    errors.push(format!("模块 '{}' 使用了未声明的模块 '{}'", desc.id, used));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidManifest(errors.join("; ")))
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

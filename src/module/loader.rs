//! 模块加载器
//!
//! 加载器负责把外部的模块来源（清单、动态库等）转换为注册表中的注册项，
//! 相当于动态库加载期构造函数的适配层：构造函数不再直接执行初始化，
//! 而是调用 [`ModuleRegistry::register`]，由协调器统一安排执行顺序。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use super::parser::{ManifestParser, ModuleManifest};
use super::registry::ModuleRegistry;
use super::runtime::ModuleHandle;
use crate::utils::{CoreError, Result};

/// 模块加载器接口
pub trait ModuleLoader {
    /// 把模块注册到注册表
    ///
    /// # Returns
    ///
    /// 按注册顺序返回新注册的模块句柄
    fn load(&self, registry: &ModuleRegistry) -> Result<Vec<ModuleHandle>>;
}

/// 清单加载器
///
/// 为清单中的每个模块注册一个标记型初始化函数：依次调用 `uses`
/// 中列出模块的 `use_module()`。
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    manifest: ModuleManifest,
}

impl ManifestLoader {
    /// 使用已解析的清单创建加载器
    pub fn new(manifest: ModuleManifest) -> Self {
        Self { manifest }
    }

    /// 从文件创建加载器
    pub async fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(ManifestParser::parse_file(path).await?))
    }

    /// 从 YAML 字符串创建加载器
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(Self::new(ManifestParser::parse_string(content)?))
    }

    /// 清单内容
    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }
}

impl ModuleLoader for ManifestLoader {
    fn load(&self, registry: &ModuleRegistry) -> Result<Vec<ModuleHandle>> {
        // 被使用的模块可能在使用方之后才注册，先为每个模块准备一个槽位
        let slots: Arc<HashMap<String, OnceLock<ModuleHandle>>> = Arc::new(
            self.manifest
                .modules
                .iter()
                .map(|entry| (entry.descriptor.id.clone(), OnceLock::new()))
                .collect(),
        );

        let mut handles = Vec::with_capacity(self.manifest.modules.len());

        for entry in &self.manifest.modules {
            let uses = entry.uses.clone();
            let lookup = slots.clone();

            let handle = registry.register_descriptor(entry.descriptor.clone(), move || {
                for used in &uses {
                    let target = lookup
                        .get(used)
                        .and_then(OnceLock::get)
                        .ok_or_else(|| CoreError::ModuleNotFound(used.clone()))?;
                    target.use_module();
                }
                Ok(())
            })?;

            if let Some(slot) = slots.get(handle.id()) {
                let _ = slot.set(handle.clone());
            }
            debug!(module_id = %handle.id(), uses = ?entry.uses, "清单模块已注册");
            handles.push(handle);
        }

        info!(count = handles.len(), "清单加载完成");
        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::coordinator::InitCoordinator;
    use crate::module::runtime::{panic_on_violation, InitContext, MemorySink};

    fn registry() -> (Arc<MemorySink>, ModuleRegistry) {
        let sink = Arc::new(MemorySink::new());
        let ctx = InitContext::new(sink.clone(), panic_on_violation);
        (sink, ModuleRegistry::with_context(Arc::new(ctx)))
    }

    #[test]
    fn test_manifest_loader_registers_in_order() {
        let (_sink, registry) = registry();
        let loader = ManifestLoader::from_yaml(
            "modules:\n  - id: tdep\n    dependencies: [tbase]\n    uses: [tbase]\n  - id: tbase\n",
        )
        .unwrap();

        let handles = loader.load(&registry).unwrap();

        assert_eq!(
            handles.iter().map(|h| h.id()).collect::<Vec<_>>(),
            vec!["tdep", "tbase"]
        );
        assert_eq!(registry.module_ids(), vec!["tdep", "tbase"]);
    }

    #[test]
    fn test_manifest_loader_uses_later_module() {
        let (sink, registry) = registry();
        let loader = ManifestLoader::from_yaml(
            "modules:\n  - id: tdep\n    dependencies: [tbase]\n    uses: [tbase]\n  - id: tbase\n",
        )
        .unwrap();
        loader.load(&registry).unwrap();

        InitCoordinator::new(registry.finalize().unwrap())
            .run()
            .unwrap();

        assert_eq!(
            sink.lines(),
            vec![
                "tbase: initializing...",
                "tbase: initialized.",
                "tdep: initializing...",
                "tbase: used.",
                "tdep: initialized.",
            ]
        );
    }

    #[test]
    fn test_manifest_loader_duplicate_against_registry() {
        let (_sink, registry) = registry();
        registry.register("tbase", || Ok(()), &[]).unwrap();

        let loader = ManifestLoader::from_yaml("modules:\n  - id: tbase\n").unwrap();
        assert!(matches!(
            loader.load(&registry),
            Err(CoreError::DuplicateModule(_))
        ));
    }
}

//! 模块注册表
//!
//! 管理所有已注册的模块及其依赖声明。
//!
//! 注册表有两个阶段：
//! - 开放阶段：接受 [`ModuleRegistry::register`]
//! - 冻结阶段：[`ModuleRegistry::finalize`] 成功后，依赖图不再变化，
//!   产出不可变的 [`ModuleSet`] 快照供协调器使用

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::dependency::DependencyGraph;
use super::metadata::{is_valid_module_id, Dependency, ModuleDescriptor};
use super::runtime::{InitContext, ModuleHandle};
use crate::utils::{CoreError, Result};

/// 注册表内部状态
#[derive(Debug, Default)]
struct RegistryState {
    /// 按注册顺序排列的模块
    modules: Vec<ModuleHandle>,
    /// 模块 ID -> 下标
    index: HashMap<String, usize>,
    /// 冻结后的快照
    snapshot: Option<Arc<ModuleSet>>,
}

/// 模块注册表
#[derive(Debug)]
pub struct ModuleRegistry {
    state: RwLock<RegistryState>,
    context: Arc<InitContext>,
}

impl ModuleRegistry {
    /// 创建使用默认上下文（标准输出、中止进程）的注册表
    pub fn new() -> Self {
        Self::with_context(Arc::new(InitContext::default()))
    }

    /// 使用指定上下文创建注册表
    pub fn with_context(context: Arc<InitContext>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            context,
        }
    }

    /// 共享的初始化上下文
    pub fn context(&self) -> &Arc<InitContext> {
        &self.context
    }

    /// 注册模块
    ///
    /// # Arguments
    ///
    /// * `module_id` - 模块 ID
    /// * `initializer` - 初始化函数，只会被调用一次
    /// * `dependencies` - 必须先于本模块完成初始化的模块
    ///
    /// # Errors
    ///
    /// - `DuplicateModule` - 模块 ID 已注册
    /// - `InvalidModuleId` - 模块 ID 格式无效
    /// - `RegistryFinalized` - 注册表已冻结
    pub fn register<F>(
        &self,
        module_id: impl Into<String>,
        initializer: F,
        dependencies: &[&str],
    ) -> Result<ModuleHandle>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let descriptor = dependencies
            .iter()
            .fold(ModuleDescriptor::new(module_id), |desc, dep| {
                desc.depends_on(*dep)
            });
        self.register_descriptor(descriptor, initializer)
    }

    /// 使用完整的模块描述注册模块
    ///
    /// 与 [`register`](Self::register) 相同，但可以携带版本与依赖的版本要求。
    pub fn register_descriptor<F>(
        &self,
        descriptor: ModuleDescriptor,
        initializer: F,
    ) -> Result<ModuleHandle>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let module_id = descriptor.id.clone();

        if !is_valid_module_id(&module_id) {
            return Err(CoreError::InvalidModuleId(module_id));
        }
        // 提前校验版本格式，冻结时不再因格式问题失败
        descriptor.parsed_version()?;

        let mut state = self.write();

        if state.snapshot.is_some() {
            warn!(module_id = %module_id, "注册表已冻结，拒绝注册");
            return Err(CoreError::RegistryFinalized(module_id));
        }
        if state.index.contains_key(&module_id) {
            return Err(CoreError::DuplicateModule(module_id));
        }

        let handle = ModuleHandle::new(descriptor, Box::new(initializer), self.context.clone());
        let idx = state.modules.len();
        state.modules.push(handle.clone());
        state.index.insert(module_id.clone(), idx);

        debug!(
            module_id = %module_id,
            dependencies = ?handle.descriptor().dependency_ids(),
            "模块已注册"
        );
        Ok(handle)
    }

    /// 冻结注册表
    ///
    /// 校验依赖声明并计算初始化顺序。重复调用返回同一个快照。
    ///
    /// # Errors
    ///
    /// - `DependencyNotFound` - 依赖的模块未注册
    /// - `VersionMismatch` - 依赖模块的版本不满足要求
    /// - `CyclicDependency` - 依赖图存在环，错误中包含闭合的循环路径
    ///
    /// 失败时注册表保持开放，修正后可以再次调用。
    pub fn finalize(&self) -> Result<Arc<ModuleSet>> {
        let mut state = self.write();

        if let Some(snapshot) = &state.snapshot {
            return Ok(snapshot.clone());
        }

        let mut graph = DependencyGraph::new();
        for handle in &state.modules {
            graph.add_module(handle.id());
        }

        for handle in &state.modules {
            for dep in handle.dependencies() {
                let target = state
                    .index
                    .get(&dep.module_id)
                    .map(|&idx| &state.modules[idx])
                    .ok_or_else(|| CoreError::DependencyNotFound {
                        module: handle.id().to_string(),
                        dependency: dep.module_id.clone(),
                    })?;

                check_version(dep, target)?;
                graph.add_dependency(handle.id(), &dep.module_id);
            }
        }

        let order = graph.topological_sort()?;

        let snapshot = Arc::new(ModuleSet {
            modules: state.modules.clone(),
            index: state.index.clone(),
            graph,
            order,
            context: self.context.clone(),
        });
        state.snapshot = Some(snapshot.clone());

        info!(
            count = snapshot.len(),
            order = ?snapshot.order(),
            "注册表已冻结"
        );
        Ok(snapshot)
    }

    /// 是否已冻结
    pub fn is_finalized(&self) -> bool {
        self.read().snapshot.is_some()
    }

    /// 获取模块句柄
    pub fn handle(&self, module_id: &str) -> Option<ModuleHandle> {
        let state = self.read();
        state.index.get(module_id).map(|&idx| state.modules[idx].clone())
    }

    /// 是否已注册指定模块
    pub fn contains(&self, module_id: &str) -> bool {
        self.read().index.contains_key(module_id)
    }

    /// 已注册模块数量
    pub fn len(&self) -> usize {
        self.read().modules.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.read().modules.is_empty()
    }

    /// 所有模块 ID（按注册顺序）
    pub fn module_ids(&self) -> Vec<String> {
        self.read()
            .modules
            .iter()
            .map(|handle| handle.id().to_string())
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 检查依赖模块版本是否满足要求
fn check_version(dep: &Dependency, target: &ModuleHandle) -> Result<()> {
    let found = target.descriptor().parsed_version()?;
    if dep.version_matches(found.as_ref())? {
        return Ok(());
    }
    Err(CoreError::VersionMismatch {
        module: dep.module_id.clone(),
        required: dep.version.clone(),
        found: found
            .map(|v| v.to_string())
            .unwrap_or_else(|| "未声明".to_string()),
    })
}

/// 冻结后的模块集合
///
/// 依赖图与初始化顺序均不可变。
#[derive(Debug)]
pub struct ModuleSet {
    modules: Vec<ModuleHandle>,
    index: HashMap<String, usize>,
    graph: DependencyGraph,
    order: Vec<String>,
    context: Arc<InitContext>,
}

impl ModuleSet {
    /// 获取模块句柄
    pub fn get(&self, module_id: &str) -> Option<&ModuleHandle> {
        self.index.get(module_id).map(|&idx| &self.modules[idx])
    }

    /// 所有模块（按注册顺序）
    pub fn modules(&self) -> &[ModuleHandle] {
        &self.modules
    }

    /// 依赖图
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// 拓扑排序得到的初始化顺序
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// 共享的初始化上下文
    pub fn context(&self) -> &Arc<InitContext> {
        &self.context
    }

    /// 模块数量
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::module::runtime::{panic_on_violation, MemorySink};

    fn registry() -> ModuleRegistry {
        let ctx = InitContext::new(Arc::new(MemorySink::new()), panic_on_violation);
        ModuleRegistry::with_context(Arc::new(ctx))
    }

    #[test]
    fn test_register_module() {
        let registry = registry();
        let handle = registry.register("tbase", || Ok(()), &[]).unwrap();

        assert_eq!(handle.id(), "tbase");
        assert!(registry.contains("tbase"));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_finalized());
    }

    #[test]
    fn test_register_duplicate() {
        let registry = registry();
        registry.register("tbase", || Ok(()), &[]).unwrap();

        let result = registry.register("tbase", || Ok(()), &[]);
        assert!(matches!(result, Err(CoreError::DuplicateModule(ref id)) if id == "tbase"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_invalid_id() {
        let registry = registry();
        assert!(matches!(
            registry.register("9lives", || Ok(()), &[]),
            Err(CoreError::InvalidModuleId(_))
        ));
        assert!(matches!(
            registry.register("", || Ok(()), &[]),
            Err(CoreError::InvalidModuleId(_))
        ));
    }

    #[test]
    fn test_register_invalid_version() {
        let registry = registry();
        let result = registry
            .register_descriptor(ModuleDescriptor::new("tbase").with_version("one"), || Ok(()));
        assert!(matches!(result, Err(CoreError::VersionParse(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_after_finalize() {
        let registry = registry();
        registry.register("tbase", || Ok(()), &[]).unwrap();
        registry.finalize().unwrap();

        let result = registry.register("late", || Ok(()), &[]);
        assert!(matches!(result, Err(CoreError::RegistryFinalized(ref id)) if id == "late"));
    }

    #[test]
    fn test_finalize_order() {
        let registry = registry();
        registry.register("tdep", || Ok(()), &["tbase"]).unwrap();
        registry.register("tbase", || Ok(()), &[]).unwrap();

        let set = registry.finalize().unwrap();
        assert_eq!(set.order(), ["tbase", "tdep"]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.graph().get_dependents("tbase"), vec!["tdep"]);
        assert!(registry.is_finalized());
    }

    #[test]
    fn test_finalize_twice_returns_same_snapshot() {
        let registry = registry();
        registry.register("tbase", || Ok(()), &[]).unwrap();

        let first = registry.finalize().unwrap();
        let second = registry.finalize().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_finalize_missing_dependency() {
        let registry = registry();
        registry.register("tdep", || Ok(()), &["tbase"]).unwrap();

        let result = registry.finalize();
        assert!(matches!(
            result,
            Err(CoreError::DependencyNotFound { ref module, ref dependency })
                if module == "tdep" && dependency == "tbase"
        ));
        assert!(!registry.is_finalized());

        // 修正后重试
        registry.register("tbase", || Ok(()), &[]).unwrap();
        assert!(registry.finalize().is_ok());
    }

    #[test]
    fn test_finalize_cycle() {
        let registry = registry();
        registry.register("a", || Ok(()), &["b"]).unwrap();
        registry.register("b", || Ok(()), &["c"]).unwrap();
        registry.register("c", || Ok(()), &["a"]).unwrap();

        match registry.finalize() {
            Err(CoreError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle error, got {:?}", other.map(|s| s.order().to_vec())),
        }
        assert!(!registry.is_finalized());
    }

    #[test]
    fn test_finalize_version_requirements() {
        let registry = registry();
        registry
            .register_descriptor(ModuleDescriptor::new("tbase").with_version("1.4.0"), || Ok(()))
            .unwrap();
        registry
            .register_descriptor(
                ModuleDescriptor::new("tdep").depends_on(Dependency::new("tbase").with_version("^1.2")),
                || Ok(()),
            )
            .unwrap();

        assert!(registry.finalize().is_ok());
    }

    #[test]
    fn test_finalize_version_mismatch() {
        let registry = registry();
        registry
            .register_descriptor(ModuleDescriptor::new("tbase").with_version("1.0.0"), || Ok(()))
            .unwrap();
        registry
            .register_descriptor(
                ModuleDescriptor::new("tdep").depends_on(Dependency::new("tbase").with_version("^2")),
                || Ok(()),
            )
            .unwrap();

        assert!(matches!(
            registry.finalize(),
            Err(CoreError::VersionMismatch { ref found, .. }) if found == "1.0.0"
        ));
    }

    #[test]
    fn test_finalize_version_required_but_undeclared() {
        let registry = registry();
        registry.register("tbase", || Ok(()), &[]).unwrap();
        registry
            .register_descriptor(
                ModuleDescriptor::new("tdep").depends_on(Dependency::new("tbase").with_version("^1")),
                || Ok(()),
            )
            .unwrap();

        assert!(matches!(
            registry.finalize(),
            Err(CoreError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_module_ids_and_handle_lookup() {
        let registry = registry();
        registry.register("b", || Ok(()), &[]).unwrap();
        registry.register("a", || Ok(()), &[]).unwrap();

        assert_eq!(registry.module_ids(), vec!["b", "a"]);
        assert_eq!(registry.handle("a").map(|h| h.id().to_string()), Some("a".to_string()));
        assert!(registry.handle("zzz").is_none());
    }
}

//! 初始化协调器
//!
//! 按依赖图的拓扑顺序驱动每个模块的初始化函数，每个函数恰好执行一次。
//!
//! # 示例
//!
//! ```rust
//! use std::sync::Arc;
//! use chips_init::module::{InitContext, InitCoordinator, MemorySink, ModuleRegistry};
//! use chips_init::module::runtime::panic_on_violation;
//!
//! let sink = Arc::new(MemorySink::new());
//! let registry = ModuleRegistry::with_context(Arc::new(InitContext::new(
//!     sink.clone(),
//!     panic_on_violation,
//! )));
//!
//! let tbase = registry.register("tbase", || Ok(()), &[]).unwrap();
//! let base = tbase.clone();
//! registry
//!     .register("tdep", move || { base.use_module(); Ok(()) }, &["tbase"])
//!     .unwrap();
//!
//! let coordinator = InitCoordinator::new(registry.finalize().unwrap());
//! let report = coordinator.run().unwrap();
//!
//! assert_eq!(report.order, vec!["tbase", "tdep"]);
//! assert_eq!(
//!     sink.lines(),
//!     vec![
//!         "tbase: initializing...",
//!         "tbase: initialized.",
//!         "tdep: initializing...",
//!         "tbase: used.",
//!         "tdep: initialized.",
//!     ]
//! );
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::guard::GuardSnapshot;
use super::metadata::InitState;
use super::registry::ModuleSet;
use super::runtime::ModuleHandle;
use crate::core::config::CoordinatorConfig;
use crate::utils::{CoreError, Result};

/// 协调器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Phase {
    Idle = 0,
    Running = 1,
    Completed = 2,
}

/// 初始化报告
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    /// 实际执行的初始化顺序
    pub order: Vec<String>,
    /// 各模块守卫快照（与 `order` 同序）
    pub modules: Vec<GuardSnapshot>,
    /// 完成时间
    pub completed_at: DateTime<Utc>,
}

impl InitReport {
    /// 获取指定模块的快照
    pub fn module(&self, module_id: &str) -> Option<&GuardSnapshot> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }
}

/// 初始化协调器
#[derive(Debug)]
pub struct InitCoordinator {
    set: Arc<ModuleSet>,
    order: Vec<ModuleHandle>,
    verify_dependencies: bool,
    phase: AtomicU8,
    report: OnceLock<InitReport>,
}

impl InitCoordinator {
    /// 使用拓扑顺序创建协调器
    pub fn new(set: Arc<ModuleSet>) -> Self {
        let order = set
            .order()
            .iter()
            .filter_map(|id| set.get(id).cloned())
            .collect();

        Self {
            set,
            order,
            verify_dependencies: true,
            phase: AtomicU8::new(Phase::Idle as u8),
            report: OnceLock::new(),
        }
    }

    /// 使用调用方指定的顺序创建协调器
    ///
    /// 用于模拟错误的加载顺序。
    ///
    /// # Errors
    ///
    /// 顺序不是已注册模块的一个排列时返回 `InvalidOrder`。
    pub fn with_order<S: AsRef<str>>(set: Arc<ModuleSet>, order: &[S]) -> Result<Self> {
        if order.len() != set.len() {
            return Err(CoreError::InvalidOrder(format!(
                "需要 {} 个模块，实际给出 {} 个",
                set.len(),
                order.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut handles = Vec::with_capacity(order.len());
        for id in order {
            let id = id.as_ref();
            let handle = set
                .get(id)
                .ok_or_else(|| CoreError::InvalidOrder(format!("未注册的模块 '{}'", id)))?;
            if !seen.insert(id) {
                return Err(CoreError::InvalidOrder(format!("模块 '{}' 重复出现", id)));
            }
            handles.push(handle.clone());
        }

        warn!(
            order = ?handles.iter().map(ModuleHandle::id).collect::<Vec<_>>(),
            "使用强制指定的初始化顺序"
        );
        let mut coordinator = Self::new(set);
        coordinator.order = handles;
        Ok(coordinator)
    }

    /// 设置是否在调用初始化函数前校验依赖状态
    pub fn verify_dependencies(mut self, enabled: bool) -> Self {
        self.verify_dependencies = enabled;
        self
    }

    /// 应用协调器配置
    pub fn with_config(self, config: &CoordinatorConfig) -> Self {
        self.verify_dependencies(config.verify_dependencies)
    }

    /// 本协调器使用的初始化顺序
    pub fn order(&self) -> Vec<String> {
        self.order.iter().map(|h| h.id().to_string()).collect()
    }

    /// 模块集合
    pub fn module_set(&self) -> &Arc<ModuleSet> {
        &self.set
    }

    /// 指定模块的当前状态
    pub fn state_of(&self, module_id: &str) -> Option<InitState> {
        self.set.get(module_id).map(ModuleHandle::state)
    }

    /// 是否已完成
    pub fn is_completed(&self) -> bool {
        self.phase() == Phase::Completed
    }

    /// 执行初始化
    ///
    /// 按顺序调用每个模块的 [`ModuleHandle::initialize`]。
    ///
    /// - 已完成时直接返回缓存的报告
    /// - 正在执行时（例如在初始化函数中再次调用）返回 `ReentrantInitialization`
    ///
    /// 依赖状态校验失败与初始化函数中的顺序违规都是致命错误，不会返回。
    #[instrument(skip(self), fields(modules = self.order.len()))]
    pub fn run(&self) -> Result<InitReport> {
        match self.phase.compare_exchange(
            Phase::Idle as u8,
            Phase::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) if current == Phase::Completed as u8 => {
                info!("初始化已完成，跳过");
                return self
                    .report
                    .get()
                    .cloned()
                    .ok_or_else(|| CoreError::Internal("缺少初始化报告".to_string()));
            }
            Err(_) => {
                let active = self
                    .set
                    .context()
                    .current_initializer()
                    .unwrap_or_else(|| "coordinator".to_string());
                return Err(CoreError::ReentrantInitialization(active));
            }
        }

        info!(order = ?self.order(), "开始按依赖顺序初始化模块");

        for handle in &self.order {
            if self.verify_dependencies {
                self.check_dependencies(handle);
            }

            if let Err(e) = handle.initialize() {
                error!(module_id = %handle.id(), error = %e, "模块初始化失败");
                self.phase.store(Phase::Idle as u8, Ordering::Release);
                return Err(e);
            }
        }

        let report = InitReport {
            order: self.order(),
            modules: self.order.iter().map(ModuleHandle::snapshot).collect(),
            completed_at: Utc::now(),
        };
        let report = self.report.get_or_init(|| report).clone();
        self.phase.store(Phase::Completed as u8, Ordering::Release);

        info!(count = report.order.len(), "所有模块初始化完成");
        Ok(report)
    }

    /// 校验依赖是否都已完成初始化
    ///
    /// 拓扑顺序下总是成立；只有强制顺序才可能触发。
    fn check_dependencies(&self, handle: &ModuleHandle) {
        for dep in handle.dependencies() {
            let ready = self
                .set
                .get(&dep.module_id)
                .map(ModuleHandle::is_initialized)
                .unwrap_or(false);

            if !ready {
                let err = CoreError::OrderingViolation {
                    module: handle.id().to_string(),
                    used: dep.module_id.clone(),
                };
                error!(
                    module_id = %handle.id(),
                    dependency = %dep.module_id,
                    "依赖尚未完成初始化"
                );
                let ctx = self.set.context();
                ctx.emit(&dep.module_id, &err.to_string());
                ctx.fatal(&err);
            }
        }
    }

    fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Acquire) {
            0 => Phase::Idle,
            1 => Phase::Running,
            _ => Phase::Completed,
        }
    }
}

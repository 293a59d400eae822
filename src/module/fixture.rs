//! 示例模块 `tbase` / `tdep`
//!
//! 两个模块模拟动态库的加载期构造函数：`tdep` 的初始化函数会调用 `tbase` 的
//! `use_module()`，因此 `tbase` 必须先完成初始化。

use std::sync::{Arc, OnceLock};

use super::registry::ModuleRegistry;
use super::runtime::ModuleHandle;
use crate::utils::{CoreError, Result};

/// 基础模块 ID
pub const TBASE: &str = "tbase";

/// 依赖模块 ID
pub const TDEP: &str = "tdep";

/// 示例模块的注册方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixtureLayout {
    /// `tbase` 先注册，`tdep` 声明依赖 `tbase`
    #[default]
    Correct,
    /// `tdep` 先注册且漏掉了对 `tbase` 的依赖声明
    Misconfigured,
}

/// 已注册的示例模块
#[derive(Debug, Clone)]
pub struct Fixture {
    /// 基础模块
    pub tbase: ModuleHandle,
    /// 依赖 `tbase` 的模块
    pub tdep: ModuleHandle,
}

/// 把 `tbase` 与 `tdep` 注册到注册表
pub fn register_fixture(registry: &ModuleRegistry, layout: FixtureLayout) -> Result<Fixture> {
    match layout {
        FixtureLayout::Correct => {
            let tbase = registry.register(TBASE, || Ok(()), &[])?;
            let base = tbase.clone();
            let tdep = registry.register(
                TDEP,
                move || {
                    base.use_module();
                    Ok(())
                },
                &[TBASE],
            )?;
            Ok(Fixture { tbase, tdep })
        }
        FixtureLayout::Misconfigured => {
            // tdep 注册时 tbase 还不存在，初始化时再取
            let slot: Arc<OnceLock<ModuleHandle>> = Arc::new(OnceLock::new());
            let base = slot.clone();
            let tdep = registry.register(
                TDEP,
                move || {
                    let tbase = base
                        .get()
                        .ok_or_else(|| CoreError::ModuleNotFound(TBASE.to_string()))?;
                    tbase.use_module();
                    Ok(())
                },
                &[],
            )?;
            let tbase = registry.register(TBASE, || Ok(()), &[])?;
            let _ = slot.set(tbase.clone());
            Ok(Fixture { tbase, tdep })
        }
    }
}

/// 违反依赖关系的强制初始化顺序
pub fn forced_misorder() -> [&'static str; 2] {
    [TDEP, TBASE]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::coordinator::InitCoordinator;
    use crate::module::runtime::{panic_on_violation, InitContext, MemorySink};
    use std::panic::{self, AssertUnwindSafe};

    fn registry() -> (Arc<MemorySink>, ModuleRegistry) {
        let sink = Arc::new(MemorySink::new());
        let ctx = InitContext::new(sink.clone(), panic_on_violation);
        (sink, ModuleRegistry::with_context(Arc::new(ctx)))
    }

    #[test]
    fn test_correct_layout_trace() {
        let (sink, registry) = registry();
        let fixture = register_fixture(&registry, FixtureLayout::Correct).unwrap();

        InitCoordinator::new(registry.finalize().unwrap())
            .run()
            .unwrap();
        fixture.tdep.use_module();

        assert_eq!(
            sink.lines(),
            vec![
                "tbase: initializing...",
                "tbase: initialized.",
                "tdep: initializing...",
                "tbase: used.",
                "tdep: initialized.",
                "tdep: used.",
            ]
        );
    }

    #[test]
    fn test_misconfigured_layout_aborts() {
        let (sink, registry) = registry();
        register_fixture(&registry, FixtureLayout::Misconfigured).unwrap();

        let set = registry.finalize().unwrap();
        assert_eq!(set.order(), forced_misorder());

        let coordinator = InitCoordinator::new(set);
        let result = panic::catch_unwind(AssertUnwindSafe(|| coordinator.run()));

        assert!(result.is_err());
        assert_eq!(
            sink.lines(),
            vec!["tdep: initializing...", "tbase: not initialized yet, aborted."]
        );
    }
}

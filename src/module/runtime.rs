//! 模块运行时
//!
//! 定义每个模块对外暴露的行为接口 [`ModuleHandle`]：
//!
//! - [`ModuleHandle::initialize`] - 幂等地执行一次初始化函数
//! - [`ModuleHandle::use_module`] - 使用模块前检查守卫，未初始化时中止进程
//!
//! 同一注册表内的模块共享一个 [`InitContext`]，其中包含诊断输出、
//! 致命错误处理函数以及"当前正在初始化的模块"栈。

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};

use super::guard::{GuardSnapshot, InitGuard};
use super::metadata::{Dependency, InitState, ModuleDescriptor};
use crate::utils::{CoreError, Result};

/// 模块初始化函数
///
/// 只会被调用一次，调用后即被丢弃。
pub type Initializer = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// 致命错误处理函数
///
/// 接收致命错误，永不返回。
pub type FatalHandler = fn(&CoreError) -> !;

/// 默认致命错误处理：记录日志后中止进程
pub fn abort_process(err: &CoreError) -> ! {
    error!(code = err.error_code(), error = %err, "检测到初始化顺序违规，中止进程");
    std::process::abort()
}

/// 以 panic 代替中止，便于在测试中捕获
pub fn panic_on_violation(err: &CoreError) -> ! {
    panic!("{}", err)
}

// ============================================================================
// 诊断输出
// ============================================================================

/// 诊断输出接口
///
/// 每次调用输出一行人类可读的生命周期信息。
pub trait DiagnosticSink: Send + Sync {
    /// 输出一行
    fn emit(&self, line: &str);
}

/// 标准输出诊断（默认）
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn emit(&self, line: &str) {
        let mut out = io::stdout().lock();
        // 中止前必须已经写出，所以逐行刷新
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}

/// 内存诊断，记录所有输出行
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// 创建空的内存诊断
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取已记录的所有行
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// 清空记录
    pub fn clear(&self) {
        lock(&self.lines).clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, line: &str) {
        lock(&self.lines).push(line.to_string());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// 初始化上下文
// ============================================================================

/// 初始化上下文
///
/// 由同一注册表内的所有模块共享。
pub struct InitContext {
    sink: Arc<dyn DiagnosticSink>,
    fatal: FatalHandler,
    /// 正在执行初始化函数的模块栈，栈顶为最内层
    active: Mutex<Vec<String>>,
}

impl InitContext {
    /// 创建上下文
    pub fn new(sink: Arc<dyn DiagnosticSink>, fatal: FatalHandler) -> Self {
        Self {
            sink,
            fatal,
            active: Mutex::new(Vec::new()),
        }
    }

    /// 输出一行诊断信息
    pub fn emit(&self, module_id: &str, line: &str) {
        debug!(module_id = %module_id, line = %line, "诊断输出");
        self.sink.emit(line);
    }

    /// 处理致命错误，永不返回
    ///
    /// 只接受 [`CoreError::is_fatal`] 为真的错误，其余错误应通过 `Result` 返回。
    pub fn fatal(&self, err: &CoreError) -> ! {
        debug_assert!(err.is_fatal(), "非致命错误不应交给致命错误处理: {}", err);
        (self.fatal)(err)
    }

    /// 当前正在初始化的模块（最内层）
    pub fn current_initializer(&self) -> Option<String> {
        lock(&self.active).last().cloned()
    }

    fn push_active(&self, module_id: &str) {
        lock(&self.active).push(module_id.to_string());
    }

    fn pop_active(&self, module_id: &str) {
        let mut active = lock(&self.active);
        if let Some(pos) = active.iter().rposition(|id| id == module_id) {
            active.remove(pos);
        }
    }
}

impl Default for InitContext {
    fn default() -> Self {
        Self::new(Arc::new(StdoutSink), abort_process)
    }
}

impl fmt::Debug for InitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitContext")
            .field("active", &*lock(&self.active))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// 模块句柄
// ============================================================================

/// 模块条目，由注册表持有
struct ModuleEntry {
    descriptor: ModuleDescriptor,
    guard: InitGuard,
    initializer: Mutex<Option<Initializer>>,
    context: Arc<InitContext>,
}

/// 模块句柄
///
/// 可廉价克隆，克隆体指向同一个模块。
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<ModuleEntry>,
}

impl ModuleHandle {
    pub(crate) fn new(
        descriptor: ModuleDescriptor,
        initializer: Initializer,
        context: Arc<InitContext>,
    ) -> Self {
        let guard = InitGuard::new(descriptor.id.clone());
        Self {
            inner: Arc::new(ModuleEntry {
                descriptor,
                guard,
                initializer: Mutex::new(Some(initializer)),
                context,
            }),
        }
    }

    /// 模块 ID
    pub fn id(&self) -> &str {
        &self.inner.descriptor.id
    }

    /// 模块描述
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.inner.descriptor
    }

    /// 声明的依赖
    pub fn dependencies(&self) -> &[Dependency] {
        &self.inner.descriptor.dependencies
    }

    /// 当前初始化状态
    pub fn state(&self) -> InitState {
        self.inner.guard.state()
    }

    /// 是否已完成初始化
    pub fn is_initialized(&self) -> bool {
        self.inner.guard.is_done()
    }

    /// 守卫快照
    pub fn snapshot(&self) -> GuardSnapshot {
        self.inner.guard.snapshot()
    }

    /// 初始化模块
    ///
    /// - `Done` 时直接返回
    /// - `NotStarted` 时执行初始化函数，状态依次变为 `Running`、`Done`
    ///
    /// 初始化函数返回错误视为致命错误，交给 [`FatalHandler`] 处理。
    ///
    /// # Errors
    ///
    /// - `ReentrantInitialization` - 模块正处于 `Running`（初始化函数直接或间接地再次初始化自身）
    pub fn initialize(&self) -> Result<()> {
        if !self.inner.guard.try_begin()? {
            return Ok(());
        }

        let id = self.id();
        let ctx = &self.inner.context;

        info!(module_id = %id, "开始初始化模块");
        ctx.push_active(id);
        ctx.emit(id, &format!("{}: initializing...", id));

        let initializer = lock(&self.inner.initializer).take();
        let outcome = match initializer {
            Some(init) => init(),
            None => Ok(()),
        };

        ctx.pop_active(id);

        if let Err(e) = outcome {
            let err = CoreError::InitializerFailed {
                module: id.to_string(),
                reason: e.to_string(),
            };
            ctx.emit(id, &format!("{}: initialization failed, aborted.", id));
            ctx.fatal(&err);
        }

        self.inner.guard.finish()?;
        ctx.emit(id, &format!("{}: initialized.", id));
        info!(module_id = %id, elapsed = ?self.inner.guard.elapsed(), "模块初始化完成");

        Ok(())
    }

    /// 使用模块
    ///
    /// 模块已初始化时输出 `"<module>: used."`。否则输出
    /// `"<module>: not initialized yet, aborted."` 并交给 [`FatalHandler`]，不会返回：
    ///
    /// - 在其他模块的初始化函数中调用时为 `OrderingViolation`
    /// - 其他情况为 `UseBeforeInit`
    pub fn use_module(&self) {
        let id = self.id();
        let ctx = &self.inner.context;

        if self.inner.guard.is_done() {
            ctx.emit(id, &format!("{}: used.", id));
            return;
        }

        let err = match ctx.current_initializer() {
            Some(initializing) if initializing != id => CoreError::OrderingViolation {
                module: initializing,
                used: id.to_string(),
            },
            _ => CoreError::UseBeforeInit(id.to_string()),
        };

        error!(
            module_id = %id,
            state = %self.state(),
            code = err.error_code(),
            "模块在初始化完成前被使用"
        );
        ctx.emit(id, &err.to_string());
        ctx.fatal(&err)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("dependencies", &self.inner.descriptor.dependency_ids())
            .finish()
    }
}

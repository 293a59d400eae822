//! 模块初始化守卫
//!
//! 每个模块持有一个 [`InitGuard`]，记录 `NotStarted -> Running -> Done` 的状态转换。
//!
//! - `NotStarted -> Running` 使用 CAS，保证并发加载时不会重复初始化
//! - `Done` 以 release 语义写入，读取使用 acquire 语义，
//!   观察到 `Done` 的线程也能观察到初始化函数的全部副作用
//! - 每次转换都会盖上一个进程内单调递增的序号，用于校验时间先后

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::metadata::InitState;
use crate::utils::{CoreError, Result};

/// 全局转换序号，0 保留为"未发生"
static TRANSITION_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_seq() -> u64 {
    TRANSITION_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// 模块初始化守卫
#[derive(Debug)]
pub struct InitGuard {
    /// 所属模块 ID（用于诊断信息）
    module_id: String,
    /// 当前状态，存储 `InitState as u8`
    state: AtomicU8,
    /// 进入 Running 时的序号
    started_seq: AtomicU64,
    /// 进入 Done 时的序号
    finished_seq: AtomicU64,
    started_at: OnceLock<Instant>,
    elapsed: OnceLock<Duration>,
}

impl InitGuard {
    /// 创建处于 `NotStarted` 状态的守卫
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            state: AtomicU8::new(InitState::NotStarted as u8),
            started_seq: AtomicU64::new(0),
            finished_seq: AtomicU64::new(0),
            started_at: OnceLock::new(),
            elapsed: OnceLock::new(),
        }
    }

    /// 所属模块 ID
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// 当前状态（acquire 读取）
    pub fn state(&self) -> InitState {
        InitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 是否已完成初始化
    pub fn is_done(&self) -> bool {
        self.state() == InitState::Done
    }

    /// 尝试进入 `Running`
    ///
    /// # Returns
    ///
    /// - `Ok(true)` - 本次调用完成了 `NotStarted -> Running` 转换，调用方负责执行初始化
    /// - `Ok(false)` - 模块已经是 `Done`，无需任何操作
    ///
    /// # Errors
    ///
    /// - `ReentrantInitialization` - 模块正处于 `Running`（循环激活）
    pub fn try_begin(&self) -> Result<bool> {
        match self.state.compare_exchange(
            InitState::NotStarted as u8,
            InitState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.started_seq.store(next_seq(), Ordering::Release);
                let _ = self.started_at.set(Instant::now());
                Ok(true)
            }
            Err(current) => match InitState::from_u8(current) {
                InitState::Done => Ok(false),
                _ => Err(CoreError::ReentrantInitialization(self.module_id.clone())),
            },
        }
    }

    /// 完成初始化，`Running -> Done`
    ///
    /// # Errors
    ///
    /// 守卫不处于 `Running` 时返回 `Internal`，状态不会被修改。
    pub fn finish(&self) -> Result<()> {
        let seq = next_seq();
        self.state
            .compare_exchange(
                InitState::Running as u8,
                InitState::Done as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|current| {
                CoreError::Internal(format!(
                    "模块 '{}' 在状态 {} 下无法完成初始化",
                    self.module_id,
                    InitState::from_u8(current)
                ))
            })?;

        self.finished_seq.store(seq, Ordering::Release);
        if let Some(started) = self.started_at.get() {
            let _ = self.elapsed.set(started.elapsed());
        }
        Ok(())
    }

    /// 进入 `Running` 的序号
    pub fn started_seq(&self) -> Option<u64> {
        match self.started_seq.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }

    /// 进入 `Done` 的序号
    pub fn finished_seq(&self) -> Option<u64> {
        match self.finished_seq.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }

    /// 初始化耗时（仅在 `Done` 后可用）
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed.get().copied()
    }

    /// 导出当前快照
    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            module_id: self.module_id.clone(),
            state: self.state(),
            started_seq: self.started_seq(),
            finished_seq: self.finished_seq(),
            elapsed_us: self.elapsed().map(|d| d.as_micros() as u64),
        }
    }
}

/// 守卫状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardSnapshot {
    /// 模块 ID
    pub module_id: String,
    /// 当前状态
    pub state: InitState,
    /// 进入 `Running` 时的全局序号
    pub started_seq: Option<u64>,
    /// 进入 `Done` 时的全局序号
    pub finished_seq: Option<u64>,
    /// 初始化耗时（微秒）
    pub elapsed_us: Option<u64>,
}

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

use crate::pipeline::CycleRunner;
use crate::utils::activity::ActivityLog;

#[derive(Default)]
struct SchedulerState {
    /// 唯一决定周期结束后是否继续的开关
    enabled: bool,
    /// 仅用于显示倒计时
    next_run_at: Option<Instant>,
    /// 调度循环是否存活，与 enabled 在同一把锁下检查
    loop_active: bool,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    runner: Arc<dyn CycleRunner>,
    cooldown: Duration,
    activity: ActivityLog,
    state: Mutex<SchedulerState>,
    wake: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 已停止则结束循环并返回 false
    fn still_enabled(&self) -> bool {
        let mut state = self.state();
        if !state.enabled {
            state.loop_active = false;
            state.next_run_at = None;
        }
        state.enabled
    }
}

/// 单飞调度：上一个周期完全结束后才开始冷却计时，冷却结束再执行下一个。
///
/// stop() 不会中断正在执行的周期，只阻止之后的调度。
#[derive(Clone)]
pub struct GenerationScheduler {
    inner: Arc<Inner>,
}

impl GenerationScheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, cooldown: Duration, activity: ActivityLog) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                cooldown,
                activity,
                state: Mutex::new(SchedulerState::default()),
                wake: Notify::new(),
            }),
        }
    }

    /// 立即执行第一个周期。已在运行时返回 false。
    pub fn start(&self) -> bool {
        let mut state = self.inner.state();
        if state.enabled {
            return false;
        }
        state.enabled = true;

        // 停止后立刻重新启动时，旧循环仍在执行周期，由它继续调度
        if !state.loop_active {
            state.loop_active = true;
            state.task = Some(tokio::spawn(run_loop(self.inner.clone())));
        }
        drop(state);

        self.inner.activity.warning("🚀 Auto-Pilot ENGAGED");
        true
    }

    pub fn stop(&self) {
        let was_enabled = {
            let mut state = self.inner.state();
            let was_enabled = state.enabled;
            state.enabled = false;
            state.next_run_at = None;
            was_enabled
        };
        self.inner.wake.notify_waiters();

        if was_enabled {
            self.inner.activity.warning("🛑 Auto-Pilot STOPPED");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().enabled
    }

    /// 距下一个周期的剩余时间；周期执行中、已停止或冷却时间无法表示时为 None
    pub fn next_run_eta(&self) -> Option<Duration> {
        self.inner
            .state()
            .next_run_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// 停止并等待正在执行的周期结束
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.inner.state().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("调度任务异常退出: {}", e);
            }
        }
        info!("调度器已关闭");
    }
}

async fn run_loop(inner: Arc<Inner>) {
    info!("调度循环启动，冷却时间 {}s", inner.cooldown.as_secs());

    loop {
        // 周期在独立任务中执行，panic 只结束这一个周期
        let runner = inner.runner.clone();
        match tokio::spawn(async move { runner.run_cycle().await }).await {
            Ok(Ok(record)) => info!("本周期完成: {}", record.title),
            // 失败不停止调度，下个冷却周期继续
            Ok(Err(e)) => error!("本周期失败，{}s 后重试: {}", inner.cooldown.as_secs(), e),
            Err(e) => error!("本周期异常中止，{}s 后重试: {}", inner.cooldown.as_secs(), e),
        }

        // 先注册唤醒，避免错过检查之后到来的 stop()
        let woken = inner.wake.notified();

        let deadline = {
            let mut state = inner.state();
            if !state.enabled {
                state.loop_active = false;
                state.next_run_at = None;
                break;
            }
            // 冷却时间超出时钟范围时只能由 stop() 唤醒
            let deadline = Instant::now().checked_add(inner.cooldown);
            state.next_run_at = deadline;
            deadline
        };

        match deadline {
            Some(deadline) => tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = woken => {}
            },
            None => woken.await,
        }

        if !inner.still_enabled() {
            break;
        }
        inner.state().next_run_at = None;
    }

    info!("调度循环结束");
}

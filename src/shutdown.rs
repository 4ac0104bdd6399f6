// 该文件是 Shanan （山南西风） 项目的一部分。
// src/shutdown.rs - 停止信号与在途请求屏障
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Default)]
struct StopState {
  in_flight: usize,
  stopping: bool,
}

#[derive(Debug, Default)]
struct StopInner {
  state: Mutex<StopState>,
  changed: Condvar,
}

/// 进程级停止信号
///
/// 每个在途检测持有一个 [`InFlight`]，停止流程等待计数归零后再拆除实例池。
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
  inner: Arc<StopInner>,
}

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, StopState> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// 登记一个在途请求；已请求停止时返回 `None`
  pub fn enter(&self) -> Option<InFlight> {
    let mut state = self.lock();
    if state.stopping {
      return None;
    }
    state.in_flight += 1;
    Some(InFlight {
      signal: self.clone(),
    })
  }

  pub fn stop(&self) {
    let mut state = self.lock();
    if !state.stopping {
      warn!("收到停止请求，在途请求 {} 个", state.in_flight);
      state.stopping = true;
    }
    drop(state);
    self.inner.changed.notify_all();
  }

  pub fn is_stopping(&self) -> bool {
    self.lock().stopping
  }

  pub fn in_flight(&self) -> usize {
    self.lock().in_flight
  }

  /// 阻塞直到请求停止且没有在途请求
  pub fn wait(&self) {
    let state = self.lock();
    let _state = self
      .inner
      .changed
      .wait_while(state, |s| !s.stopping || s.in_flight > 0)
      .unwrap_or_else(|poisoned| poisoned.into_inner());
  }

  /// 同 [`StopSignal::wait`]，超时返回 `false`
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let state = self.lock();
    let (_state, result) = self
      .inner
      .changed
      .wait_timeout_while(state, timeout, |s| !s.stopping || s.in_flight > 0)
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    !result.timed_out()
  }

  fn leave(&self) {
    let mut state = self.lock();
    state.in_flight -= 1;
    debug!("在途请求剩余 {} 个", state.in_flight);
    drop(state);
    self.inner.changed.notify_all();
  }
}

/// 在途请求登记，析构时注销
#[derive(Debug)]
pub struct InFlight {
  signal: StopSignal,
}

impl Drop for InFlight {
  fn drop(&mut self) {
    self.signal.leave();
  }
}

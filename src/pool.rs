// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pool.rs - 推理实例池
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

//! 固定容量的推理实例池
//!
//! 每个实例要么空闲（在池中），要么被恰好一个请求持有。借出通过 [`PooledWorker`]
//! 守卫完成，守卫析构时归还实例，因此所有退出路径都会释放。
//!
//! 超时卡死的实例无法收回：守卫里的实例被移交到推理线程后不再放回，
//! 守卫析构时该槽位被永久移除，池容量减一。
//!
//! 排空（[`WorkerPool::drain`]）开始后：空闲实例立即销毁，仍被持有的实例在归还时销毁，
//! 尚未拿到实例的 `acquire` 以 [`PoolError::Draining`] 失败，不会无限阻塞。

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
  #[error("实例池正在排空")]
  Draining,
  #[error("实例池已无可用槽位")]
  Exhausted,
}

struct PoolState<W> {
  idle: VecDeque<W>,
  // 借出 + 空闲的实例总数
  circulating: usize,
  draining: bool,
}

struct PoolInner<W> {
  state: Mutex<PoolState<W>>,
  changed: Condvar,
}

impl<W> PoolInner<W> {
  fn lock(&self) -> MutexGuard<'_, PoolState<W>> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn release(&self, worker: W) {
    let mut state = self.lock();
    if state.draining {
      state.circulating -= 1;
      drop(state);
      drop(worker);
      debug!("排空期间归还的实例已销毁");
    } else {
      state.idle.push_back(worker);
      drop(state);
    }
    self.changed.notify_all();
  }

  fn retire(&self) {
    let mut state = self.lock();
    state.circulating -= 1;
    let remaining = state.circulating;
    drop(state);
    warn!("实例槽位已永久移除，剩余容量 {}", remaining);
    self.changed.notify_all();
  }
}

pub struct WorkerPool<W> {
  inner: Arc<PoolInner<W>>,
}

impl<W> Clone for WorkerPool<W> {
  fn clone(&self) -> Self {
    WorkerPool {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<W> WorkerPool<W> {
  /// 依次创建 `capacity` 个实例；任意一个失败时，已创建的实例随之析构
  pub fn initialize<E, F>(capacity: usize, mut factory: F) -> Result<Self, E>
  where
    F: FnMut(usize) -> Result<W, E>,
  {
    let mut idle = VecDeque::with_capacity(capacity);
    for slot in 0..capacity {
      match factory(slot) {
        Ok(worker) => idle.push_back(worker),
        Err(e) => {
          warn!("创建第 {} 个实例失败，释放已创建的 {} 个实例", slot, idle.len());
          return Err(e);
        }
      }
    }

    Ok(WorkerPool {
      inner: Arc::new(PoolInner {
        state: Mutex::new(PoolState {
          idle,
          circulating: capacity,
          draining: false,
        }),
        changed: Condvar::new(),
      }),
    })
  }

  /// 阻塞直到有空闲实例
  pub fn acquire(&self) -> Result<PooledWorker<W>, PoolError> {
    let mut state = self.inner.lock();
    loop {
      if state.draining {
        return Err(PoolError::Draining);
      }
      if let Some(worker) = state.idle.pop_front() {
        return Ok(self.checkout(worker));
      }
      if state.circulating == 0 {
        return Err(PoolError::Exhausted);
      }
      state = self
        .inner
        .changed
        .wait(state)
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    }
  }

  /// 不阻塞，无空闲实例时返回 `None`
  pub fn try_acquire(&self) -> Result<Option<PooledWorker<W>>, PoolError> {
    let mut state = self.inner.lock();
    if state.draining {
      return Err(PoolError::Draining);
    }
    Ok(state.idle.pop_front().map(|worker| self.checkout(worker)))
  }

  fn checkout(&self, worker: W) -> PooledWorker<W> {
    PooledWorker {
      worker: Some(worker),
      pool: Arc::clone(&self.inner),
    }
  }

  /// 空闲实例数量
  pub fn available(&self) -> usize {
    self.inner.lock().idle.len()
  }

  /// 仍在流转中的实例数量（借出 + 空闲）
  pub fn capacity(&self) -> usize {
    self.inner.lock().circulating
  }

  pub fn is_draining(&self) -> bool {
    self.inner.lock().draining
  }

  /// 停止接受新的借出并销毁所有实例，等待借出的实例归还
  ///
  /// `timeout` 为 `None` 时一直等待；返回是否全部销毁。
  pub fn drain(&self, timeout: Option<Duration>) -> bool {
    let mut state = self.inner.lock();
    state.draining = true;
    let idle: Vec<W> = state.idle.drain(..).collect();
    state.circulating -= idle.len();
    info!(
      "排空实例池: 立即销毁 {} 个空闲实例，等待 {} 个借出实例",
      idle.len(),
      state.circulating
    );
    self.inner.changed.notify_all();

    drop(state);
    drop(idle);
    let state = self.inner.lock();

    let condition = |s: &mut PoolState<W>| s.circulating > 0;
    let state = match timeout {
      None => self
        .inner
        .changed
        .wait_while(state, condition)
        .unwrap_or_else(|poisoned| poisoned.into_inner()),
      Some(timeout) => {
        self
          .inner
          .changed
          .wait_timeout_while(state, timeout, condition)
          .unwrap_or_else(|poisoned| poisoned.into_inner())
          .0
      }
    };

    if state.circulating > 0 {
      warn!("排空超时，仍有 {} 个实例未归还", state.circulating);
      false
    } else {
      info!("实例池已排空");
      true
    }
  }
}

/// 借出的实例，析构时归还
pub struct PooledWorker<W> {
  worker: Option<W>,
  pool: Arc<PoolInner<W>>,
}

impl<W> PooledWorker<W> {
  /// 取出实例交给其它执行单元；未放回前守卫析构会永久移除该槽位
  pub fn detach(&mut self) -> Option<W> {
    self.worker.take()
  }

  pub fn attach(&mut self, worker: W) {
    self.worker = Some(worker);
  }

  pub fn is_attached(&self) -> bool {
    self.worker.is_some()
  }
}

impl<W> Deref for PooledWorker<W> {
  type Target = W;

  fn deref(&self) -> &Self::Target {
    match &self.worker {
      Some(worker) => worker,
      None => panic!("实例已被移交，无法访问"),
    }
  }
}

impl<W> DerefMut for PooledWorker<W> {
  fn deref_mut(&mut self) -> &mut Self::Target {
    match &mut self.worker {
      Some(worker) => worker,
      None => panic!("实例已被移交，无法访问"),
    }
  }
}

impl<W> Drop for PooledWorker<W> {
  fn drop(&mut self) {
    match self.worker.take() {
      Some(worker) => self.pool.release(worker),
      None => self.pool.retire(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;

  struct Counted {
    id: usize,
    dropped: Arc<AtomicUsize>,
  }

  impl Drop for Counted {
    fn drop(&mut self) {
      self.dropped.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn pool(capacity: usize) -> (WorkerPool<Counted>, Arc<AtomicUsize>) {
    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped);
    let pool = WorkerPool::initialize(capacity, |id| {
      Ok::<_, ()>(Counted {
        id,
        dropped: Arc::clone(&counter),
      })
    })
    .unwrap();
    (pool, dropped)
  }

  #[test]
  fn failed_initialization_releases_created_workers() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let result = WorkerPool::initialize(4, |id| {
      if id == 2 {
        Err("设备不可用")
      } else {
        Ok(Counted {
          id,
          dropped: Arc::clone(&dropped),
        })
      }
    });
    assert_eq!(result.err(), Some("设备不可用"));
    assert_eq!(dropped.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn guard_returns_worker() {
    let (pool, _) = pool(2);
    {
      let a = pool.acquire().unwrap();
      let b = pool.acquire().unwrap();
      assert_ne!(a.id, b.id);
      assert_eq!(pool.available(), 0);
      assert!(pool.try_acquire().unwrap().is_none());
    }
    assert_eq!(pool.available(), 2);
    assert_eq!(pool.capacity(), 2);
  }

  #[test]
  fn acquire_blocks_until_release() {
    let (pool, _) = pool(1);
    let held = pool.acquire().unwrap();

    let waiter = {
      let pool = pool.clone();
      thread::spawn(move || pool.acquire().map(|w| w.id))
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!waiter.is_finished());

    drop(held);
    assert_eq!(waiter.join().unwrap(), Ok(0));
  }

  #[test]
  fn detached_worker_retires_slot() {
    let (pool, dropped) = pool(2);
    let mut guard = pool.acquire().unwrap();
    let worker = guard.detach().unwrap();
    drop(guard);

    assert_eq!(pool.capacity(), 1);
    assert_eq!(pool.available(), 1);
    drop(worker);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn reattached_worker_is_returned() {
    let (pool, _) = pool(1);
    let mut guard = pool.acquire().unwrap();
    let worker = guard.detach().unwrap();
    guard.attach(worker);
    assert!(guard.is_attached());
    drop(guard);
    assert_eq!(pool.capacity(), 1);
    assert_eq!(pool.available(), 1);
  }

  #[test]
  fn exhausted_pool_fails_waiters() {
    let (pool, _) = pool(1);
    let mut guard = pool.acquire().unwrap();

    let waiter = {
      let pool = pool.clone();
      thread::spawn(move || pool.acquire().map(|w| w.id))
    };
    thread::sleep(Duration::from_millis(20));

    let _wedged = guard.detach();
    drop(guard);
    assert_eq!(waiter.join().unwrap(), Err(PoolError::Exhausted));
  }

  #[test]
  fn drain_destroys_idle_and_returned_workers() {
    let (pool, dropped) = pool(3);
    let held = pool.acquire().unwrap();

    let drainer = {
      let pool = pool.clone();
      thread::spawn(move || pool.drain(None))
    };
    thread::sleep(Duration::from_millis(30));
    assert_eq!(dropped.load(Ordering::SeqCst), 2);
    assert!(pool.is_draining());
    assert_eq!(pool.acquire().err(), Some(PoolError::Draining));

    drop(held);
    assert!(drainer.join().unwrap());
    assert_eq!(dropped.load(Ordering::SeqCst), 3);
    assert_eq!(pool.capacity(), 0);
  }

  #[test]
  fn drain_fails_blocked_waiters() {
    let (pool, dropped) = pool(1);
    let held = pool.acquire().unwrap();

    let waiter = {
      let pool = pool.clone();
      thread::spawn(move || pool.acquire().map(|w| w.id))
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!waiter.is_finished());

    assert!(!pool.drain(Some(Duration::from_millis(20))));
    assert_eq!(waiter.join().unwrap(), Err(PoolError::Draining));

    drop(held);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(pool.capacity(), 0);
  }

  #[test]
  fn drain_times_out_on_held_worker() {
    let (pool, _) = pool(1);
    let _held = pool.acquire().unwrap();
    assert!(!pool.drain(Some(Duration::from_millis(20))));
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detector.rs - 检测请求调度
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

//! 单次检测的生命周期：
//!
//! 归一化图像 → 借出实例 → 写入输入 → 执行（可超时）→ 读取输出 → 归还实例 → 过滤映射
//!
//! 配置了超时时，推理在独立线程上执行，调度线程在结果与计时器之间等待。
//! 计时器先到时该线程被放弃：实例不会被放回池中，其结果即使稍后出现也被丢弃。

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{DetectorConfig, TimeoutPolicy};
use crate::engine::{
  Accelerator, Backend, Device, EngineError, Interpreter, TensorType, WorkerOptions,
};
use crate::error::{ConfigError, DetectError};
use crate::filter::{Detection, FilterSpec, map_detections};
use crate::frame::AsNhwcFrame;
use crate::label::LabelTable;
use crate::model::{DetectResult, OutputLayout};
use crate::normalize::{DecoderChain, Normalizer};
use crate::pool::{PooledWorker, WorkerPool};
use crate::shutdown::StopSignal;

/// 启用硬件加速但未配置超时时使用的默认超时
pub const DEFAULT_ACCEL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DetectRequest {
  pub id: String,
  pub data: Vec<u8>,
  pub detect: FilterSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectResponse {
  pub id: String,
  pub detections: Vec<Detection>,
}

/// 对外描述的检测器信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorInfo {
  pub name: String,
  pub kind: String,
  pub model: String,
  pub labels: Vec<String>,
  pub width: u32,
  pub height: u32,
  pub channels: usize,
}

pub struct DetectorBuilder<B: Backend> {
  config: DetectorConfig,
  backend: B,
  accelerator: Option<Box<dyn Accelerator>>,
  decoders: Option<DecoderChain>,
  stop: Option<StopSignal>,
}

impl<B: Backend> DetectorBuilder<B> {
  pub fn new(config: DetectorConfig, backend: B) -> Self {
    DetectorBuilder {
      config,
      backend,
      accelerator: None,
      decoders: None,
      stop: None,
    }
  }

  pub fn accelerator(mut self, accelerator: Box<dyn Accelerator>) -> Self {
    self.accelerator = Some(accelerator);
    self
  }

  pub fn decoders(mut self, decoders: DecoderChain) -> Self {
    self.decoders = Some(decoders);
    self
  }

  /// 与外部共享的停止信号；不设置时使用独立的信号
  pub fn stop_signal(mut self, stop: StopSignal) -> Self {
    self.stop = Some(stop);
    self
  }

  pub fn build(self) -> Result<Detector<B::Worker>, ConfigError> {
    let config = self.config;
    let mut kind = self.backend.kind().to_string();
    if kind != config.kind {
      warn!("配置类型 {} 与后端 {} 不一致，以后端为准", config.kind, kind);
    }
    let mut timeout = config.timeout;

    if !config.outputs.is_distinct() {
      return Err(ConfigError::invalid(
        "outputs",
        format!("{:?}", config.outputs),
      ));
    }

    let labels = LabelTable::load(&config.label_file)?;

    info!("加载模型文件: {}", config.model_file);
    let model_data = std::fs::read(&config.model_file).map_err(|source| ConfigError::ModelFile {
      path: config.model_file.clone(),
      source,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );
    let model = Arc::new(self.backend.load_model(model_data)?);

    // 每个加速设备绑定一个实例，设备数量覆盖配置的并发数
    let devices: Vec<Device> = if config.hw_accel {
      let accelerator = self.accelerator.ok_or(ConfigError::MissingAccelerator)?;
      let devices = accelerator.list_devices()?;
      let Some(first) = devices.first() else {
        return Err(ConfigError::NoDevices);
      };
      kind = format!("{}-{}", kind, first.kind);
      timeout = Some(timeout.unwrap_or(DEFAULT_ACCEL_TIMEOUT));
      devices
    } else {
      Vec::new()
    };
    let capacity = if config.hw_accel {
      devices.len()
    } else {
      config.num_concurrent
    };
    if capacity == 0 {
      return Err(ConfigError::ZeroConcurrency);
    }

    let mut spec = None;
    let pool = WorkerPool::initialize(capacity, |slot| {
      let options = WorkerOptions {
        slot,
        num_threads: config.num_threads,
        device: devices.get(slot).cloned(),
        outputs: config.outputs,
      };
      let worker = self.backend.create_worker(&model, &options)?;
      match &options.device {
        Some(device) => info!("创建第 {} 个推理实例, 设备 {}", slot, device),
        None => info!("创建第 {} 个推理实例", slot),
      }
      spec = Some(worker.input_spec());
      Ok::<_, EngineError>(worker)
    })?;

    let spec = spec.ok_or(ConfigError::ZeroConcurrency)?;
    if spec.dtype != TensorType::UInt8 {
      return Err(ConfigError::UnsupportedTensorType(spec.dtype));
    }
    let normalizer = Normalizer::with_decoders(
      spec.width,
      spec.height,
      spec.channels,
      self.decoders.unwrap_or_default(),
    )?;

    let (width, height, channels) = normalizer.target();
    let info = DetectorInfo {
      name: config.name.clone(),
      kind,
      model: config.model_file.clone(),
      labels: labels.labels().to_vec(),
      width,
      height,
      channels,
    };
    info!(
      "检测器 {} 就绪: {} 个实例, 输入 {}x{}x{}",
      info.name, capacity, info.width, info.height, info.channels
    );

    Ok(Detector {
      info,
      labels,
      normalizer,
      pool,
      timeout,
      on_timeout: config.on_timeout,
      layout: config.outputs,
      stop: self.stop.unwrap_or_default(),
    })
  }
}

pub struct Detector<W> {
  info: DetectorInfo,
  labels: LabelTable,
  normalizer: Normalizer,
  pool: WorkerPool<W>,
  timeout: Option<Duration>,
  on_timeout: TimeoutPolicy,
  layout: OutputLayout,
  stop: StopSignal,
}

impl<W: Interpreter> Detector<W> {
  pub fn info(&self) -> &DetectorInfo {
    &self.info
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  pub fn stop_signal(&self) -> &StopSignal {
    &self.stop
  }

  /// 空闲实例数量
  pub fn available_workers(&self) -> usize {
    self.pool.available()
  }

  /// 仍可使用的实例总数，超时移除的槽位不计入
  pub fn capacity(&self) -> usize {
    self.pool.capacity()
  }

  pub fn detect(&self, request: &DetectRequest) -> Result<DetectResponse, DetectError> {
    let frame = self.normalizer.normalize(&request.data)?;
    debug!(
      "[{}] 输入帧 {:?}, 原图 {:?}",
      request.id,
      frame.shape(),
      frame.source_size()
    );

    let _in_flight = self.stop.enter().ok_or(DetectError::ShuttingDown)?;
    let mut worker = self.pool.acquire()?;
    let device = worker.device().map(ToString::to_string);

    debug_assert_eq!(
      frame.as_nhwc().len(),
      worker.input_spec().len(),
      "归一化结果与模型输入形状不一致"
    );
    if let Err(e) = worker.set_input(0, frame.as_nhwc()) {
      error!("[{}] 写入模型输入失败: {}", request.id, e);
      return Err(e.into());
    }

    let start = Instant::now();
    self.invoke(&mut worker, &request.id, device.as_deref())?;
    let raw = DetectResult::read(&*worker, &self.layout)?;
    drop(worker);

    let (width, height) = frame.source_size();
    let detections = map_detections(
      &request.id,
      &raw,
      &self.labels,
      &request.detect,
      width,
      height,
    );

    info!(
      "检测完成 [{}]: 耗时 {:.2?}, {} 个结果, 设备 {}",
      request.id,
      start.elapsed(),
      detections.len(),
      device.as_deref().unwrap_or("cpu")
    );

    Ok(DetectResponse {
      id: request.id.clone(),
      detections,
    })
  }

  fn invoke(
    &self,
    worker: &mut PooledWorker<W>,
    id: &str,
    device: Option<&str>,
  ) -> Result<(), DetectError> {
    let Some(timeout) = self.timeout else {
      return worker.invoke().map_err(DetectError::from);
    };

    let mut inner = worker.detach().ok_or(DetectError::WorkerPanicked)?;
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
      .name("shanan-invoke".to_string())
      .spawn(move || {
        let status = inner.invoke();
        let _ = tx.send((inner, status));
      })
      .map_err(|e| EngineError::Status(format!("无法创建推理线程: {e}")))?;

    match rx.recv_timeout(timeout) {
      Ok((inner, status)) => {
        worker.attach(inner);
        status.map_err(DetectError::from)
      }
      Err(RecvTimeoutError::Timeout) => {
        error!(
          "检测超时 [{}]: 设备 {}, 超过 {:?}, 实例已放弃",
          id,
          device.unwrap_or("cpu"),
          timeout
        );
        if self.on_timeout == TimeoutPolicy::Shutdown {
          self.stop.stop();
        }
        Err(DetectError::InferenceTimeout(timeout))
      }
      Err(RecvTimeoutError::Disconnected) => {
        error!("推理线程异常退出 [{}]", id);
        Err(DetectError::WorkerPanicked)
      }
    }
  }

  /// 停止接受请求，等待在途请求结束后销毁所有实例
  ///
  /// 返回是否在 `timeout` 内完成。
  pub fn shutdown(&self, timeout: Option<Duration>) -> bool {
    let start = Instant::now();
    self.stop.stop();
    let drained = match timeout {
      None => {
        self.stop.wait();
        true
      }
      Some(timeout) => self.stop.wait_timeout(timeout),
    };
    // 两个阶段共用同一时间预算
    let remaining = timeout.map(|t| t.saturating_sub(start.elapsed()));
    self.pool.drain(remaining) && drained
  }
}

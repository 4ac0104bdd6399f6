// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine/replay.rs - 回放推理后端
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

//! 回放后端
//!
//! “模型文件”是一个 JSON 描述，声明输入张量和固定的检测结果，
//! 每次推理按 SSD 后处理布局输出这些结果。用于在没有加速硬件时演练调度流程。
//!
//! ```json
//! {
//!   "input": { "width": 300, "height": 300, "channels": 3, "dtype": "uint8" },
//!   "detections": [ { "box": [0.1, 0.2, 0.5, 0.6], "class": 1, "score": 0.87 } ],
//!   "delay_ms": 0
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{Backend, Device, EngineError, Interpreter, TensorSpec, WorkerOptions};
use crate::config::parse_duration;
use crate::error::ConfigError;
use crate::model::OutputLayout;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Debug, Clone, Deserialize)]
struct ReplayInput {
  width: u32,
  height: u32,
  #[serde(default = "default_channels")]
  channels: usize,
  #[serde(default = "default_dtype")]
  dtype: String,
}

fn default_channels() -> usize {
  3
}

fn default_dtype() -> String {
  "uint8".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayDetection {
  #[serde(rename = "box")]
  pub bbox: [f32; 4],
  pub class: f32,
  pub score: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct ReplayFixture {
  input: ReplayInput,
  #[serde(default)]
  detections: Vec<ReplayDetection>,
  #[serde(default)]
  delay_ms: u64,
}

/// 解析后的回放模型
#[derive(Debug, Clone)]
pub struct ReplayModel {
  pub spec: TensorSpec,
  pub detections: Vec<ReplayDetection>,
  pub delay: Duration,
}

impl ReplayModel {
  pub fn from_json(data: &[u8]) -> Result<Self, EngineError> {
    let fixture: ReplayFixture = serde_json::from_slice(data)
      .map_err(|e| EngineError::InvalidModel(format!("回放描述解析失败: {e}")))?;

    let spec = TensorSpec {
      width: fixture.input.width,
      height: fixture.input.height,
      channels: fixture.input.channels,
      dtype: fixture.input.dtype.parse()?,
    };
    if spec.is_empty() {
      return Err(EngineError::InvalidModel("输入张量为空".to_string()));
    }

    Ok(ReplayModel {
      spec,
      detections: fixture.detections,
      delay: Duration::from_millis(fixture.delay_ms),
    })
  }
}

#[derive(Debug, Default, Clone)]
pub struct ReplayBackend {
  delay: Option<Duration>,
}

impl ReplayBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// 覆盖模型描述中的推理延迟
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }
}

impl FromUrlWithScheme for ReplayBackend {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayBackend {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        found: url.scheme().to_string(),
      });
    }

    let mut backend = ReplayBackend::new();
    for (key, value) in url.query_pairs() {
      if key == "delay" {
        backend.delay = Some(parse_duration(&value).ok_or_else(|| ConfigError::invalid("delay", value))?);
      }
    }
    Ok(backend)
  }
}

impl Backend for ReplayBackend {
  type Model = ReplayModel;
  type Worker = ReplayWorker;

  fn kind(&self) -> &str {
    Self::SCHEME
  }

  fn load_model(&self, data: Vec<u8>) -> Result<Self::Model, EngineError> {
    let mut model = ReplayModel::from_json(&data)?;
    if let Some(delay) = self.delay {
      model.delay = delay;
    }
    debug!(
      "回放模型: 输入 {}x{}x{}, {} 个固定结果",
      model.spec.width,
      model.spec.height,
      model.spec.channels,
      model.detections.len()
    );
    Ok(model)
  }

  fn create_worker(
    &self,
    model: &Arc<Self::Model>,
    options: &WorkerOptions,
  ) -> Result<Self::Worker, EngineError> {
    Ok(ReplayWorker {
      model: Arc::clone(model),
      device: options.device.clone(),
      layout: options.outputs,
      loaded: false,
    })
  }
}

pub struct ReplayWorker {
  model: Arc<ReplayModel>,
  device: Option<Device>,
  layout: OutputLayout,
  loaded: bool,
}

impl Interpreter for ReplayWorker {
  fn input_spec(&self) -> TensorSpec {
    self.model.spec
  }

  fn set_input(&mut self, index: usize, data: &[u8]) -> Result<(), EngineError> {
    if index != 0 {
      return Err(EngineError::NoSuchTensor(index));
    }
    if data.len() != self.model.spec.len() {
      return Err(EngineError::InputShape {
        expected: self.model.spec.len(),
        actual: data.len(),
      });
    }
    self.loaded = true;
    Ok(())
  }

  fn invoke(&mut self) -> Result<(), EngineError> {
    if !self.loaded {
      return Err(EngineError::Status("输入尚未写入".to_string()));
    }
    if !self.model.delay.is_zero() {
      std::thread::sleep(self.model.delay);
    }
    self.loaded = false;
    Ok(())
  }

  fn output(&self, index: usize) -> Result<Vec<f32>, EngineError> {
    let detections = &self.model.detections;
    let layout = &self.layout;
    let tensor = if index == layout.boxes {
      detections.iter().flat_map(|d| d.bbox).collect()
    } else if index == layout.classes {
      detections.iter().map(|d| d.class).collect()
    } else if index == layout.scores {
      detections.iter().map(|d| d.score).collect()
    } else if index == layout.count {
      vec![detections.len() as f32]
    } else {
      return Err(EngineError::NoSuchTensor(index));
    };
    Ok(tensor)
  }

  fn device(&self) -> Option<&Device> {
    self.device.as_ref()
  }
}

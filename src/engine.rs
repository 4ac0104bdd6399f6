// 该文件是 Shanan （山南西风） 项目的一部分。
// src/engine.rs - 推理引擎与加速设备接口
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

//! 推理引擎接口
//!
//! 模型的图执行与张量运算由外部引擎完成，本模块只约定调度器需要的最小接口：
//! - [`Backend`]：加载模型，并为每个并发槽位创建一个推理实例
//! - [`Interpreter`]：不可重入的推理实例，提供“写入输入 / 执行 / 读取输出”
//! - [`Accelerator`]：硬件加速设备枚举，每个设备在进程生命周期内绑定一个推理实例

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::model::OutputLayout;

mod replay;
pub use self::replay::{ReplayBackend, ReplayModel, ReplayWorker};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("引擎返回错误状态: {0}")]
  Status(String),
  #[error("张量索引不存在: {0}")]
  NoSuchTensor(usize),
  #[error("输入长度不匹配: 期望 {expected}, 实际 {actual}")]
  InputShape { expected: usize, actual: usize },
  #[error("输出张量 {index} 长度不足: 期望至少 {expected}, 实际 {actual}")]
  OutputShape {
    index: usize,
    expected: usize,
    actual: usize,
  },
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("无法绑定加速设备 {0}")]
  DeviceBind(String),
}

/// 输入张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
  UInt8,
  Int8,
  Float16,
  Float32,
}

impl fmt::Display for TensorType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TensorType::UInt8 => "uint8",
      TensorType::Int8 => "int8",
      TensorType::Float16 => "float16",
      TensorType::Float32 => "float32",
    };
    f.write_str(name)
  }
}

impl std::str::FromStr for TensorType {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "uint8" | "u8" => Ok(TensorType::UInt8),
      "int8" | "i8" => Ok(TensorType::Int8),
      "float16" | "f16" => Ok(TensorType::Float16),
      "float32" | "f32" => Ok(TensorType::Float32),
      other => Err(EngineError::InvalidModel(format!("未知的张量类型: {other}"))),
    }
  }
}

/// 输入张量声明，形状为 NHWC 且 N = 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorSpec {
  pub width: u32,
  pub height: u32,
  pub channels: usize,
  pub dtype: TensorType,
}

impl TensorSpec {
  pub fn len(&self) -> usize {
    self.width as usize * self.height as usize * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 硬件加速设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
  pub kind: String,
  pub path: String,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.path)
  }
}

/// 加速设备驱动
pub trait Accelerator: Send + Sync {
  fn list_devices(&self) -> Result<Vec<Device>, EngineError>;
}

/// 创建推理实例的参数
#[derive(Debug, Clone)]
pub struct WorkerOptions {
  pub slot: usize,
  pub num_threads: usize,
  pub device: Option<Device>,
  pub outputs: OutputLayout,
}

/// 一个不可重入的推理实例
///
/// 同一时刻只允许一个持有者；调度器在超时场景下会把实例移交给独立线程执行，
/// 因此要求 `Send + 'static`。
pub trait Interpreter: Send + 'static {
  fn input_spec(&self) -> TensorSpec;

  fn set_input(&mut self, index: usize, data: &[u8]) -> Result<(), EngineError>;

  fn invoke(&mut self) -> Result<(), EngineError>;

  fn output(&self, index: usize) -> Result<Vec<f32>, EngineError>;

  fn device(&self) -> Option<&Device> {
    None
  }
}

/// 推理后端：模型只加载一次，由所有推理实例共享
pub trait Backend {
  type Model: Send + Sync;
  type Worker: Interpreter;

  fn kind(&self) -> &str;

  fn load_model(&self, data: Vec<u8>) -> Result<Self::Model, EngineError>;

  fn create_worker(
    &self,
    model: &Arc<Self::Model>,
    options: &WorkerOptions,
  ) -> Result<Self::Worker, EngineError>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tensor_type_names() {
    assert_eq!("uint8".parse::<TensorType>().unwrap(), TensorType::UInt8);
    assert_eq!("f32".parse::<TensorType>().unwrap(), TensorType::Float32);
    assert!("complex64".parse::<TensorType>().is_err());
    assert_eq!(TensorType::Int8.to_string(), "int8");
  }

  #[test]
  fn spec_length_is_nhwc_volume() {
    let spec = TensorSpec {
      width: 300,
      height: 200,
      channels: 3,
      dtype: TensorType::UInt8,
    };
    assert_eq!(spec.len(), 300 * 200 * 3);
    assert!(!spec.is_empty());
  }
}

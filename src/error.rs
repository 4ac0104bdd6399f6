// 该文件是 Shanan （山南西风） 项目的一部分。
// src/error.rs - 错误定义
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

use std::time::Duration;

use thiserror::Error;

use crate::engine::{EngineError, TensorType};
use crate::normalize::NormalizeError;
use crate::pool::PoolError;

/// 构造检测器时的致命错误，出现即中止启动
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取标签文件 {path}: {source}")]
  LabelFile {
    path: String,
    source: std::io::Error,
  },
  #[error("无法读取模型文件 {path}: {source}")]
  ModelFile {
    path: String,
    source: std::io::Error,
  },
  #[error("不支持的输入张量类型: {0}")]
  UnsupportedTensorType(TensorType),
  #[error("不支持的输入通道数: {0}")]
  UnsupportedChannels(usize),
  #[error("未检测到加速设备")]
  NoDevices,
  #[error("启用了硬件加速但未提供加速驱动")]
  MissingAccelerator,
  #[error("并发数必须大于 0")]
  ZeroConcurrency,
  #[error("配置项 {key} 的值无效: {value}")]
  InvalidValue { key: String, value: String },
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: String, found: String },
  #[error("推理引擎初始化失败: {0}")]
  Engine(#[from] EngineError),
}

impl ConfigError {
  pub fn invalid(key: &str, value: impl Into<String>) -> Self {
    ConfigError::InvalidValue {
      key: key.to_string(),
      value: value.into(),
    }
  }
}

/// 面向 RPC 层的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
  InvalidArgument,
  Internal,
}

/// 单次检测请求的错误
#[derive(Error, Debug)]
pub enum DetectError {
  #[error("无法解码图像: {0}")]
  InvalidInput(#[from] NormalizeError),
  #[error("推理超时 ({0:?})")]
  InferenceTimeout(Duration),
  #[error("推理失败: {0}")]
  InferenceFailure(#[from] EngineError),
  #[error("推理线程异常退出")]
  WorkerPanicked,
  #[error("无法获取推理实例: {0}")]
  Pool(#[from] PoolError),
  #[error("检测器正在关闭")]
  ShuttingDown,
}

impl DetectError {
  pub fn class(&self) -> ErrorClass {
    match self {
      DetectError::InvalidInput(_) => ErrorClass::InvalidArgument,
      _ => ErrorClass::Internal,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_bad_images_are_caller_errors() {
    let bad_image = DetectError::InvalidInput(NormalizeError::UnknownFormat);
    assert_eq!(bad_image.class(), ErrorClass::InvalidArgument);

    let timeout = DetectError::InferenceTimeout(Duration::from_millis(50));
    assert_eq!(timeout.class(), ErrorClass::Internal);

    let failure = DetectError::InferenceFailure(EngineError::Status("boom".into()));
    assert_eq!(failure.class(), ErrorClass::Internal);

    assert_eq!(DetectError::ShuttingDown.class(), ErrorClass::Internal);
    assert_eq!(
      DetectError::Pool(PoolError::Draining).class(),
      ErrorClass::Internal
    );
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 检测器配置
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

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::FromUrl;
use crate::error::ConfigError;
use crate::model::OutputLayout;

/// 推理超时后对卡死实例的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
  /// 永久移除该槽位，池容量减一
  #[default]
  Retire,
  /// 移除该槽位并触发进程级停止，等待在途请求完成后退出
  Shutdown,
}

impl std::str::FromStr for TimeoutPolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "retire" => Ok(TimeoutPolicy::Retire),
      "shutdown" | "exit" => Ok(TimeoutPolicy::Shutdown),
      other => Err(ConfigError::invalid("on_timeout", other)),
    }
  }
}

/// 检测器配置，构造完成后不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  pub name: String,
  pub kind: String,
  pub model_file: String,
  pub label_file: String,
  pub num_concurrent: usize,
  pub num_threads: usize,
  pub hw_accel: bool,
  pub timeout: Option<Duration>,
  pub on_timeout: TimeoutPolicy,
  pub outputs: OutputLayout,
}

impl DetectorConfig {
  pub fn new(kind: &str, model_file: &str, label_file: &str) -> Self {
    DetectorConfig {
      name: "default".to_string(),
      kind: kind.to_string(),
      model_file: model_file.to_string(),
      label_file: label_file.to_string(),
      num_concurrent: 1,
      num_threads: 1,
      hw_accel: false,
      timeout: None,
      on_timeout: TimeoutPolicy::default(),
      outputs: OutputLayout::default(),
    }
  }

  pub fn name(mut self, name: &str) -> Self {
    self.name = name.to_string();
    self
  }

  pub fn concurrent(mut self, num_concurrent: usize) -> Self {
    self.num_concurrent = num_concurrent;
    self
  }

  pub fn threads(mut self, num_threads: usize) -> Self {
    self.num_threads = num_threads;
    self
  }

  pub fn hw_accel(mut self, hw_accel: bool) -> Self {
    self.hw_accel = hw_accel;
    self
  }

  pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout.filter(|t| !t.is_zero());
    self
  }

  pub fn on_timeout(mut self, policy: TimeoutPolicy) -> Self {
    self.on_timeout = policy;
    self
  }

  pub fn outputs(mut self, outputs: OutputLayout) -> Self {
    self.outputs = outputs;
    self
  }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
  match value {
    "" | "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    other => Err(ConfigError::invalid(key, other)),
  }
}

/// 解析时长：`50ms`、`2s`、`1m`，或不带单位的毫秒数
pub fn parse_duration(value: &str) -> Option<Duration> {
  let value = value.trim();
  let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
    Some(pos) => value.split_at(pos),
    None => (value, "ms"),
  };
  let amount: u64 = digits.parse().ok()?;
  match unit {
    "ms" => Some(Duration::from_millis(amount)),
    "s" => Some(Duration::from_secs(amount)),
    "m" => Some(Duration::from_secs(amount * 60)),
    _ => None,
  }
}

/// 从 URL 构造配置，方案即后端类型：
/// `replay:///models/ssd.json?labels=/models/coco.txt&concurrent=2&timeout=50ms`
impl FromUrl for DetectorConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let model_file = urlencoding::decode(url.path())
      .map_err(|_| ConfigError::invalid("model", url.path()))?
      .into_owned();
    if model_file.is_empty() {
      return Err(ConfigError::invalid("model", ""));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let label_file = query
      .get("labels")
      .ok_or_else(|| ConfigError::invalid("labels", ""))?;
    let mut config = DetectorConfig::new(url.scheme(), &model_file, label_file);
    let mut outputs = OutputLayout::default();

    for (key, value) in &query {
      match key.as_str() {
        "labels" => {}
        "name" => config.name = value.clone(),
        "concurrent" => config.num_concurrent = parse_value(key, value)?,
        "threads" => config.num_threads = parse_value(key, value)?,
        "hw_accel" => config.hw_accel = parse_bool(key, value)?,
        "timeout" => {
          let timeout = parse_duration(value).ok_or_else(|| ConfigError::invalid(key, value.as_str()))?;
          config = config.timeout(Some(timeout));
        }
        "on_timeout" => config.on_timeout = value.parse()?,
        "boxes" => outputs.boxes = parse_value(key, value)?,
        "classes" => outputs.classes = parse_value(key, value)?,
        "scores" => outputs.scores = parse_value(key, value)?,
        "count" => outputs.count = parse_value(key, value)?,
        _ => warn!("忽略未知配置项: {}={}", key, value),
      }
    }
    if !outputs.is_distinct() {
      return Err(ConfigError::invalid(
        "outputs",
        format!(
          "boxes={} classes={} scores={} count={}",
          outputs.boxes, outputs.classes, outputs.scores, outputs.count
        ),
      ));
    }
    config.outputs = outputs;

    if config.num_concurrent == 0 {
      return Err(ConfigError::ZeroConcurrency);
    }

    Ok(config)
  }
}

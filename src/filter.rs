// 该文件是 Shanan （山南西风） 项目的一部分。
// src/filter.rs - 检测结果过滤与映射
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

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::label::LabelTable;
use crate::model::DetectResult;

/// 匹配所有标签的通配项
pub const WILDCARD: &str = "*";

/// 标签到最低分数（0-100）的映射
///
/// 空映射表示不过滤；非空时只有显式列出或被通配项覆盖的标签才能通过。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
  thresholds: HashMap<String, f32>,
}

impl FilterSpec {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, label: &str, min_score: f32) -> Self {
    self.thresholds.insert(label.to_string(), min_score);
    self
  }

  pub fn is_empty(&self) -> bool {
    self.thresholds.is_empty()
  }

  /// `confidence` 为 0-100 分数
  pub fn accepts(&self, label: &str, confidence: f32) -> bool {
    if let Some(&min) = self.thresholds.get(label) {
      confidence >= min
    } else if let Some(&min) = self.thresholds.get(WILDCARD) {
      confidence >= min
    } else {
      self.thresholds.is_empty()
    }
  }
}

impl From<HashMap<String, f32>> for FilterSpec {
  fn from(thresholds: HashMap<String, f32>) -> Self {
    FilterSpec { thresholds }
  }
}

/// 解析 `dog=50,*=60` 形式的过滤条件，空字符串为空映射
impl std::str::FromStr for FilterSpec {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut spec = FilterSpec::new();
    for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
      let (label, score) = item
        .rsplit_once('=')
        .ok_or_else(|| ConfigError::invalid("detect", item))?;
      let score: f32 = score
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid("detect", item))?;
      spec.thresholds.insert(label.trim().to_string(), score);
    }
    Ok(spec)
  }
}

/// 归一化坐标框，各分量位于 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
  pub top: f32,
  pub left: f32,
  pub bottom: f32,
  pub right: f32,
}

impl BoundingBox {
  pub fn clipped(raw: [f32; 4]) -> Self {
    let clip = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
    BoundingBox {
      top: clip(raw[0]),
      left: clip(raw[1]),
      bottom: clip(raw[2]),
      right: clip(raw[3]),
    }
  }

  /// 换算到原图像素坐标，并裁剪到图像范围
  pub fn to_pixels(&self, width: u32, height: u32) -> PixelBox {
    let scale = |v: f32, dim: u32| ((v * dim as f32) as i64).clamp(0, dim as i64) as i32;
    PixelBox {
      x1: scale(self.left, width),
      y1: scale(self.top, height),
      x2: scale(self.right, width),
      y2: scale(self.bottom, height),
    }
  }
}

/// 原图像素坐标框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
  pub pixels: PixelBox,
}

/// 把一次推理的候选映射为检测结果，保持候选原有顺序
pub fn map_detections(
  id: &str,
  raw: &DetectResult,
  labels: &LabelTable,
  filter: &FilterSpec,
  image_width: u32,
  image_height: u32,
) -> Vec<Detection> {
  let mut detections = Vec::new();

  for item in raw.items.iter() {
    let label = match labels.get(item.class_id) {
      Some(label) => label,
      None => {
        warn!("缺少标签: 索引 {}", item.class_id);
        ""
      }
    };

    let confidence = item.score * 100.0;
    if !filter.accepts(label, confidence) {
      continue;
    }

    let bbox = BoundingBox::clipped(item.bbox);
    let detection = Detection {
      label: label.to_string(),
      confidence,
      bbox,
      pixels: bbox.to_pixels(image_width, image_height),
    };
    debug!(
      "检测结果 [{}]: {} {:.2} ({:.4},{:.4},{:.4},{:.4})",
      id, detection.label, confidence, bbox.top, bbox.left, bbox.bottom, bbox.right
    );
    detections.push(detection);
  }

  detections
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn labels() -> LabelTable {
    [(1, "cat"), (2, "dog")].into_iter().collect()
  }

  fn batch(items: &[(i32, f32)]) -> DetectResult {
    DetectResult {
      items: items
        .iter()
        .map(|&(class_id, score)| DetectItem {
          class_id,
          score,
          bbox: [0.1, 0.1, 0.9, 0.9],
        })
        .collect(),
    }
  }

  fn run(raw: &DetectResult, filter: &FilterSpec) -> Vec<Detection> {
    map_detections("test", raw, &labels(), filter, 100, 100)
  }

  #[test]
  fn empty_filter_keeps_everything_in_order() {
    let raw = batch(&[(2, 0.3), (1, 0.9), (7, 0.01)]);
    let out = run(&raw, &FilterSpec::new());
    let labels: Vec<_> = out.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["dog", "cat", ""]);
  }

  #[test]
  fn wildcard_boundary_is_inclusive() {
    let filter = FilterSpec::new().with(WILDCARD, 50.0);
    assert_eq!(run(&batch(&[(1, 0.5)]), &filter).len(), 1);
    assert!(run(&batch(&[(1, 0.4999)]), &filter).is_empty());
  }

  #[test]
  fn explicit_filter_without_wildcard() {
    let filter = FilterSpec::new().with("dog", 50.0);
    assert!(run(&batch(&[(1, 0.99)]), &filter).is_empty());
    assert!(run(&batch(&[(2, 0.499)]), &filter).is_empty());

    let out = run(&batch(&[(2, 0.5)]), &filter);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].confidence, 50.0);
  }

  #[test]
  fn exact_label_overrides_wildcard() {
    let filter = FilterSpec::new().with("dog", 90.0).with(WILDCARD, 10.0);
    let out = run(&batch(&[(2, 0.5), (1, 0.5)]), &filter);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].label, "cat");
  }

  #[test]
  fn missing_label_is_still_wildcard_eligible() {
    let filter = FilterSpec::new().with(WILDCARD, 20.0);
    let out = run(&batch(&[(42, 0.3)]), &filter);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].label, "");

    let strict = FilterSpec::new().with("cat", 0.0);
    assert!(run(&batch(&[(42, 0.3)]), &strict).is_empty());
  }

  #[test]
  fn boxes_are_clipped() {
    let raw = DetectResult {
      items: vec![DetectItem {
        class_id: 1,
        score: 0.8,
        bbox: [-0.05, 0.25, 1.02, 1.5],
      }]
      .into_boxed_slice(),
    };
    let out = map_detections("test", &raw, &labels(), &FilterSpec::new(), 200, 100);
    assert_eq!(
      out[0].bbox,
      BoundingBox {
        top: 0.0,
        left: 0.25,
        bottom: 1.0,
        right: 1.0
      }
    );
    assert_eq!(
      out[0].pixels,
      PixelBox {
        x1: 50,
        y1: 0,
        x2: 200,
        y2: 100
      }
    );
  }

  #[test]
  fn parse_filter_spec() {
    let spec: FilterSpec = "dog=50, * = 60.5".parse().unwrap();
    assert_eq!(spec, FilterSpec::new().with("dog", 50.0).with("*", 60.5));
    assert!("".parse::<FilterSpec>().unwrap().is_empty());
    assert!("dog".parse::<FilterSpec>().is_err());
    assert!("dog=high".parse::<FilterSpec>().is_err());
  }
}

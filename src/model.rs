// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型原始输出
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

use tracing::debug;

use crate::engine::{EngineError, Interpreter};

/// 输出张量索引，默认为 SSD 后处理布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
  pub boxes: usize,
  pub classes: usize,
  pub scores: usize,
  pub count: usize,
}

impl OutputLayout {
  /// 四个索引互不相同
  pub fn is_distinct(&self) -> bool {
    let indices = [self.boxes, self.classes, self.scores, self.count];
    indices
      .iter()
      .enumerate()
      .all(|(i, a)| indices[i + 1..].iter().all(|b| a != b))
  }
}

impl Default for OutputLayout {
  fn default() -> Self {
    OutputLayout {
      boxes: 0,
      classes: 1,
      scores: 2,
      count: 3,
    }
  }
}

/// 单个候选检测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectItem {
  pub class_id: i32,
  pub score: f32,
  pub bbox: [f32; 4], // [top, left, bottom, right]
}

/// 一次推理的全部候选，按模型输出顺序排列
#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 由并行数组组装候选，任何一个数组短于 `count` 都视为输出形状错误
  pub fn from_tensors(
    layout: &OutputLayout,
    locations: &[f32],
    classes: &[f32],
    scores: &[f32],
    count: usize,
  ) -> Result<Self, EngineError> {
    check_len(layout.classes, classes, count)?;
    check_len(layout.scores, scores, count)?;
    let box_len = count.checked_mul(4).ok_or(EngineError::OutputShape {
      index: layout.boxes,
      expected: usize::MAX,
      actual: locations.len(),
    })?;
    check_len(layout.boxes, locations, box_len)?;

    let items = (0..count)
      .map(|i| DetectItem {
        class_id: classes[i] as i32,
        score: scores[i],
        bbox: [
          locations[i * 4],
          locations[i * 4 + 1],
          locations[i * 4 + 2],
          locations[i * 4 + 3],
        ],
      })
      .collect();

    Ok(DetectResult { items })
  }

  /// 从推理实例读取输出张量
  pub fn read<I: Interpreter + ?Sized>(
    interpreter: &I,
    layout: &OutputLayout,
  ) -> Result<Self, EngineError> {
    let count = interpreter
      .output(layout.count)?
      .first()
      .copied()
      .ok_or(EngineError::OutputShape {
        index: layout.count,
        expected: 1,
        actual: 0,
      })?;
    let count = if count.is_finite() && count > 0.0 {
      count as usize
    } else {
      0
    };
    debug!("模型输出候选数量: {}", count);

    let locations = interpreter.output(layout.boxes)?;
    let classes = interpreter.output(layout.classes)?;
    let scores = interpreter.output(layout.scores)?;

    Self::from_tensors(layout, &locations, &classes, &scores, count)
  }
}

fn check_len(index: usize, tensor: &[f32], expected: usize) -> Result<(), EngineError> {
  if tensor.len() < expected {
    return Err(EngineError::OutputShape {
      index,
      expected,
      actual: tensor.len(),
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn layout_indices_must_differ() {
    assert!(OutputLayout::default().is_distinct());
    let overlapping = OutputLayout {
      count: 0,
      ..OutputLayout::default()
    };
    assert!(!overlapping.is_distinct());
  }

  #[test]
  fn assembles_parallel_arrays() {
    let layout = OutputLayout::default();
    let locations = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 9.0, 9.0, 9.0, 9.0];
    let classes = [1.0, 17.9, 4.0];
    let scores = [0.9, 0.5, 0.1];

    let result = DetectResult::from_tensors(&layout, &locations, &classes, &scores, 2).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].bbox, [0.1, 0.2, 0.3, 0.4]);
    assert_eq!(result.items[1].class_id, 17);
    assert_eq!(result.items[1].score, 0.5);
  }

  #[test]
  fn short_tensor_is_an_error() {
    let layout = OutputLayout::default();
    let err = DetectResult::from_tensors(&layout, &[0.0; 4], &[1.0, 2.0], &[0.5, 0.5], 2)
      .unwrap_err();
    assert!(matches!(
      err,
      EngineError::OutputShape {
        index: 0,
        expected: 8,
        actual: 4
      }
    ));
  }

  #[test]
  fn corrupt_count_is_an_error() {
    let layout = OutputLayout::default();
    let err = DetectResult::from_tensors(&layout, &[0.0; 4], &[1.0], &[0.5], 1e30f32 as usize)
      .unwrap_err();
    assert!(matches!(err, EngineError::OutputShape { index: 1, actual: 1, .. }));

    let err = DetectResult::from_tensors(&layout, &[0.0; 4], &[1.0], &[0.5], usize::MAX / 2)
      .unwrap_err();
    assert!(matches!(err, EngineError::OutputShape { .. }));
  }

  struct FixedOutputs(Vec<Vec<f32>>);

  impl Interpreter for FixedOutputs {
    fn input_spec(&self) -> crate::engine::TensorSpec {
      crate::engine::TensorSpec {
        width: 1,
        height: 1,
        channels: 3,
        dtype: crate::engine::TensorType::UInt8,
      }
    }

    fn set_input(&mut self, _index: usize, _data: &[u8]) -> Result<(), EngineError> {
      Ok(())
    }

    fn invoke(&mut self) -> Result<(), EngineError> {
      Ok(())
    }

    fn output(&self, index: usize) -> Result<Vec<f32>, EngineError> {
      self.0.get(index).cloned().ok_or(EngineError::NoSuchTensor(index))
    }
  }

  #[test]
  fn read_rejects_huge_count_tensor() {
    let outputs = FixedOutputs(vec![vec![0.0; 4], vec![1.0], vec![0.5], vec![1e30]]);
    let err = DetectResult::read(&outputs, &OutputLayout::default()).unwrap_err();
    assert!(matches!(err, EngineError::OutputShape { .. }));

    let outputs = FixedOutputs(vec![vec![0.0; 4], vec![1.0], vec![0.5], vec![f32::NAN]]);
    assert!(DetectResult::read(&outputs, &OutputLayout::default()).unwrap().is_empty());
  }

  #[test]
  fn zero_count_is_empty() {
    let layout = OutputLayout::default();
    let result = DetectResult::from_tensors(&layout, &[], &[], &[], 0).unwrap();
    assert!(result.is_empty());
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/label.rs - 类别标签表
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
use std::io::BufRead;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// 类别索引到标签名的映射，构造后只读
///
/// 标签文件每行一个条目：
/// - `<label>`：索引为行号（从 1 开始，0 保留给背景）
/// - `<index> <label>`：显式索引
///
/// 显式索引无法解析的行会被跳过，只计入告警日志。
/// 重复的索引以最后一行为准，保留首次出现的位置。
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
  positions: HashMap<i32, usize>,
  ordered: Vec<String>,
  skipped: usize,
}

impl LabelTable {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| ConfigError::LabelFile {
      path: path.display().to_string(),
      source,
    })?;
    let table = Self::from_reader(std::io::BufReader::new(file)).map_err(|source| {
      ConfigError::LabelFile {
        path: path.display().to_string(),
        source,
      }
    })?;
    info!("加载标签文件 {}: {} 个标签", path.display(), table.len());
    Ok(table)
  }

  pub fn from_reader<R: BufRead>(reader: R) -> std::io::Result<Self> {
    let mut table = LabelTable::default();
    for (line, number) in reader.lines().zip(1..) {
      table.insert_line(&line?, number);
    }
    if table.skipped > 0 {
      warn!("标签文件中有 {} 行无法解析，已跳过", table.skipped);
    }
    Ok(table)
  }

  fn insert_line(&mut self, line: &str, number: i32) {
    let line = line.trim();
    if line.is_empty() {
      return;
    }

    match line.split_once(' ') {
      None => self.insert(number, line),
      Some((index, label)) => match index.trim().parse::<i32>() {
        Ok(index) => self.insert(index, label.trim()),
        Err(_) => {
          debug!("第 {} 行索引无效: {}", number, line);
          self.skipped += 1;
        }
      },
    }
  }

  fn insert(&mut self, index: i32, label: &str) {
    match self.positions.get(&index) {
      Some(&pos) => {
        warn!("标签索引 {} 重复: {} 被 {} 覆盖", index, self.ordered[pos], label);
        self.ordered[pos] = label.to_string();
      }
      None => {
        self.positions.insert(index, self.ordered.len());
        self.ordered.push(label.to_string());
      }
    }
  }

  pub fn get(&self, index: i32) -> Option<&str> {
    self
      .positions
      .get(&index)
      .and_then(|&pos| self.ordered.get(pos))
      .map(String::as_str)
  }

  /// 按文件顺序排列的标签
  pub fn labels(&self) -> &[String] {
    &self.ordered
  }

  pub fn skipped(&self) -> usize {
    self.skipped
  }

  pub fn len(&self) -> usize {
    self.ordered.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ordered.is_empty()
  }
}

impl<S: Into<String>> FromIterator<(i32, S)> for LabelTable {
  fn from_iter<T: IntoIterator<Item = (i32, S)>>(iter: T) -> Self {
    let mut table = LabelTable::default();
    for (index, label) in iter {
      let label: String = label.into();
      table.insert(index, &label);
    }
    table
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn mixed_lines() {
    let table = LabelTable::from_reader(Cursor::new("1 cat\ndog\nx stale\n")).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(1), Some("cat"));
    assert_eq!(table.get(2), Some("dog"));
    assert_eq!(table.get(3), None);
    assert_eq!(table.skipped(), 1);
    assert_eq!(table.labels(), ["cat", "dog"]);
  }

  #[test]
  fn explicit_indices_are_trimmed() {
    let table = LabelTable::from_reader(Cursor::new("0  background\n 17   traffic light \r\n")).unwrap();
    assert_eq!(table.get(0), Some("background"));
    assert_eq!(table.get(17), Some("traffic light"));
  }

  #[test]
  fn blank_lines_keep_numbering() {
    let table = LabelTable::from_reader(Cursor::new("person\n\nbicycle\n")).unwrap();
    assert_eq!(table.get(1), Some("person"));
    assert_eq!(table.get(2), None);
    assert_eq!(table.get(3), Some("bicycle"));
  }

  #[test]
  fn duplicate_index_keeps_one_entry() {
    let table = LabelTable::from_reader(Cursor::new("1 cat\n2 dog\n1 kitten\n")).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(1), Some("kitten"));
    assert_eq!(table.labels(), ["kitten", "dog"]);

    // 第 2 行的隐式索引与显式的 2 冲突
    let table = LabelTable::from_reader(Cursor::new("2 bird\nplane\n")).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.labels(), ["plane"]);
  }

  #[test]
  fn missing_file_is_fatal() {
    let err = LabelTable::load("/definitely/not/here/labels.txt").unwrap_err();
    assert!(matches!(err, ConfigError::LabelFile { .. }));
  }

  #[test]
  fn loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.txt");
    std::fs::write(&path, "person\nbicycle\n3 car\n").unwrap();

    let table = LabelTable::load(&path).unwrap();
    assert_eq!(table.get(3), Some("car"));
    assert_eq!(table.len(), 3);
  }
}

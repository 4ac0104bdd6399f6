// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use std::borrow::Cow;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 归一化后的输入帧，按行优先 NHWC 排列的 8 位像素
///
/// 直通路径下借用请求中的原始像素，不做拷贝。
#[derive(Debug, Clone)]
pub struct Frame<'a> {
  data: Cow<'a, [u8]>,
  width: u32,
  height: u32,
  channels: usize,
  source_width: u32,
  source_height: u32,
}

impl<'a> Frame<'a> {
  /// `source_*` 为缩放前的原图尺寸
  pub fn new(
    data: Cow<'a, [u8]>,
    width: u32,
    height: u32,
    channels: usize,
    source: (u32, u32),
  ) -> Self {
    debug_assert_eq!(
      data.len(),
      width as usize * height as usize * channels,
      "帧数据长度与形状不一致"
    );
    Self {
      data,
      width,
      height,
      channels,
      source_width: source.0,
      source_height: source.1,
    }
  }

  /// (宽, 高, 通道)
  pub fn shape(&self) -> (u32, u32, usize) {
    (self.width, self.height, self.channels)
  }

  pub fn source_size(&self) -> (u32, u32) {
    (self.source_width, self.source_height)
  }

  pub fn is_borrowed(&self) -> bool {
    matches!(self.data, Cow::Borrowed(_))
  }
}

impl AsNhwcFrame for Frame<'_> {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/normalize/ppm.rs - PPM 原始像素识别
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

const RGB_CHANNELS: usize = 3;

/// 二进制 PPM（P6, maxval 255）中像素数据的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpmInfo {
  pub width: u32,
  pub height: u32,
  pub offset: usize,
}

impl PpmInfo {
  /// 像素数据字节数，溢出时为 `None`
  pub fn payload_len(&self) -> Option<usize> {
    (self.width as usize)
      .checked_mul(self.height as usize)?
      .checked_mul(RGB_CHANNELS)
  }
}

struct Header<'a> {
  data: &'a [u8],
  pos: usize,
}

impl Header<'_> {
  fn skip_separators(&mut self) {
    while let Some(&byte) = self.data.get(self.pos) {
      if byte.is_ascii_whitespace() {
        self.pos += 1;
      } else if byte == b'#' {
        while let Some(&byte) = self.data.get(self.pos) {
          self.pos += 1;
          if byte == b'\n' {
            break;
          }
        }
      } else {
        break;
      }
    }
  }

  fn number(&mut self) -> Option<u32> {
    self.skip_separators();
    let start = self.pos;
    while self.data.get(self.pos).is_some_and(u8::is_ascii_digit) {
      self.pos += 1;
    }
    std::str::from_utf8(&self.data[start..self.pos])
      .ok()?
      .parse()
      .ok()
  }
}

/// 识别 P6 头部并返回像素数据的偏移；像素不足时返回 `None`
pub fn find_ppm_data(data: &[u8]) -> Option<PpmInfo> {
  if !data.starts_with(b"P6") {
    return None;
  }

  let mut header = Header { data, pos: 2 };
  let width = header.number()?;
  let height = header.number()?;
  let maxval = header.number()?;
  if maxval != 255 || width == 0 || height == 0 {
    return None;
  }

  // 最大值之后恰好一个空白字节
  if !data.get(header.pos)?.is_ascii_whitespace() {
    return None;
  }
  let info = PpmInfo {
    width,
    height,
    offset: header.pos + 1,
  };

  let payload_len = info.payload_len()?;
  if data.len().saturating_sub(info.offset) < payload_len {
    return None;
  }
  Some(info)
}

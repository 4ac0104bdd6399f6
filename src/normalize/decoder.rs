// 该文件是 Shanan （山南西风） 项目的一部分。
// src/normalize/decoder.rs - 分级图像解码
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

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader};
use tracing::{debug, warn};

use super::NormalizeError;

/// 一种解码能力，声明自己接受的格式
pub trait ImageDecoder: Send + Sync {
  fn name(&self) -> &str;

  fn accepts(&self, format: ImageFormat) -> bool;

  fn decode(&self, raw: &[u8], format: ImageFormat) -> Result<DynamicImage, image::ImageError>;
}

/// 常见格式：PNG、JPEG、GIF、BMP
pub struct StandardDecoder;

impl ImageDecoder for StandardDecoder {
  fn name(&self) -> &str {
    "standard"
  }

  fn accepts(&self, format: ImageFormat) -> bool {
    matches!(
      format,
      ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::Bmp
    )
  }

  fn decode(&self, raw: &[u8], format: ImageFormat) -> Result<DynamicImage, image::ImageError> {
    ImageReader::with_format(Cursor::new(raw), format).decode()
  }
}

/// 兜底解码：编译进来的其它所有栅格格式（TIFF、WebP、PNM 等）
pub struct RasterDecoder;

impl ImageDecoder for RasterDecoder {
  fn name(&self) -> &str {
    "raster"
  }

  fn accepts(&self, format: ImageFormat) -> bool {
    format.reading_enabled()
  }

  fn decode(&self, raw: &[u8], format: ImageFormat) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory_with_format(raw, format)
  }
}

/// 按优先级排列的解码器链
pub struct DecoderChain {
  decoders: Vec<Box<dyn ImageDecoder>>,
}

impl Default for DecoderChain {
  fn default() -> Self {
    DecoderChain {
      decoders: vec![Box::new(StandardDecoder), Box::new(RasterDecoder)],
    }
  }
}

impl DecoderChain {
  pub fn empty() -> Self {
    DecoderChain {
      decoders: Vec::new(),
    }
  }

  /// 追加到链尾，优先级最低
  pub fn push(&mut self, decoder: Box<dyn ImageDecoder>) {
    self.decoders.push(decoder);
  }

  pub fn decode(&self, raw: &[u8]) -> Result<(DynamicImage, ImageFormat), NormalizeError> {
    let format = image::guess_format(raw).map_err(|_| NormalizeError::UnknownFormat)?;

    let mut last_error = None;
    for decoder in self.decoders.iter().filter(|d| d.accepts(format)) {
      match decoder.decode(raw, format) {
        Ok(image) => {
          debug!("解码器 {} 解码 {:?} 成功", decoder.name(), format);
          return Ok((image, format));
        }
        Err(e) => {
          warn!("解码器 {} 无法解码 {:?}: {}", decoder.name(), format, e);
          last_error = Some(e);
        }
      }
    }

    match last_error {
      Some(e) => Err(NormalizeError::Decode(e)),
      None => Err(NormalizeError::Unsupported(format!("{format:?}"))),
    }
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/normalize.rs - 输入图像归一化
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

//! 把任意编码的图像转换为推理实例要求的像素布局
//!
//! 1. 已是目标尺寸的 P6 PPM 直接借用像素数据
//! 2. 其它输入经解码器链解码
//! 3. 尺寸不一致时最近邻缩放
//! 4. 按目标通道数（1 或 3）重新排列，丢弃 alpha

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Pixel};
use thiserror::Error;
use tracing::debug;

use crate::error::ConfigError;
use crate::frame::Frame;

mod decoder;
mod ppm;

pub use self::decoder::{DecoderChain, ImageDecoder, RasterDecoder, StandardDecoder};
pub use self::ppm::{PpmInfo, find_ppm_data};

#[derive(Error, Debug)]
pub enum NormalizeError {
  #[error("空的图像数据")]
  Empty,
  #[error("无法识别图像格式")]
  UnknownFormat,
  #[error("没有可用的解码器: {0}")]
  Unsupported(String),
  #[error("{0}")]
  Decode(#[from] image::ImageError),
}

pub struct Normalizer {
  width: u32,
  height: u32,
  channels: usize,
  decoders: DecoderChain,
}

impl Normalizer {
  pub fn new(width: u32, height: u32, channels: usize) -> Result<Self, ConfigError> {
    Self::with_decoders(width, height, channels, DecoderChain::default())
  }

  pub fn with_decoders(
    width: u32,
    height: u32,
    channels: usize,
    decoders: DecoderChain,
  ) -> Result<Self, ConfigError> {
    if channels != 1 && channels != 3 {
      return Err(ConfigError::UnsupportedChannels(channels));
    }
    if width == 0 || height == 0 {
      return Err(ConfigError::invalid("input", format!("{width}x{height}")));
    }
    Ok(Normalizer {
      width,
      height,
      channels,
      decoders,
    })
  }

  pub fn target(&self) -> (u32, u32, usize) {
    (self.width, self.height, self.channels)
  }

  fn len(&self) -> usize {
    self.width as usize * self.height as usize * self.channels
  }

  pub fn normalize<'a>(&self, raw: &'a [u8]) -> Result<Frame<'a>, NormalizeError> {
    if raw.is_empty() {
      return Err(NormalizeError::Empty);
    }

    if self.channels == 3
      && let Some(info) = find_ppm_data(raw)
      && info.width == self.width
      && info.height == self.height
    {
      debug!("PPM 像素直通: {}x{}", info.width, info.height);
      let payload = &raw[info.offset..info.offset + self.len()];
      return Ok(Frame::new(
        Cow::Borrowed(payload),
        self.width,
        self.height,
        self.channels,
        (info.width, info.height),
      ));
    }

    let (image, format) = self.decoders.decode(raw)?;
    let source = (image.width(), image.height());
    debug!("图像格式: {:?}, 尺寸: {}x{}", format, source.0, source.1);
    if source != (self.width, self.height) {
      debug!(
        "缩放图像: {}x{} -> {}x{}",
        source.0, source.1, self.width, self.height
      );
    }

    let data = match self.channels {
      1 => self.fit(image.to_luma8()),
      _ => self.fit(image.to_rgb8()),
    };

    Ok(Frame::new(
      Cow::Owned(data),
      self.width,
      self.height,
      self.channels,
      source,
    ))
  }

  fn fit<P>(&self, image: ImageBuffer<P, Vec<u8>>) -> Vec<u8>
  where
    P: Pixel<Subpixel = u8> + 'static,
  {
    if image.dimensions() == (self.width, self.height) {
      image.into_raw()
    } else {
      imageops::resize(&image, self.width, self.height, FilterType::Nearest).into_raw()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::AsNhwcFrame;
  use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
  use std::io::Cursor;

  fn png(image: RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
  }

  #[test]
  fn ppm_of_target_size_is_borrowed() {
    let mut raw = b"P6\n2 2\n255\n".to_vec();
    raw.extend((0u8..12).collect::<Vec<_>>());

    let normalizer = Normalizer::new(2, 2, 3).unwrap();
    let frame = normalizer.normalize(&raw).unwrap();
    assert!(frame.is_borrowed());
    assert_eq!(frame.as_nhwc(), &(0u8..12).collect::<Vec<_>>()[..]);
    assert_eq!(frame.source_size(), (2, 2));
  }

  #[test]
  fn ppm_of_other_size_is_decoded_and_resized() {
    let mut raw = b"P6\n4 4\n255\n".to_vec();
    raw.extend(std::iter::repeat_n(200u8, 48));

    let normalizer = Normalizer::new(2, 2, 3).unwrap();
    let frame = normalizer.normalize(&raw).unwrap();
    assert!(!frame.is_borrowed());
    assert_eq!(frame.as_nhwc(), &[200u8; 12][..]);
    assert_eq!(frame.source_size(), (4, 4));
  }

  #[test]
  fn resize_is_nearest_neighbor() {
    let mut image = RgbImage::new(4, 4);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
      *pixel = if x < 2 && y < 2 {
        Rgb([255, 0, 0])
      } else {
        Rgb([0, 0, 255])
      };
    }

    let normalizer = Normalizer::new(2, 2, 3).unwrap();
    let raw = png(image);
    let frame = normalizer.normalize(&raw).unwrap();
    assert_eq!(frame.shape(), (2, 2, 3));
    assert_eq!(&frame.as_nhwc()[0..3], &[255, 0, 0]);
    assert_eq!(&frame.as_nhwc()[9..12], &[0, 0, 255]);
    assert_eq!(frame.source_size(), (4, 4));
  }

  #[test]
  fn alpha_is_dropped() {
    let image = RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 128]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();

    let normalizer = Normalizer::new(3, 3, 3).unwrap();
    let frame = normalizer.normalize(out.get_ref()).unwrap();
    assert_eq!(frame.as_nhwc().len(), 27);
    assert!(frame.as_nhwc().chunks(3).all(|p| p == [1, 2, 3]));
  }

  #[test]
  fn grayscale_target() {
    let normalizer = Normalizer::new(2, 1, 1).unwrap();
    let raw = png(RgbImage::from_pixel(2, 1, Rgb([255, 255, 255])));
    let frame = normalizer.normalize(&raw).unwrap();
    assert_eq!(frame.as_nhwc(), &[255, 255]);
  }

  #[test]
  fn bad_input() {
    let normalizer = Normalizer::new(2, 2, 3).unwrap();
    assert!(matches!(normalizer.normalize(&[]), Err(NormalizeError::Empty)));
    assert!(matches!(
      normalizer.normalize(b"hello"),
      Err(NormalizeError::UnknownFormat)
    ));
  }

  #[test]
  fn unsupported_channels() {
    assert!(matches!(
      Normalizer::new(2, 2, 4),
      Err(ConfigError::UnsupportedChannels(4))
    ));
  }
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use shanan_dispatch::FilterSpec;
use url::Url;

/// Shanan 检测调度参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测器配置 URL，方案为后端类型
  /// 例如: replay:///models/ssd.json?labels=/models/coco.txt&concurrent=2&timeout=50ms
  #[arg(long, value_name = "URL")]
  pub model: Url,

  /// 过滤条件，形如 "dog=50,*=60"；为空时不过滤
  #[arg(long, default_value = "", value_name = "SPEC")]
  pub detect: FilterSpec,

  /// 每张图片重复检测的次数
  #[arg(long, default_value = "1", value_name = "COUNT")]
  pub repeat: usize,

  /// 关闭时等待在途请求的最长时间（秒）
  #[arg(long, default_value = "30", value_name = "SECONDS")]
  pub drain_timeout: u64,

  /// 输入图片
  #[arg(required = true, value_name = "IMAGE")]
  pub inputs: Vec<PathBuf>,
}

// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shanan_dispatch::engine::{Interpreter, ReplayBackend};
use shanan_dispatch::shutdown::StopSignal;
use shanan_dispatch::{
  DetectRequest, Detector, DetectorBuilder, DetectorConfig, ErrorClass, FromUrl,
  FromUrlWithScheme,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let args = args::Args::parse();
  let config = DetectorConfig::from_url(&args.model)?;

  info!("检测器配置: {}", args.model);
  info!("输入数量: {}", args.inputs.len());

  let stop = StopSignal::new();
  {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      stop.stop();
    })
    .context("无法设置 Ctrl-C 处理")?;
  }

  match config.kind.as_str() {
    ReplayBackend::SCHEME => {
      let backend = ReplayBackend::from_url(&args.model)?;
      let detector = DetectorBuilder::new(config, backend)
        .stop_signal(stop)
        .build()?;
      run(&detector, &args)
    }
    other => bail!("不支持的后端类型: {}", other),
  }
}

fn run<W: Interpreter>(detector: &Detector<W>, args: &args::Args) -> Result<()> {
  info!(
    "检测器 {} ({}) 输入 {}x{}x{}, {} 个标签",
    detector.info().name,
    detector.info().kind,
    detector.info().width,
    detector.info().height,
    detector.info().channels,
    detector.info().labels.len()
  );

  thread::scope(|scope| {
    for (index, path) in args.inputs.iter().enumerate() {
      scope.spawn(move || {
        let data = match std::fs::read(path) {
          Ok(data) => data,
          Err(e) => {
            warn!("无法读取 {}: {}", path.display(), e);
            return;
          }
        };

        for round in 0..args.repeat {
          if detector.stop_signal().is_stopping() {
            break;
          }
          let request = DetectRequest {
            id: format!("{}-{}", index, round),
            data: data.clone(),
            detect: args.detect.clone(),
          };
          let line = match detector.detect(&request) {
            Ok(response) => json!({
              "file": path.display().to_string(),
              "response": response,
            }),
            Err(e) => json!({
              "file": path.display().to_string(),
              "id": request.id,
              "error": e.to_string(),
              "code": match e.class() {
                ErrorClass::InvalidArgument => "invalid_argument",
                ErrorClass::Internal => "internal",
              },
            }),
          };
          println!("{}", line);
        }
      });
    }
  });

  let drained = detector.shutdown(Some(Duration::from_secs(args.drain_timeout)));
  if !drained {
    warn!("关闭超时，仍有推理未结束");
  }
  info!("处理完成，剩余实例 {}", detector.capacity());
  Ok(())
}

//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。库返回 `PdfError`，这里用 `anyhow` 附加
//! 文件名等上下文后交给 `main.rs` 输出。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/` 与 pdfrefine 库
//! - 子模块: calc, fit, bonds, scat

pub mod bonds;
pub mod calc;
pub mod fit;
pub mod scat;

use crate::cli::Commands;

use anyhow::{Context, Result};
use pdfrefine::fit::FitConfig;
use std::path::Path;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Calc(args) => calc::execute(args),
        Commands::Fit(args) => fit::execute(args),
        Commands::Bonds(args) => bonds::execute(args),
        Commands::Scat(args) => scat::execute(args),
    }
}

/// 读取配置文件，未指定时使用默认配置
fn load_config(path: Option<&Path>) -> Result<FitConfig> {
    match path {
        Some(path) => FitConfig::from_toml_file(path)
            .with_context(|| format!("loading configuration '{}'", path.display())),
        None => Ok(FitConfig::default()),
    }
}

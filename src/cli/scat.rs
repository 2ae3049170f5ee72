//! # scat 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/scat.rs`

use clap::Args;

/// scat 子命令参数
#[derive(Args, Debug)]
pub struct ScatArgs {
    /// Element or ion symbols, e.g. Ni O2- Fe3+
    #[arg(required = true)]
    pub elements: Vec<String>,
}

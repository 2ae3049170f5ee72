//! # bonds 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/bonds.rs`

use clap::Args;
use std::path::PathBuf;

/// bonds 子命令参数
#[derive(Args, Debug)]
pub struct BondsArgs {
    /// Structure file (.stru)
    pub structure: PathBuf,

    /// First element of the pair, or ALL
    #[arg(short = 'a', long, default_value = "ALL")]
    pub first: String,

    /// Second element of the pair, or ALL
    #[arg(short = 'b', long, default_value = "ALL")]
    pub second: String,

    /// Shortest bond to list in Angstrom
    #[arg(long, default_value_t = 0.0)]
    pub rmin: f64,

    /// Longest bond to list in Angstrom (exclusive)
    #[arg(long, default_value_t = 3.0)]
    pub rmax: f64,

    /// Bond angle at the middle atom of three 1-based atom indices
    #[arg(long, num_args = 3, value_names = ["I", "J", "K"])]
    pub angle: Option<Vec<usize>>,
}

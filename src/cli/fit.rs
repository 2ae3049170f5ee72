//! # fit 子命令 CLI 定义
//!
//! 读取结构与观测数据，设置约束并执行精修。
//!
//! ## 示例
//! ```text
//! pdfrefine fit -s ni.stru -d ni.gr -k N --qmax 30 --range 1.5-20 \
//!     -C 'lat(1)=@1' -C 'lat(2)=@1' -C 'lat(3)=@1' -C 'pscale=@2'
//! ```
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/fit.rs`

use super::{parse_r_range, parse_radiation};

use clap::Args;
use pdfrefine::utils::output::Verbosity;
use pdfrefine::Radiation;
use std::path::PathBuf;

/// fit 子命令参数
#[derive(Args, Debug)]
pub struct FitArgs {
    /// Structure files (.stru), one phase each
    #[arg(short, long = "structure", required = true, num_args = 1..)]
    pub structures: Vec<PathBuf>,

    /// Observed PDF data files, one dataset each
    #[arg(short, long = "data", required = true, num_args = 1..)]
    pub data: Vec<PathBuf>,

    /// Radiation type of the data: X (x-ray) or N (neutron)
    #[arg(short = 'k', long, default_value = "X", value_parser = parse_radiation)]
    pub radiation: Radiation,

    /// Maximum Q of the data in 1/Angstrom (0 = no termination ripple)
    #[arg(long, default_value_t = 0.0)]
    pub qmax: f64,

    /// Q resolution damping factor
    #[arg(long, default_value_t = 0.0)]
    pub qdamp: f64,

    /// Fit range applied to every dataset, e.g. 1.5-20
    #[arg(long, value_parser = parse_r_range)]
    pub range: Option<(f64, f64)>,

    /// Constraint 'address=expression', e.g. 'lat(1)=@1' or 'x(2)=@3+0.5'
    #[arg(short = 'C', long = "constrain")]
    pub constraints: Vec<String>,

    /// Initial value 'name=value' for a variable or structural quantity, e.g. '@1=3.52'
    #[arg(long = "set")]
    pub values: Vec<String>,

    /// Variables kept fixed during the fit, e.g. '@2'
    #[arg(long = "fix")]
    pub fixed: Vec<String>,

    /// TOML file with refinement settings
    #[arg(short, long, env = "PDFREFINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the iteration limit
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Directory for refined structures, curves and the result summary
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Save the final engine state as JSON
    #[arg(long)]
    pub save_state: Option<PathBuf>,

    /// Progress output level
    #[arg(short, long, value_enum)]
    pub verbosity: Option<Verbosity>,
}

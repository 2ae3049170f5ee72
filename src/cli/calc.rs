//! # calc 子命令 CLI 定义
//!
//! 单文件或目录批量计算 PDF。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/calc.rs`

use super::parse_radiation;

use clap::{Args, ValueEnum};
use pdfrefine::Radiation;
use std::path::PathBuf;

/// 输出格式
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum CalcFormat {
    /// Two-column text: r, G(r)
    Pdf,
    /// CSV with r, G_obs, G_calc, G_diff, weight
    Csv,
}

impl std::fmt::Display for CalcFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalcFormat::Pdf => write!(f, "pdf"),
            CalcFormat::Csv => write!(f, "csv"),
        }
    }
}

/// calc 子命令参数
#[derive(Args, Debug)]
pub struct CalcArgs {
    /// Structure file (.stru) or directory of structure files
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = "pdf_output")]
    pub output: PathBuf,

    /// Radiation type: X (x-ray) or N (neutron)
    #[arg(short = 'k', long, default_value = "X", value_parser = parse_radiation)]
    pub radiation: Radiation,

    /// Maximum Q of the termination ripple in 1/Angstrom (0 = no ripple)
    #[arg(long, default_value_t = 0.0)]
    pub qmax: f64,

    /// Q resolution damping factor
    #[arg(long, default_value_t = 0.0)]
    pub qdamp: f64,

    /// Lowest r of the grid in Angstrom
    #[arg(long, default_value_t = 0.01)]
    pub rmin: f64,

    /// Highest r of the grid in Angstrom
    #[arg(long, default_value_t = 20.0)]
    pub rmax: f64,

    /// Number of grid points
    #[arg(short = 'n', long, default_value_t = 2000)]
    pub points: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = CalcFormat::Pdf)]
    pub format: CalcFormat,

    /// Glob pattern(s) for batch mode, comma separated
    #[arg(short, long, default_value = "*.stru")]
    pub pattern: String,

    /// Recurse into subdirectories
    #[arg(short, long, default_value_t = false)]
    pub recursive: bool,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// Overwrite existing output files
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// TOML file with calculation settings
    #[arg(short, long, env = "PDFREFINE_CONFIG")]
    pub config: Option<PathBuf>,
}

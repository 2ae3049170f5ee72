//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `calc`: 单个或批量结构的 PDF 计算
//! - `fit`: 结构对观测 PDF 的精修
//! - `bonds`: 键长、键角查询
//! - `scat`: 散射因子查询
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: calc, fit, bonds, scat

pub mod bonds;
pub mod calc;
pub mod fit;
pub mod scat;

use clap::{Parser, Subcommand};
use pdfrefine::Radiation;

/// pdfrefine - 原子对分布函数计算与结构精修
#[derive(Parser)]
#[command(name = "pdfrefine")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "Atomic pair distribution function calculation and structure refinement", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Calculate the PDF of one structure file or of every structure in a directory
    Calc(calc::CalcArgs),

    /// Refine structures against observed PDF data
    Fit(fit::FitArgs),

    /// List bond lengths and angles of a structure
    Bonds(bonds::BondsArgs),

    /// Show X-ray and neutron scattering values of elements
    Scat(scat::ScatArgs),
}

/// 解析辐射类型参数（X/N，忽略大小写）
pub fn parse_radiation(input: &str) -> Result<Radiation, String> {
    Radiation::parse(input).map_err(|e| e.to_string())
}

/// 解析 `min-max` 形式的 r 区间
pub fn parse_r_range(input: &str) -> Result<(f64, f64), String> {
    let (min, max) = input
        .split_once(['-', ':'])
        .ok_or_else(|| format!("invalid range '{input}' (expected e.g. 1.5-20)"))?;
    let min: f64 = min
        .trim()
        .parse()
        .map_err(|_| format!("invalid range start '{min}'"))?;
    let max: f64 = max
        .trim()
        .parse()
        .map_err(|_| format!("invalid range end '{max}'"))?;
    if !(max > min) || min < 0.0 {
        return Err(format!("invalid range '{input}' (must be 0 <= min < max)"));
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_r_range() {
        assert_eq!(parse_r_range("1.5-20").unwrap(), (1.5, 20.0));
        assert_eq!(parse_r_range("0:10").unwrap(), (0.0, 10.0));
        assert!(parse_r_range("5-1").is_err());
        assert!(parse_r_range("abc").is_err());
    }

    #[test]
    fn test_parse_radiation() {
        assert_eq!(parse_radiation("n").unwrap(), Radiation::Neutron);
        assert_eq!(parse_radiation("X").unwrap(), Radiation::Xray);
        assert!(parse_radiation("Z").is_err());
    }
}

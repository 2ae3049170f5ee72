//! # PDF 计算模块
//!
//! 原子对分布函数的正向计算与结果导出。
//!
//! ## 子模块
//! - `scattering`: 元素散射因子数据库与物相覆盖表
//! - `calculator`: G(r) 计算
//! - `export`: 曲线、精修结果与 CSV 导出
//!
//! ## 依赖关系
//! - 被 `engine.rs` 和 `batch/` 使用
//! - 使用 `models/`

pub mod calculator;
pub mod export;
pub mod scattering;

pub use calculator::{PdfCalculator, PhaseWeighting};
pub use scattering::Radiation;

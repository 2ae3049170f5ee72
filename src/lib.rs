//! # pdfrefine - 原子对分布函数计算与结构精修
//!
//! 由晶体结构计算 PDF G(r)，并通过约束参数与 Levenberg-Marquardt 迭代
//! 对一个或多个观测数据集精修结构。
//!
//! ## 依赖关系
//! ```text
//! engine.rs      (PdfFit: 物相/数据集/变量/选择，精修状态机)
//!   ├── fit/        (地址空间、约束、LM 求解器、配置)
//!   ├── pdf/        (散射因子、G(r) 计算、导出)
//!   ├── parsers/    (.stru 结构与观测数据)
//!   ├── models/     (晶体、物相、数据集)
//!   └── utils/      (输出与进度条)
//! batch/         (批量 PDF 计算)
//! error.rs       (错误处理)
//! ```

pub mod batch;
pub mod engine;
pub mod error;
pub mod fit;
pub mod models;
pub mod parsers;
pub mod pdf;
pub mod utils;

#[cfg(test)]
mod fixtures;

pub use engine::{PdfFit, RefinementReport, RefinementStatus, StepReport};
pub use error::{PdfError, Result};
pub use pdf::Radiation;

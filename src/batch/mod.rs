//! # 批量处理模块
//!
//! 对目录中的多个结构文件并行计算 PDF。
//!
//! ## 功能
//! - 自动检测输入类型（文件/目录）
//! - glob 模式收集文件列表
//! - rayon 线程池并行处理
//! - 进度反馈与统计
//!
//! ## 依赖关系
//! - 被 `commands/calc.rs` 使用
//! - 使用 `rayon` 进行并行处理
//! - 使用 `indicatif` 显示进度

pub mod collector;
pub mod runner;

pub use collector::FileCollector;
pub use runner::{BatchResult, BatchRunner, CalcJob, CalcOutput, ProcessResult};

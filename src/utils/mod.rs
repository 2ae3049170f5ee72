//! # 工具函数模块
//!
//! 提供可重定向的进度输出、美化输出与进度条。
//!
//! ## 依赖关系
//! - 被 `engine.rs`、`batch/` 和命令行前端使用
//! - 子模块: output, progress

pub mod output;
pub mod progress;

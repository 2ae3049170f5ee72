//! # 进度条工具
//!
//! 封装 `indicatif`：批量计算用进度条，精修用 spinner。
//!
//! ## 依赖关系
//! - 被 `commands/calc.rs`、`commands/fit.rs` 使用
//! - 使用 `indicatif` crate

use indicatif::{ProgressBar, ProgressStyle};

use std::time::Duration;

/// 批量计算进度条
pub fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message.to_string());
    pb
}

/// 精修迭代 spinner，消息由调用方在每步之后更新
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {elapsed_precise} {msg}") {
        pb.set_style(style.tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// 精修 spinner 的状态文字
pub fn iteration_message(iteration: usize, rw: f64, lambda: f64) -> String {
    format!("iteration {iteration:>3}  Rw = {rw:.6}  lambda = {lambda:.1e}")
}

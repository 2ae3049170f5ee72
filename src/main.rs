//! # pdfrefine 命令行前端
//!
//! ## 子命令
//! - `calc`  - 单个或批量结构的 PDF 计算
//! - `fit`   - 结构对观测 PDF 的精修
//! - `bonds` - 键长、键角
//! - `scat`  - 散射因子
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   └── commands/   (命令执行逻辑)
//!         └── pdfrefine 库 (engine, batch, parsers, pdf, fit, models, utils)
//! ```

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use pdfrefine::utils::output;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        output::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

//! # calc 命令实现
//!
//! 单文件模式直接计算并打印摘要；目录模式收集文件后并行批量计算。
//!
//! ## 依赖关系
//! - 使用 `cli/calc.rs` 定义的参数
//! - 使用 pdfrefine 的 `batch/`

use crate::cli::calc::{CalcArgs, CalcFormat};

use anyhow::{bail, Context, Result};
use pdfrefine::batch::{BatchRunner, CalcJob, CalcOutput, FileCollector, ProcessResult};
use pdfrefine::utils::output;
use std::fs;

/// 执行 calc 命令
pub fn execute(args: CalcArgs) -> Result<()> {
    output::print_header("Pair Distribution Function Calculation");

    if !args.input.exists() {
        bail!("input not found: {}", args.input.display());
    }
    let config = super::load_config(args.config.as_deref())?;
    config.validate()?;

    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating output directory '{}'", args.output.display()))?;

    let job = CalcJob {
        output_dir: args.output.clone(),
        radiation: args.radiation,
        qmax: args.qmax,
        qdamp: args.qdamp,
        rmin: args.rmin,
        rmax: args.rmax,
        npoints: args.points,
        format: match args.format {
            CalcFormat::Pdf => CalcOutput::Pdf,
            CalcFormat::Csv => CalcOutput::Csv,
        },
        overwrite: args.overwrite,
        config,
    };

    output::print_info(&format!(
        "{} radiation, Qmax = {:.3}, Qdamp = {:.4}, r = {:.3} .. {:.3} ({} points)",
        job.radiation, job.qmax, job.qdamp, job.rmin, job.rmax, job.npoints
    ));

    if args.input.is_file() {
        output::print_info(&format!("Single file mode: '{}'", args.input.display()));
        return match job.process(&args.input) {
            ProcessResult::Success(msg) => {
                output::print_success(&msg);
                Ok(())
            }
            ProcessResult::Skipped(msg) => {
                output::print_skip(&msg);
                Ok(())
            }
            ProcessResult::Failed(path, err) => bail!("{path}: {err}"),
        };
    }

    output::print_info(&format!("Batch mode: directory '{}'", args.input.display()));
    let files = FileCollector::new(args.input.clone())
        .with_pattern(&args.pattern)?
        .recursive(args.recursive)
        .collect();
    if files.is_empty() {
        output::print_warning(&format!(
            "No matching files found with pattern '{}'",
            args.pattern
        ));
        return Ok(());
    }
    output::print_info(&format!(
        "Found {} structure files, output format: {}",
        files.len(),
        args.format
    ));

    let runner = BatchRunner::new(args.jobs);
    let result = runner.run(files, |file| job.process(file))?;

    output::print_separator();
    output::print_success(&format!(
        "Batch complete: {} success, {} skipped, {} failed",
        result.success, result.skipped, result.failed
    ));
    if !result.failures.is_empty() {
        output::print_warning("Failed files:");
        for (path, err) in result.failures.iter().take(10) {
            output::print_error(&format!("  {path}: {err}"));
        }
        if result.failures.len() > 10 {
            output::print_warning(&format!("  ... and {} more", result.failures.len() - 10));
        }
    }
    Ok(())
}

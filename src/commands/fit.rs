//! # fit 命令实现
//!
//! 1. 读取结构与数据，设置拟合区间
//! 2. 依次应用约束、初值与固定变量
//! 3. 逐步调用 `refine_step`，spinner 显示迭代进度
//! 4. 打印变量表，按需写出精修结果
//!
//! ## 依赖关系
//! - 使用 `cli/fit.rs` 定义的参数
//! - 使用 pdfrefine 的 `PdfFit`

use crate::cli::fit::FitArgs;

use anyhow::{anyhow, bail, Context, Result};
use pdfrefine::utils::output::{self, Verbosity};
use pdfrefine::utils::progress;
use pdfrefine::{PdfFit, RefinementStatus};
use std::fs;
use std::path::Path;
use tabled::{Table, Tabled};

/// 变量表行
#[derive(Tabled)]
struct VariableRow {
    #[tabled(rename = "Variable")]
    id: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Sigma")]
    sigma: String,
    #[tabled(rename = "State")]
    state: String,
}

/// 拆分 `name=value`
fn split_assignment(text: &str) -> Result<(&str, &str)> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("expected 'name=value', got '{text}'"))?;
    let (name, value) = (name.trim(), value.trim());
    if name.is_empty() || value.is_empty() {
        bail!("expected 'name=value', got '{text}'");
    }
    Ok((name, value))
}

fn file_stem(path: &Path) -> &str {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("output")
}

/// 执行 fit 命令
pub fn execute(args: FitArgs) -> Result<()> {
    output::print_header("PDF Structure Refinement");

    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(max) = args.max_iterations {
        config.max_iterations = max;
    }
    if let Some(verbosity) = args.verbosity {
        config.verbosity = verbosity;
    }
    config.validate()?;
    let verbosity = config.verbosity;
    let mut fit = PdfFit::with_config(config);

    for path in &args.structures {
        fit.read_struct(path)
            .with_context(|| format!("reading structure '{}'", path.display()))?;
    }
    for path in &args.data {
        let index = fit
            .read_data(path, args.radiation, args.qmax, args.qdamp)
            .with_context(|| format!("reading data '{}'", path.display()))?;
        if let Some((rmin, rmax)) = args.range {
            fit.pdfrange(index, rmin, rmax)?;
        }
    }

    for text in &args.constraints {
        let (address, expression) = split_assignment(text)?;
        fit.constrain(address, expression)
            .with_context(|| format!("constraint '{text}'"))?;
    }
    for text in &args.values {
        let (name, value) = split_assignment(text)?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("value of '{name}' is not a number"))?;
        fit.setvar(name, value)
            .with_context(|| format!("setting '{text}'"))?;
    }
    for var in &args.fixed {
        fit.fixvar(var).with_context(|| format!("fixing '{var}'"))?;
    }

    let report = if verbosity == Verbosity::Verbose {
        fit.refine()?
    } else {
        fit.set_verbosity(Verbosity::Quiet);
        let spinner = progress::create_spinner("Refining");
        let outcome = loop {
            match fit.refine_step() {
                Ok(step) => {
                    spinner.set_message(progress::iteration_message(
                        step.iteration,
                        step.rw,
                        step.lambda,
                    ));
                    if step.status.is_terminal() {
                        break Ok(fit.report());
                    }
                }
                Err(e) => break Err(e),
            }
        };
        spinner.finish_and_clear();
        fit.set_verbosity(verbosity);
        outcome?
    };

    output::print_separator();
    let summary = format!(
        "{:?} after {} iterations: Rw {:.6} -> {:.6}",
        report.status, report.iterations, report.initial_rw, report.rw
    );
    match report.status {
        RefinementStatus::Converged => output::print_success(&summary),
        _ => output::print_warning(&summary),
    }

    let rows: Vec<VariableRow> = fit
        .binder()
        .variables()
        .map(|v| VariableRow {
            id: format!("@{}", v.id),
            value: format!("{:.8}", v.value),
            sigma: format!("{:.8}", v.sigma),
            state: if v.fixed { "fixed" } else { "free" }.to_string(),
        })
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(&rows));
    }

    if let Some(dir) = &args.output {
        write_results(&fit, &args, dir)?;
    }
    if let Some(path) = &args.save_state {
        fit.save_state(path)?;
        output::print_written("state", &path.display().to_string());
    }

    if report.status == RefinementStatus::Failed {
        bail!(
            "refinement failed: {}",
            report.message.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

/// 写出精修后的结构、曲线与结果摘要
fn write_results(fit: &PdfFit, args: &FitArgs, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory '{}'", dir.display()))?;

    for (k, path) in args.structures.iter().enumerate() {
        let out = dir.join(format!("{}_refined.stru", file_stem(path)));
        fit.save_struct(k + 1, &out)?;
        output::print_written(&path.display().to_string(), &out.display().to_string());
    }
    for (k, path) in args.data.iter().enumerate() {
        let stem = file_stem(path);
        let pdf = dir.join(format!("{stem}.fgr"));
        let dif = dir.join(format!("{stem}.dif"));
        fit.save_pdf(k + 1, &pdf)?;
        fit.save_dif(k + 1, &dif)?;
        output::print_written(&path.display().to_string(), &pdf.display().to_string());
        output::print_written(&path.display().to_string(), &dif.display().to_string());
    }
    let res = dir.join("refinement.res");
    fit.save_res(&res)?;
    output::print_written("summary", &res.display().to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_assignment() {
        assert_eq!(split_assignment("lat(1) = @1").unwrap(), ("lat(1)", "@1"));
        assert_eq!(split_assignment("x(2)=@3+0.5").unwrap(), ("x(2)", "@3+0.5"));
        assert!(split_assignment("lat(1)").is_err());
        assert!(split_assignment("=@1").is_err());
    }
}

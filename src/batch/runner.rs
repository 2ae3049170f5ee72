//! # 批量执行器
//!
//! 并行执行批量 PDF 计算。
//!
//! ## 功能
//! - 基于 rayon 线程池的并行迭代
//! - 进度条显示
//! - 错误收集与汇总报告
//! - `CalcJob`：单个结构文件 → 分配网格 → 计算 → 写出
//!
//! ## 依赖关系
//! - 被 `commands/calc.rs` 调用
//! - 使用 `engine.rs` 的 PdfFit 完成单个计算
//! - 使用 `utils/progress.rs` 创建进度条

use crate::engine::PdfFit;
use crate::error::{PdfError, Result};
use crate::fit::FitConfig;
use crate::pdf::Radiation;
use crate::utils::progress;

use rayon::prelude::*;
use std::io;
use std::path::{Path, PathBuf};

/// 单个文件处理结果
#[derive(Debug, Clone)]
pub enum ProcessResult {
    Success(String),
    /// 跳过（如输出已存在）
    Skipped(String),
    /// (文件路径, 错误信息)
    Failed(String, String),
}

/// 批量处理结果统计
#[derive(Debug, Default)]
pub struct BatchResult {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

impl BatchResult {
    pub fn merge(&mut self, result: ProcessResult) {
        match result {
            ProcessResult::Success(_) => self.success += 1,
            ProcessResult::Skipped(_) => self.skipped += 1,
            ProcessResult::Failed(path, err) => {
                self.failed += 1;
                self.failures.push((path, err));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.skipped + self.failed
    }
}

/// 批量执行器
pub struct BatchRunner {
    jobs: usize,
}

impl BatchRunner {
    /// jobs 为 0 时使用全部 CPU
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self { jobs }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// 并行处理文件列表
    pub fn run<F>(&self, files: Vec<PathBuf>, processor: F) -> Result<BatchResult>
    where
        F: Fn(&Path) -> ProcessResult + Sync + Send,
    {
        let pb = progress::create_progress_bar(files.len() as u64, "Calculating");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| PdfError::InvalidArgument(format!("cannot build thread pool: {e}")))?;

        let results: Vec<ProcessResult> = pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    let result = processor(file);
                    pb.inc(1);
                    result
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut batch = BatchResult::default();
        for result in results {
            batch.merge(result);
        }
        Ok(batch)
    }
}

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOutput {
    /// `r  Gcalc` 文本
    Pdf,
    Csv,
}

impl CalcOutput {
    fn extension(self) -> &'static str {
        match self {
            CalcOutput::Pdf => "pdf",
            CalcOutput::Csv => "csv",
        }
    }
}

/// 单个结构的 PDF 计算任务
#[derive(Debug, Clone)]
pub struct CalcJob {
    pub output_dir: PathBuf,
    pub radiation: Radiation,
    pub qmax: f64,
    pub qdamp: f64,
    pub rmin: f64,
    pub rmax: f64,
    pub npoints: usize,
    pub format: CalcOutput,
    pub overwrite: bool,
    pub config: FitConfig,
}

impl CalcJob {
    /// 输入文件对应的输出路径
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        self.output_dir
            .join(format!("{stem}.{}", self.format.extension()))
    }

    /// 计算并写出到 output
    pub fn calculate(&self, input: &Path, output: &Path) -> Result<()> {
        let mut fit = PdfFit::with_config(self.config.clone());
        fit.redirect_output(Box::new(io::sink()));
        fit.read_struct(input)?;
        fit.alloc(self.radiation, self.qmax, self.qdamp, self.rmin, self.rmax, self.npoints)?;
        fit.calc()?;
        match self.format {
            CalcOutput::Pdf => fit.save_pdf(1, output),
            CalcOutput::Csv => fit.export_csv(1, output),
        }
    }

    pub fn process(&self, input: &Path) -> ProcessResult {
        let output = self.output_path(input);
        if output.exists() && !self.overwrite {
            return ProcessResult::Skipped(format!(
                "Output exists, skipping: {}",
                output.display()
            ));
        }
        match self.calculate(input, &output) {
            Ok(()) => ProcessResult::Success(format!("{} -> {}", input.display(), output.display())),
            Err(e) => ProcessResult::Failed(input.display().to_string(), e.to_string()),
        }
    }
}

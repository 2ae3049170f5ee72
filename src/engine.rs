//! # 精修引擎
//!
//! `PdfFit` 持有全部物相、数据集、精修变量与当前选择，是库的主要入口。
//!
//! ## 状态
//! - 物相与数据集按加载顺序存放，对外编号从 1 开始，只能通过 `reset` 整体清空
//! - 当前物相 / 数据集是显式的 `Selection`，默认指向最近加载的一个
//! - 每个调用先完成全部校验再修改状态；出错时状态保持不变
//!
//! ## 精修状态机
//! ```text
//! Idle ──refine_step──▶ Evaluating ──▶ Converged | MaxIterExceeded | Failed
//!                          ▲   │
//!                          └───┘ 每次 refine_step 一次 LM 迭代
//! ```
//! 终止状态下再次调用 `refine_step` 会开始新一轮精修；`reset` 回到 Idle。
//!
//! ## 依赖关系
//! - 使用 `models/`、`pdf/`、`fit/`、`parsers/`
//! - 进度输出写入 `utils/output.rs` 的 OutputSink

use crate::error::{PdfError, Result};
use crate::fit::{
    Address, ConstraintExpr, FitConfig, LeastSquaresProblem, LevenbergMarquardt, ParameterBinder,
    Selection, VarRef,
};
use crate::models::{BondLengths, Crystal, Dataset, ObservedCurve, Phase};
use crate::parsers::{data, stru};
use crate::pdf::calculator::PdfCalculator;
use crate::pdf::export;
use crate::pdf::scattering::{self, Radiation};
use crate::utils::output::{OutputSink, Verbosity};

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// 精修状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefinementStatus {
    Idle,
    Evaluating,
    Converged,
    /// 达到迭代上限，保留最后一次改进的结果
    MaxIterExceeded,
    Failed,
}

impl RefinementStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RefinementStatus::Converged | RefinementStatus::MaxIterExceeded | RefinementStatus::Failed
        )
    }
}

/// 单步精修结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub iteration: usize,
    pub rw: f64,
    pub lambda: f64,
    pub status: RefinementStatus,
}

/// 一轮精修的结果
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementReport {
    pub status: RefinementStatus,
    pub iterations: usize,
    pub initial_rw: f64,
    pub rw: f64,
    /// 失败原因
    pub message: Option<String>,
}

#[derive(Debug)]
struct Refinement {
    status: RefinementStatus,
    iteration: usize,
    stepper: Option<LevenbergMarquardt>,
    free: Vec<u32>,
    initial_rw: f64,
    rw: f64,
    message: Option<String>,
}

impl Default for Refinement {
    fn default() -> Self {
        Self {
            status: RefinementStatus::Idle,
            iteration: 0,
            stepper: None,
            free: Vec::new(),
            initial_rw: 0.0,
            rw: 0.0,
            message: None,
        }
    }
}

/// 持久化内容
#[derive(Serialize, Deserialize)]
struct SavedState {
    phases: Vec<Phase>,
    datasets: Vec<Dataset>,
    binder: ParameterBinder,
    selection: Selection,
}

/// 精修问题：自由变量 → 约束 → 结构 → 计算曲线 → 加权残差
struct FitModel<'a> {
    phases: &'a mut [Phase],
    datasets: &'a mut [Dataset],
    binder: &'a mut ParameterBinder,
    calculator: &'a PdfCalculator,
    free: &'a [u32],
}

impl LeastSquaresProblem for FitModel<'_> {
    fn params(&self) -> Result<Vec<f64>> {
        self.binder.values(self.free)
    }

    fn set_params(&mut self, params: &[f64]) -> Result<()> {
        self.binder.set_values(self.free, params)?;
        self.binder.apply(self.phases, self.datasets)
    }

    fn residuals(&mut self) -> Result<Vec<f64>> {
        let mut out = Vec::new();
        for dataset in self.datasets.iter_mut().filter(|d| d.selected) {
            let gcalc = self.calculator.calculate(self.phases, dataset)?;
            dataset.store_calculation(gcalc);
            out.extend(
                dataset
                    .fit_points()
                    .map(|(i, w)| w.sqrt() * (dataset.gobs[i] - dataset.gcalc[i])),
            );
        }
        Ok(out)
    }
}

/// PDF 计算与精修引擎
#[derive(Debug)]
pub struct PdfFit {
    phases: Vec<Phase>,
    datasets: Vec<Dataset>,
    binder: ParameterBinder,
    selection: Selection,
    config: FitConfig,
    output: OutputSink,
    refinement: Refinement,
}

impl Default for PdfFit {
    fn default() -> Self {
        Self::new()
    }
}

/// 1 起始编号转 0 起始下标
fn slot(index: usize, len: usize, what: &str) -> Result<usize> {
    if index == 0 || index > len {
        return Err(PdfError::Range(format!("{what} {index} outside [1, {len}]")));
    }
    Ok(index - 1)
}

impl PdfFit {
    pub fn new() -> Self {
        Self::with_config(FitConfig::default())
    }

    pub fn with_config(config: FitConfig) -> Self {
        let mut output = OutputSink::stdout();
        output.set_verbosity(config.verbosity);
        Self {
            phases: Vec::new(),
            datasets: Vec::new(),
            binder: ParameterBinder::new(),
            selection: Selection::default(),
            config,
            output,
            refinement: Refinement::default(),
        }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FitConfig) -> Result<()> {
        config.validate()?;
        self.output.set_verbosity(config.verbosity);
        self.config = config;
        Ok(())
    }

    /// 清空物相、数据集、精修变量与选择
    pub fn reset(&mut self) {
        self.phases.clear();
        self.datasets.clear();
        self.binder.clear();
        self.selection = Selection::default();
        self.refinement = Refinement::default();
    }

    // ─────────────────────────────────────────────────────────────
    // 输出
    // ─────────────────────────────────────────────────────────────

    /// 重定向进度输出，只影响之后的写入
    pub fn redirect_output(&mut self, writer: Box<dyn Write + Send>) {
        self.output.redirect(writer);
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.output.set_verbosity(verbosity);
        self.config.verbosity = verbosity;
    }

    // ─────────────────────────────────────────────────────────────
    // 结构
    // ─────────────────────────────────────────────────────────────

    fn push_phase(&mut self, phase: Phase) -> usize {
        self.output.info(&format!(
            "Phase {}: {} ({} atoms)",
            self.phases.len() + 1,
            phase.name(),
            phase.num_atoms()
        ));
        self.phases.push(phase);
        self.selection.phase = Some(self.phases.len() - 1);
        self.phases.len()
    }

    /// 读取结构文件，返回新物相编号
    pub fn read_struct(&mut self, path: &Path) -> Result<usize> {
        let phase = crate::parsers::parse_structure_file(path)?;
        Ok(self.push_phase(phase))
    }

    pub fn read_struct_string(&mut self, text: &str) -> Result<usize> {
        let phase = stru::parse_stru_content(text, "string")?;
        Ok(self.push_phase(phase))
    }

    pub fn add_structure(&mut self, crystal: Crystal) -> Result<usize> {
        let phase = Phase::new(crystal)?;
        Ok(self.push_phase(phase))
    }

    pub fn num_phases(&self) -> usize {
        self.phases.len()
    }

    fn current_phase(&self) -> Result<&Phase> {
        self.selection
            .phase
            .and_then(|p| self.phases.get(p))
            .ok_or_else(PdfError::no_phase)
    }

    fn current_phase_mut(&mut self) -> Result<&mut Phase> {
        self.selection
            .phase
            .and_then(|p| self.phases.get_mut(p))
            .ok_or_else(PdfError::no_phase)
    }

    /// 给定编号（1 起始）或当前物相
    fn phase_or_current(&self, phase: Option<usize>) -> Result<&Phase> {
        match phase {
            Some(i) => Ok(&self.phases[slot(i, self.phases.len(), "phase")?]),
            None => self.current_phase(),
        }
    }

    pub fn get_structure(&self, phase: usize) -> Result<&Crystal> {
        Ok(&self.phases[slot(phase, self.phases.len(), "phase")?].crystal)
    }

    pub fn get_phase(&self, phase: usize) -> Result<&Phase> {
        Ok(&self.phases[slot(phase, self.phases.len(), "phase")?])
    }

    /// 当前物相的原子数
    pub fn num_atoms(&self) -> Result<usize> {
        Ok(self.current_phase()?.num_atoms())
    }

    /// 大写元素符号，按原子顺序
    pub fn get_atoms(&self, phase: Option<usize>) -> Result<Vec<String>> {
        Ok(self.phase_or_current(phase)?.element_symbols())
    }

    /// 去重的大写元素符号，按首次出现顺序
    pub fn get_atom_types(&self, phase: Option<usize>) -> Result<Vec<String>> {
        Ok(self.phase_or_current(phase)?.atom_types())
    }

    pub fn save_struct_string(&self, phase: usize) -> Result<String> {
        Ok(stru::to_stru_string(self.get_phase(phase)?))
    }

    pub fn save_struct(&self, phase: usize, path: &Path) -> Result<()> {
        export::write_text(path, &self.save_struct_string(phase)?)
    }

    // ─────────────────────────────────────────────────────────────
    // 数据
    // ─────────────────────────────────────────────────────────────

    fn push_dataset(&mut self, dataset: Dataset) -> usize {
        self.output.info(&format!(
            "Dataset {}: {} ({}, {} points, r = {:.4} .. {:.4})",
            self.datasets.len() + 1,
            dataset.name,
            dataset.radiation,
            dataset.npoints(),
            dataset.grid.rmin,
            dataset.grid.rmax()
        ));
        self.datasets.push(dataset);
        self.selection.dataset = Some(self.datasets.len() - 1);
        self.datasets.len()
    }

    /// 读取观测数据文件，返回新数据集编号
    pub fn read_data(&mut self, path: &Path, kind: Radiation, qmax: f64, qdamp: f64) -> Result<usize> {
        let curve = data::parse_data_file(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("data")
            .to_string();
        let dataset = Dataset::from_observed(name, kind, qmax, qdamp, curve)?;
        Ok(self.push_dataset(dataset))
    }

    pub fn read_data_string(
        &mut self,
        text: &str,
        kind: Radiation,
        qmax: f64,
        qdamp: f64,
        name: &str,
    ) -> Result<usize> {
        let curve = data::parse_data_content(text, name)?;
        let dataset = Dataset::from_observed(name, kind, qmax, qdamp, curve)?;
        Ok(self.push_dataset(dataset))
    }

    /// 由数组创建数据集；dg 为空时权重全为 1
    pub fn read_data_lists(
        &mut self,
        kind: Radiation,
        qmax: f64,
        qdamp: f64,
        r: Vec<f64>,
        g: Vec<f64>,
        dg: Option<Vec<f64>>,
    ) -> Result<usize> {
        let curve = ObservedCurve { r, g, dg };
        let dataset = Dataset::from_observed("list", kind, qmax, qdamp, curve)?;
        Ok(self.push_dataset(dataset))
    }

    /// 分配空数据集
    pub fn alloc(
        &mut self,
        kind: Radiation,
        qmax: f64,
        qdamp: f64,
        rmin: f64,
        rmax: f64,
        npoints: usize,
    ) -> Result<usize> {
        let dataset = Dataset::allocate(kind, qmax, qdamp, rmin, rmax, npoints)?;
        Ok(self.push_dataset(dataset))
    }

    pub fn num_datasets(&self) -> usize {
        self.datasets.len()
    }

    fn current_dataset(&self) -> Result<&Dataset> {
        self.selection
            .dataset
            .and_then(|d| self.datasets.get(d))
            .ok_or_else(PdfError::no_dataset)
    }

    fn current_dataset_mut(&mut self) -> Result<&mut Dataset> {
        self.selection
            .dataset
            .and_then(|d| self.datasets.get_mut(d))
            .ok_or_else(PdfError::no_dataset)
    }

    pub fn get_dataset(&self, dataset: usize) -> Result<&Dataset> {
        Ok(&self.datasets[slot(dataset, self.datasets.len(), "dataset")?])
    }

    /// 重新划分当前数据集的网格
    pub fn set_range(&mut self, rmin: f64, rmax: f64, npoints: usize) -> Result<()> {
        self.current_dataset_mut()?.set_range(rmin, rmax, npoints)
    }

    /// 设置数据集的拟合区间
    pub fn pdfrange(&mut self, dataset: usize, rmin: f64, rmax: f64) -> Result<()> {
        let d = slot(dataset, self.datasets.len(), "dataset")?;
        self.datasets[d].set_fit_range(rmin, rmax)
    }

    /// 当前数据集某一数组在拟合区间内的部分
    fn fit_window_of(&self, values: impl Fn(&Dataset) -> &[f64]) -> Result<Vec<f64>> {
        let dataset = self.current_dataset()?;
        Ok(values(dataset)[dataset.fit_window()].to_vec())
    }

    /// 拟合区间内的 r 值
    pub fn get_r(&self) -> Result<Vec<f64>> {
        let dataset = self.current_dataset()?;
        Ok(dataset.fit_window().map(|i| dataset.grid.r(i)).collect())
    }

    pub fn getpdf_obs(&self) -> Result<Vec<f64>> {
        self.fit_window_of(|d| d.gobs.as_slice())
    }

    pub fn getpdf_fit(&self) -> Result<Vec<f64>> {
        self.fit_window_of(|d| d.gcalc.as_slice())
    }

    pub fn getpdf_diff(&self) -> Result<Vec<f64>> {
        self.fit_window_of(|d| d.gdiff.as_slice())
    }

    pub fn save_pdf_string(&self, dataset: usize) -> Result<String> {
        Ok(export::pdf_to_string(self.get_dataset(dataset)?))
    }

    pub fn save_pdf(&self, dataset: usize, path: &Path) -> Result<()> {
        export::write_text(path, &self.save_pdf_string(dataset)?)
    }

    pub fn save_dif_string(&self, dataset: usize) -> Result<String> {
        Ok(export::diff_to_string(self.get_dataset(dataset)?))
    }

    pub fn save_dif(&self, dataset: usize, path: &Path) -> Result<()> {
        export::write_text(path, &self.save_dif_string(dataset)?)
    }

    pub fn save_res_string(&self) -> String {
        export::result_to_string(&self.phases, &self.datasets, &self.binder, self.getrw().ok())
    }

    pub fn save_res(&self, path: &Path) -> Result<()> {
        export::write_text(path, &self.save_res_string())
    }

    pub fn export_csv(&self, dataset: usize, path: &Path) -> Result<()> {
        export::to_csv(self.get_dataset(dataset)?, path)
    }

    // ─────────────────────────────────────────────────────────────
    // 选择
    // ─────────────────────────────────────────────────────────────

    pub fn setphase(&mut self, phase: usize) -> Result<()> {
        self.selection.phase = Some(slot(phase, self.phases.len(), "phase")?);
        Ok(())
    }

    pub fn setdata(&mut self, dataset: usize) -> Result<()> {
        self.selection.dataset = Some(slot(dataset, self.datasets.len(), "dataset")?);
        Ok(())
    }

    /// 当前物相编号（1 起始）
    pub fn current_phase_index(&self) -> Option<usize> {
        self.selection.phase.map(|p| p + 1)
    }

    /// 当前数据集编号（1 起始）
    pub fn current_dataset_index(&self) -> Option<usize> {
        self.selection.dataset.map(|d| d + 1)
    }

    /// 将物相计入 PDF 求和
    pub fn psel(&mut self, phase: usize) -> Result<()> {
        let p = slot(phase, self.phases.len(), "phase")?;
        self.phases[p].in_pdf = true;
        Ok(())
    }

    /// 将物相排除出 PDF 求和
    pub fn pdesel(&mut self, phase: usize) -> Result<()> {
        let p = slot(phase, self.phases.len(), "phase")?;
        self.phases[p].in_pdf = false;
        Ok(())
    }

    /// 数据集是否参与精修与 Rw 统计
    pub fn select_dataset(&mut self, dataset: usize, selected: bool) -> Result<()> {
        let d = slot(dataset, self.datasets.len(), "dataset")?;
        self.datasets[d].selected = selected;
        Ok(())
    }

    pub fn select_atom_index(&mut self, index: usize, selected: bool) -> Result<()> {
        self.current_phase_mut()?.select_atom_index(index, selected)
    }

    pub fn select_atom_type(&mut self, element: &str, selected: bool) -> Result<()> {
        self.current_phase_mut()?.select_atom_type(element, selected)
    }

    pub fn select_all(&mut self) -> Result<()> {
        self.current_phase_mut()?.select_all();
        Ok(())
    }

    pub fn select_none(&mut self) -> Result<()> {
        self.current_phase_mut()?.select_none();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // 参数与约束
    // ─────────────────────────────────────────────────────────────

    /// 约束结构量：`constrain("lat(1)", "@1")`
    pub fn constrain(&mut self, address: &str, expression: &str) -> Result<()> {
        let target = Address::parse(address)?.resolve(&self.selection)?;
        let expr = ConstraintExpr::parse(expression)?;
        let current = target.read(&self.phases, &self.datasets)?;
        self.binder.constrain(target, expr, current);
        self.output
            .detail(&format!("constrain {target} = {expression}"));
        Ok(())
    }

    /// 设置结构量或精修变量 `@n` 的值
    pub fn setvar(&mut self, var: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(PdfError::Range(format!("value {value} is not finite")));
        }
        match VarRef::parse(var)? {
            VarRef::Param(id) => {
                self.binder.variable(id)?;
                self.binder.validate(&self.phases, &self.datasets)?;
                self.binder.set_value(id, value)?;
                self.binder.apply(&mut self.phases, &mut self.datasets)
            }
            VarRef::Address(address) => {
                let target = address.resolve(&self.selection)?;
                target.write(&mut self.phases, &mut self.datasets, value)
            }
        }
    }

    pub fn getvar(&self, var: &str) -> Result<f64> {
        match VarRef::parse(var)? {
            VarRef::Param(id) => Ok(self.binder.variable(id)?.value),
            VarRef::Address(address) => {
                address
                    .resolve(&self.selection)?
                    .read(&self.phases, &self.datasets)
            }
        }
    }

    /// 精修变量的标准不确定度
    pub fn getvar_sigma(&self, var: &str) -> Result<f64> {
        match VarRef::parse(var)? {
            VarRef::Param(id) => Ok(self.binder.variable(id)?.sigma),
            VarRef::Address(_) => Err(PdfError::InvalidArgument(format!(
                "'{var}' is not a refinement variable"
            ))),
        }
    }

    fn parse_var_or_all(var: &str) -> Result<Option<u32>> {
        if var.trim().eq_ignore_ascii_case("ALL") {
            return Ok(None);
        }
        match VarRef::parse(var)? {
            VarRef::Param(id) => Ok(Some(id)),
            VarRef::Address(_) => Err(PdfError::InvalidArgument(format!(
                "expected @n or ALL, got '{var}'"
            ))),
        }
    }

    /// 固定变量（`@n` 或 `ALL`）
    pub fn fixvar(&mut self, var: &str) -> Result<()> {
        self.binder.set_fixed(Self::parse_var_or_all(var)?, true)
    }

    /// 释放变量（`@n` 或 `ALL`）
    pub fn freevar(&mut self, var: &str) -> Result<()> {
        self.binder.set_fixed(Self::parse_var_or_all(var)?, false)
    }

    pub fn binder(&self) -> &ParameterBinder {
        &self.binder
    }

    // ─────────────────────────────────────────────────────────────
    // 计算
    // ─────────────────────────────────────────────────────────────

    /// 应用约束并计算所有数据集的 PDF
    pub fn calc(&mut self) -> Result<()> {
        if self.datasets.is_empty() {
            return Err(PdfError::no_dataset());
        }
        self.binder.validate(&self.phases, &self.datasets)?;
        let calculator = self.config.calculator();
        let curves = {
            let mut phases = self.phases.clone();
            let mut datasets = self.datasets.clone();
            self.binder.apply(&mut phases, &mut datasets)?;
            let curves = datasets
                .iter()
                .map(|d| calculator.calculate(&phases, d))
                .collect::<Result<Vec<_>>>()?;
            self.phases = phases;
            self.datasets = datasets;
            curves
        };
        for (k, (dataset, gcalc)) in self.datasets.iter_mut().zip(curves).enumerate() {
            dataset.store_calculation(gcalc);
            self.output.info(&format!(
                "Calculated PDF for dataset {} ({} points)",
                k + 1,
                dataset.npoints()
            ));
        }
        if self.datasets.iter().any(|d| !d.crw.is_empty()) {
            self.update_crw();
        }
        Ok(())
    }

    /// 所有选中数据集拟合区间上的总 Rw
    pub fn getrw(&self) -> Result<f64> {
        if self.datasets.is_empty() {
            return Err(PdfError::no_dataset());
        }
        let (num, den) = self.rw_totals();
        Ok(if den > 0.0 { (num / den).sqrt() } else { 0.0 })
    }

    fn rw_totals(&self) -> (f64, f64) {
        self.datasets
            .iter()
            .filter(|d| d.selected)
            .map(|d| d.rw_terms())
            .fold((0.0, 0.0), |(n, d), (a, b)| (n + a, d + b))
    }

    /// 当前数据集拟合区间上的累积 Rw；精修前为空
    pub fn getcrw(&self) -> Result<Vec<f64>> {
        Ok(self.current_dataset()?.crw.clone())
    }

    fn update_crw(&mut self) {
        let (_, total_den) = self.rw_totals();
        for dataset in &mut self.datasets {
            dataset.crw = if dataset.selected {
                dataset.cumulative_rw(total_den)
            } else {
                Vec::new()
            };
        }
    }

    // ─────────────────────────────────────────────────────────────
    // 精修
    // ─────────────────────────────────────────────────────────────

    pub fn status(&self) -> RefinementStatus {
        self.refinement.status
    }

    /// 校验并开始新一轮精修
    fn start_refinement(&mut self) -> Result<()> {
        if !self.datasets.iter().any(|d| d.selected) {
            return Err(PdfError::NothingToRefine("no dataset is selected".to_string()));
        }
        let free = self.binder.free_ids();
        if free.is_empty() {
            return Err(PdfError::NothingToRefine(
                "no free refinement variables".to_string(),
            ));
        }
        self.binder.validate(&self.phases, &self.datasets)?;
        let points: usize = self
            .datasets
            .iter()
            .filter(|d| d.selected)
            .map(|d| d.fit_points().count())
            .sum();
        if points == 0 {
            return Err(PdfError::NothingToRefine(
                "no observed points inside the fit ranges".to_string(),
            ));
        }

        let calculator = self.config.calculator();
        {
            let mut model = FitModel {
                phases: &mut self.phases,
                datasets: &mut self.datasets,
                binder: &mut self.binder,
                calculator: &calculator,
                free: &free,
            };
            let p0 = model.params()?;
            model.set_params(&p0)?;
            model.residuals()?;
        }
        let rw = self.getrw()?;
        self.output.info(&format!(
            "Refinement started: {} free variables, {} points, Rw = {:.6}",
            free.len(),
            points,
            rw
        ));
        self.refinement = Refinement {
            status: RefinementStatus::Evaluating,
            iteration: 0,
            stepper: Some(LevenbergMarquardt::new(&self.config)),
            free,
            initial_rw: rw,
            rw,
            message: None,
        };
        self.update_crw();
        Ok(())
    }

    /// 一次 LM 迭代
    pub fn refine_step(&mut self) -> Result<StepReport> {
        if self.refinement.status != RefinementStatus::Evaluating {
            self.start_refinement()?;
        }
        let calculator = self.config.calculator();
        let free = &self.refinement.free;
        let Some(stepper) = self.refinement.stepper.as_mut() else {
            return Err(PdfError::NothingToRefine("refinement is not running".to_string()));
        };

        let before = self.binder.values(free)?;
        let outcome = {
            let mut model = FitModel {
                phases: &mut self.phases,
                datasets: &mut self.datasets,
                binder: &mut self.binder,
                calculator: &calculator,
                free,
            };
            stepper.step(&mut model)
        };
        let lambda = stepper.lambda();
        self.refinement.iteration += 1;
        let iteration = self.refinement.iteration;

        let status = match outcome {
            Err(e) => {
                self.restore(&before, &calculator);
                self.refinement.message = Some(e.to_string());
                self.output.warning(&format!("Refinement failed: {e}"));
                RefinementStatus::Failed
            }
            Ok(step) => {
                let previous = self.refinement.rw;
                let rw = self.getrw()?;
                self.refinement.rw = rw;
                self.output.info(&format!(
                    "Iteration {iteration:>3}: Rw = {rw:.6}  lambda = {lambda:.1e}"
                ));
                let relative = if previous > 0.0 { (previous - rw) / previous } else { 0.0 };
                if step.saturated || relative < self.config.tolerance {
                    RefinementStatus::Converged
                } else if iteration >= self.config.max_iterations {
                    RefinementStatus::MaxIterExceeded
                } else {
                    RefinementStatus::Evaluating
                }
            }
        };
        self.refinement.status = status;
        self.update_crw();
        if status.is_terminal() {
            self.finish_refinement(&calculator);
        }
        Ok(StepReport {
            iteration,
            rw: self.refinement.rw,
            lambda,
            status,
        })
    }

    /// 恢复到步前参数并重新计算
    fn restore(&mut self, values: &[f64], calculator: &PdfCalculator) {
        let free = self.refinement.free.clone();
        let mut model = FitModel {
            phases: &mut self.phases,
            datasets: &mut self.datasets,
            binder: &mut self.binder,
            calculator,
            free: &free,
        };
        if model.set_params(values).and_then(|_| model.residuals()).is_err() {
            self.output
                .warning("could not recompute curves at the last accepted parameters");
        }
    }

    /// 计算不确定度并输出结论
    fn finish_refinement(&mut self, calculator: &PdfCalculator) {
        let status = self.refinement.status;
        if status != RefinementStatus::Failed {
            let free = self.refinement.free.clone();
            let sigmas = match &self.refinement.stepper {
                Some(stepper) => {
                    let mut model = FitModel {
                        phases: &mut self.phases,
                        datasets: &mut self.datasets,
                        binder: &mut self.binder,
                        calculator,
                        free: &free,
                    };
                    stepper.standard_errors(&mut model)
                }
                None => Ok(vec![0.0; free.len()]),
            };
            match sigmas {
                Ok(sigmas) => self.binder.propagate_sigmas(&free, &sigmas, &mut self.phases),
                Err(e) => self
                    .output
                    .warning(&format!("uncertainties not available: {e}")),
            }
        }
        let summary = format!(
            "{:?} after {} iterations: Rw {:.6} -> {:.6}",
            status, self.refinement.iteration, self.refinement.initial_rw, self.refinement.rw
        );
        match status {
            RefinementStatus::Converged => self.output.success(&summary),
            _ => self.output.warning(&summary),
        }
        for var in self.binder.variables() {
            let line = format!("@{} = {:.8} +/- {:.8}", var.id, var.value, var.sigma);
            self.output.detail(&line);
        }
    }

    /// 迭代直到终止状态
    pub fn refine(&mut self) -> Result<RefinementReport> {
        self.start_refinement()?;
        loop {
            let step = self.refine_step()?;
            if step.status.is_terminal() {
                break;
            }
        }
        Ok(self.report())
    }

    /// 最近一轮精修的结果
    pub fn report(&self) -> RefinementReport {
        RefinementReport {
            status: self.refinement.status,
            iterations: self.refinement.iteration,
            initial_rw: self.refinement.initial_rw,
            rw: self.refinement.rw,
            message: self.refinement.message.clone(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // 键几何
    // ─────────────────────────────────────────────────────────────

    /// 当前物相中原子 j 处的键角（度）及其不确定度
    pub fn bond_angle(&self, i: usize, j: usize, k: usize) -> Result<(f64, f64)> {
        self.current_phase()?.bond_angle(i, j, k)
    }

    /// 原子编号从当前物相开始向后续物相顺延；两原子须落在同一物相
    fn locate_atom(&self, index: usize) -> Result<(usize, usize)> {
        let start = self.selection.phase.ok_or_else(PdfError::no_phase)?;
        if index == 0 {
            return Err(PdfError::Range("atom index 0 is not valid".to_string()));
        }
        let mut remaining = index;
        for (p, phase) in self.phases.iter().enumerate().skip(start) {
            if remaining <= phase.num_atoms() {
                return Ok((p, remaining));
            }
            remaining -= phase.num_atoms();
        }
        Err(PdfError::Range(format!(
            "atom index {index} exceeds the atoms of phase {} and later phases",
            start + 1
        )))
    }

    /// 两原子的距离及其不确定度
    pub fn bond_length_atoms(&self, i: usize, j: usize) -> Result<(f64, f64)> {
        let (pi, ai) = self.locate_atom(i)?;
        let (pj, aj) = self.locate_atom(j)?;
        if pi != pj {
            return Err(PdfError::CrossPhase { first: i, second: j });
        }
        self.phases[pi].bond_length(ai, aj)
    }

    /// 当前物相中按元素类型枚举键长
    pub fn bond_length_types(
        &self,
        first: &str,
        second: &str,
        rmin: f64,
        rmax: f64,
    ) -> Result<BondLengths> {
        self.current_phase()?
            .bond_lengths_by_type(first, second, rmin, rmax)
    }

    // ─────────────────────────────────────────────────────────────
    // 散射因子
    // ─────────────────────────────────────────────────────────────

    /// 散射值：有物相时读取当前物相（含覆盖），否则读取全局表
    pub fn get_scat(&self, kind: &str, element: &str) -> Result<f64> {
        let kind = Radiation::parse(kind)?;
        match self.current_phase() {
            Ok(phase) => phase.scattering(kind, element),
            Err(_) => scattering::lookup(kind, element),
        }
    }

    /// 设置当前物相的散射值覆盖
    pub fn set_scat(&mut self, kind: &str, element: &str, value: f64) -> Result<()> {
        self.current_phase()?;
        let kind = Radiation::parse(kind)?;
        if !value.is_finite() {
            return Err(PdfError::Range(format!("scattering value {value} is not finite")));
        }
        self.current_phase_mut()?.overrides.set(kind, element, value)
    }

    /// 移除当前物相中该元素两种辐射的覆盖值
    pub fn reset_scat(&mut self, element: &str) -> Result<()> {
        self.current_phase_mut()?.overrides.reset(element)
    }

    // ─────────────────────────────────────────────────────────────
    // 持久化
    // ─────────────────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String> {
        let state = SavedState {
            phases: self.phases.clone(),
            datasets: self.datasets.clone(),
            binder: self.binder.clone(),
            selection: self.selection,
        };
        Ok(serde_json::to_string_pretty(&state)?)
    }

    /// 整体替换状态；解析或校验失败时不修改
    pub fn from_json(&mut self, text: &str) -> Result<()> {
        let state: SavedState = serde_json::from_str(text)?;
        let selection_ok = state.selection.phase.map_or(true, |p| p < state.phases.len())
            && state.selection.dataset.map_or(true, |d| d < state.datasets.len());
        if !selection_ok {
            return Err(PdfError::Range("saved selection points past the saved data".to_string()));
        }
        state.binder.validate(&state.phases, &state.datasets)?;
        self.phases = state.phases;
        self.datasets = state.datasets;
        self.binder = state.binder;
        self.selection = state.selection;
        self.refinement = Refinement::default();
        Ok(())
    }

    pub fn save_state(&self, path: &Path) -> Result<()> {
        export::write_text(path, &self.to_json()?)
    }

    pub fn load_state(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| PdfError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        self.from_json(&text)
    }
}

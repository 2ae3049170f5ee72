//! # 约束与精修变量
//!
//! 精修变量 `@n` 通过线性约束表达式驱动结构量：
//!
//! ```text
//! EXPR := TERM (('+' | '-') TERM)*
//! TERM := NUMBER | [NUMBER '*'] '@' ID ['*' NUMBER | '/' NUMBER]
//! ```
//!
//! 表达式解析为 `ConstraintExpr` 树，由 `ParameterBinder` 求值并写回目标。
//! 每个目标同一时刻最多受一个表达式约束，重复约束会替换旧的约束。
//!
//! ## 依赖关系
//! - 被 `engine.rs` 使用
//! - 使用 `fit/address.rs` 的 Target
//! - 使用 `regex` 解析表达式

use crate::error::{PdfError, Result};
use crate::fit::address::Target;
use crate::models::{Dataset, Phase};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

const NUMBER: &str = r"(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?";

static VAR_TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^([+-])?(?:({NUMBER})\*)?@(\d+)(?:([*/])({NUMBER}))?"
    ))
    .expect("valid term regex")
});

static CONST_TERM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^([+-])?({NUMBER})")).expect("valid constant regex")
});

/// 约束表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintExpr {
    Constant(f64),
    /// multiplier · @var + offset
    Linear { var: u32, multiplier: f64, offset: f64 },
    Sum(Vec<ConstraintExpr>),
}

impl ConstraintExpr {
    pub fn parse(text: &str) -> Result<Self> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(PdfError::InvalidExpression("empty constraint".to_string()));
        }
        let invalid = |at: usize| {
            PdfError::InvalidExpression(format!(
                "cannot parse '{}' at '{}'",
                text.trim(),
                &compact[at..]
            ))
        };

        let mut terms: Vec<(Option<u32>, f64)> = Vec::new();
        let mut pos = 0;
        while pos < compact.len() {
            let rest = &compact[pos..];
            let signed = rest.starts_with('+') || rest.starts_with('-');
            if pos > 0 && !signed {
                return Err(invalid(pos));
            }
            if let Some(caps) = VAR_TERM_RE.captures(rest) {
                let sign = if caps.get(1).is_some_and(|m| m.as_str() == "-") { -1.0 } else { 1.0 };
                let mut coefficient = match caps.get(2) {
                    Some(m) => parse_number(m.as_str())?,
                    None => 1.0,
                };
                let var: u32 = caps[3]
                    .parse()
                    .map_err(|_| PdfError::InvalidExpression(format!("bad variable in '{text}'")))?;
                if let (Some(op), Some(value)) = (caps.get(4), caps.get(5)) {
                    let value = parse_number(value.as_str())?;
                    if op.as_str() == "*" {
                        coefficient *= value;
                    } else {
                        if value == 0.0 {
                            return Err(PdfError::InvalidExpression(format!(
                                "division by zero in '{}'",
                                text.trim()
                            )));
                        }
                        coefficient /= value;
                    }
                }
                terms.push((Some(var), sign * coefficient));
                pos += caps[0].len();
            } else if let Some(caps) = CONST_TERM_RE.captures(rest) {
                let sign = if caps.get(1).is_some_and(|m| m.as_str() == "-") { -1.0 } else { 1.0 };
                terms.push((None, sign * parse_number(&caps[2])?));
                pos += caps[0].len();
            } else {
                return Err(invalid(pos));
            }
        }
        Ok(Self::from_terms(terms))
    }

    /// 合并常数项；只有一个变量项时化为 Linear
    fn from_terms(terms: Vec<(Option<u32>, f64)>) -> Self {
        let offset: f64 = terms.iter().filter(|t| t.0.is_none()).map(|t| t.1).sum();
        let vars: Vec<(u32, f64)> = terms.iter().filter_map(|t| t.0.map(|v| (v, t.1))).collect();
        match vars.as_slice() {
            [] => ConstraintExpr::Constant(offset),
            [(var, multiplier)] => ConstraintExpr::Linear {
                var: *var,
                multiplier: *multiplier,
                offset,
            },
            _ => {
                let mut parts: Vec<ConstraintExpr> = vars
                    .iter()
                    .map(|&(var, multiplier)| ConstraintExpr::Linear {
                        var,
                        multiplier,
                        offset: 0.0,
                    })
                    .collect();
                if offset != 0.0 {
                    parts.push(ConstraintExpr::Constant(offset));
                }
                ConstraintExpr::Sum(parts)
            }
        }
    }

    /// 表达式引用的变量（去重，升序）
    pub fn variables(&self) -> Vec<u32> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_variables(&self, out: &mut Vec<u32>) {
        match self {
            ConstraintExpr::Constant(_) => {}
            ConstraintExpr::Linear { var, .. } => out.push(*var),
            ConstraintExpr::Sum(parts) => parts.iter().for_each(|p| p.collect_variables(out)),
        }
    }

    /// 以给定取值函数求值
    pub fn eval_with<F: Fn(u32) -> Option<f64>>(&self, value_of: &F) -> Result<f64> {
        match self {
            ConstraintExpr::Constant(c) => Ok(*c),
            ConstraintExpr::Linear {
                var,
                multiplier,
                offset,
            } => value_of(*var)
                .map(|v| multiplier * v + offset)
                .ok_or_else(|| PdfError::Unassigned(format!("refinement variable @{var} is not defined"))),
            ConstraintExpr::Sum(parts) => parts.iter().map(|p| p.eval_with(value_of)).sum(),
        }
    }

    /// ∂expr/∂@var
    pub fn derivative(&self, var: u32) -> f64 {
        match self {
            ConstraintExpr::Constant(_) => 0.0,
            ConstraintExpr::Linear {
                var: v, multiplier, ..
            } => {
                if *v == var {
                    *multiplier
                } else {
                    0.0
                }
            }
            ConstraintExpr::Sum(parts) => parts.iter().map(|p| p.derivative(var)).sum(),
        }
    }
}

fn parse_number(text: &str) -> Result<f64> {
    text.parse()
        .map_err(|_| PdfError::InvalidExpression(format!("bad number '{text}'")))
}

fn format_term(f: &mut fmt::Formatter<'_>, first: bool, expr: &ConstraintExpr) -> fmt::Result {
    match expr {
        ConstraintExpr::Constant(c) => {
            if first {
                write!(f, "{c}")
            } else if *c < 0.0 {
                write!(f, " - {}", -c)
            } else {
                write!(f, " + {c}")
            }
        }
        ConstraintExpr::Linear {
            var,
            multiplier,
            offset,
        } => {
            let sign = if *multiplier < 0.0 { "-" } else { "+" };
            let m = multiplier.abs();
            match (first, *multiplier < 0.0) {
                (true, false) => {}
                (true, true) => write!(f, "-")?,
                (false, _) => write!(f, " {sign} ")?,
            }
            if m == 1.0 {
                write!(f, "@{var}")?;
            } else {
                write!(f, "{m}*@{var}")?;
            }
            if *offset != 0.0 {
                format_term(f, false, &ConstraintExpr::Constant(*offset))?;
            }
            Ok(())
        }
        ConstraintExpr::Sum(parts) => {
            for (k, part) in parts.iter().enumerate() {
                format_term(f, first && k == 0, part)?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for ConstraintExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_term(f, true, self)
    }
}

/// 精修变量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementVariable {
    pub id: u32,
    pub value: f64,
    /// 最近一次精修得到的标准不确定度
    pub sigma: f64,
    pub fixed: bool,
}

/// 一条约束：目标 = 表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub target: Target,
    pub expr: ConstraintExpr,
}

/// 精修变量表与约束表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinder {
    variables: BTreeMap<u32, RefinementVariable>,
    constraints: Vec<Constraint>,
}

impl ParameterBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.variables.clear();
        self.constraints.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.constraints.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = &RefinementVariable> {
        self.variables.values()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn variable(&self, id: u32) -> Result<&RefinementVariable> {
        self.variables.get(&id).ok_or_else(|| missing_variable(id))
    }

    /// 约束目标；`current` 是目标当前值
    ///
    /// 新建的变量取使目标保持当前值的初值（只有一个新变量且系数非零时），
    /// 否则取 0。
    pub fn constrain(&mut self, target: Target, expr: ConstraintExpr, current: f64) {
        let new_vars: Vec<u32> = expr
            .variables()
            .into_iter()
            .filter(|id| !self.variables.contains_key(id))
            .collect();
        for &id in &new_vars {
            self.variables.insert(
                id,
                RefinementVariable {
                    id,
                    value: 0.0,
                    sigma: 0.0,
                    fixed: false,
                },
            );
        }
        if let [id] = new_vars.as_slice() {
            let coefficient = expr.derivative(*id);
            let base = expr.eval_with(&|v| self.variables.get(&v).map(|x| x.value));
            if let (Ok(base), true) = (base, coefficient != 0.0) {
                if let Some(var) = self.variables.get_mut(id) {
                    var.value = (current - base) / coefficient;
                }
            }
        }
        match self.constraints.iter_mut().find(|c| c.target == target) {
            Some(existing) => existing.expr = expr,
            None => self.constraints.push(Constraint { target, expr }),
        }
    }

    pub fn set_value(&mut self, id: u32, value: f64) -> Result<()> {
        let var = self.variables.get_mut(&id).ok_or_else(|| missing_variable(id))?;
        var.value = value;
        Ok(())
    }

    /// 固定 / 释放变量；None 表示全部
    pub fn set_fixed(&mut self, id: Option<u32>, fixed: bool) -> Result<()> {
        match id {
            Some(id) => {
                self.variables
                    .get_mut(&id)
                    .ok_or_else(|| missing_variable(id))?
                    .fixed = fixed;
            }
            None => self.variables.values_mut().for_each(|v| v.fixed = fixed),
        }
        Ok(())
    }

    /// 参与优化的变量：未固定且至少驱动一个目标，升序
    pub fn free_ids(&self) -> Vec<u32> {
        let used: Vec<u32> = self
            .constraints
            .iter()
            .flat_map(|c| c.expr.variables())
            .collect();
        self.variables
            .values()
            .filter(|v| !v.fixed && used.contains(&v.id))
            .map(|v| v.id)
            .collect()
    }

    pub fn values(&self, ids: &[u32]) -> Result<Vec<f64>> {
        ids.iter().map(|&id| self.variable(id).map(|v| v.value)).collect()
    }

    pub fn set_values(&mut self, ids: &[u32], values: &[f64]) -> Result<()> {
        if ids.len() != values.len() {
            return Err(PdfError::Range(format!(
                "{} values given for {} variables",
                values.len(),
                ids.len()
            )));
        }
        for &id in ids {
            self.variable(id)?;
        }
        for (&id, &value) in ids.iter().zip(values) {
            self.set_value(id, value)?;
        }
        Ok(())
    }

    /// 检查所有约束目标都存在
    pub fn validate(&self, phases: &[Phase], datasets: &[Dataset]) -> Result<()> {
        for c in &self.constraints {
            c.target.validate(phases, datasets)?;
        }
        Ok(())
    }

    /// 求值所有约束并写回目标（先全部求值，再统一写入）
    pub fn apply(&self, phases: &mut [Phase], datasets: &mut [Dataset]) -> Result<()> {
        self.validate(phases, datasets)?;
        let values = self
            .constraints
            .iter()
            .map(|c| c.expr.eval_with(&|id| self.variables.get(&id).map(|v| v.value)))
            .collect::<Result<Vec<f64>>>()?;
        for (c, value) in self.constraints.iter().zip(values) {
            c.target.write(phases, datasets, value)?;
        }
        Ok(())
    }

    /// 记录变量不确定度，并线性传播到约束目标
    pub fn propagate_sigmas(&mut self, ids: &[u32], sigmas: &[f64], phases: &mut [Phase]) {
        for var in self.variables.values_mut() {
            var.sigma = 0.0;
        }
        for (&id, &sigma) in ids.iter().zip(sigmas) {
            if let Some(var) = self.variables.get_mut(&id) {
                var.sigma = sigma;
            }
        }
        for c in &self.constraints {
            let variance: f64 = c
                .expr
                .variables()
                .iter()
                .map(|&id| {
                    let sigma = self.variables.get(&id).map_or(0.0, |v| v.sigma);
                    (c.expr.derivative(id) * sigma).powi(2)
                })
                .sum();
            c.target.write_sigma(phases, variance.sqrt());
        }
    }
}

fn missing_variable(id: u32) -> PdfError {
    PdfError::Range(format!("refinement variable @{id} does not exist"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::address::{DatasetField, PhaseField};
    use crate::fixtures;
    use crate::pdf::scattering::Radiation;

    fn lat(n: usize) -> Target {
        Target::Phase {
            phase: 0,
            field: PhaseField::Lat(n),
        }
    }

    #[test]
    fn test_parse_expressions() {
        assert_eq!(
            ConstraintExpr::parse("@1").unwrap(),
            ConstraintExpr::Linear {
                var: 1,
                multiplier: 1.0,
                offset: 0.0
            }
        );
        assert_eq!(
            ConstraintExpr::parse(" 2 * @3 + 0.5 ").unwrap(),
            ConstraintExpr::Linear {
                var: 3,
                multiplier: 2.0,
                offset: 0.5
            }
        );
        assert_eq!(
            ConstraintExpr::parse("1 - @2/4").unwrap(),
            ConstraintExpr::Linear {
                var: 2,
                multiplier: -0.25,
                offset: 1.0
            }
        );
        assert_eq!(ConstraintExpr::parse("1.5e-3").unwrap(), ConstraintExpr::Constant(1.5e-3));

        let sum = ConstraintExpr::parse("@1 + @2*0.5 - 1").unwrap();
        assert_eq!(sum.variables(), vec![1, 2]);
        assert_eq!(sum.derivative(2), 0.5);
        let value = sum.eval_with(&|id| Some(id as f64)).unwrap();
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "@", "@1 @2", "sin(@1)", "@1/0", "2*", "@1 + x(1)"] {
            assert!(
                matches!(ConstraintExpr::parse(bad), Err(PdfError::InvalidExpression(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display() {
        let expr = ConstraintExpr::parse("-2*@1 + 3").unwrap();
        assert_eq!(expr.to_string(), "-2*@1 + 3");
        assert_eq!(ConstraintExpr::parse("@4").unwrap().to_string(), "@4");
    }

    #[test]
    fn test_new_variable_keeps_target_value() {
        let mut binder = ParameterBinder::new();
        binder.constrain(lat(1), ConstraintExpr::parse("2*@1 + 1").unwrap(), 5.0);
        assert_eq!(binder.variable(1).unwrap().value, 2.0);
        // 已有变量不被改写
        binder.constrain(lat(2), ConstraintExpr::parse("@1").unwrap(), 9.0);
        assert_eq!(binder.variable(1).unwrap().value, 2.0);
    }

    #[test]
    fn test_reconstrain_replaces_link() {
        let mut binder = ParameterBinder::new();
        binder.constrain(lat(1), ConstraintExpr::parse("@1").unwrap(), 3.5);
        binder.constrain(lat(1), ConstraintExpr::parse("@2").unwrap(), 3.5);
        assert_eq!(binder.constraints().len(), 1);
        assert_eq!(binder.constraints()[0].expr.variables(), vec![2]);
        // @1 不再驱动任何目标
        assert_eq!(binder.free_ids(), vec![2]);
    }

    #[test]
    fn test_fix_and_free() {
        let mut binder = ParameterBinder::new();
        binder.constrain(lat(1), ConstraintExpr::parse("@1").unwrap(), 3.5);
        binder.constrain(lat(2), ConstraintExpr::parse("@2").unwrap(), 3.5);
        binder.set_fixed(Some(1), true).unwrap();
        assert_eq!(binder.free_ids(), vec![2]);
        binder.set_fixed(None, true).unwrap();
        assert!(binder.free_ids().is_empty());
        binder.set_fixed(None, false).unwrap();
        assert_eq!(binder.free_ids(), vec![1, 2]);
        assert!(matches!(binder.set_fixed(Some(9), true), Err(PdfError::Range(_))));
    }

    #[test]
    fn test_apply_and_propagate() {
        let mut phases = vec![Phase::new(fixtures::nickel_crystal()).unwrap()];
        let mut datasets =
            vec![Dataset::allocate(Radiation::Xray, 25.0, 0.0, 1.0, 5.0, 41).unwrap()];
        let mut binder = ParameterBinder::new();
        for n in 1..=3 {
            binder.constrain(lat(n), ConstraintExpr::parse("@1").unwrap(), fixtures::NI_LATTICE);
        }
        binder.constrain(
            Target::Dataset {
                dataset: 0,
                field: DatasetField::DScale,
            },
            ConstraintExpr::parse("@2").unwrap(),
            1.0,
        );
        binder.set_value(1, 3.6).unwrap();
        binder.set_value(2, 0.8).unwrap();
        binder.apply(&mut phases, &mut datasets).unwrap();
        assert_eq!(&phases[0].lattice().params[..3], &[3.6, 3.6, 3.6]);
        assert_eq!(datasets[0].dscale, 0.8);

        binder.propagate_sigmas(&[1], &[0.01], &mut phases);
        assert_eq!(phases[0].lattice().esd[0], 0.01);
        assert_eq!(binder.variable(2).unwrap().sigma, 0.0);
    }

    #[test]
    fn test_apply_fails_without_mutation_for_missing_target() {
        let mut phases = vec![Phase::new(fixtures::nickel_crystal()).unwrap()];
        let mut datasets: Vec<Dataset> = Vec::new();
        let mut binder = ParameterBinder::new();
        binder.constrain(lat(1), ConstraintExpr::parse("@1").unwrap(), fixtures::NI_LATTICE);
        binder.constrain(
            Target::Dataset {
                dataset: 0,
                field: DatasetField::QDamp,
            },
            ConstraintExpr::parse("@2").unwrap(),
            0.0,
        );
        binder.set_value(1, 4.0).unwrap();
        assert!(matches!(
            binder.apply(&mut phases, &mut datasets),
            Err(PdfError::Unassigned(_))
        ));
        assert_eq!(phases[0].lattice().params[0], fixtures::NI_LATTICE);
    }
}

//! # Levenberg-Marquardt 求解器
//!
//! 对实现 `LeastSquaresProblem` 的模型做阻尼最小二乘迭代：
//!
//! 1. 前向差分计算 Jacobian J
//! 2. 解 (JᵀJ + λ·diag(JᵀJ)) δ = −Jᵀr
//! 3. χ² 下降则接受并减小 λ，否则恢复参数、增大 λ 重试
//! 4. λ 超过上限仍无法下降时报告饱和
//!
//! 线性代数使用 `nalgebra`。
//!
//! ## 依赖关系
//! - 被 `engine.rs` 使用
//! - 使用 `fit/config.rs` 的 FitConfig

use crate::error::{PdfError, Result};
use crate::fit::config::FitConfig;

use nalgebra::{DMatrix, DVector};

/// 最小二乘问题
pub trait LeastSquaresProblem {
    /// 当前参数向量
    fn params(&self) -> Result<Vec<f64>>;

    /// 写入参数，并使后续的 `residuals` 基于新参数
    fn set_params(&mut self, params: &[f64]) -> Result<()>;

    /// 加权残差向量
    fn residuals(&mut self) -> Result<Vec<f64>>;
}

/// 单步结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    /// 步前 χ²
    pub previous_cost: f64,
    /// 步后 χ²（未改进时等于步前）
    pub cost: f64,
    pub lambda: f64,
    pub improved: bool,
    /// λ 达到上限仍未改进
    pub saturated: bool,
}

#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    lambda: f64,
    lambda_factor: f64,
    max_lambda: f64,
    fd_step: f64,
}

fn chi_squared(r: &[f64]) -> f64 {
    r.iter().map(|x| x * x).sum()
}

impl LevenbergMarquardt {
    pub fn new(config: &FitConfig) -> Self {
        Self {
            lambda: config.initial_lambda,
            lambda_factor: config.lambda_factor,
            max_lambda: config.max_lambda,
            fd_step: config.fd_step,
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// 前向差分 Jacobian，返回后问题恢复到 p0
    pub fn jacobian<P: LeastSquaresProblem>(
        &self,
        problem: &mut P,
        p0: &[f64],
        r0: &[f64],
    ) -> Result<DMatrix<f64>> {
        let mut jac = DMatrix::<f64>::zeros(r0.len(), p0.len());
        let mut probe = p0.to_vec();
        for k in 0..p0.len() {
            let h = self.fd_step * p0[k].abs().max(1.0);
            probe[k] = p0[k] + h;
            problem.set_params(&probe)?;
            let r = problem.residuals()?;
            if r.len() != r0.len() {
                return Err(PdfError::Numerical(format!(
                    "residual length changed from {} to {}",
                    r0.len(),
                    r.len()
                )));
            }
            for (i, (ri, r0i)) in r.iter().zip(r0).enumerate() {
                jac[(i, k)] = (ri - r0i) / h;
            }
            probe[k] = p0[k];
        }
        problem.set_params(p0)?;
        Ok(jac)
    }

    /// 一次阻尼迭代
    pub fn step<P: LeastSquaresProblem>(&mut self, problem: &mut P) -> Result<StepResult> {
        let p0 = problem.params()?;
        let r0 = problem.residuals()?;
        let cost0 = chi_squared(&r0);
        if !cost0.is_finite() {
            return Err(PdfError::Numerical("residuals are not finite".to_string()));
        }
        if r0.is_empty() || p0.is_empty() {
            return Err(PdfError::NothingToRefine(
                "no residuals or no free variables".to_string(),
            ));
        }

        let jac = self.jacobian(problem, &p0, &r0)?;
        if jac.iter().any(|v| !v.is_finite()) {
            return Err(PdfError::Numerical("Jacobian is not finite".to_string()));
        }
        let jtj = jac.tr_mul(&jac);
        let gradient = jac.tr_mul(&DVector::from_column_slice(&r0));

        loop {
            let mut a = jtj.clone();
            for k in 0..a.nrows() {
                let d = jtj[(k, k)];
                a[(k, k)] = d + self.lambda * if d > 0.0 { d } else { 1.0 };
            }
            if let Some(delta) = a.lu().solve(&(-&gradient)) {
                let trial: Vec<f64> = p0.iter().zip(delta.iter()).map(|(p, d)| p + d).collect();
                problem.set_params(&trial)?;
                let cost = chi_squared(&problem.residuals()?);
                if cost.is_finite() && cost < cost0 {
                    self.lambda = (self.lambda / self.lambda_factor).max(f64::MIN_POSITIVE);
                    return Ok(StepResult {
                        previous_cost: cost0,
                        cost,
                        lambda: self.lambda,
                        improved: true,
                        saturated: false,
                    });
                }
            }
            self.lambda *= self.lambda_factor;
            if self.lambda > self.max_lambda {
                problem.set_params(&p0)?;
                problem.residuals()?;
                return Ok(StepResult {
                    previous_cost: cost0,
                    cost: cost0,
                    lambda: self.lambda,
                    improved: false,
                    saturated: true,
                });
            }
        }
    }

    /// 参数标准误差：sqrt(diag((JᵀJ)⁻¹) · χ²/(N−P))
    pub fn standard_errors<P: LeastSquaresProblem>(&self, problem: &mut P) -> Result<Vec<f64>> {
        let p0 = problem.params()?;
        let r0 = problem.residuals()?;
        let jac = self.jacobian(problem, &p0, &r0)?;
        problem.residuals()?;
        let covariance = jac
            .tr_mul(&jac)
            .try_inverse()
            .ok_or_else(|| PdfError::Numerical("normal matrix is singular".to_string()))?;
        let dof = r0.len().saturating_sub(p0.len()).max(1) as f64;
        let scale = chi_squared(&r0) / dof;
        Ok((0..p0.len())
            .map(|k| (covariance[(k, k)].max(0.0) * scale).sqrt())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = a·exp(−b·x) 的拟合
    struct Decay {
        x: Vec<f64>,
        y: Vec<f64>,
        p: Vec<f64>,
    }

    impl LeastSquaresProblem for Decay {
        fn params(&self) -> Result<Vec<f64>> {
            Ok(self.p.clone())
        }

        fn set_params(&mut self, params: &[f64]) -> Result<()> {
            self.p = params.to_vec();
            Ok(())
        }

        fn residuals(&mut self) -> Result<Vec<f64>> {
            Ok(self
                .x
                .iter()
                .zip(&self.y)
                .map(|(x, y)| y - self.p[0] * (-self.p[1] * x).exp())
                .collect())
        }
    }

    fn decay() -> Decay {
        let x: Vec<f64> = (0..30).map(|i| i as f64 * 0.2).collect();
        let y = x.iter().map(|x| 2.5 * (-1.3 * x).exp()).collect();
        Decay {
            x,
            y,
            p: vec![1.0, 0.5],
        }
    }

    #[test]
    fn test_converges_on_exact_model() {
        let mut problem = decay();
        let mut lm = LevenbergMarquardt::new(&FitConfig::default());
        let mut previous = f64::INFINITY;
        for _ in 0..50 {
            let step = lm.step(&mut problem).unwrap();
            assert!(step.cost <= step.previous_cost);
            assert!(step.cost <= previous);
            previous = step.cost;
            if step.saturated || step.cost < 1e-20 {
                break;
            }
        }
        assert!((problem.p[0] - 2.5).abs() < 1e-5);
        assert!((problem.p[1] - 1.3).abs() < 1e-5);
    }

    #[test]
    fn test_standard_errors_scale_with_noise() {
        let mut problem = decay();
        for (i, y) in problem.y.iter_mut().enumerate() {
            *y += if i % 2 == 0 { 0.01 } else { -0.01 };
        }
        let mut lm = LevenbergMarquardt::new(&FitConfig::default());
        for _ in 0..50 {
            if lm.step(&mut problem).unwrap().saturated {
                break;
            }
        }
        let sigmas = lm.standard_errors(&mut problem).unwrap();
        assert_eq!(sigmas.len(), 2);
        assert!(sigmas.iter().all(|s| *s > 0.0 && *s < 0.1));
    }

    #[test]
    fn test_empty_problem_is_rejected() {
        let mut problem = decay();
        problem.x.clear();
        problem.y.clear();
        let mut lm = LevenbergMarquardt::new(&FitConfig::default());
        assert!(matches!(lm.step(&mut problem), Err(PdfError::NothingToRefine(_))));
    }
}

//! # 精修配置
//!
//! Levenberg-Marquardt 参数与 PDF 计算选项。可从 TOML 文件读取，
//! 缺省的键取默认值。
//!
//! ```toml
//! max_iterations = 50
//! tolerance = 1e-7
//! phase_weighting = "explicit"
//! verbosity = "verbose"
//! ```
//!
//! ## 依赖关系
//! - 被 `engine.rs`、`fit/lm.rs` 和 `commands/fit.rs` 使用
//! - 使用 `serde`、`toml` crate

use crate::error::{PdfError, Result};
use crate::pdf::calculator::{PdfCalculator, PhaseWeighting};
use crate::utils::output::Verbosity;

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitConfig {
    /// 迭代上限，达到后以 MaxIterExceeded 结束
    pub max_iterations: usize,
    /// Rw 相对下降量小于此值时认为收敛
    pub tolerance: f64,
    pub initial_lambda: f64,
    pub lambda_factor: f64,
    /// 阻尼超过此值仍无法下降时认为收敛
    pub max_lambda: f64,
    /// Jacobian 有限差分的相对步长
    pub fd_step: f64,
    pub peak_cutoff_sigma: f64,
    pub ripple_periods: f64,
    pub phase_weighting: PhaseWeighting,
    pub verbosity: Verbosity,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
            max_lambda: 1e10,
            fd_step: 1e-6,
            peak_cutoff_sigma: 5.0,
            ripple_periods: 12.0,
            phase_weighting: PhaseWeighting::Composition,
            verbosity: Verbosity::Normal,
        }
    }
}

impl FitConfig {
    /// 从 TOML 文件读取
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PdfError::FileReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            PdfError::ConfigError { reason, .. } => PdfError::ConfigError {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: FitConfig = toml::from_str(text).map_err(|e| PdfError::ConfigError {
            path: "<string>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PdfError::ConfigError {
            path: "<config>".to_string(),
            reason,
        };
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations must be at least 1".to_string()));
        }
        if !(self.tolerance > 0.0) {
            return Err(invalid(format!("tolerance {} must be positive", self.tolerance)));
        }
        if !(self.initial_lambda > 0.0) || !(self.max_lambda > self.initial_lambda) {
            return Err(invalid(format!(
                "need 0 < initial_lambda ({}) < max_lambda ({})",
                self.initial_lambda, self.max_lambda
            )));
        }
        if !(self.lambda_factor > 1.0) {
            return Err(invalid(format!(
                "lambda_factor {} must be greater than 1",
                self.lambda_factor
            )));
        }
        if !(self.fd_step > 0.0 && self.fd_step < 0.1) {
            return Err(invalid(format!("fd_step {} outside (0, 0.1)", self.fd_step)));
        }
        if !(self.peak_cutoff_sigma >= 1.0) || !(self.ripple_periods >= 0.0) {
            return Err(invalid(
                "peak_cutoff_sigma must be >= 1 and ripple_periods >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// 按配置构造 PDF 计算器
    pub fn calculator(&self) -> PdfCalculator {
        PdfCalculator::new(self.peak_cutoff_sigma, self.ripple_periods, self.phase_weighting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FitConfig::from_toml_str(
            "max_iterations = 20\nphase_weighting = \"explicit\"\nverbosity = \"quiet\"\n",
        )
        .unwrap();
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.phase_weighting, PhaseWeighting::Explicit);
        assert_eq!(config.verbosity, Verbosity::Quiet);
        assert_eq!(config.tolerance, FitConfig::default().tolerance);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            FitConfig::from_toml_str("max_iter = 3\n"),
            Err(PdfError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(FitConfig::from_toml_str("lambda_factor = 0.5\n").is_err());
        assert!(FitConfig::from_toml_str("max_iterations = 0\n").is_err());
    }

    #[test]
    fn test_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.toml");
        std::fs::write(&path, "tolerance = 1e-8\n").unwrap();
        let config = FitConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.tolerance, 1e-8);
        assert!(FitConfig::from_toml_file(&dir.path().join("missing.toml")).is_err());
    }
}

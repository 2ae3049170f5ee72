//! # 实验数据集模型
//!
//! 一条实验 PDF 曲线：辐射类型、仪器分辨率参数、均匀 r 网格，
//! 以及观测 / 计算 / 差值 / 权重四个等长数组。
//!
//! 两条创建路径（`allocate` 与 `from_observed`）在相同网格下得到形状一致的数据集；
//! 计算结果只取决于网格与参数，与创建顺序无关。
//!
//! ## 依赖关系
//! - 被 `engine.rs`、`pdf/calculator.rs` 和 `parsers/data.rs` 使用
//! - 使用 `pdf/scattering.rs` 的 Radiation

use crate::error::{PdfError, Result};
use crate::pdf::scattering::Radiation;

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// 均匀 r 网格
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RGrid {
    pub rmin: f64,
    pub dr: f64,
    pub npoints: usize,
}

impl RGrid {
    /// r_i = rmin + i·dr，dr = (rmax − rmin)/(npoints − 1)
    pub fn new(rmin: f64, rmax: f64, npoints: usize) -> Result<Self> {
        if npoints < 1 {
            return Err(PdfError::Range("npoints must be at least 1".to_string()));
        }
        if !(rmax > rmin) || !rmin.is_finite() || !rmax.is_finite() {
            return Err(PdfError::Range(format!(
                "rmax ({rmax}) must be greater than rmin ({rmin})"
            )));
        }
        if rmin < 0.0 {
            return Err(PdfError::Range(format!("rmin ({rmin}) must be non-negative")));
        }
        let dr = if npoints > 1 {
            (rmax - rmin) / (npoints - 1) as f64
        } else {
            rmax - rmin
        };
        Ok(RGrid { rmin, dr, npoints })
    }

    pub fn r(&self, i: usize) -> f64 {
        self.rmin + i as f64 * self.dr
    }

    pub fn rmax(&self) -> f64 {
        self.r(self.npoints.saturating_sub(1))
    }

    pub fn values(&self) -> Vec<f64> {
        (0..self.npoints).map(|i| self.r(i)).collect()
    }
}

/// 原始观测曲线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedCurve {
    pub r: Vec<f64>,
    pub g: Vec<f64>,
    /// G 的不确定度，可选
    pub dg: Option<Vec<f64>>,
}

impl ObservedCurve {
    /// 检查长度、点数与网格均匀性
    pub fn validate(&self) -> Result<RGrid> {
        let n = self.r.len();
        if n < 2 {
            return Err(PdfError::Range(format!(
                "observed curve needs at least 2 points, got {n}"
            )));
        }
        if self.g.len() != n || self.dg.as_ref().is_some_and(|dg| dg.len() != n) {
            return Err(PdfError::Range("observed arrays differ in length".to_string()));
        }
        if self.r.iter().chain(self.g.iter()).any(|v| !v.is_finite()) {
            return Err(PdfError::Range("observed curve contains non-finite values".to_string()));
        }
        let rmin = self.r[0];
        let rmax = self.r[n - 1];
        let grid = RGrid::new(rmin, rmax, n)?;
        for (i, w) in self.r.windows(2).enumerate() {
            if ((w[1] - w[0]) - grid.dr).abs() > 1e-3 * grid.dr {
                return Err(PdfError::Range(format!(
                    "r values are not on a uniform increasing grid near point {}",
                    i + 1
                )));
            }
        }
        Ok(grid)
    }

    fn weights(&self) -> Vec<f64> {
        match &self.dg {
            Some(dg) if dg.iter().all(|&e| e > 0.0) => dg.iter().map(|e| 1.0 / (e * e)).collect(),
            _ => vec![1.0; self.r.len()],
        }
    }

    /// 线性插值，r 超出观测范围时返回 None
    fn interpolate(&self, r: f64, weights: &[f64]) -> Option<(f64, f64)> {
        let n = self.r.len();
        let first = self.r[0];
        let last = self.r[n - 1];
        let eps = 1e-9 * (last - first).abs().max(1.0);
        if r < first - eps || r > last + eps {
            return None;
        }
        let k = self.r.partition_point(|&x| x <= r).clamp(1, n - 1);
        let (r0, r1) = (self.r[k - 1], self.r[k]);
        let t = ((r - r0) / (r1 - r0)).clamp(0.0, 1.0);
        let g = self.g[k - 1] + t * (self.g[k] - self.g[k - 1]);
        let w = weights[k - 1] + t * (weights[k] - weights[k - 1]);
        Some((g, w))
    }
}

/// 实验数据集
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub radiation: Radiation,
    /// 截断 Qmax (Å⁻¹)，0 表示不计算终止波纹
    pub qmax: f64,
    /// 分辨率阻尼
    pub qdamp: f64,
    /// 分辨率展宽
    pub qbroad: f64,
    /// 数据集比例因子
    pub dscale: f64,
    pub grid: RGrid,
    pub observed: Option<ObservedCurve>,
    /// 网格上的观测值（无观测处为 0）
    pub gobs: Vec<f64>,
    /// 每点权重（无观测处为 0）
    pub weights: Vec<f64>,
    pub gcalc: Vec<f64>,
    pub gdiff: Vec<f64>,
    /// 拟合区间上的累积 Rw，在精修前为空
    pub crw: Vec<f64>,
    pub fit_rmin: f64,
    pub fit_rmax: f64,
    pub selected: bool,
}

impl Dataset {
    fn with_grid(name: String, radiation: Radiation, qmax: f64, qdamp: f64, grid: RGrid) -> Result<Self> {
        if !(qmax >= 0.0) || !(qdamp >= 0.0) {
            return Err(PdfError::Range(format!(
                "qmax ({qmax}) and qdamp ({qdamp}) must be non-negative"
            )));
        }
        let n = grid.npoints;
        Ok(Dataset {
            name,
            radiation,
            qmax,
            qdamp,
            qbroad: 0.0,
            dscale: 1.0,
            grid,
            observed: None,
            gobs: vec![0.0; n],
            weights: vec![0.0; n],
            gcalc: vec![0.0; n],
            gdiff: vec![0.0; n],
            crw: Vec::new(),
            fit_rmin: grid.rmin,
            fit_rmax: grid.rmax(),
            selected: true,
        })
    }

    /// 分配空数据集：均匀网格，观测与计算数组全为零
    pub fn allocate(
        radiation: Radiation,
        qmax: f64,
        qdamp: f64,
        rmin: f64,
        rmax: f64,
        npoints: usize,
    ) -> Result<Self> {
        let grid = RGrid::new(rmin, rmax, npoints)?;
        Self::with_grid("allocated".to_string(), radiation, qmax, qdamp, grid)
    }

    /// 由观测曲线创建，网格由数据推断
    pub fn from_observed(
        name: impl Into<String>,
        radiation: Radiation,
        qmax: f64,
        qdamp: f64,
        curve: ObservedCurve,
    ) -> Result<Self> {
        let grid = curve.validate()?;
        let mut dataset = Self::with_grid(name.into(), radiation, qmax, qdamp, grid)?;
        dataset.gobs = curve.g.clone();
        dataset.weights = curve.weights();
        dataset.observed = Some(curve);
        Ok(dataset)
    }

    pub fn npoints(&self) -> usize {
        self.grid.npoints
    }

    pub fn r_values(&self) -> Vec<f64> {
        self.grid.values()
    }

    pub fn has_observed(&self, i: usize) -> bool {
        self.weights[i] > 0.0
    }

    pub fn in_fit_range(&self, i: usize) -> bool {
        let r = self.grid.r(i);
        let eps = 1e-9 * self.grid.dr.abs().max(1e-12);
        r >= self.fit_rmin - eps && r <= self.fit_rmax + eps
    }

    /// 重新划分当前数据集的 r 网格，清空计算结果
    pub fn set_range(&mut self, rmin: f64, rmax: f64, npoints: usize) -> Result<()> {
        let grid = RGrid::new(rmin, rmax, npoints)?;
        let mut gobs = vec![0.0; npoints];
        let mut weights = vec![0.0; npoints];
        if let Some(curve) = &self.observed {
            let raw_weights = curve.weights();
            for i in 0..npoints {
                if let Some((g, w)) = curve.interpolate(grid.r(i), &raw_weights) {
                    gobs[i] = g;
                    weights[i] = w;
                }
            }
        }
        self.grid = grid;
        self.gobs = gobs;
        self.weights = weights;
        self.fit_rmin = grid.rmin;
        self.fit_rmax = grid.rmax();
        self.clear_calculation();
        Ok(())
    }

    /// 设置拟合区间（网格不变）
    pub fn set_fit_range(&mut self, rmin: f64, rmax: f64) -> Result<()> {
        if !(rmax > rmin) {
            return Err(PdfError::Range(format!(
                "fit range rmax ({rmax}) must be greater than rmin ({rmin})"
            )));
        }
        if rmax < self.grid.rmin || rmin > self.grid.rmax() {
            return Err(PdfError::Range(format!(
                "fit range [{rmin}, {rmax}] does not overlap data grid [{}, {}]",
                self.grid.rmin,
                self.grid.rmax()
            )));
        }
        self.fit_rmin = rmin;
        self.fit_rmax = rmax;
        self.crw.clear();
        Ok(())
    }

    /// 写入计算曲线并更新差值（无观测处差值为 0）
    pub fn store_calculation(&mut self, gcalc: Vec<f64>) {
        debug_assert_eq!(gcalc.len(), self.npoints());
        self.gdiff = (0..gcalc.len())
            .map(|i| {
                if self.has_observed(i) {
                    self.gobs[i] - gcalc[i]
                } else {
                    0.0
                }
            })
            .collect();
        self.gcalc = gcalc;
    }

    pub fn clear_calculation(&mut self) {
        let n = self.npoints();
        self.gcalc = vec![0.0; n];
        self.gdiff = vec![0.0; n];
        self.crw.clear();
    }

    /// 拟合区间内有观测的点：(下标, 权重)
    pub fn fit_points(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        (0..self.npoints())
            .filter(move |&i| self.has_observed(i) && self.in_fit_range(i))
            .map(move |i| (i, self.weights[i]))
    }

    /// 加权残差平方和与归一化分母 (Σw(O−C)², Σw O²)
    pub fn rw_terms(&self) -> (f64, f64) {
        self.fit_points().fold((0.0, 0.0), |(num, den), (i, w)| {
            let d = self.gobs[i] - self.gcalc[i];
            (num + w * d * d, den + w * self.gobs[i] * self.gobs[i])
        })
    }

    /// 拟合区间覆盖的网格下标
    pub fn fit_window(&self) -> Range<usize> {
        let n = self.npoints();
        match (0..n).position(|i| self.in_fit_range(i)) {
            Some(start) => {
                let end = (0..n).rposition(|i| self.in_fit_range(i)).unwrap_or(start);
                start..end + 1
            }
            None => 0..0,
        }
    }

    /// 以给定的总分母计算拟合区间上的累积 Rw
    pub fn cumulative_rw(&self, total_den: f64) -> Vec<f64> {
        let mut acc = 0.0;
        self.fit_window()
            .map(|i| {
                if self.has_observed(i) {
                    let d = self.gobs[i] - self.gcalc[i];
                    acc += self.weights[i] * d * d;
                }
                if total_den > 0.0 {
                    (acc / total_den).sqrt()
                } else {
                    0.0
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(n: usize, dr: f64) -> ObservedCurve {
        let r: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 * dr).collect();
        let g = r.iter().map(|x| (2.0 * x).sin()).collect();
        ObservedCurve { r, g, dg: None }
    }

    #[test]
    fn test_allocate_grid() {
        let ds = Dataset::allocate(Radiation::Xray, 25.0, 0.0, 0.01, 10.0, 1000).unwrap();
        assert_eq!(ds.npoints(), 1000);
        assert!((ds.grid.dr - 0.01).abs() < 1e-12);
        assert!((ds.grid.r(0) - 0.01).abs() < 1e-12);
        assert!((ds.grid.rmax() - 10.0).abs() < 1e-9);
        assert!(ds.gobs.iter().all(|&g| g == 0.0));
        assert_eq!(ds.gcalc.len(), ds.gdiff.len());
        assert!(ds.crw.is_empty());
    }

    #[test]
    fn test_allocate_rejects_bad_ranges() {
        assert!(matches!(
            Dataset::allocate(Radiation::Xray, 25.0, 0.0, 2.0, 1.0, 10),
            Err(PdfError::Range(_))
        ));
        assert!(matches!(
            Dataset::allocate(Radiation::Xray, 25.0, 0.0, 1.0, 2.0, 0),
            Err(PdfError::Range(_))
        ));
        let single = Dataset::allocate(Radiation::Neutron, 0.0, 0.0, 1.0, 2.0, 1).unwrap();
        assert_eq!(single.r_values(), vec![1.0]);
    }

    #[test]
    fn test_from_observed_matches_allocated_shape() {
        let c = curve(101, 0.1);
        let observed = Dataset::from_observed("d", Radiation::Xray, 25.0, 0.0, c).unwrap();
        let allocated = Dataset::allocate(Radiation::Xray, 25.0, 0.0, 1.0, 11.0, 101).unwrap();
        assert_eq!(observed.grid.npoints, allocated.grid.npoints);
        assert!((observed.grid.dr - allocated.grid.dr).abs() < 1e-12);
        assert!(observed.weights.iter().all(|&w| w == 1.0));
    }

    #[test]
    fn test_non_uniform_grid_is_rejected() {
        let mut c = curve(10, 0.1);
        c.r[5] += 0.05;
        assert!(Dataset::from_observed("d", Radiation::Xray, 0.0, 0.0, c).is_err());
    }

    #[test]
    fn test_uncertainty_weights() {
        let mut c = curve(5, 0.5);
        c.dg = Some(vec![0.5; 5]);
        let ds = Dataset::from_observed("d", Radiation::Xray, 0.0, 0.0, c).unwrap();
        assert!(ds.weights.iter().all(|&w| (w - 4.0).abs() < 1e-12));
    }

    #[test]
    fn test_set_range_resamples_and_clears() {
        let c = curve(101, 0.1);
        let mut ds = Dataset::from_observed("d", Radiation::Xray, 0.0, 0.0, c).unwrap();
        ds.store_calculation(vec![1.0; 101]);
        ds.crw = vec![0.1; 101];

        ds.set_range(0.5, 12.0, 116).unwrap();
        assert_eq!(ds.gobs.len(), 116);
        assert_eq!(ds.gcalc.len(), 116);
        assert!(ds.gcalc.iter().all(|&g| g == 0.0));
        assert!(ds.crw.is_empty());
        // 0.5 在观测范围之外
        assert!(!ds.has_observed(0));
        // r = 2.0 在原始网格上
        let i = 15;
        assert!((ds.grid.r(i) - 2.0).abs() < 1e-9);
        assert!((ds.gobs[i] - (4.0f64).sin()).abs() < 1e-6);
    }

    #[test]
    fn test_difference_is_zero_without_observed_data() {
        let mut ds = Dataset::allocate(Radiation::Xray, 0.0, 0.0, 1.0, 2.0, 3).unwrap();
        ds.store_calculation(vec![1.0, 2.0, 3.0]);
        assert_eq!(ds.gdiff, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cumulative_rw_is_monotonic() {
        let c = curve(50, 0.1);
        let mut ds = Dataset::from_observed("d", Radiation::Xray, 0.0, 0.0, c).unwrap();
        ds.store_calculation(vec![0.1; 50]);
        ds.set_fit_range(1.5, 4.0).unwrap();
        let (num, den) = ds.rw_terms();
        assert_eq!(ds.fit_window(), 5..31);
        let crw = ds.cumulative_rw(den);
        assert_eq!(crw.len(), 26);
        assert!(crw.windows(2).all(|w| w[1] >= w[0]));
        assert!((crw[25] - (num / den).sqrt()).abs() < 1e-12);
    }
}

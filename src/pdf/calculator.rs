//! # PDF 计算器
//!
//! 由物相结构计算原子对分布函数 G(r)。
//!
//! ## 算法概述
//! 1. 枚举选中原子的所有有序原子对（含晶格平移像），距离超过 rcut 的对被排除
//! 2. 由两原子位移张量在键方向的投影得到峰宽 σ，并施加相关运动修正
//!    σ'² = σ²(1 − δ₁/r − δ₂/r²) + Qbroad² r²，低于 srcut 的峰再乘以 sratio
//! 3. 高斯峰求和得到 R(r)，G(r) = R(r)/r − 4πρ₀r
//! 4. Qmax > 0 时与 sin(Qmax·x)/(πx) 做实空间卷积（终止波纹）
//! 5. 乘以分辨率包络 exp(−(Qdamp·r)²/2)
//!
//! 多物相按权重求和后乘以数据集比例因子。
//!
//! ## 并行
//! 网格点之间没有顺序依赖，按 r 点并行（rayon）；每个点内部按固定顺序求和，
//! 因此结果与线程调度无关、逐位可重复。
//!
//! ## 依赖关系
//! - 被 `engine.rs` 调用
//! - 使用 `models/` 的 Phase, Dataset
//! - 使用 `pdf/scattering.rs` 获取散射因子

use crate::error::{PdfError, Result};
use crate::models::phase::translations;
use crate::models::{Dataset, Phase};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// 多物相求和时的物相权重方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseWeighting {
    /// pscale × 散射能力占比 N⟨b⟩² / Σ N⟨b⟩²
    #[default]
    Composition,
    /// 仅 pscale
    Explicit,
}

/// 原子对贡献
#[derive(Debug, Clone, Copy)]
struct PairPeak {
    distance: f64,
    sigma: f64,
    weight: f64,
}

/// 单个物相在扩展网格上的中间结果
struct PhaseProfile {
    g: Vec<f64>,
    /// N⟨b⟩²，用于组成权重
    scattering_power: f64,
}

/// PDF 计算器
#[derive(Debug, Clone)]
pub struct PdfCalculator {
    /// 高斯峰在 ±N σ 内求值
    peak_cutoff_sigma: f64,
    /// 终止波纹卷积的网格延伸（以 2π/Qmax 为单位）
    ripple_periods: f64,
    weighting: PhaseWeighting,
}

impl Default for PdfCalculator {
    fn default() -> Self {
        Self::new(5.0, 12.0, PhaseWeighting::Composition)
    }
}

/// 终止波纹延伸的点数上限（数据网格点数的倍数）
const MAX_RIPPLE_EXTENSION: usize = 4;

/// 计算所用的网格：下标 k 对应 r = rmin + k·dr，k 可为负
struct CalcGrid {
    rmin: f64,
    dr: f64,
    k_lo: i64,
    k_hi: i64,
}

impl CalcGrid {
    fn r(&self, k: i64) -> f64 {
        self.rmin + k as f64 * self.dr
    }

    fn values(&self) -> Vec<f64> {
        (self.k_lo..=self.k_hi).map(|k| self.r(k)).collect()
    }
}

impl PdfCalculator {
    pub fn new(peak_cutoff_sigma: f64, ripple_periods: f64, weighting: PhaseWeighting) -> Self {
        Self {
            peak_cutoff_sigma,
            ripple_periods,
            weighting,
        }
    }

    /// 计算数据集网格上的 G(r)
    ///
    /// 没有计入求和的物相时返回全零数组。
    pub fn calculate(&self, phases: &[Phase], dataset: &Dataset) -> Result<Vec<f64>> {
        let n = dataset.npoints();
        let selected: Vec<&Phase> = phases.iter().filter(|p| p.in_pdf).collect();
        if selected.is_empty() {
            return Ok(vec![0.0; n]);
        }

        let grid = self.calc_grid(dataset);
        let r_ext = grid.values();

        let profiles = selected
            .iter()
            .map(|phase| self.phase_profile(phase, dataset, &r_ext))
            .collect::<Result<Vec<_>>>()?;

        let total_power: f64 = profiles.iter().map(|p| p.scattering_power).sum();
        let mut g_ext = vec![0.0; r_ext.len()];
        for (phase, profile) in selected.iter().zip(profiles.iter()) {
            let fraction = match self.weighting {
                PhaseWeighting::Explicit => 1.0,
                PhaseWeighting::Composition if total_power > 0.0 => {
                    profile.scattering_power / total_power
                }
                PhaseWeighting::Composition => 0.0,
            };
            let w = phase.pscale * fraction;
            for (acc, g) in g_ext.iter_mut().zip(profile.g.iter()) {
                *acc += w * g;
            }
        }

        // 扩展网格中 k = 0 对应数据集第一个点
        let offset = (-grid.k_lo) as usize;
        let mut g: Vec<f64> = if dataset.qmax > 0.0 {
            self.apply_ripple(&g_ext, &r_ext, grid.dr, offset, n, dataset.qmax)
        } else {
            g_ext[offset..offset + n].to_vec()
        };

        for (i, value) in g.iter_mut().enumerate() {
            let r = dataset.grid.r(i);
            let envelope = (-0.5 * (dataset.qdamp * r).powi(2)).exp();
            *value *= dataset.dscale * envelope;
        }
        Ok(g)
    }

    /// 终止波纹需要在数据网格两侧延伸；延伸点与数据网格对齐且 r > 0
    fn calc_grid(&self, dataset: &Dataset) -> CalcGrid {
        let grid = &dataset.grid;
        let dr = grid.dr;
        let last = grid.npoints as i64 - 1;
        if dataset.qmax <= 0.0 || dr <= 0.0 {
            return CalcGrid {
                rmin: grid.rmin,
                dr,
                k_lo: 0,
                k_hi: last,
            };
        }
        let ext = self.ripple_periods * 2.0 * PI / dataset.qmax;
        let max_steps = (MAX_RIPPLE_EXTENSION * grid.npoints.max(1)) as f64;
        let steps = (ext / dr).ceil().min(max_steps) as i64;
        let mut k_lo = -steps.min((grid.rmin / dr).floor() as i64);
        if grid.rmin + k_lo as f64 * dr <= 1e-12 * dr {
            k_lo += 1;
        }
        CalcGrid {
            rmin: grid.rmin,
            dr,
            k_lo: k_lo.min(0),
            k_hi: last + steps,
        }
    }

    /// 单个物相的 G(r)（未卷积、未阻尼）
    fn phase_profile(&self, phase: &Phase, dataset: &Dataset, r_ext: &[f64]) -> Result<PhaseProfile> {
        let lattice = phase.lattice();
        let atoms = phase.atoms();

        let b: Vec<f64> = atoms
            .iter()
            .map(|a| phase.scattering(dataset.radiation, &a.element))
            .collect::<Result<_>>()?;
        let n_atoms: f64 = atoms.iter().map(|a| a.occupancy).sum();
        let sum_ob: f64 = atoms.iter().zip(&b).map(|(a, b)| a.occupancy * b).sum();
        if n_atoms <= 0.0 {
            return Err(PdfError::Range(format!(
                "phase '{}' has zero total occupancy",
                phase.name()
            )));
        }
        let bavg = sum_ob / n_atoms;
        if bavg.abs() < f64::EPSILON {
            return Err(PdfError::Range(format!(
                "average scattering factor of phase '{}' is zero",
                phase.name()
            )));
        }
        let volume = lattice.volume();
        let rho0 = n_atoms / volume;
        let sum_sel: f64 = atoms
            .iter()
            .zip(&b)
            .filter(|(a, _)| a.selected)
            .map(|(a, b)| a.occupancy * b)
            .sum();
        let selection_factor = (sum_sel / sum_ob).powi(2);

        let r_lo = r_ext.first().copied().unwrap_or(0.0);
        let r_hi = r_ext.last().copied().unwrap_or(0.0);
        let peaks = self.pair_peaks(phase, dataset, &b, n_atoms * bavg * bavg, r_lo, r_hi)?;
        let sigma_max = peaks.iter().map(|p| p.sigma).fold(0.0, f64::max);
        let window = self.peak_cutoff_sigma * sigma_max;
        let norm = 1.0 / (2.0 * PI).sqrt();
        let cutoff = self.peak_cutoff_sigma;

        let g: Vec<f64> = r_ext
            .par_iter()
            .map(|&r| {
                if r <= 0.0 {
                    return 0.0;
                }
                let start = peaks.partition_point(|p| p.distance < r - window);
                let end = peaks.partition_point(|p| p.distance <= r + window);
                let mut rdf = 0.0;
                for p in &peaks[start..end] {
                    let x = (r - p.distance) / p.sigma;
                    if x.abs() <= cutoff {
                        rdf += p.weight * norm / p.sigma * (-0.5 * x * x).exp();
                    }
                }
                rdf / r - 4.0 * PI * rho0 * r * selection_factor
            })
            .collect();

        Ok(PhaseProfile {
            g,
            scattering_power: n_atoms * bavg * bavg,
        })
    }

    /// 枚举对 [r_lo, r_hi] 有贡献的所有原子对，按距离排序
    fn pair_peaks(
        &self,
        phase: &Phase,
        dataset: &Dataset,
        b: &[f64],
        norm: f64,
        r_lo: f64,
        r_hi: f64,
    ) -> Result<Vec<PairPeak>> {
        let lattice = phase.lattice();
        let atoms = phase.atoms();
        let u_cart: Vec<[[f64; 3]; 3]> = atoms.iter().map(|a| lattice.cartesian_u(&a.u)).collect();

        // σ 上界：两原子位移张量迹的和，加上 Qbroad 项
        let max_trace = u_cart
            .iter()
            .map(|u| u[0][0] + u[1][1] + u[2][2])
            .fold(0.0, f64::max);
        let sigma_bound = ((2.0 * max_trace).max(0.0) + (dataset.qbroad * r_hi).powi(2)).sqrt()
            * phase.sratio.abs().max(1.0)
            + 1e-3;
        let reach_hi = r_hi + self.peak_cutoff_sigma * sigma_bound;
        let reach_lo = (r_lo - self.peak_cutoff_sigma * sigma_bound).max(0.0);
        let reach_hi = if phase.rcut > 0.0 {
            reach_hi.min(phase.rcut)
        } else {
            reach_hi
        };

        let mut peaks = Vec::new();
        for (i, ai) in atoms.iter().enumerate() {
            if !ai.selected {
                continue;
            }
            for (j, aj) in atoms.iter().enumerate() {
                if !aj.selected {
                    continue;
                }
                let delta = [
                    aj.position[0] - ai.position[0],
                    aj.position[1] - ai.position[1],
                    aj.position[2] - ai.position[2],
                ];
                let weight = ai.occupancy * aj.occupancy * b[i] * b[j] / norm;
                for t in translations(lattice, &delta, reach_hi)? {
                    let shifted = [
                        delta[0] + t[0] as f64,
                        delta[1] + t[1] as f64,
                        delta[2] + t[2] as f64,
                    ];
                    let d = lattice.distance(&shifted);
                    if d < 1e-8 || d > reach_hi || d < reach_lo {
                        continue;
                    }
                    let sigma = self.peak_width(phase, dataset, &u_cart[i], &u_cart[j], &shifted, d);
                    peaks.push(PairPeak {
                        distance: d,
                        sigma,
                        weight,
                    });
                }
            }
        }
        peaks.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(peaks)
    }

    /// 键方向的峰宽，含相关运动修正、Qbroad 与 sratio
    fn peak_width(
        &self,
        phase: &Phase,
        dataset: &Dataset,
        ui: &[[f64; 3]; 3],
        uj: &[[f64; 3]; 3],
        frac_delta: &[f64; 3],
        d: f64,
    ) -> f64 {
        let cart = phase.lattice().frac_to_cart(frac_delta);
        let unit = [cart[0] / d, cart[1] / d, cart[2] / d];
        let mut msd = 0.0;
        for a in 0..3 {
            for c in 0..3 {
                msd += unit[a] * (ui[a][c] + uj[a][c]) * unit[c];
            }
        }
        let correlation = 1.0 - phase.delta1 / d - phase.delta2 / (d * d);
        let mut s2 = msd * correlation + (dataset.qbroad * d).powi(2);
        if phase.srcut > 0.0 && d < phase.srcut {
            s2 *= phase.sratio * phase.sratio;
        }
        s2.max(1e-12).sqrt()
    }

    /// G'(r) = dr · Σ_k G(r_k)[K(r − r_k) − K(r + r_k)]，K(x) = sin(Qmax x)/(πx)
    fn apply_ripple(
        &self,
        g_ext: &[f64],
        r_ext: &[f64],
        dr: f64,
        offset: usize,
        n: usize,
        qmax: f64,
    ) -> Vec<f64> {
        let kernel = |x: f64| -> f64 {
            if x.abs() < 1e-12 {
                qmax / PI
            } else {
                (qmax * x).sin() / (PI * x)
            }
        };
        (0..n)
            .into_par_iter()
            .map(|i| {
                let r = r_ext[offset + i];
                let mut acc = 0.0;
                for (&rk, &gk) in r_ext.iter().zip(g_ext.iter()) {
                    acc += gk * (kernel(r - rk) - kernel(r + rk));
                }
                acc * dr
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::pdf::scattering::Radiation;

    fn nickel() -> Phase {
        Phase::new(fixtures::nickel_crystal()).unwrap()
    }

    #[test]
    fn test_no_phase_gives_zero_curve() {
        let ds = Dataset::allocate(Radiation::Xray, 25.0, 0.0, 0.01, 10.0, 1000).unwrap();
        let g = PdfCalculator::default().calculate(&[], &ds).unwrap();
        assert_eq!(g, vec![0.0; 1000]);
    }

    #[test]
    fn test_first_peak_at_nearest_neighbour_distance() {
        let ds = Dataset::allocate(Radiation::Xray, 0.0, 0.0, 1.0, 4.0, 301).unwrap();
        let g = PdfCalculator::default().calculate(&[nickel()], &ds).unwrap();
        let (imax, _) = g
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        let r_peak = ds.grid.r(imax);
        assert!((r_peak - fixtures::NI_LATTICE / 2f64.sqrt()).abs() < 0.011);
    }

    #[test]
    fn test_peak_area_matches_coordination() {
        // 无波纹、无阻尼时，第一壳层 ∫(G + 4πρ₀r)·r dr = 12
        let ds = Dataset::allocate(Radiation::Neutron, 0.0, 0.0, 2.0, 3.0, 1001).unwrap();
        let phase = nickel();
        let g = PdfCalculator::default().calculate(&[phase.clone()], &ds).unwrap();
        let rho0 = phase.crystal.number_density();
        let area: f64 = (0..ds.npoints())
            .map(|i| {
                let r = ds.grid.r(i);
                (g[i] + 4.0 * PI * rho0 * r) * r * ds.grid.dr
            })
            .sum();
        assert!((area - 12.0).abs() < 0.05, "area = {area}");
    }

    #[test]
    fn test_low_r_baseline() {
        let ds = Dataset::allocate(Radiation::Xray, 0.0, 0.0, 0.5, 1.5, 11).unwrap();
        let phase = nickel();
        let g = PdfCalculator::default().calculate(&[phase.clone()], &ds).unwrap();
        let rho0 = phase.crystal.number_density();
        for i in 0..ds.npoints() {
            let r = ds.grid.r(i);
            assert!((g[i] + 4.0 * PI * rho0 * r).abs() < 1e-9);
        }
    }

    #[test]
    fn test_calculation_is_reproducible() {
        let ds = Dataset::allocate(Radiation::Xray, 25.0, 0.05, 0.01, 10.0, 1000).unwrap();
        let calc = PdfCalculator::default();
        let a = calc.calculate(&[nickel()], &ds).unwrap();
        let b = calc.calculate(&[nickel()], &ds).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rcut_excludes_distant_pairs() {
        let ds = Dataset::allocate(Radiation::Xray, 0.0, 0.0, 3.0, 4.0, 101).unwrap();
        let mut phase = nickel();
        phase.rcut = 3.0;
        let g = PdfCalculator::default().calculate(&[phase.clone()], &ds).unwrap();
        let rho0 = phase.crystal.number_density();
        // 第二壳层 (r = a ≈ 3.52) 被截断，只剩基线
        let i = 52;
        let r = ds.grid.r(i);
        assert!((g[i] + 4.0 * PI * rho0 * r).abs() < 1e-6);
    }

    #[test]
    fn test_qdamp_envelope_and_dscale() {
        let mut ds = Dataset::allocate(Radiation::Xray, 0.0, 0.0, 1.0, 5.0, 81).unwrap();
        let calc = PdfCalculator::default();
        let plain = calc.calculate(&[nickel()], &ds).unwrap();
        ds.qdamp = 0.1;
        ds.dscale = 2.0;
        let damped = calc.calculate(&[nickel()], &ds).unwrap();
        for i in 0..ds.npoints() {
            let r = ds.grid.r(i);
            let expected = 2.0 * plain[i] * (-0.5 * (0.1 * r) * (0.1 * r)).exp();
            assert!((damped[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_two_identical_phases_with_composition_weights() {
        let ds = Dataset::allocate(Radiation::Xray, 0.0, 0.0, 1.0, 5.0, 81).unwrap();
        let calc = PdfCalculator::default();
        let single = calc.calculate(&[nickel()], &ds).unwrap();
        let double = calc.calculate(&[nickel(), nickel()], &ds).unwrap();
        for (a, b) in single.iter().zip(double.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        let explicit = PdfCalculator::new(5.0, 12.0, PhaseWeighting::Explicit)
            .calculate(&[nickel(), nickel()], &ds)
            .unwrap();
        for (a, b) in single.iter().zip(explicit.iter()) {
            assert!((2.0 * a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_tiny_qmax_keeps_extension_bounded() {
        let ds = Dataset::allocate(Radiation::Xray, 1e-9, 0.0, 1.0, 5.0, 41).unwrap();
        let calc = PdfCalculator::default();
        let grid = calc.calc_grid(&ds);
        assert_eq!(grid.k_hi, 40 + MAX_RIPPLE_EXTENSION as i64 * 41);
        assert!(grid.r(grid.k_lo) > 0.0);
        let g = calc.calculate(&[nickel()], &ds).unwrap();
        assert_eq!(g.len(), 41);
        assert!(g.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_excessive_peak_reach_is_rejected() {
        let mut ds = Dataset::allocate(Radiation::Xray, 0.0, 0.0, 1.0, 5.0, 41).unwrap();
        ds.qbroad = 1e12;
        let result = PdfCalculator::default().calculate(&[nickel()], &ds);
        assert!(matches!(result, Err(PdfError::Range(_))));
    }

    #[test]
    fn test_deselected_phase_contributes_nothing() {
        let ds = Dataset::allocate(Radiation::Xray, 25.0, 0.0, 1.0, 5.0, 81).unwrap();
        let mut phase = nickel();
        phase.in_pdf = false;
        let g = PdfCalculator::default().calculate(&[phase], &ds).unwrap();
        assert!(g.iter().all(|&v| v == 0.0));
    }
}

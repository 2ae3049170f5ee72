//! # 物相模型
//!
//! 物相 = 晶体结构 + 物相级剖面参数（比例、相关运动修正、截断）+ 局部散射因子覆盖表
//! + 原子选择状态。原子按插入顺序编号，对外使用 1 起始的编号。
//!
//! 提供键角、键长及按元素类型枚举键长的几何查询，不确定度由坐标与晶格参数的
//! 标准不确定度线性传播得到。
//!
//! ## 依赖关系
//! - 被 `engine.rs`、`pdf/calculator.rs` 和 `fit/` 使用
//! - 使用 `models/structure.rs`、`pdf/scattering.rs`

use crate::error::{PdfError, Result};
use crate::models::structure::{Atom, Crystal, Lattice};
use crate::pdf::scattering::{self, Radiation, ScatteringOverrides, Species};

use serde::{Deserialize, Serialize};

/// 通配元素符号
pub const ALL_ELEMENTS: &str = "ALL";

/// 物相
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub crystal: Crystal,
    /// 物相比例因子
    pub pscale: f64,
    /// 相关运动修正，1/r 项
    pub delta1: f64,
    /// 相关运动修正，1/r² 项
    pub delta2: f64,
    /// 低 r 峰锐化比例
    pub sratio: f64,
    /// sratio 生效的距离上限
    pub srcut: f64,
    /// 原子对距离截断，0 表示不截断
    pub rcut: f64,
    /// 是否计入 PDF 加权求和
    pub in_pdf: bool,
    pub overrides: ScatteringOverrides,
}

/// 按类型枚举的键长结果（平行序列）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BondLengths {
    pub dij: Vec<f64>,
    pub ddij: Vec<f64>,
    /// 0 起始编号对，等于 ij1 减一
    pub ij0: Vec<(usize, usize)>,
    /// 1 起始编号对
    pub ij1: Vec<(usize, usize)>,
}

impl BondLengths {
    pub fn len(&self) -> usize {
        self.dij.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dij.is_empty()
    }
}

impl Phase {
    /// 由晶体结构创建物相，校验晶格与元素符号
    pub fn new(crystal: Crystal) -> Result<Self> {
        crystal.lattice.validate()?;
        if crystal.atoms.is_empty() {
            return Err(PdfError::Range(format!(
                "structure '{}' contains no atoms",
                crystal.name
            )));
        }
        for atom in &crystal.atoms {
            scattering::parse_species(&atom.element)?;
            if !(atom.occupancy.is_finite() && atom.occupancy >= 0.0) {
                return Err(PdfError::Range(format!(
                    "occupancy {} of {} must be non-negative",
                    atom.occupancy, atom.element
                )));
            }
        }
        Ok(Phase {
            crystal,
            pscale: 1.0,
            delta1: 0.0,
            delta2: 0.0,
            sratio: 1.0,
            srcut: 0.0,
            rcut: 0.0,
            in_pdf: true,
            overrides: ScatteringOverrides::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.crystal.name
    }

    pub fn lattice(&self) -> &Lattice {
        &self.crystal.lattice
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.crystal.atoms
    }

    pub fn num_atoms(&self) -> usize {
        self.crystal.atoms.len()
    }

    /// 1 起始编号转 0 起始下标
    pub fn atom_index(&self, index: usize) -> Result<usize> {
        if index == 0 || index > self.num_atoms() {
            return Err(PdfError::Range(format!(
                "atom index {} outside [1, {}]",
                index,
                self.num_atoms()
            )));
        }
        Ok(index - 1)
    }

    /// 大写元素符号，按原子顺序
    pub fn element_symbols(&self) -> Vec<String> {
        self.crystal
            .atoms
            .iter()
            .map(|a| a.element.to_ascii_uppercase())
            .collect()
    }

    /// 去重后的大写元素符号，按首次出现顺序
    pub fn atom_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for symbol in self.element_symbols() {
            if !types.contains(&symbol) {
                types.push(symbol);
            }
        }
        types
    }

    /// 带覆盖表的散射值
    pub fn scattering(&self, kind: Radiation, element: &str) -> Result<f64> {
        self.overrides.lookup(kind, element)
    }

    // ─────────────────────────────────────────────────────────────
    // 原子选择
    // ─────────────────────────────────────────────────────────────

    pub fn select_atom_index(&mut self, index: usize, selected: bool) -> Result<()> {
        let i = self.atom_index(index)?;
        self.crystal.atoms[i].selected = selected;
        Ok(())
    }

    /// 按元素选择；"ALL" 作用于全部原子
    pub fn select_atom_type(&mut self, element: &str, selected: bool) -> Result<()> {
        let matcher = ElementMatcher::new(element)?;
        let species = self.species()?;
        for (atom, sp) in self.crystal.atoms.iter_mut().zip(species.iter()) {
            if matcher.matches(sp) {
                atom.selected = selected;
            }
        }
        Ok(())
    }

    pub fn select_all(&mut self) {
        self.crystal.atoms.iter_mut().for_each(|a| a.selected = true);
    }

    pub fn select_none(&mut self) {
        self.crystal.atoms.iter_mut().for_each(|a| a.selected = false);
    }

    fn species(&self) -> Result<Vec<Species>> {
        self.crystal
            .atoms
            .iter()
            .map(|a| scattering::parse_species(&a.element))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────
    // 键几何
    // ─────────────────────────────────────────────────────────────

    /// 原子 j 处由 i、k 张成的键角（度）及其不确定度
    pub fn bond_angle(&self, i: usize, j: usize, k: usize) -> Result<(f64, f64)> {
        let (i, j, k) = (self.atom_index(i)?, self.atom_index(j)?, self.atom_index(k)?);
        let atoms = &self.crystal.atoms;
        let (values, sigmas) = self.geometry_vector(&[i, j, k]);

        let angle_of = |v: &[f64]| -> f64 {
            let lattice = lattice_from_slice(v);
            let xi = [v[6], v[7], v[8]];
            let xj = [v[9], v[10], v[11]];
            let xk = [v[12], v[13], v[14]];
            let v1 = sub(&xi, &xj);
            let v2 = sub(&xk, &xj);
            let g = lattice.metric_tensor();
            let d12 = quad(&g, &v1, &v2);
            let n1 = quad(&g, &v1, &v1).sqrt();
            let n2 = quad(&g, &v2, &v2).sqrt();
            (d12 / (n1 * n2)).clamp(-1.0, 1.0).acos().to_degrees()
        };

        let lattice = self.lattice();
        let v1 = sub(&atoms[i].position, &atoms[j].position);
        let v2 = sub(&atoms[k].position, &atoms[j].position);
        if lattice.distance(&v1) < 1e-8 || lattice.distance(&v2) < 1e-8 {
            return Err(PdfError::Range(format!(
                "bond angle undefined for coincident atoms {}, {}, {}",
                i + 1,
                j + 1,
                k + 1
            )));
        }

        let angle = angle_of(&values);
        let sigma = propagate(&values, &sigmas, angle_of);
        Ok((angle, sigma))
    }

    /// 同一物相内两原子的距离及其不确定度（直接使用给定坐标，不取最近像）
    pub fn bond_length(&self, i: usize, j: usize) -> Result<(f64, f64)> {
        let (i, j) = (self.atom_index(i)?, self.atom_index(j)?);
        Ok(self.pair_distance(i, j, [0.0; 3]))
    }

    fn pair_distance(&self, i: usize, j: usize, shift: [f64; 3]) -> (f64, f64) {
        let (values, sigmas) = self.geometry_vector(&[i, j]);
        let distance_of = |v: &[f64]| -> f64 {
            let lattice = lattice_from_slice(v);
            let delta = [
                v[9] + shift[0] - v[6],
                v[10] + shift[1] - v[7],
                v[11] + shift[2] - v[8],
            ];
            lattice.distance(&delta)
        };
        let d = distance_of(&values);
        (d, propagate(&values, &sigmas, distance_of))
    }

    /// 枚举所有 (A 类原子, B 类原子像) 对，距离在 [rmin, rmax) 内
    ///
    /// 排序：外层原子编号升序、内层原子编号升序，再按距离与平移向量。
    pub fn bond_lengths_by_type(
        &self,
        first: &str,
        second: &str,
        rmin: f64,
        rmax: f64,
    ) -> Result<BondLengths> {
        let first = ElementMatcher::new(first)?;
        let second = ElementMatcher::new(second)?;
        if !rmin.is_finite() || !rmax.is_finite() {
            return Err(PdfError::Range(format!(
                "bond search limits must be finite, got [{rmin}, {rmax}]"
            )));
        }
        if !(rmax > rmin) {
            return Err(PdfError::Range(format!(
                "rmax ({rmax}) must be greater than rmin ({rmin})"
            )));
        }
        let species = self.species()?;
        let lattice = self.lattice();
        let atoms = &self.crystal.atoms;

        let mut found: Vec<(usize, usize, f64, [i32; 3])> = Vec::new();
        for (i, sp_i) in species.iter().enumerate() {
            if !first.matches(sp_i) {
                continue;
            }
            for (j, sp_j) in species.iter().enumerate() {
                if !second.matches(sp_j) {
                    continue;
                }
                let delta = sub(&atoms[j].position, &atoms[i].position);
                for t in translations(lattice, &delta, rmax)? {
                    let shifted = [
                        delta[0] + t[0] as f64,
                        delta[1] + t[1] as f64,
                        delta[2] + t[2] as f64,
                    ];
                    let d = lattice.distance(&shifted);
                    if d < 1e-8 || d < rmin || d >= rmax {
                        continue;
                    }
                    found.push((i, j, d, t));
                }
            }
        }
        found.sort_by(|a, b| {
            (a.0, a.1)
                .cmp(&(b.0, b.1))
                .then(a.2.total_cmp(&b.2))
                .then(a.3.cmp(&b.3))
        });

        let mut result = BondLengths::default();
        for (i, j, _, t) in found {
            let (d, dd) = self.pair_distance(i, j, [t[0] as f64, t[1] as f64, t[2] as f64]);
            result.dij.push(d);
            result.ddij.push(dd);
            result.ij0.push((i, j));
            result.ij1.push((i + 1, j + 1));
        }
        Ok(result)
    }

    /// 几何量参数向量：6 个晶格参数 + 每个原子 3 个坐标，以及对应不确定度
    fn geometry_vector(&self, atoms: &[usize]) -> (Vec<f64>, Vec<f64>) {
        let lattice = self.lattice();
        let mut values = lattice.params.to_vec();
        let mut sigmas = lattice.esd.to_vec();
        for &a in atoms {
            let atom = &self.crystal.atoms[a];
            values.extend_from_slice(&atom.position);
            sigmas.extend_from_slice(&atom.position_esd);
        }
        (values, sigmas)
    }
}

/// 元素匹配：通配符或具体元素（忽略离子价）
struct ElementMatcher(Option<u32>);

impl ElementMatcher {
    fn new(element: &str) -> Result<Self> {
        if element.trim().eq_ignore_ascii_case(ALL_ELEMENTS) {
            return Ok(ElementMatcher(None));
        }
        Ok(ElementMatcher(Some(scattering::parse_species(element)?.entry.z)))
    }

    fn matches(&self, species: &Species) -> bool {
        self.0.map_or(true, |z| species.entry.z == z)
    }
}

/// 单个原子对可枚举的平移像数目上限
const MAX_TRANSLATIONS: f64 = 1.0e6;

/// 覆盖所有 |delta + t| ≤ rmax 的整数平移向量
pub(crate) fn translations(lattice: &Lattice, delta: &[f64; 3], rmax: f64) -> Result<Vec<[i32; 3]>> {
    let recip = lattice.reciprocal_lengths();
    let mut limits = [(0.0, 0.0); 3];
    let mut count = 1.0;
    for k in 0..3 {
        let reach = rmax * recip[k];
        let lo = (-reach - delta[k]).ceil();
        let hi = (reach - delta[k]).floor();
        count *= (hi - lo + 1.0).max(0.0);
        limits[k] = (lo, hi);
    }
    if !(count <= MAX_TRANSLATIONS) {
        return Err(PdfError::Range(format!(
            "distance limit {rmax} requires too many lattice translations"
        )));
    }
    let bounds: Vec<(i32, i32)> = limits.iter().map(|&(lo, hi)| (lo as i32, hi as i32)).collect();
    let mut out = Vec::new();
    for ta in bounds[0].0..=bounds[0].1 {
        for tb in bounds[1].0..=bounds[1].1 {
            for tc in bounds[2].0..=bounds[2].1 {
                out.push([ta, tb, tc]);
            }
        }
    }
    Ok(out)
}

fn lattice_from_slice(v: &[f64]) -> Lattice {
    Lattice::from_parameters(v[0], v[1], v[2], v[3], v[4], v[5])
}

fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn quad(g: &[[f64; 3]; 3], u: &[f64; 3], v: &[f64; 3]) -> f64 {
    let mut s = 0.0;
    for i in 0..3 {
        for j in 0..3 {
            s += u[i] * g[i][j] * v[j];
        }
    }
    s
}

/// 一阶误差传播：σ_f² = Σ (∂f/∂x_k)² σ_k²，导数用中心差分
fn propagate<F: Fn(&[f64]) -> f64>(values: &[f64], sigmas: &[f64], f: F) -> f64 {
    let mut var = 0.0;
    let mut probe = values.to_vec();
    for (k, &sigma) in sigmas.iter().enumerate() {
        if sigma == 0.0 {
            continue;
        }
        let h = 1e-6 * values[k].abs().max(1.0);
        probe[k] = values[k] + h;
        let up = f(&probe);
        probe[k] = values[k] - h;
        let down = f(&probe);
        probe[k] = values[k];
        let derivative = (up - down) / (2.0 * h);
        var += derivative * derivative * sigma * sigma;
    }
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_phase_rejects_unknown_elements() {
        let lattice = Lattice::from_parameters(3.0, 3.0, 3.0, 90.0, 90.0, 90.0);
        let crystal = Crystal::new("bad", lattice, vec![Atom::new("Xx", [0.0; 3])]);
        assert!(matches!(Phase::new(crystal), Err(PdfError::UnknownElement(_))));
    }

    #[test]
    fn test_atom_types_in_first_appearance_order() {
        let phase = Phase::new(fixtures::perovskite_crystal()).unwrap();
        assert_eq!(phase.num_atoms(), 56);
        assert_eq!(phase.atom_types(), vec!["PB", "O", "SC", "W", "TI"]);
        let symbols = phase.element_symbols();
        assert_eq!(symbols[0], "PB");
        assert_eq!(symbols[55], "TI");
    }

    #[test]
    fn test_bond_angle_fcc() {
        let phase = Phase::new(fixtures::nickel_crystal()).unwrap();
        let (angle, _) = phase.bond_angle(1, 2, 3).unwrap();
        assert!((angle - 60.0).abs() < 1e-6);
        assert!(matches!(phase.bond_angle(0, 1, 2), Err(PdfError::Range(_))));
        assert!(matches!(phase.bond_angle(1, 2, 7), Err(PdfError::Range(_))));
    }

    #[test]
    fn test_bond_length_uncertainty_from_lattice_esd() {
        let mut crystal = fixtures::nickel_crystal();
        crystal.lattice.esd = [0.01, 0.01, 0.01, 0.0, 0.0, 0.0];
        let phase = Phase::new(crystal).unwrap();
        let (d, dd) = phase.bond_length(1, 2).unwrap();
        let a = fixtures::NI_LATTICE;
        assert!((d - a / 2f64.sqrt()).abs() < 1e-9);
        // ∂d/∂a = ∂d/∂b = √2/4，c 不贡献
        let expected = (2.0f64).sqrt() / 4.0 * 0.01 * (2.0f64).sqrt();
        assert!((dd - expected).abs() < 1e-6);
    }

    #[test]
    fn test_bond_lengths_by_type_fcc_coordination() {
        let phase = Phase::new(fixtures::nickel_crystal()).unwrap();
        let bonds = phase.bond_lengths_by_type("ALL", "ALL", 0.1, 2.6).unwrap();
        assert_eq!(bonds.len(), 48);
        assert_eq!(bonds.ddij.len(), 48);
        for (ij0, ij1) in bonds.ij0.iter().zip(bonds.ij1.iter()) {
            assert_eq!(ij0.0 + 1, ij1.0);
            assert_eq!(ij0.1 + 1, ij1.1);
        }
        assert_eq!(bonds.ij0.iter().map(|p| p.0.min(p.1)).min(), Some(0));
        assert_eq!(bonds.ij1.iter().map(|p| p.0.max(p.1)).max(), Some(4));
        // 外层编号升序，内层编号升序
        assert!(bonds.ij0.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_bond_lengths_by_type_perovskite() {
        let phase = Phase::new(fixtures::perovskite_crystal()).unwrap();
        let pb_o = phase.bond_lengths_by_type("Pb", "O", 0.1, 3.0).unwrap();
        assert_eq!(pb_o.len(), 8 * 12);

        let none = phase.bond_lengths_by_type("Pb", "Au", 0.1, 5.0).unwrap();
        assert!(none.is_empty());
        assert!(none.ij0.is_empty() && none.ij1.is_empty() && none.ddij.is_empty());

        assert!(matches!(
            phase.bond_lengths_by_type("Ni", "Nix", 0.1, 5.0),
            Err(PdfError::UnknownElement(_))
        ));
    }

    #[test]
    fn test_bond_search_limits_are_bounded() {
        let phase = Phase::new(fixtures::nickel_crystal()).unwrap();
        for (rmin, rmax) in [(0.1, f64::INFINITY), (f64::NAN, 3.0), (0.1, 1.0e9)] {
            assert!(matches!(
                phase.bond_lengths_by_type("ALL", "ALL", rmin, rmax),
                Err(PdfError::Range(_))
            ));
        }
    }

    #[test]
    fn test_atom_selection() {
        let mut phase = Phase::new(fixtures::perovskite_crystal()).unwrap();
        phase.select_none();
        assert!(phase.atoms().iter().all(|a| !a.selected));
        phase.select_atom_type("o", true).unwrap();
        assert_eq!(phase.atoms().iter().filter(|a| a.selected).count(), 24);
        phase.select_atom_index(1, true).unwrap();
        assert_eq!(phase.atoms().iter().filter(|a| a.selected).count(), 25);
        assert!(phase.select_atom_index(57, true).is_err());
        phase.select_all();
        assert!(phase.atoms().iter().all(|a| a.selected));
    }
}

//! # 晶体结构数据模型
//!
//! 定义统一的晶体结构表示：晶格参数、原子分数坐标、各向异性位移参数与占据率。
//! 解析器产生 `Crystal`，引擎把它包装为 `Phase` 后参与 PDF 计算与精修。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`models/phase.rs` 和 `pdf/` 使用
//! - 使用 `error.rs`

use crate::error::{PdfError, Result};
use serde::{Deserialize, Serialize};

/// 晶格参数表示
///
/// 以 (a, b, c, alpha, beta, gamma) 为基本量存储，因为精修直接作用于这些参数；
/// 笛卡尔晶格矩阵按需计算。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    /// a, b, c (Å), alpha, beta, gamma (度)
    pub params: [f64; 6],
    /// 晶格参数的标准不确定度
    #[serde(default)]
    pub esd: [f64; 6],
}

impl Lattice {
    /// 从晶格参数 (a, b, c, alpha, beta, gamma) 创建晶格
    /// 角度单位：度
    pub fn from_parameters(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Lattice {
            params: [a, b, c, alpha, beta, gamma],
            esd: [0.0; 6],
        }
    }

    /// 获取晶格参数 (a, b, c, alpha, beta, gamma)
    pub fn parameters(&self) -> (f64, f64, f64, f64, f64, f64) {
        let p = self.params;
        (p[0], p[1], p[2], p[3], p[4], p[5])
    }

    /// 检查晶格是否物理可行
    pub fn validate(&self) -> Result<()> {
        let [a, b, c, alpha, beta, gamma] = self.params;
        if !(a > 0.0 && b > 0.0 && c > 0.0) {
            return Err(PdfError::Range(format!(
                "lattice lengths must be positive, got {a}, {b}, {c}"
            )));
        }
        for angle in [alpha, beta, gamma] {
            if !(angle > 0.0 && angle < 180.0) {
                return Err(PdfError::Range(format!(
                    "lattice angle {angle} outside (0, 180)"
                )));
            }
        }
        let v = self.volume();
        if !(v.is_finite() && v > 0.0) {
            return Err(PdfError::Range("lattice angles give zero volume".to_string()));
        }
        Ok(())
    }

    /// 晶格向量矩阵 (3x3)，行向量表示 a, b, c
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        let [a, b, c, alpha, beta, gamma] = self.params;
        let cos_alpha = alpha.to_radians().cos();
        let cos_beta = beta.to_radians().cos();
        let cos_gamma = gamma.to_radians().cos();
        let sin_gamma = gamma.to_radians().sin();

        let a_vec = [a, 0.0, 0.0];
        let b_vec = [b * cos_gamma, b * sin_gamma, 0.0];

        let c1 = c * cos_beta;
        let c2 = c * (cos_alpha - cos_beta * cos_gamma) / sin_gamma;
        let c3 = (c * c - c1 * c1 - c2 * c2).max(0.0).sqrt();

        [a_vec, b_vec, [c1, c2, c3]]
    }

    /// 度规张量 g_ij = a_i · a_j
    pub fn metric_tensor(&self) -> [[f64; 3]; 3] {
        let [a, b, c, alpha, beta, gamma] = self.params;
        let ca = alpha.to_radians().cos();
        let cb = beta.to_radians().cos();
        let cg = gamma.to_radians().cos();
        [
            [a * a, a * b * cg, a * c * cb],
            [a * b * cg, b * b, b * c * ca],
            [a * c * cb, b * c * ca, c * c],
        ]
    }

    /// 计算晶格体积
    pub fn volume(&self) -> f64 {
        let [a, b, c, alpha, beta, gamma] = self.params;
        let ca = alpha.to_radians().cos();
        let cb = beta.to_radians().cos();
        let cg = gamma.to_radians().cos();
        let arg = 1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg;
        a * b * c * arg.max(0.0).sqrt()
    }

    /// 倒格矢长度 (a*, b*, c*)，不含 2π 因子
    pub fn reciprocal_lengths(&self) -> [f64; 3] {
        let m = self.matrix();
        let v = self.volume();
        if v <= 0.0 {
            return [0.0; 3];
        }
        let bc = cross(&m[1], &m[2]);
        let ca = cross(&m[2], &m[0]);
        let ab = cross(&m[0], &m[1]);
        [norm(&bc) / v, norm(&ca) / v, norm(&ab) / v]
    }

    /// 分数坐标差对应的距离
    pub fn distance(&self, delta: &[f64; 3]) -> f64 {
        let g = self.metric_tensor();
        let mut d2 = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                d2 += delta[i] * g[i][j] * delta[j];
            }
        }
        d2.max(0.0).sqrt()
    }

    /// 分数坐标转笛卡尔坐标
    pub fn frac_to_cart(&self, frac: &[f64; 3]) -> [f64; 3] {
        let m = self.matrix();
        [
            frac[0] * m[0][0] + frac[1] * m[1][0] + frac[2] * m[2][0],
            frac[0] * m[0][1] + frac[1] * m[1][1] + frac[2] * m[2][1],
            frac[0] * m[0][2] + frac[1] * m[1][2] + frac[2] * m[2][2],
        ]
    }

    /// 把 (u11, u22, u33, u12, u13, u23) 转换为笛卡尔位移张量
    ///
    /// U_cart = M · N · U · N · Mᵀ，M 的列为晶格向量，N = diag(a*, b*, c*)。
    pub fn cartesian_u(&self, u: &[f64; 6]) -> [[f64; 3]; 3] {
        let m = self.matrix();
        let n = self.reciprocal_lengths();
        let uf = [
            [u[0], u[3], u[4]],
            [u[3], u[1], u[5]],
            [u[4], u[5], u[2]],
        ];
        // A = M · N，其列 k 为 n_k · a_k
        let mut a = [[0.0; 3]; 3];
        for (row, a_row) in a.iter_mut().enumerate() {
            for (k, a_rk) in a_row.iter_mut().enumerate() {
                *a_rk = m[k][row] * n[k];
            }
        }
        let mut out = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                let mut s = 0.0;
                for k in 0..3 {
                    for l in 0..3 {
                        s += a[i][k] * uf[k][l] * a[j][l];
                    }
                }
                out[i][j] = s;
            }
        }
        out
    }
}

/// 原子信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// 元素符号（可带离子价，如 "O2-"）
    pub element: String,

    /// 分数坐标 [x, y, z]
    pub position: [f64; 3],

    /// 分数坐标的标准不确定度
    #[serde(default)]
    pub position_esd: [f64; 3],

    /// 各向异性位移参数 [u11, u22, u33, u12, u13, u23] (Å²)
    pub u: [f64; 6],

    #[serde(default)]
    pub u_esd: [f64; 6],

    /// 占据率
    pub occupancy: f64,

    #[serde(default)]
    pub occupancy_esd: f64,

    /// 可选：原子标签（用于区分同种元素的不同位置）
    pub label: Option<String>,

    /// 是否参与 PDF 求和
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl Atom {
    pub fn new(element: impl Into<String>, position: [f64; 3]) -> Self {
        Atom {
            element: element.into(),
            position,
            position_esd: [0.0; 3],
            u: [0.0; 6],
            u_esd: [0.0; 6],
            occupancy: 1.0,
            occupancy_esd: 0.0,
            label: None,
            selected: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// 各向同性位移：u11 = u22 = u33 = uiso
    pub fn with_uiso(mut self, uiso: f64) -> Self {
        self.u = [uiso, uiso, uiso, 0.0, 0.0, 0.0];
        self
    }

    pub fn with_u(mut self, u: [f64; 6]) -> Self {
        self.u = u;
        self
    }

    pub fn with_occupancy(mut self, occupancy: f64) -> Self {
        self.occupancy = occupancy;
        self
    }
}

/// 晶体结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crystal {
    /// 结构名称
    pub name: String,

    /// 晶格
    pub lattice: Lattice,

    /// 原子列表（插入顺序即原子编号顺序）
    pub atoms: Vec<Atom>,

    /// 空间群（仅作记录，原子列表已展开）
    pub space_group: Option<String>,
}

impl Crystal {
    pub fn new(name: impl Into<String>, lattice: Lattice, atoms: Vec<Atom>) -> Self {
        Crystal {
            name: name.into(),
            lattice,
            atoms,
            space_group: None,
        }
    }

    /// 计算化学式
    pub fn formula(&self) -> String {
        use std::collections::BTreeMap;
        let mut counts: BTreeMap<&str, f64> = BTreeMap::new();

        for atom in &self.atoms {
            *counts.entry(atom.element.as_str()).or_insert(0.0) += atom.occupancy;
        }

        counts
            .into_iter()
            .map(|(el, count)| {
                if (count - 1.0).abs() < 1e-9 {
                    el.to_string()
                } else if (count - count.round()).abs() < 1e-9 {
                    format!("{}{}", el, count.round() as i64)
                } else {
                    format!("{}{:.3}", el, count)
                }
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// 总占据数（等效原子数）
    pub fn total_occupancy(&self) -> f64 {
        self.atoms.iter().map(|a| a.occupancy).sum()
    }

    /// 平均数密度 (Å⁻³)
    pub fn number_density(&self) -> f64 {
        let v = self.lattice.volume();
        if v > 0.0 {
            self.total_occupancy() / v
        } else {
            0.0
        }
    }
}

pub(crate) fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: &[f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lattice_from_parameters_cubic() {
        let lattice = Lattice::from_parameters(5.0, 5.0, 5.0, 90.0, 90.0, 90.0);
        let m = lattice.matrix();

        assert!((m[0][0] - 5.0).abs() < 1e-9);
        assert!((m[1][1] - 5.0).abs() < 1e-9);
        assert!((m[2][2] - 5.0).abs() < 1e-9);
        assert!(m[1][0].abs() < 1e-9);
        assert!(m[2][0].abs() < 1e-9);
    }

    #[test]
    fn test_lattice_volume_cubic() {
        let lattice = Lattice::from_parameters(5.0, 5.0, 5.0, 90.0, 90.0, 90.0);
        // 5^3 = 125
        assert!((lattice.volume() - 125.0).abs() < 1e-6);
    }

    #[test]
    fn test_lattice_volume_matches_matrix_determinant() {
        let lattice = Lattice::from_parameters(3.0, 4.0, 5.0, 80.0, 95.0, 110.0);
        let m = lattice.matrix();
        let det = dot(&m[0], &cross(&m[1], &m[2]));
        assert!((lattice.volume() - det).abs() < 1e-9);
    }

    #[test]
    fn test_lattice_hexagonal_distance() {
        let lattice = Lattice::from_parameters(3.0, 3.0, 5.0, 90.0, 90.0, 120.0);
        // a + b 在六方晶格中的长度等于 a
        let d = lattice.distance(&[1.0, 1.0, 0.0]);
        assert!((d - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_lattice_validate_rejects_bad_angles() {
        assert!(Lattice::from_parameters(3.0, 3.0, 3.0, 90.0, 90.0, 90.0)
            .validate()
            .is_ok());
        assert!(Lattice::from_parameters(3.0, -3.0, 3.0, 90.0, 90.0, 90.0)
            .validate()
            .is_err());
        assert!(Lattice::from_parameters(3.0, 3.0, 3.0, 90.0, 90.0, 180.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_cartesian_u_isotropic_cubic() {
        let lattice = Lattice::from_parameters(4.0, 4.0, 4.0, 90.0, 90.0, 90.0);
        let u = lattice.cartesian_u(&[0.01, 0.01, 0.01, 0.0, 0.0, 0.0]);
        for (i, row) in u.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                let expected = if i == j { 0.01 } else { 0.0 };
                assert!((value - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_crystal_formula_with_partial_occupancy() {
        let lattice = Lattice::from_parameters(5.0, 5.0, 5.0, 90.0, 90.0, 90.0);
        let atoms = vec![
            Atom::new("Na", [0.0, 0.0, 0.0]),
            Atom::new("Cl", [0.5, 0.5, 0.5]),
            Atom::new("Cl", [0.5, 0.0, 0.0]).with_occupancy(0.5),
        ];
        let crystal = Crystal::new("NaCl", lattice, atoms);

        assert_eq!(crystal.formula(), "Cl1.500Na");
        assert!((crystal.total_occupancy() - 2.5).abs() < 1e-12);
        assert!((crystal.number_density() - 2.5 / 125.0).abs() < 1e-12);
    }

    #[test]
    fn test_atom_with_label() {
        let atom = Atom::new("Fe", [0.0, 0.0, 0.0]).with_label("Fe1");
        assert_eq!(atom.label, Some("Fe1".to_string()));
        assert!(atom.selected);
        assert_eq!(atom.occupancy, 1.0);
    }
}

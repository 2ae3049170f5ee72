//! 测试用参考结构：fcc Ni 与 2×2×2 钙钛矿超胞。

use crate::models::{Atom, Crystal, Lattice};

pub const NI_LATTICE: f64 = 3.52387;

pub const NI_UISO: f64 = 0.00126651;

pub const NI_STRU: &str = "title  Structure of Ni
format pdffit
scale   1.000000
sharp   0.000000,  0.000000,  1.000000,  3.500000
spcgr   Fm-3m
cell    3.523870,  3.523870,  3.523870, 90.000000, 90.000000, 90.000000
dcell   0.000000,  0.000000,  0.000000,  0.000000,  0.000000,  0.000000
ncell          1,         1,         1,         4
atoms
NI          0.00000000        0.00000000        0.00000000       1.0000
            0.00000000        0.00000000        0.00000000       0.0000
            0.00126651        0.00126651        0.00126651
            0.00000000        0.00000000        0.00000000
            0.00000000        0.00000000        0.00000000
            0.00000000        0.00000000        0.00000000
NI          0.00000000        0.50000000        0.50000000       1.0000
            0.00000000        0.00000000        0.00000000       0.0000
            0.00126651        0.00126651        0.00126651
            0.00000000        0.00000000        0.00000000
            0.00000000        0.00000000        0.00000000
            0.00000000        0.00000000        0.00000000
NI          0.50000000        0.00000000        0.50000000       1.0000
            0.00000000        0.00000000        0.00000000       0.0000
            0.00126651        0.00126651        0.00126651
            0.00000000        0.00000000        0.00000000
            0.00000000        0.00000000        0.00000000
            0.00000000        0.00000000        0.00000000
NI          0.50000000        0.50000000        0.00000000       1.0000
            0.00000000        0.00000000        0.00000000       0.0000
            0.00126651        0.00126651        0.00126651
            0.00000000        0.00000000        0.00000000
            0.00000000        0.00000000        0.00000000
            0.00000000        0.00000000        0.00000000
";

/// fcc Ni，原子顺序与 `NI_STRU` 一致
pub fn nickel_crystal() -> Crystal {
    let lattice = Lattice::from_parameters(NI_LATTICE, NI_LATTICE, NI_LATTICE, 90.0, 90.0, 90.0);
    let atoms = [
        [0.0, 0.0, 0.0],
        [0.0, 0.5, 0.5],
        [0.5, 0.0, 0.5],
        [0.5, 0.5, 0.0],
    ]
    .into_iter()
    .map(|p| Atom::new("Ni", p).with_uiso(NI_UISO))
    .collect();
    Crystal::new("Ni", lattice, atoms)
}

/// Pb(Sc½W¼Ti¼)O3 的 2×2×2 超胞：8 Pb + 24 O + 8 Sc + 8 W + 8 Ti
pub fn perovskite_crystal() -> Crystal {
    let a = 8.0727;
    let lattice = Lattice::from_parameters(a, a, a, 90.0, 90.0, 90.0);
    let mut cells = Vec::new();
    for ix in 0..2 {
        for iy in 0..2 {
            for iz in 0..2 {
                cells.push([ix as f64 * 0.5, iy as f64 * 0.5, iz as f64 * 0.5]);
            }
        }
    }
    let at = |c: &[f64; 3], f: [f64; 3]| [c[0] + f[0] * 0.5, c[1] + f[1] * 0.5, c[2] + f[2] * 0.5];

    let mut atoms = Vec::new();
    for c in &cells {
        atoms.push(Atom::new("Pb", at(c, [0.0, 0.0, 0.0])).with_uiso(0.02));
    }
    for c in &cells {
        for f in [[0.5, 0.5, 0.0], [0.5, 0.0, 0.5], [0.0, 0.5, 0.5]] {
            atoms.push(Atom::new("O", at(c, f)).with_uiso(0.01));
        }
    }
    for (element, occupancy) in [("Sc", 0.5), ("W", 0.25), ("Ti", 0.25)] {
        for c in &cells {
            atoms.push(
                Atom::new(element, at(c, [0.5, 0.5, 0.5]))
                    .with_uiso(0.005)
                    .with_occupancy(occupancy),
            );
        }
    }
    Crystal::new("PbScW25TiO3", lattice, atoms)
}

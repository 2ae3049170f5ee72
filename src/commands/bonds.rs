//! # bonds 命令实现
//!
//! 按元素类型列出键长（含不确定度），可选计算一个键角。
//!
//! ## 依赖关系
//! - 使用 `cli/bonds.rs` 定义的参数
//! - 使用 pdfrefine 的 `PdfFit` 几何查询

use crate::cli::bonds::BondsArgs;

use anyhow::{Context, Result};
use pdfrefine::utils::output;
use pdfrefine::PdfFit;
use std::io;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct BondRow {
    #[tabled(rename = "i")]
    i: usize,
    #[tabled(rename = "Atom i")]
    atom_i: String,
    #[tabled(rename = "j")]
    j: usize,
    #[tabled(rename = "Atom j")]
    atom_j: String,
    #[tabled(rename = "d (Å)")]
    distance: String,
    #[tabled(rename = "σ (Å)")]
    sigma: String,
}

/// 执行 bonds 命令
pub fn execute(args: BondsArgs) -> Result<()> {
    output::print_header("Bond Geometry");

    let mut fit = PdfFit::new();
    fit.redirect_output(Box::new(io::sink()));
    fit.read_struct(&args.structure)
        .with_context(|| format!("reading structure '{}'", args.structure.display()))?;
    let symbols = fit.get_atoms(None)?;
    output::print_info(&format!(
        "{}: {} atoms, types {}",
        fit.get_structure(1)?.name,
        symbols.len(),
        fit.get_atom_types(None)?.join(" ")
    ));

    let bonds = fit.bond_length_types(&args.first, &args.second, args.rmin, args.rmax)?;
    if bonds.is_empty() {
        output::print_warning(&format!(
            "No {}-{} bonds between {:.3} and {:.3} Å",
            args.first, args.second, args.rmin, args.rmax
        ));
    } else {
        let rows: Vec<BondRow> = bonds
            .ij1
            .iter()
            .zip(bonds.dij.iter().zip(&bonds.ddij))
            .map(|(&(i, j), (d, dd))| BondRow {
                i,
                atom_i: symbols[i - 1].clone(),
                j,
                atom_j: symbols[j - 1].clone(),
                distance: format!("{d:.6}"),
                sigma: format!("{dd:.6}"),
            })
            .collect();
        output::print_info(&format!("{} bonds", rows.len()));
        println!("{}", Table::new(&rows));
    }

    if let Some(atoms) = &args.angle {
        let (angle, sigma) = fit.bond_angle(atoms[0], atoms[1], atoms[2])?;
        output::print_success(&format!(
            "Angle {}-{}-{}: {angle:.4}° ± {sigma:.4}°",
            atoms[0], atoms[1], atoms[2]
        ));
    }
    Ok(())
}

//! # PDF 数据导出
//!
//! 导出计算曲线、差值曲线、精修结果摘要与 CSV 表格。
//!
//! ## 支持格式
//! - pdf: `r  Gcalc` 两列文本，带 `#` 注释表头
//! - dif: `r  Gobs − Gcalc` 两列文本
//! - res: 精修结果摘要（变量、晶格、原子、数据集参数）
//! - CSV: r, Gobs, Gcalc, Gdiff, weight 全部列
//!
//! ## 依赖关系
//! - 被 `engine.rs` 和 `batch/runner.rs` 调用
//! - 使用 `csv` 库写入 CSV 文件

use crate::error::{PdfError, Result};
use crate::fit::ParameterBinder;
use crate::models::{Dataset, Phase};

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

fn curve_header(out: &mut String, dataset: &Dataset, columns: &str) {
    let _ = writeln!(out, "# Dataset: {}", dataset.name);
    let _ = writeln!(
        out,
        "# Radiation: {}  Qmax: {:.4}  Qdamp: {:.6}  Qbroad: {:.6}  Scale: {:.6}",
        dataset.radiation, dataset.qmax, dataset.qdamp, dataset.qbroad, dataset.dscale
    );
    let _ = writeln!(out, "# Columns: {columns}");
    let _ = writeln!(out, "#");
}

/// 计算曲线：r, Gcalc
pub fn pdf_to_string(dataset: &Dataset) -> String {
    let mut out = String::new();
    curve_header(&mut out, dataset, "r (Angstrom), G_calc (Angstrom^-2)");
    for (i, g) in dataset.gcalc.iter().enumerate() {
        let _ = writeln!(out, "{:12.6} {:16.8}", dataset.grid.r(i), g);
    }
    out
}

/// 差值曲线：r, Gobs − Gcalc（无观测处为 0）
pub fn diff_to_string(dataset: &Dataset) -> String {
    let mut out = String::new();
    curve_header(&mut out, dataset, "r (Angstrom), G_obs - G_calc (Angstrom^-2)");
    for (i, d) in dataset.gdiff.iter().enumerate() {
        let _ = writeln!(out, "{:12.6} {:16.8}", dataset.grid.r(i), d);
    }
    out
}

/// 精修结果摘要
pub fn result_to_string(
    phases: &[Phase],
    datasets: &[Dataset],
    binder: &ParameterBinder,
    rw: Option<f64>,
) -> String {
    let mut out = String::new();
    let rule = "=".repeat(72);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, " pdfrefine refinement result");
    let _ = writeln!(out, "{rule}");
    match rw {
        Some(rw) => {
            let _ = writeln!(out, " Rw = {rw:.6}");
        }
        None => {
            let _ = writeln!(out, " Rw = (not evaluated)");
        }
    }

    let _ = writeln!(out, "\n Refinement variables");
    for var in binder.variables() {
        let state = if var.fixed { "fixed" } else { "free" };
        let _ = writeln!(
            out,
            "   @{:<4} {:16.8} +/- {:14.8}  {}",
            var.id, var.value, var.sigma, state
        );
    }
    if !binder.constraints().is_empty() {
        let _ = writeln!(out, "\n Constraints");
        for c in binder.constraints() {
            let _ = writeln!(out, "   {:<28} = {}", c.target.to_string(), c.expr);
        }
    }

    for (k, phase) in phases.iter().enumerate() {
        let lattice = phase.lattice();
        let _ = writeln!(out, "\n Phase {}: {} ({})", k + 1, phase.name(), phase.crystal.formula());
        let _ = writeln!(
            out,
            "   scale {:.6}  delta1 {:.6}  delta2 {:.6}  sratio {:.6}  in sum: {}",
            phase.pscale,
            phase.delta1,
            phase.delta2,
            phase.sratio,
            if phase.in_pdf { "yes" } else { "no" }
        );
        let _ = write!(out, "   cell ");
        for (value, esd) in lattice.params.iter().zip(lattice.esd.iter()) {
            let _ = write!(out, " {value:.6}({esd:.6})");
        }
        let _ = writeln!(out);
        for (kind, element, value) in phase.overrides.entries() {
            let _ = writeln!(out, "   scat {} {:<4} {:.6}", kind.code(), element, value);
        }
        for (i, atom) in phase.atoms().iter().enumerate() {
            let _ = writeln!(
                out,
                "   {:>3} {:<4} {:10.6}({:.6}) {:10.6}({:.6}) {:10.6}({:.6})  occ {:.4}({:.4})",
                i + 1,
                atom.element.to_ascii_uppercase(),
                atom.position[0],
                atom.position_esd[0],
                atom.position[1],
                atom.position_esd[1],
                atom.position[2],
                atom.position_esd[2],
                atom.occupancy,
                atom.occupancy_esd
            );
            let _ = writeln!(
                out,
                "         U {:9.6} {:9.6} {:9.6} {:9.6} {:9.6} {:9.6}",
                atom.u[0], atom.u[1], atom.u[2], atom.u[3], atom.u[4], atom.u[5]
            );
        }
    }

    for (k, dataset) in datasets.iter().enumerate() {
        let (num, den) = dataset.rw_terms();
        let _ = writeln!(out, "\n Dataset {}: {}", k + 1, dataset.name);
        let _ = writeln!(
            out,
            "   {} Qmax {:.4}  Qdamp {:.6}  Qbroad {:.6}  scale {:.6}  selected: {}",
            dataset.radiation,
            dataset.qmax,
            dataset.qdamp,
            dataset.qbroad,
            dataset.dscale,
            if dataset.selected { "yes" } else { "no" }
        );
        let _ = writeln!(
            out,
            "   fit range {:.4} .. {:.4}  points {}  Rw(dataset) {}",
            dataset.fit_rmin,
            dataset.fit_rmax,
            dataset.fit_points().count(),
            if den > 0.0 {
                format!("{:.6}", (num / den).sqrt())
            } else {
                "n/a".to_string()
            }
        );
    }
    let _ = writeln!(out, "{rule}");
    out
}

/// 写入文本文件
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text).map_err(|e| PdfError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

/// 导出数据集全部数组为 CSV
pub fn to_csv(dataset: &Dataset, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;
    wtr.write_record(["r", "g_obs", "g_calc", "g_diff", "weight"])?;
    for i in 0..dataset.npoints() {
        wtr.write_record(&[
            format!("{:.6}", dataset.grid.r(i)),
            format!("{:.8}", dataset.gobs[i]),
            format!("{:.8}", dataset.gcalc[i]),
            format!("{:.8}", dataset.gdiff[i]),
            format!("{:.6e}", dataset.weights[i]),
        ])?;
    }
    wtr.flush().map_err(|e| PdfError::FileWriteError {
        path: output_path.display().to_string(),
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::scattering::Radiation;

    fn dataset() -> Dataset {
        let mut ds = Dataset::allocate(Radiation::Neutron, 30.0, 0.01, 1.0, 2.0, 3).unwrap();
        ds.store_calculation(vec![0.5, -1.0, 2.0]);
        ds
    }

    #[test]
    fn test_pdf_text() {
        let text = pdf_to_string(&dataset());
        let rows: Vec<Vec<f64>> = text
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(|l| l.split_whitespace().map(|v| v.parse().unwrap()).collect())
            .collect();
        assert_eq!(rows, vec![vec![1.0, 0.5], vec![1.5, -1.0], vec![2.0, 2.0]]);
        assert!(text.contains("Radiation: neutron"));
    }

    #[test]
    fn test_diff_is_zero_without_observed() {
        let text = diff_to_string(&dataset());
        assert!(text
            .lines()
            .filter(|l| !l.starts_with('#'))
            .all(|l| l.split_whitespace().nth(1) == Some("0.00000000")));
    }

    #[test]
    fn test_csv_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        to_csv(&dataset(), &path).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), 5);
        assert_eq!(reader.records().count(), 3);
    }
}

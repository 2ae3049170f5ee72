//! # scat 命令实现
//!
//! 打印元素的 X 射线（电子数）与中子（相干散射长度，fm）散射值。
//!
//! ## 依赖关系
//! - 使用 `cli/scat.rs` 定义的参数
//! - 使用 pdfrefine 的 `PdfFit::get_scat`

use crate::cli::scat::ScatArgs;

use anyhow::Result;
use pdfrefine::utils::output;
use pdfrefine::PdfFit;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct ScatRow {
    #[tabled(rename = "Element")]
    element: String,
    #[tabled(rename = "X-ray (e)")]
    xray: String,
    #[tabled(rename = "Neutron (fm)")]
    neutron: String,
}

fn cell(value: pdfrefine::Result<f64>) -> String {
    match value {
        Ok(v) => format!("{v:.4}"),
        Err(_) => "-".to_string(),
    }
}

/// 执行 scat 命令
pub fn execute(args: ScatArgs) -> Result<()> {
    output::print_header("Scattering Factors");

    let fit = PdfFit::new();
    let mut rows = Vec::new();
    for element in &args.elements {
        let xray = fit.get_scat("X", element);
        let neutron = fit.get_scat("N", element);
        if xray.is_err() && neutron.is_err() {
            output::print_warning(&format!("Unknown element '{element}'"));
            continue;
        }
        rows.push(ScatRow {
            element: element.clone(),
            xray: cell(xray),
            neutron: cell(neutron),
        });
    }
    if !rows.is_empty() {
        println!("{}", Table::new(&rows));
    }
    Ok(())
}

//! # 数据模型模块
//!
//! 定义晶体结构、物相与实验数据集的数据模型。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`pdf/`、`fit/` 和 `engine.rs` 使用
//! - 子模块: structure, phase, dataset

pub mod dataset;
pub mod phase;
pub mod structure;

pub use dataset::{Dataset, ObservedCurve, RGrid};
pub use phase::{BondLengths, Phase};
pub use structure::{Atom, Crystal, Lattice};

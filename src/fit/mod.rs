//! # 精修模块
//!
//! 参数地址空间、约束系统、LM 求解器与精修配置。
//!
//! ## 子模块
//! - `address`: 可精修量的寻址与读写
//! - `constraint`: 约束表达式、精修变量表
//! - `lm`: Levenberg-Marquardt 求解器
//! - `config`: 精修配置
//!
//! ## 依赖关系
//! - 被 `engine.rs` 使用
//! - 使用 `models/`、`pdf/`

pub mod address;
pub mod config;
pub mod constraint;
pub mod lm;

pub use address::{Address, DatasetField, PhaseField, Selection, Target, VarRef};
pub use config::FitConfig;
pub use constraint::{Constraint, ConstraintExpr, ParameterBinder, RefinementVariable};
pub use lm::{LeastSquaresProblem, LevenbergMarquardt, StepResult};

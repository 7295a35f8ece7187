//! 模块系统
//!
//! 模块的身份、状态、依赖图和取回原语。调度与加载流程在
//! [`crate::runtime`] 与 [`crate::loader`] 中。
//!
//! - [`ModuleRef`] - 一个可请求模块的身份与解析状态
//! - [`ModuleGraph`] - 模块缓存与依赖边
//! - [`resolver`] - 请求字符串 -> 绝对位置
//! - [`ModuleFetcher`] - 外部取回原语

pub mod error;
pub mod exports;
pub mod fetch;
pub mod graph;
pub mod id;
pub mod module_ref;
pub mod resolver;

pub use error::{FetchError, LoadError};
pub use exports::Exports;
pub use fetch::{
    module_body, ManifestFetcher, MemoryFetcher, ModuleBody, ModuleFetcher, ModuleManifest,
};
pub use graph::ModuleGraph;
pub use id::{ModuleId, ModuleIdGenerator};
pub use module_ref::{ModuleKind, ModuleRef, ModuleState};

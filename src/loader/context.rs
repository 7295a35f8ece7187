//! 当前模块上下文
//!
//! 模块主体运行时拿到的句柄。它记住"当前正在执行的是哪个模块"，
//! 因此主体里的 `require` 会把依赖边记在正确的调用方上，相对路径也以该模块
//! 的位置为基准。

use std::fmt;

use super::{Loader, RequestMode};
use crate::module::{Exports, LoadError, ModuleId};

/// 正在运行的模块的上下文
#[derive(Clone)]
pub struct ModuleContext {
    loader: Loader,
    id: ModuleId,
    exports: Exports,
}

impl ModuleContext {
    pub(crate) fn new(
        loader: Loader,
        id: ModuleId,
        exports: Exports,
    ) -> Self {
        Self {
            loader,
            id,
            exports,
        }
    }

    /// 当前模块的 id
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// 当前模块名
    pub fn name(&self) -> String {
        self.loader.name_of(self.id)
    }

    /// 当前模块解析后的位置
    pub fn location(&self) -> Option<String> {
        self.loader.module(self.id).and_then(|m| m.location().map(str::to_string))
    }

    /// 当前模块的导出对象
    ///
    /// 写入立即可见：被打破循环的调用方持有的是同一个句柄。
    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// 以当前模块为调用方加载依赖
    ///
    /// 依赖已加载时立即返回；当前模块被允许使用其部分导出时返回尚未完成的
    /// 导出对象；否则挂起，直到调度器恢复当前模块。
    pub async fn require(
        &self,
        request: &str,
    ) -> Result<Exports, LoadError> {
        self.loader.require_from(self.id, request, RequestMode::Module).await
    }

    /// 以当前模块为调用方按原样加载脚本
    ///
    /// 不追加扩展名，也不返回导出。相对路径同样以当前模块的位置为基准。
    pub async fn include(
        &self,
        url: &str,
    ) -> Result<(), LoadError> {
        self.loader
            .require_from(self.id, url, RequestMode::Include)
            .await
            .map(drop)
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("id", &self.id)
            .field("exports", &self.exports)
            .finish()
    }
}

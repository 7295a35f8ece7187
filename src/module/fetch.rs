//! 模块取回与执行
//!
//! 加载器只通过 [`ModuleFetcher`] 接触外部世界：给定解析后的位置，异步取回
//! 一个模块主体。主体是一个异步函数，接收 [`ModuleContext`]，在其中调用
//! `require` 并写入自己的导出。
//!
//! - [`MemoryFetcher`] - 内存中的位置 -> 主体表，记录每次尝试
//! - [`ManifestFetcher`] - 从文件系统读取 JSON 清单模块

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde::Deserialize;
use serde_json::Value;

use super::{FetchError, LoadError};
use crate::loader::ModuleContext;

/// 模块主体
pub type ModuleBody = Rc<dyn Fn(ModuleContext) -> LocalBoxFuture<'static, Result<(), LoadError>>>;

/// 把异步闭包包装成 [`ModuleBody`]
///
/// ```no_run
/// use stratum::module::module_body;
///
/// let body = module_body(|ctx| async move {
///     let util = ctx.require("./util").await?;
///     ctx.exports().set("version", util.get("version").unwrap_or_default());
///     Ok(())
/// });
/// ```
pub fn module_body<F, Fut>(body: F) -> ModuleBody
where
    F: Fn(ModuleContext) -> Fut + 'static,
    Fut: Future<Output = Result<(), LoadError>> + 'static,
{
    Rc::new(move |ctx| body(ctx).boxed_local())
}

/// 取回模块主体的外部原语
pub trait ModuleFetcher {
    /// 取回位于 `location` 的模块主体
    fn fetch(
        &self,
        location: &str,
    ) -> LocalBoxFuture<'static, Result<ModuleBody, FetchError>>;
}

impl<T: ModuleFetcher + ?Sized> ModuleFetcher for Rc<T> {
    fn fetch(
        &self,
        location: &str,
    ) -> LocalBoxFuture<'static, Result<ModuleBody, FetchError>> {
        (**self).fetch(location)
    }
}

#[derive(Default)]
struct MemoryFetcherInner {
    bodies: HashMap<String, ModuleBody>,
    attempts: Vec<String>,
}

/// 内存模块表
///
/// 克隆出的句柄共享同一张表，因此测试可以在交给加载器之后继续检查尝试记录。
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    inner: Rc<RefCell<MemoryFetcherInner>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 `location` 注册模块主体
    pub fn insert(
        &self,
        location: impl Into<String>,
        body: ModuleBody,
    ) -> &Self {
        self.inner.borrow_mut().bodies.insert(location.into(), body);
        self
    }

    /// 注册一个只导出固定值、没有依赖的模块
    pub fn insert_value(
        &self,
        location: impl Into<String>,
        exports: Value,
    ) -> &Self {
        let body = module_body(move |ctx| {
            let exports = exports.clone();
            async move {
                if let Value::Object(map) = exports {
                    for (name, value) in map {
                        ctx.exports().set(name, value);
                    }
                }
                Ok(())
            }
        });
        self.insert(location, body)
    }

    /// 依次被尝试过的位置
    pub fn attempts(&self) -> Vec<String> {
        self.inner.borrow().attempts.clone()
    }

    /// `location` 被尝试的次数
    pub fn attempts_at(
        &self,
        location: &str,
    ) -> usize {
        self.inner
            .borrow()
            .attempts
            .iter()
            .filter(|l| l.as_str() == location)
            .count()
    }
}

impl ModuleFetcher for MemoryFetcher {
    fn fetch(
        &self,
        location: &str,
    ) -> LocalBoxFuture<'static, Result<ModuleBody, FetchError>> {
        let found = {
            let mut inner = self.inner.borrow_mut();
            inner.attempts.push(location.to_string());
            inner.bodies.get(location).cloned()
        };
        let location = location.to_string();
        async move {
            // 让出一次，模拟真实的异步取回
            tokio::task::yield_now().await;
            found.ok_or(FetchError::NotFound { location })
        }
        .boxed_local()
    }
}

/// 清单模块格式
///
/// ```json
/// { "requires": ["./b", "util"], "exports": { "name": "a" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModuleManifest {
    /// 按顺序 require 的模块
    #[serde(default)]
    pub requires: Vec<String>,
    /// 在 require 之前写入的导出
    #[serde(default)]
    pub exports: serde_json::Map<String, Value>,
    /// 设置后主体运行失败（用于演示回退路径）
    #[serde(default)]
    pub error: Option<String>,
}

impl ModuleManifest {
    /// 把清单转换为模块主体
    ///
    /// 导出先写入，再依次 require 依赖，每个依赖的导出快照记录在 `$deps` 下。
    pub fn into_body(
        self,
        location: String,
    ) -> ModuleBody {
        let manifest = Rc::new(self);
        module_body(move |ctx| {
            let manifest = manifest.clone();
            let location = location.clone();
            async move {
                for (name, value) in &manifest.exports {
                    ctx.exports().set(name.clone(), value.clone());
                }
                if let Some(message) = &manifest.error {
                    return Err(LoadError::execution(location, message.clone()));
                }
                let mut deps = serde_json::Map::new();
                for request in &manifest.requires {
                    let exports = ctx.require(request).await?;
                    deps.insert(request.clone(), exports.snapshot());
                }
                if !deps.is_empty() {
                    ctx.exports().set("$deps", Value::Object(deps));
                }
                Ok(())
            }
        })
    }
}

/// 从文件系统读取清单模块
///
/// 位置按文件路径解释；设置了 `root` 时相对位置拼接在它之后。
#[derive(Debug, Clone, Default)]
pub struct ManifestFetcher {
    root: Option<PathBuf>,
}

impl ManifestFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 相对位置以 `root` 为根目录
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(
        &self,
        location: &str,
    ) -> PathBuf {
        match &self.root {
            Some(root) => root.join(location.trim_start_matches('/')),
            None => PathBuf::from(location),
        }
    }
}

impl ModuleFetcher for ManifestFetcher {
    fn fetch(
        &self,
        location: &str,
    ) -> LocalBoxFuture<'static, Result<ModuleBody, FetchError>> {
        let path = self.path_for(location);
        let location = location.to_string();
        async move {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(FetchError::NotFound { location });
                }
                Err(e) => {
                    return Err(FetchError::Io {
                        location,
                        message: e.to_string(),
                    });
                }
            };
            let manifest: ModuleManifest =
                serde_json::from_str(&content).map_err(|e| FetchError::Parse {
                    location: location.clone(),
                    message: e.to_string(),
                })?;
            tracing::trace!(%location, requires = manifest.requires.len(), "parsed manifest");
            Ok(manifest.into_body(location))
        }
        .boxed_local()
    }
}

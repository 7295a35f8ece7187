//! 模块导出对象
//!
//! `Exports` 是一个共享的、可变的命名空间句柄。模块在运行过程中写入自己的
//! 句柄；循环依赖被打破时，调用方提前拿到的也是同一个句柄，因此之后写入的
//! 值对它同样可见（延迟绑定的反向引用）。

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

/// 模块导出命名空间（name -> value），保持插入顺序
#[derive(Clone, Default)]
pub struct Exports {
    inner: Rc<RefCell<IndexMap<String, Value>>>,
}

impl Exports {
    /// 创建空的导出对象
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个导出项，返回旧值
    pub fn set(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.inner.borrow_mut().insert(name.into(), value.into())
    }

    /// 读取导出项
    pub fn get(
        &self,
        name: &str,
    ) -> Option<Value> {
        self.inner.borrow().get(name).cloned()
    }

    /// 检查是否有指定的导出项
    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.inner.borrow().contains_key(name)
    }

    /// 获取所有导出项名称（按写入顺序）
    pub fn names(&self) -> Vec<String> {
        self.inner.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    /// 把另一个导出对象的全部条目合并进来
    ///
    /// 两个句柄指向同一个命名空间时什么也不做。
    pub fn merge_from(
        &self,
        other: &Exports,
    ) {
        if self.ptr_eq(other) {
            return;
        }
        let entries: Vec<(String, Value)> = other
            .inner
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut inner = self.inner.borrow_mut();
        for (name, value) in entries {
            inner.insert(name, value);
        }
    }

    /// 当前内容的 JSON 快照
    pub fn snapshot(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .inner
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }

    /// 两个句柄是否指向同一个命名空间
    pub fn ptr_eq(
        &self,
        other: &Exports,
    ) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Exports {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_map().entries(self.inner.borrow().iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Exports
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let exports = Exports::new();
        for (name, value) in iter {
            exports.set(name, value);
        }
        exports
    }
}

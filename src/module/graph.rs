//! 模块图（模块缓存 + 依赖边）
//!
//! 依赖图没有独立的数据结构：边就是每个 [`ModuleRef`] 上的 `dependencies`。
//! `ModuleGraph` 持有全部 `ModuleRef`，并维护两个索引：
//!
//! - 解析后的位置 -> 模块（重试换路径时随之移动）
//! - `define` 注册的名字 -> 模块
//!
//! 图只增长：打破循环只授予"允许部分导出"的权限，不删除边。

use std::collections::HashMap;

use super::id::{ModuleId, ModuleIdGenerator};
use super::module_ref::{ModuleKind, ModuleRef, ModuleState};
use super::resolver::resolve_path;
use super::LoadError;

/// 模块缓存，键为解析后的身份
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: Vec<ModuleRef>,
    ids: ModuleIdGenerator,
    by_location: HashMap<String, ModuleId>,
    defined: HashMap<String, ModuleId>,
}

impl ModuleGraph {
    /// 创建空的模块图
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 获取模块
    pub fn get(
        &self,
        id: ModuleId,
    ) -> Option<&ModuleRef> {
        self.modules.get(id.value())
    }

    pub(crate) fn get_mut(
        &mut self,
        id: ModuleId,
    ) -> Option<&mut ModuleRef> {
        self.modules.get_mut(id.value())
    }

    /// 全部模块，按创建顺序
    pub fn iter(&self) -> impl Iterator<Item = &ModuleRef> {
        self.modules.iter()
    }

    /// 模块名（找不到时用 id 代替）
    pub fn name_of(
        &self,
        id: ModuleId,
    ) -> String {
        self.get(id)
            .map(|m| m.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    /// 按解析后的位置查找
    pub fn find_by_location(
        &self,
        location: &str,
    ) -> Option<ModuleId> {
        self.by_location.get(location).copied()
    }

    /// 按 `define` 注册的名字查找
    pub fn find_defined(
        &self,
        name: &str,
    ) -> Option<ModuleId> {
        self.defined.get(name).copied()
    }

    /// 查找同名、尚未开始加载的脚本模块（`define` 可以接管它）
    pub(crate) fn find_pending_script(
        &self,
        name: &str,
    ) -> Option<ModuleId> {
        self.modules
            .iter()
            .find(|m| {
                m.kind() == ModuleKind::Script
                    && m.name() == name
                    && matches!(m.state(), ModuleState::Unresolved | ModuleState::Queued)
                    && m.attempts() == 0
            })
            .map(ModuleRef::id)
    }

    /// 按任意名字查找：先查 `define` 名字，再查位置，最后查请求名
    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<ModuleId> {
        self.find_defined(name)
            .or_else(|| self.find_by_location(name))
            .or_else(|| self.modules.iter().find(|m| m.name() == name).map(ModuleRef::id))
    }

    /// 插入需要取回的脚本模块，并解析出第一个候选位置
    ///
    /// 候选路径为空时返回 `UnknownModule`。
    pub(crate) fn insert_script(
        &mut self,
        name: &str,
        candidate_paths: Vec<String>,
        requester: Option<String>,
    ) -> Result<ModuleId, LoadError> {
        if candidate_paths.is_empty() {
            return Err(LoadError::UnknownModule {
                module: name.to_string(),
                requester,
            });
        }
        let id = self.ids.generate();
        self.modules.push(ModuleRef::script(id, name, candidate_paths));
        self.advance_candidate(id)?;
        Ok(id)
    }

    /// 插入 `define` 模块；有名字时登记到名字索引
    pub(crate) fn insert_defined(
        &mut self,
        name: Option<&str>,
    ) -> ModuleId {
        let id = self.ids.generate();
        let module = match name {
            Some(name) => {
                self.defined.insert(name.to_string(), id);
                self.by_location.insert(name.to_string(), id);
                ModuleRef::defined(id, name)
            }
            None => ModuleRef::anonymous(id, ModuleKind::Defined),
        };
        self.modules.push(module);
        id
    }

    /// 插入顶层 `require` 的入口调用方
    pub(crate) fn insert_entry(&mut self) -> ModuleId {
        let id = self.ids.generate();
        let mut entry = ModuleRef::anonymous(id, ModuleKind::Entry);
        entry.advance(ModuleState::Loading);
        self.modules.push(entry);
        id
    }

    /// 让一个未开始的脚本模块改由 `define` 提供
    pub(crate) fn adopt_as_defined(
        &mut self,
        id: ModuleId,
    ) {
        let Some(module) = self.modules.get_mut(id.value()) else {
            return;
        };
        let name = module.name().to_string();
        module.convert_to_defined();
        let old = module.set_location(Some(name.clone()));
        if let Some(old) = old {
            self.by_location.remove(&old);
        }
        self.by_location.insert(name.clone(), id);
        self.defined.insert(name, id);
    }

    /// 取下一个候选路径并重新计算位置
    ///
    /// 位置索引从旧位置移动到新位置。没有剩余候选时返回 `Ok(false)`。
    pub(crate) fn advance_candidate(
        &mut self,
        id: ModuleId,
    ) -> Result<bool, LoadError> {
        let Some(module) = self.modules.get_mut(id.value()) else {
            return Ok(false);
        };
        let Some(base) = module.pop_candidate() else {
            return Ok(false);
        };
        let location = resolve_path(module.name(), &base)?;
        if let Some(old) = module.set_location(Some(location.clone())) {
            if self.by_location.get(&old) == Some(&id) {
                self.by_location.remove(&old);
            }
        }
        self.by_location.insert(location, id);
        Ok(true)
    }

    /// 记录依赖边 `from -> to`
    ///
    /// 自依赖是硬错误。边已存在时返回 `Ok(false)`。
    pub(crate) fn add_edge(
        &mut self,
        from: ModuleId,
        to: ModuleId,
    ) -> Result<bool, LoadError> {
        if from == to {
            return Err(LoadError::SelfDependency {
                module: self.name_of(from),
            });
        }
        let from_is_entry = match self.get(from) {
            Some(module) => module.kind() == ModuleKind::Entry,
            None => return Ok(false),
        };
        let added = match self.get_mut(from) {
            Some(module) => module.add_dependency(to),
            None => false,
        };
        if added {
            if let Some(target) = self.get_mut(to) {
                target.add_requester(from, !from_is_entry);
            }
        }
        Ok(added)
    }

    /// 依赖是否全部满足（已加载，或在允许部分导出的集合中）
    pub fn is_ready(
        &self,
        id: ModuleId,
    ) -> bool {
        let Some(module) = self.get(id) else {
            return false;
        };
        module.dependencies().iter().all(|&dep| {
            module.is_allowed_partial(dep) || self.get(dep).map(ModuleRef::is_loaded).unwrap_or(false)
        })
    }

    /// 授予 `holder` 提前使用 `dependency` 导出的权限
    pub(crate) fn allow_partial(
        &mut self,
        holder: ModuleId,
        dependency: ModuleId,
    ) -> bool {
        match self.get_mut(holder) {
            Some(module) => module.allow_partial(dependency),
            None => false,
        }
    }
}

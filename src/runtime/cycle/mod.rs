//! 循环依赖检测与打破
//!
//! 只在调度器停滞时运行（队列非空，但没有任何模块就绪，也没有正在加载的模块）。
//!
//! 从种子模块出发沿依赖边深度优先遍历，维护当前路径；再次遇到路径上的节点时，
//! 路径中从该节点到栈顶的片段就是一个环。遍历不会在第一个环处停止。
//!
//! 去重：把每个环旋转到以最小 [`ModuleId`] 开头再比较，互为旋转的环视为同一个。
//!
//! 打破策略：对每个不同的环 `[n0, n1, ..., nk]`，允许最后发现的 `nk`
//! 提前使用 `n0` 的导出。每个环只打破一条边。

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::module::{ModuleGraph, ModuleId};

#[cfg(test)]
mod tests;

/// 一个按发现顺序排列的环
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    members: Vec<ModuleId>,
}

impl Cycle {
    pub fn new(members: Vec<ModuleId>) -> Self {
        Self { members }
    }

    /// 成员，按发现顺序
    pub fn members(&self) -> &[ModuleId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// 旋转到以最小 id 开头的形式，用于去重
    pub fn canonical(&self) -> Vec<ModuleId> {
        let Some(start) = self
            .members
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| **id)
            .map(|(index, _)| index)
        else {
            return Vec::new();
        };
        let mut rotated = self.members[start..].to_vec();
        rotated.extend_from_slice(&self.members[..start]);
        rotated
    }

    /// 要打破的边 `(持有者, 依赖)`：最后一个成员接受第一个成员的部分导出
    pub fn break_edge(&self) -> Option<(ModuleId, ModuleId)> {
        match (self.members.last(), self.members.first()) {
            (Some(&last), Some(&first)) => Some((last, first)),
            _ => None,
        }
    }

    /// 成员名，用于错误信息和事件
    pub fn names(
        &self,
        graph: &ModuleGraph,
    ) -> Vec<String> {
        self.members.iter().map(|&id| graph.name_of(id)).collect()
    }
}

impl fmt::Display for Cycle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let parts: Vec<String> = self.members.iter().map(ModuleId::to_string).collect();
        write!(f, "{}", parts.join(" -> "))
    }
}

/// 环检测器
///
/// 已加载或已失败的模块不会阻塞任何人，遍历不进入它们；已被授予部分导出权限的
/// 边已经满足，也不再跟随。
pub struct CycleResolver<'g> {
    graph: &'g ModuleGraph,
    /// 当前 DFS 路径
    path: Vec<ModuleId>,
    /// 路径上的节点 -> 在路径中的位置
    on_path: HashMap<ModuleId, usize>,
    /// 已发现的环（去重后，按发现顺序）
    cycles: Vec<Cycle>,
    /// 已发现环的规范形式
    seen: HashSet<Vec<ModuleId>>,
}

impl<'g> CycleResolver<'g> {
    /// 创建检测器
    pub fn new(graph: &'g ModuleGraph) -> Self {
        Self {
            graph,
            path: Vec::new(),
            on_path: HashMap::new(),
            cycles: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// 找出从 `seed` 可达的所有不同的环
    pub fn find_cycles(
        mut self,
        seed: ModuleId,
    ) -> Vec<Cycle> {
        self.walk(seed);
        self.cycles
    }

    fn walk(
        &mut self,
        node: ModuleId,
    ) {
        let Some(module) = self.graph.get(node) else {
            return;
        };
        if module.state().is_terminal() {
            return;
        }

        self.on_path.insert(node, self.path.len());
        self.path.push(node);

        for &dep in module.dependencies() {
            if module.is_allowed_partial(dep) {
                continue;
            }
            match self.on_path.get(&dep) {
                Some(&start) => self.record(start),
                None => self.walk(dep),
            }
        }

        self.path.pop();
        self.on_path.remove(&node);
    }

    /// 记录路径上从 `start` 到栈顶的环
    fn record(
        &mut self,
        start: usize,
    ) {
        let cycle = Cycle::new(self.path[start..].to_vec());
        if self.seen.insert(cycle.canonical()) {
            tracing::trace!(%cycle, "discovered cycle");
            self.cycles.push(cycle);
        }
    }
}

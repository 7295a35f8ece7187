//! 模块加载错误

/// 取回模块主体时的错误
///
/// 所有变体都可以用下一个候选路径重试。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// 该位置没有资源
    #[error("no module at '{location}'")]
    NotFound { location: String },

    /// 读取失败
    #[error("failed to read '{location}': {message}")]
    Io { location: String, message: String },

    /// 内容无法解析为模块
    #[error("failed to parse '{location}': {message}")]
    Parse { location: String, message: String },
}

impl FetchError {
    /// 出错的位置
    pub fn location(&self) -> &str {
        match self {
            FetchError::NotFound { location }
            | FetchError::Io { location, .. }
            | FetchError::Parse { location, .. } => location,
        }
    }
}

/// 模块系统错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// 模块依赖自身
    #[error("module cannot depend upon itself, in: '{module}'")]
    SelfDependency { module: String },

    /// 没有任何候选路径可供尝试
    #[error("unknown module '{module}'{}", from_suffix(.requester))]
    UnknownModule {
        module: String,
        requester: Option<String>,
    },

    /// 所有候选路径都已失败
    #[error("failed to load module '{module}'{} after {attempts} attempt(s): {reason}", from_suffix(.requester))]
    LoadFailure {
        module: String,
        requester: Option<String>,
        attempts: usize,
        reason: String,
    },

    /// 循环依赖（仅在 throw_on_cycle 打开时出现）
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// 相对路径越过了根目录
    #[error("invalid relative path '{path}', cannot discover parent of '{base}'")]
    InvalidPath { path: String, base: String },

    /// 取回模块失败（可重试）
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// 模块主体运行失败（可重试）
    #[error("module at '{location}' failed: {message}")]
    Execution { location: String, message: String },

    /// 重复定义已经开始加载的模块
    #[error("module '{module}' is already defined")]
    AlreadyDefined { module: String },

    /// 队列中没有可加载的模块，也找不到可以打破的循环
    #[error("dependency resolution stalled, pending: {}", .pending.join(", "))]
    Deadlock { pending: Vec<String> },

    /// 挂起的调用方在恢复前被丢弃
    #[error("loading of '{module}' was aborted")]
    Aborted { module: String },
}

fn from_suffix(requester: &Option<String>) -> String {
    match requester {
        Some(name) => format!(" (from '{}')", name),
        None => String::new(),
    }
}

impl LoadError {
    /// 模块主体运行失败
    pub fn execution(
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        LoadError::Execution {
            location: location.into(),
            message: message.into(),
        }
    }

    /// 是否可以换下一个候选路径重试
    ///
    /// 只有取回失败和模块自身的运行失败可以重试；模块主体用 `?` 传出的
    /// 依赖错误对该模块是致命的。
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoadError::Fetch(_) | LoadError::Execution { .. })
    }
}

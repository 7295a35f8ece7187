//! 模块路径解析
//!
//! 把请求字符串和一个基础路径拼接成模块的绝对位置，并处理 `.`/`..` 段。
//!
//! # 规则
//!
//! 1. 以 `.` 开头的请求是相对请求，基础路径是发起请求的模块自己的位置
//! 2. 其它请求依次尝试加载器配置的搜索路径
//! 3. 带协议的地址（`scheme://...`）原样返回
//! 4. 基础路径的最后一段视为文件名，拼接前会被丢弃
//! 5. `..` 越过根目录是硬错误

use super::LoadError;

/// 是否是相对请求（`./x`、`../x`）
pub fn is_relative(request: &str) -> bool {
    request.starts_with('.')
}

/// 去掉地址末尾的查询参数
pub fn clean(url: &str) -> &str {
    match url.find('?') {
        Some(index) => &url[..index],
        None => url,
    }
}

/// 为模块 id 补上扩展名（已经带有时不重复添加）
pub fn with_extension(
    id: &str,
    extension: &str,
) -> String {
    let id = clean(id);
    if extension.is_empty() || id.ends_with(extension) {
        id.to_string()
    } else {
        format!("{}{}", id, extension)
    }
}

/// 计算 `url` 相对 `base` 的绝对位置
///
/// # 示例
///
/// ```
/// use stratum::module::resolver::resolve_path;
///
/// assert_eq!(resolve_path("util.js", "/lib/").unwrap(), "/lib/util.js");
/// assert_eq!(resolve_path("../b.js", "/lib/sub/a.js").unwrap(), "/lib/b.js");
/// assert!(resolve_path("../../x.js", "/lib/").is_err());
/// ```
pub fn resolve_path(
    url: &str,
    base: &str,
) -> Result<String, LoadError> {
    let url = clean(url);
    if url.contains("://") {
        return Ok(url.to_string());
    }

    let base = clean(base);
    let root_len = root_len(base);

    let mut segments: Vec<&str> = base.split('/').collect();
    // "http://host" 这种没有路径部分的地址没有文件名可丢
    if segments.len() > root_len {
        segments.pop();
    }

    if url.starts_with('/') {
        // 绝对路径：保留协议和主机，丢弃其余部分
        if root_len <= 1 {
            return Ok(url.to_string());
        }
        segments.truncate(root_len);
        return Ok(format!("{}{}", segments.join("/"), url));
    }

    for part in url.split('/') {
        match part {
            ".." => {
                if segments.len() <= root_len {
                    return Err(LoadError::InvalidPath {
                        path: url.to_string(),
                        base: base.to_string(),
                    });
                }
                segments.pop();
            }
            "." => {}
            other => segments.push(other),
        }
    }

    Ok(segments.join("/"))
}

/// 不能被 `..` 弹出的前缀段数
///
/// - `scheme://host/...` -> 3（`scheme:`、空段、`host`）
/// - `/...` -> 1（根）
/// - 其它相对基础路径 -> 0
fn root_len(base: &str) -> usize {
    if base.contains("://") {
        3
    } else if base.starts_with('/') {
        1
    } else {
        0
    }
}

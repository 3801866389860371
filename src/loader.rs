//! 模板来源：路径解析与文件系统加载器

use crate::error::Result;
use std::io;
use std::path::PathBuf;

/// 以 `base` 所在目录为起点解析 `file`，折叠其中的 `.` 和 `..`
///
/// 开头无法再折叠的 `..` 会保留下来。
pub fn relative_path(base: &str, file: &str) -> String {
    let mut segments: Vec<&str> = base.split('/').collect();
    segments.pop();
    segments.extend(file.split('/'));

    let mut resolved: Vec<&str> = Vec::new();
    for segment in segments {
        match segment {
            "." => {}
            ".." if resolved.last().is_some_and(|last| *last != "..") => {
                resolved.pop();
            }
            _ => resolved.push(segment),
        }
    }
    resolved.join("/")
}

/// 从 `root` 目录按名称读取模板；文件不存在时返回 `None`
///
/// 越出 `root` 的名称（以 `..` 开头或是绝对路径）视为不存在。
pub fn path_loader(root: impl Into<PathBuf>) -> impl Fn(&str) -> Result<Option<String>> + Send + Sync + 'static {
    let root = root.into();
    move |name: &str| {
        if name.starts_with('/') || name.split('/').any(|s| s == "..") {
            return Ok(None);
        }
        let path = root.join(name);
        match std::fs::read_to_string(&path) {
            Ok(source) => {
                tracing::debug!("读取模板文件: {}", path.display());
                Ok(Some(source))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

use crate::config::{CONFIG_FILE, Config};
use crate::loader::relative_path;
use crate::syntax::expression::Instr;
use crate::syntax::tag::Tag;
use crate::syntax::{Directive, Node};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

pub struct CheckResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// 成功编译的模板数
    pub checked: usize,
}

/// 检查项目：配置能否解析，模板目录下每个模板能否编译，继承目标是否存在
pub fn run(project_root: &Path) -> Result<CheckResult> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let config = check_config(project_root, &mut errors, &mut warnings);
    let checked = check_templates(project_root, &config, &mut errors, &mut warnings)?;

    Ok(CheckResult {
        errors,
        warnings,
        checked,
    })
}

fn check_config(root: &Path, errors: &mut Vec<String>, warnings: &mut Vec<String>) -> Config {
    if !root.join(CONFIG_FILE).exists() {
        warnings.push(format!("缺少 {CONFIG_FILE}，使用默认配置"));
    }
    match Config::load(root) {
        Ok(config) => config,
        Err(e) => {
            errors.push(format!("{e}"));
            Config::default()
        }
    }
}

fn check_templates(
    root: &Path,
    config: &Config,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> Result<usize> {
    let dir = config.templates_dir(root);
    if !dir.is_dir() {
        errors.push(format!("模板目录 {}/ 不存在", config.templates.root));
        return Ok(0);
    }

    let mut sources = BTreeMap::new();
    collect_templates(&dir, &dir, &config.templates.extension, &mut sources)?;
    if sources.is_empty() {
        warnings.push(format!(
            "模板目录 {}/ 中没有 .{} 模板",
            config.templates.root, config.templates.extension
        ));
        return Ok(0);
    }

    let env = config.environment(root);
    let mut checked = 0;
    for (name, source) in &sources {
        let template = match env.compile_named(name, source) {
            Ok(template) => template,
            Err(e) => {
                errors.push(format!("{name}: {e}"));
                continue;
            }
        };
        checked += 1;

        // 只能静态检查字符串字面量形式的继承目标
        for (keyword, path) in literal_references(template.nodes()) {
            let target = relative_path(name, &path);
            if !sources.contains_key(&target) {
                errors.push(format!("{name}: {keyword} 的模板 '{target}' 不存在"));
            }
        }
    }
    Ok(checked)
}

/// 递归收集模板，名称为相对模板目录、以 `/` 分隔的路径
fn collect_templates(
    base: &Path,
    dir: &Path,
    extension: &str,
    out: &mut BTreeMap<String, String>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_templates(base, &path, extension, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Ok(rel) = path.strip_prefix(base) else {
            continue;
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.insert(name, std::fs::read_to_string(&path)?);
    }
    Ok(())
}

fn literal_references(nodes: &[Node]) -> Vec<(&'static str, String)> {
    let mut refs = Vec::new();
    for node in nodes {
        let Node::Directive(Directive { tag, body, .. }) = node else {
            continue;
        };
        let (keyword, expr) = match tag {
            Tag::Extends(expr) => ("extends", expr),
            Tag::Use(expr) => ("use", expr),
            _ => {
                refs.extend(literal_references(body));
                continue;
            }
        };
        if let [Instr::String(path)] = expr.instrs.as_slice() {
            refs.push((keyword, path.clone()));
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn reports_compile_errors_and_missing_parents() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "templates/base.twig", "{% block body %}{% endblock %}");
        write(root, "templates/pages/ok.twig", "{% extends \"../base.twig\" %}");
        write(root, "templates/pages/bad.twig", "{% if x %}");
        write(root, "templates/pages/orphan.twig", "{% extends 'nope.twig' %}");
        write(root, "templates/notes.txt", "{% if %}");

        let result = run(root).unwrap();
        assert_eq!(result.checked, 3);
        assert_eq!(result.errors.len(), 2, "{:?}", result.errors);
        assert!(result.errors.iter().any(|e| e.starts_with("pages/bad.twig")));
        assert!(result.errors.iter().any(|e| e.contains("pages/nope.twig")));
        assert!(result.warnings.iter().any(|w| w.contains(CONFIG_FILE)));
    }

    #[test]
    fn missing_template_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(dir.path()).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.checked, 0);
    }
}

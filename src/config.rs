use crate::environment::Environment;
use crate::loader::path_loader;
use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "twine.toml";

/// twine.toml，缺失时使用默认值
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct TemplatesConfig {
    /// 模板目录，相对项目根目录
    #[serde(default = "default_templates_root")]
    pub root: String,
    /// `twine check` 扫描的模板扩展名
    #[serde(default = "default_extension")]
    pub extension: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RenderConfig {
    /// 为 true 时引用未定义的变量报错
    #[serde(default)]
    pub strict_variables: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// text 或 json
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Config {
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("读取 {CONFIG_FILE} 失败：{}", e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("解析 {CONFIG_FILE} 失败：{}", e))?;
        Ok(config)
    }

    pub fn templates_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.templates.root)
    }

    /// 按配置创建环境：内置能力 + 模板目录加载器
    pub fn environment(&self, project_root: &Path) -> Environment {
        let mut env = Environment::new();
        env.set_loader(path_loader(self.templates_dir(project_root)));
        env.set_strict_variables(self.render.strict_variables);
        env
    }
}

// 默认值函数
fn default_templates_root() -> String { "templates".into() }
fn default_extension() -> String { "twig".into() }
fn default_log_level() -> String { "warn".into() }
fn default_log_format() -> String { "text".into() }

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            root: default_templates_root(),
            extension: default_extension(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

//! 渲染环境：过滤器 / 测试 / 指令注册表，模板来源与编译缓存

use crate::context::Context;
use crate::error::{Result, TemplateError};
use crate::loader::relative_path;
use crate::syntax::tag::{TagDefinition, TagRegistry};
use crate::template::Template;
use crate::value::Value;
use crate::{filters, predicates, syntax};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

pub type FilterFn = Arc<dyn Fn(Value, &[Value]) -> Result<Value> + Send + Sync>;
pub type TestFn = Arc<dyn Fn(&Value, &[Value]) -> Result<bool> + Send + Sync>;
pub type LoaderFn = Box<dyn Fn(&str) -> Result<Option<String>> + Send + Sync>;

pub struct Environment {
    filters: HashMap<String, FilterFn>,
    tests: HashMap<String, TestFn>,
    tags: TagRegistry,
    loader: Option<LoaderFn>,
    /// 已编译的模板：add_template 注册的和从 loader 加载后缓存的
    templates: Mutex<HashMap<String, Arc<Template>>>,
    strict_variables: bool,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut filters: Vec<_> = self.filters.keys().collect();
        filters.sort();
        let mut tests: Vec<_> = self.tests.keys().collect();
        tests.sort();
        f.debug_struct("Environment")
            .field("filters", &filters)
            .field("tests", &tests)
            .field("tags", &self.tags)
            .field("loader", &self.loader.is_some())
            .field("strict_variables", &self.strict_variables)
            .finish_non_exhaustive()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// 带内置过滤器和测试的环境
    pub fn new() -> Self {
        let mut env = Self::empty();
        filters::register_filters(&mut env);
        predicates::register_tests(&mut env);
        env
    }

    /// 只有内置指令，没有任何过滤器和测试
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
            tests: HashMap::new(),
            tags: TagRegistry::builtin(),
            loader: None,
            templates: Mutex::new(HashMap::new()),
            strict_variables: false,
        }
    }

    /// 注册过滤器，同名时覆盖
    pub fn add_filter<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(f));
    }

    /// 注册测试，同名时覆盖
    pub fn add_test<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &[Value]) -> Result<bool> + Send + Sync + 'static,
    {
        self.tests.insert(name.into(), Arc::new(f));
    }

    /// 注册自定义指令，同名指令只能注册一次
    pub fn add_directive(&mut self, def: TagDefinition) -> Result<()> {
        self.tags.register(def)
    }

    pub fn set_loader<F>(&mut self, loader: F)
    where
        F: Fn(&str) -> Result<Option<String>> + Send + Sync + 'static,
    {
        self.loader = Some(Box::new(loader));
    }

    pub fn set_strict_variables(&mut self, strict: bool) {
        self.strict_variables = strict;
    }

    pub fn strict_variables(&self) -> bool {
        self.strict_variables
    }

    pub fn filter(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn test(&self, name: &str) -> Option<&TestFn> {
        self.tests.get(name)
    }

    /// 编译匿名模板
    pub fn compile(&self, source: &str) -> Result<Template> {
        Ok(Template::new(None, syntax::parse(source, &self.tags)?))
    }

    pub fn compile_named(&self, name: &str, source: &str) -> Result<Template> {
        Ok(Template::new(
            Some(name.to_string()),
            syntax::parse(source, &self.tags)?,
        ))
    }

    /// 以名称注册模板源码，立即编译
    pub fn add_template(&mut self, name: &str, source: &str) -> Result<()> {
        let template = self.compile_named(name, source)?;
        self.add_compiled(name, template);
        Ok(())
    }

    /// 以名称注册已编译的模板
    pub fn add_compiled(&mut self, name: &str, template: Template) {
        self.cache().insert(name.to_string(), Arc::new(template.with_name(name)));
    }

    /// 按名称取模板：先查已注册/已缓存的模板，再调用 loader
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>> {
        if let Some(template) = self.cache().get(name) {
            return Ok(Arc::clone(template));
        }

        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| TemplateError::NoLoader(name.to_string()))?;
        let source = loader(name)?.ok_or_else(|| TemplateError::TemplateNotFound(name.to_string()))?;
        tracing::debug!("加载模板: {name}");

        let template = Arc::new(self.compile_named(name, &source)?);
        self.cache()
            .insert(name.to_string(), Arc::clone(&template));
        Ok(template)
    }

    pub fn render(&self, name: &str, ctx: &Context) -> Result<String> {
        self.get_template(name)?.render(self, ctx)
    }

    pub fn render_str(&self, source: &str, ctx: &Context) -> Result<String> {
        self.compile(source)?.render(self, ctx)
    }

    /// `extends` / `use` 的目标：匿名模板直接使用给定路径
    pub(crate) fn resolve_path(&self, base: Option<&str>, path: &str) -> String {
        relative_path(base.unwrap_or(""), path)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Template>>> {
        self.templates.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::TagCall;
    use crate::syntax::tag::{TagHandler, TagOutcome};
    use regex::Regex;

    #[test]
    fn custom_filter_and_test() {
        let mut env = Environment::empty();
        env.add_filter("twice", |v: Value, _: &[Value]| Ok(Value::from(format!("{v}{v}"))));
        env.add_test("short", |v: &Value, args: &[Value]| {
            let limit = args.first().map_or(3.0, Value::to_number);
            Ok((v.to_string().chars().count() as f64) < limit)
        });
        let ctx = Context::new().with("w", "ab");
        assert_eq!(env.render_str("{{ w|twice }}", &ctx).unwrap(), "abab");
        assert_eq!(env.render_str("{{ w is short }}", &ctx).unwrap(), "true");
        assert_eq!(env.render_str("{{ w is short(2) }}", &ctx).unwrap(), "false");
        // 空环境没有内置过滤器
        assert!(env.render_str("{{ w|upper }}", &ctx).is_err());
    }

    #[test]
    fn missing_template_without_loader() {
        let env = Environment::new();
        assert!(matches!(
            env.get_template("nope").unwrap_err(),
            TemplateError::NoLoader(name) if name == "nope"
        ));
    }

    #[test]
    fn loader_results_are_cached() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut env = Environment::new();
        env.set_loader(move |name| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok((name == "hello").then(|| "hi {{ who }}".to_string()))
        });
        let ctx = Context::new().with("who", "you");
        assert_eq!(env.render("hello", &ctx).unwrap(), "hi you");
        assert_eq!(env.render("hello", &ctx).unwrap(), "hi you");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            env.render("other", &ctx).unwrap_err(),
            TemplateError::TemplateNotFound(_)
        ));
    }

    struct Repeat;

    impl TagHandler for Repeat {
        fn render(&self, call: &mut TagCall<'_, '_>) -> Result<TagOutcome> {
            let times = call.args().first().map_or(0.0, Value::to_number) as usize;
            let mut output = String::new();
            for _ in 0..times {
                output.push_str(&call.render_body()?);
            }
            Ok(TagOutcome {
                output,
                chain: times == 0,
            })
        }
    }

    struct EndRepeat;

    impl TagHandler for EndRepeat {
        fn render(&self, _call: &mut TagCall<'_, '_>) -> Result<TagOutcome> {
            Ok(TagOutcome::default())
        }
    }

    #[test]
    fn custom_directive_renders_its_body() {
        let mut env = Environment::new();
        env.add_directive(TagDefinition::new(
            "repeat",
            Regex::new(r"^repeat\s+(.+)$").unwrap(),
            &["endrepeat"],
            true,
            Repeat,
        ))
        .unwrap();
        env.add_directive(TagDefinition::new(
            "endrepeat",
            Regex::new(r"^endrepeat$").unwrap(),
            &[],
            false,
            EndRepeat,
        ))
        .unwrap();

        let ctx = Context::new().with("n", 3);
        assert_eq!(
            env.render_str("{% repeat n %}ab{% endrepeat %}", &ctx).unwrap(),
            "ababab"
        );
        assert!(matches!(
            env.add_directive(TagDefinition::new(
                "repeat",
                Regex::new("^repeat$").unwrap(),
                &[],
                true,
                EndRepeat,
            ))
            .unwrap_err(),
            TemplateError::DuplicateDirective(_)
        ));
    }
}

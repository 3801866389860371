use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use twine::config::Config;
use twine::syntax::expression;
use twine::syntax::tokenizer::{self, SpanKind};
use twine::{Context, check};

#[derive(Parser)]
#[command(name = "twine", about = "Twig 风格的模板编译与渲染工具", version)]
struct Cli {
    /// 项目根目录（默认当前目录）
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 渲染模板目录中的模板
    Render {
        /// 模板名（相对模板目录）
        template: String,

        /// JSON 数据文件，作为渲染上下文
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// 以 JSON 输出各 block 的内容
        #[arg(long)]
        blocks: bool,
    },

    /// 编译模板目录中的全部模板并报告错误
    Check,

    /// 打印模板的片段与表达式指令（调试用）
    Tokens {
        /// 模板文件路径
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = cli.root.canonicalize().unwrap_or_else(|_| cli.root.clone());

    // 配置错误留给具体命令报告，日志先按默认值初始化
    let log = Config::load(&root).map(|c| c.log).unwrap_or_default();
    init_tracing(&log.level, &log.format);

    match cli.command {
        Commands::Render {
            template,
            data,
            blocks,
        } => render(&root, &template, data.as_deref(), blocks)?,
        Commands::Check => {
            let result = check::run(&root)?;

            for w in &result.warnings {
                tracing::warn!("{w}");
            }
            for e in &result.errors {
                tracing::error!("{e}");
            }

            if result.errors.is_empty() {
                tracing::info!(
                    "检查通过：{} 个模板（{} 个警告）",
                    result.checked,
                    result.warnings.len()
                );
            } else {
                anyhow::bail!(
                    "检查未通过：{} 个错误，{} 个警告",
                    result.errors.len(),
                    result.warnings.len()
                );
            }
        }
        Commands::Tokens { file } => tokens(&file)?,
    }

    Ok(())
}

fn init_tracing(default_level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn render(root: &Path, template: &str, data: Option<&Path>, blocks: bool) -> anyhow::Result<()> {
    let config = Config::load(root)?;
    let env = config.environment(root);

    let ctx = match data {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("读取数据文件 {} 失败", path.display()))?;
            let json: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("解析数据文件 {} 失败", path.display()))?;
            Context::from_json(json)
        }
        None => Context::new(),
    };

    let compiled = env.get_template(template)?;
    if blocks {
        let blocks = compiled.render_blocks(&env, &ctx)?;
        println!("{}", serde_json::to_string_pretty(&blocks)?);
    } else {
        print!("{}", compiled.render(&env, &ctx)?);
    }
    Ok(())
}

fn tokens(file: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("读取模板 {} 失败", file.display()))?;

    for span in tokenizer::tokenize(&source)? {
        println!("{:>6} {:?} {:?}", span.offset, span.kind, span.text);
        if span.kind == SpanKind::Output {
            let expr = expression::compile(span.text)?;
            for instr in &expr.instrs {
                println!("       {instr:?}");
            }
        }
    }
    Ok(())
}

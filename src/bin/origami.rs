use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use origami::{
    config::DEFAULT_MAX_CALL_DEPTH, marshal, Engine, EngineConfig, OrigamiError, Repl,
    ResolverMode, SourceUnit,
};

#[derive(Parser)]
#[command(author, version, about = "Origami script evaluator")]
struct Args {
    #[command(flatten)]
    options: Options,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(ClapArgs)]
struct Options {
    /// Directory `use` statements and `std\os` resolve against
    #[arg(long, global = true, env = "ORIGAMI_ROOT", conflicts_with = "restricted")]
    root: Option<PathBuf>,
    /// Never read namespaces from disk
    #[arg(long, global = true)]
    restricted: bool,
    #[arg(long, global = true, env = "ORIGAMI_MAX_CALL_DEPTH", default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,
    /// Statement budget per evaluation; unlimited when unset
    #[arg(long, global = true, env = "ORIGAMI_MAX_STEPS")]
    max_steps: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Run an Origami script file
    Run { script: PathBuf },
    /// Start an interactive REPL session
    Repl,
    /// Evaluate a snippet of Origami code
    Eval { source: String },
}

impl Options {
    fn config(&self, default_root: Option<PathBuf>) -> EngineConfig {
        let resolver = if self.restricted {
            ResolverMode::Restricted
        } else {
            match self.root.clone().or(default_root) {
                Some(root) => ResolverMode::filesystem(root),
                None => ResolverMode::from_current_dir(),
            }
        };
        EngineConfig::default()
            .with_resolver(resolver)
            .with_max_call_depth(self.max_call_depth)
            .with_max_steps(self.max_steps)
    }
}

fn main() -> Result<ExitCode, OrigamiError> {
    init_tracing();
    let args = Args::parse();
    match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => {
            let code = fs::read_to_string(&script)?;
            let name = script
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| script.display().to_string());
            let root = script
                .parent()
                .map(|dir| if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir.to_path_buf() });
            let engine = Engine::new(args.options.config(root).with_virtual_name(name.as_str()));
            Ok(report(&engine, &SourceUnit::new(code, name)))
        }
        Command::Eval { source } => {
            let engine = Engine::new(args.options.config(None));
            let unit = SourceUnit::new(source, engine.config().virtual_name.as_str());
            Ok(report(&engine, &unit))
        }
        Command::Repl => {
            let mut repl = Repl::new(Engine::new(args.options.config(None)));
            repl.run()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report(engine: &Engine, unit: &SourceUnit) -> ExitCode {
    let outcome = engine.run(unit);
    let rendered = marshal(&outcome);
    if outcome.is_failure() {
        eprintln!("{rendered}");
        return ExitCode::FAILURE;
    }
    if !rendered.is_empty() {
        println!("{rendered}");
    }
    ExitCode::SUCCESS
}

fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_none() {
        return;
    }
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

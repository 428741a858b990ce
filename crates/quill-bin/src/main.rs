//! Quill entrypoint: the compiler CLI.
//!
//! The surface parser and documentation generator are external
//! collaborators; this binary owns argument handling, configuration,
//! logging bootstrap, repository lifecycle, module resolution, and exit
//! status policy. Exit codes: 0 success, 1 configuration error, 2
//! compilation failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Once;

use anyhow::Result;
use clap::Parser;
use core_config::{Config, ConfigContext, load_from};
use core_exec::Runtime;
use core_serial::ModuleRepository;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "quill", version, about = "Quill module compiler")]
struct Args {
    /// Target module name, e.g. `/quill/Examples/Fibonacci`.
    pub module: Option<String>,
    /// Module root bindings, `name=path` separated by `;`.
    #[arg(long = "module-roots")]
    pub module_roots: Option<String>,
    /// Module rename rules file.
    #[arg(long = "renames")]
    pub renames: Option<PathBuf>,
    /// Optional configuration file path (overrides discovery of
    /// `quill.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Compile the target module (the default action).
    #[arg(short = 'c', long = "compile")]
    pub compile: bool,
    /// Generate documentation instead of compiling.
    #[arg(short = 'g', long = "generate-documentation", conflicts_with = "clear_repositories")]
    pub generate_documentation: bool,
    /// Documentation output directory.
    #[arg(short = 'G', long = "documentation-path")]
    pub documentation_path: Option<PathBuf>,
    /// Clear binary repositories before compiling.
    #[arg(short = 'f', long = "clear-repositories")]
    pub clear_repositories: bool,
    /// Suppress console output.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
    /// Print statistics reports after the run (`-s=fibers,safepoints`).
    #[arg(short = 's', long = "show-statistics", value_name = "reports", num_args = 0..=1, require_equals = true, default_missing_value = "all")]
    pub show_statistics: Option<String>,
    /// Raise log verbosity (`-v=2` for trace).
    #[arg(short = 'v', long = "verbose", value_name = "level", num_args = 0..=1, require_equals = true, default_missing_value = "1")]
    pub verbose: Option<u8>,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> AppStartup {
        AppStartup { log_guard: None }
    }

    fn configure_logging(&mut self, args: &Args) -> Result<()> {
        let default_filter = match (args.quiet, args.verbose.unwrap_or(0)) {
            (true, _) => "error",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        };
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
        let file_appender = tracing_appender::rolling::never(Path::new("."), "quill.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global subscriber already installed (tests); drop the
                // guard so the writer shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Resolve `/Root/Sub/Module` against the configured roots.
fn resolve_module(config: &Config, module: &str) -> Option<PathBuf> {
    let trimmed = module.strip_prefix('/')?;
    let (root, rest) = trimmed.split_once('/')?;
    let base = config.file.modules.roots.get(root)?;
    let mut path = base.clone();
    for part in rest.split('/') {
        path.push(part);
    }
    path.set_extension("quill");
    path.exists().then_some(path)
}

fn repository_for(config: &Config, root: &str) -> Result<ModuleRepository> {
    let directory = config.repository_directory();
    std::fs::create_dir_all(&directory)?;
    Ok(ModuleRepository::open(
        directory.join(format!("{root}.repo")),
    )?)
}

fn print_statistics(reports: &str, quiet: bool) {
    if quiet {
        return;
    }
    use core_exec::scheduler::{
        FIBER_PANICS, FIBER_SUSPENSIONS, FIBERS_SPAWNED, SAFE_ACTIONS_RUN,
    };
    use std::sync::atomic::Ordering;
    let wanted = |name: &str| reports == "all" || reports.split(',').any(|r| r == name);
    if wanted("fibers") || wanted("all") {
        println!(
            "fibers: spawned={} suspensions={} panics={}",
            FIBERS_SPAWNED.load(Ordering::Relaxed),
            FIBER_SUSPENSIONS.load(Ordering::Relaxed),
            FIBER_PANICS.load(Ordering::Relaxed),
        );
    }
    if wanted("safepoints") {
        println!(
            "safepoints: actions={}",
            SAFE_ACTIONS_RUN.load(Ordering::Relaxed)
        );
    }
}

fn run(args: Args) -> Result<u8> {
    let mut config = load_from(args.config.clone())?;
    if let Some(spec) = &args.module_roots {
        config.merge_roots(spec);
    }
    if let Some(renames) = &args.renames {
        if !renames.exists() {
            error!(target: "config", path = %renames.display(), "renames file not found");
            return Ok(1);
        }
        config.file.modules.renames = Some(renames.clone());
    }
    let threads = config.apply_context(ConfigContext::detect());
    let _runtime = Runtime::with_threads(threads);

    if args.clear_repositories {
        for root in config.file.modules.roots.keys() {
            let repository = repository_for(&config, root)?;
            repository.clear_repository()?;
            info!(target: "repo", root, "repository cleared");
        }
    }

    if args.generate_documentation {
        let docs = args
            .documentation_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("documentation"));
        std::fs::create_dir_all(&docs)?;
        for root in config.file.modules.roots.keys() {
            let repository = repository_for(&config, root)?;
            let mut lines = Vec::new();
            repository.describe(&mut |line| lines.push(line.to_owned()));
            std::fs::write(docs.join(format!("{root}.txt")), lines.join("\n"))?;
        }
        info!(target: "runtime", path = %docs.display(), "documentation summary written");
        return Ok(0);
    }

    let Some(module) = &args.module else {
        // Repository maintenance alone (e.g. `-f`) is a complete run.
        if args.clear_repositories {
            return Ok(0);
        }
        error!(target: "config", "no target module given");
        return Ok(1);
    };
    match resolve_module(&config, module) {
        Some(path) => {
            info!(
                target: "runtime",
                module,
                path = %path.display(),
                explicit_compile = args.compile,
                "module resolved"
            );
            // The surface parser is supplied by the front-end crate; with
            // none configured, resolution is as far as compilation goes.
            error!(target: "runtime", module, "no front-end compiler is configured");
            Ok(2)
        }
        None => {
            error!(target: "runtime", module, "module not found under the configured roots");
            Ok(2)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let mut startup = AppStartup::new();
    if startup.configure_logging(&args).is_err() {
        return ExitCode::from(1);
    }
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");
    let statistics = args.show_statistics.clone();
    let quiet = args.quiet;
    let status = match run(args) {
        Ok(status) => status,
        Err(error) => {
            error!(target: "runtime", ?error, "configuration error");
            1
        }
    };
    if let Some(reports) = statistics {
        print_statistics(&reports, quiet);
    }
    ExitCode::from(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn arg_grammar_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn doc_generation_conflicts_with_clearing() {
        let result = Args::try_parse_from(["quill", "-g", "-f", "/r/M"]);
        assert!(result.is_err());
    }

    #[test]
    fn statistics_flag_defaults_to_all() {
        let args = Args::try_parse_from(["quill", "-s", "/r/M"]).unwrap();
        assert_eq!(args.show_statistics.as_deref(), Some("all"));
    }

    #[test]
    fn module_resolution_walks_roots() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("lib");
        std::fs::create_dir_all(root.join("Examples")).unwrap();
        std::fs::write(root.join("Examples/Fib.quill"), "…").unwrap();
        let mut config = Config::default();
        config
            .file
            .modules
            .roots
            .insert("lib".into(), root.clone());
        assert!(resolve_module(&config, "/lib/Examples/Fib").is_some());
        assert!(resolve_module(&config, "/lib/Examples/Missing").is_none());
        assert!(resolve_module(&config, "/other/Examples/Fib").is_none());
    }
}

//! Command-line entry point: maintenance tools over the build logs.

use crate::build_log::{BuildLog, BuildLogUser, LoadStatus, BUILD_LOG_FILENAME};
use crate::canon::canon_path_bits;
use crate::deps_log::{DepsLog, DEPS_LOG_FILENAME};
use crate::fs::{FileSystem, MTime, RealFileSystem};
use crate::graph::{NodeId, State};
use crate::trace;
use anyhow::anyhow;
use argh::FromArgs;
use std::io::Write;
use std::path::Path;

/// Inspect and maintain the logs of a ninja-style build directory.
#[derive(FromArgs)]
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    dir: Option<String>,

    /// debugging tools, use "-d list" to list
    #[argh(option, short = 'd')]
    debug: Vec<String>,

    #[argh(subcommand)]
    tool: Option<Tool>,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Tool {
    Deps(DepsArgs),
    Restat(RestatArgs),
    Recompact(RecompactArgs),
}

/// show dependencies stored in the deps log
#[derive(FromArgs)]
#[argh(subcommand, name = "deps")]
struct DepsArgs {
    /// deps log to read
    #[argh(option, default = "String::from(DEPS_LOG_FILENAME)")]
    deps: String,

    /// outputs to show; all recorded outputs if none are given
    #[argh(positional)]
    targets: Vec<String>,
}

/// refresh the output mtimes recorded in the build log
#[derive(FromArgs)]
#[argh(subcommand, name = "restat")]
struct RestatArgs {
    /// build log to rewrite
    #[argh(option, default = "String::from(BUILD_LOG_FILENAME)")]
    log: String,

    /// outputs to restat; all recorded outputs if none are given
    #[argh(positional)]
    outputs: Vec<String>,
}

/// rewrite the build log, dropping outputs no longer on disk
#[derive(FromArgs)]
#[argh(subcommand, name = "recompact")]
struct RecompactArgs {
    /// build log to rewrite
    #[argh(option, default = "String::from(BUILD_LOG_FILENAME)")]
    log: String,
}

/// Treats outputs that have vanished from disk as dead.
struct MissingOnDisk<'a> {
    fs: &'a dyn FileSystem,
}

impl BuildLogUser for MissingOnDisk<'_> {
    fn is_path_dead(&self, path: &str) -> bool {
        matches!(self.fs.stat(path), Ok(MTime::Missing))
    }
}

fn init_logging(explain: bool) {
    let mut filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    if explain {
        if let Ok(directive) = "explain=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn deps(args: DepsArgs) -> anyhow::Result<i32> {
    let mut state = State::new();
    let mut log = DepsLog::new();
    // Recoverable problems have already been logged.
    log.load(&args.deps, &mut state)?;

    let fs = RealFileSystem::new();
    let nodes: Vec<NodeId> = if args.targets.is_empty() {
        log.nodes().to_vec()
    } else {
        let mut nodes = Vec::new();
        for target in &args.targets {
            let (path, _) = canon_path_bits(target)?;
            match state.lookup_node(&path) {
                Some(node) => nodes.push(node),
                None => println!("{}: deps not found", path),
            }
        }
        nodes
    };

    let mut out = std::io::stdout().lock();
    for node in nodes {
        let path = state.node(node).path();
        let Some(deps) = log.get_deps(&state, node) else {
            if !args.targets.is_empty() {
                writeln!(out, "{}: deps not found", path)?;
            }
            continue;
        };
        let mtime = fs
            .stat(path)
            .map_err(|err| anyhow!("stat({}): {}", path, err))?
            .timestamp();
        let stale = mtime == 0 || mtime > deps.mtime;
        writeln!(
            out,
            "{}: #deps {}, deps mtime {} ({})",
            path,
            deps.nodes.len(),
            deps.mtime,
            if stale { "STALE" } else { "VALID" }
        )?;
        for &dep in &deps.nodes {
            writeln!(out, "    {}", state.node(dep).path())?;
        }
        writeln!(out)?;
    }
    Ok(0)
}

fn restat(args: RestatArgs) -> anyhow::Result<i32> {
    let mut log = BuildLog::new();
    if log.load(&args.log)? == LoadStatus::NotFound {
        return Ok(0);
    }
    let outputs: Vec<&str> = args.outputs.iter().map(|s| s.as_str()).collect();
    log.restat(&args.log, &RealFileSystem::new(), &outputs)?;
    Ok(0)
}

fn recompact(args: RecompactArgs) -> anyhow::Result<i32> {
    let mut log = BuildLog::new();
    if log.load(&args.log)? == LoadStatus::NotFound {
        return Ok(0);
    }
    let fs = RealFileSystem::new();
    log.recompact(&args.log, &MissingOnDisk { fs: &fs })?;
    Ok(0)
}

fn run_impl() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();

    let mut explain = false;
    for debug in &args.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  explain  explain what caused a command to execute");
                println!("  trace    generate json performance trace");
                return Ok(1);
            }
            "explain" => explain = true,
            "trace" => trace::open("trace.json")?,
            _ => anyhow::bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }
    init_logging(explain);

    if let Some(dir) = &args.dir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    match args.tool {
        None => anyhow::bail!("no tool given, use --help to list"),
        Some(Tool::Deps(args)) => trace::scope("deps", || deps(args)),
        Some(Tool::Restat(args)) => trace::scope("restat", || restat(args)),
        Some(Tool::Recompact(args)) => trace::scope("recompact", || recompact(args)),
    }
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    trace::close()?;
    res
}

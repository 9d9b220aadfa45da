//! kstore demonstration binary
//!
//! Builds a small registry from a static initialization list (folders `mem`
//! and `sched`, backed by process-local counters) and inspects it.
//!
//! # Examples
//!
//! ```bash
//! # List every property
//! kstore list
//!
//! # Read a property using its own type, or an explicit one
//! kstore get mem/total
//! kstore get sched/quantum_us --type u32
//!
//! # Write a property and read it back
//! kstore set sched/quantum_us 0x400
//!
//! # Machine-readable views
//! kstore dump
//! kstore stats
//! ```

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use kstore::{
    Accessor, Getter, PrimitiveType, RegistryConfig, Setter, StaticEntry, SyncRegistry,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// kstore - hierarchical typed property registry
#[derive(Parser, Debug)]
#[command(name = "kstore")]
#[command(version = kstore::VERSION)]
#[command(about = "Inspect a hierarchical typed property registry", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Registry configuration file (TOML)
    #[arg(long, global = true, env = "KSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every property with its type and access flags
    List,

    /// Read a property
    Get {
        /// Property path, e.g. mem/total
        path: String,
        /// Read as this type instead of the property's own
        #[arg(long = "type", value_name = "TYPE")]
        ty: Option<PrimitiveType>,
    },

    /// Write a property and read it back
    Set {
        /// Property path, e.g. sched/quantum_us
        path: String,
        /// Decimal or 0x-prefixed hexadecimal value
        value: String,
    },

    /// Print every property as JSON
    Dump,

    /// Show registry and path cache statistics
    Stats,
}

static MEM_TOTAL: AtomicU64 = AtomicU64::new(64 * 1024 * 1024);
static MEM_USED: AtomicU64 = AtomicU64::new(12 * 1024 * 1024);
static ALLOC_COUNT: AtomicU32 = AtomicU32::new(1_024);
static ALLOC_PEAK: AtomicU32 = AtomicU32::new(1_311);
static QUANTUM_US: AtomicU32 = AtomicU32::new(10_000);
static RUNQUEUE: AtomicU16 = AtomicU16::new(3);
static IDLE_TASK: AtomicUsize = AtomicUsize::new(0xffff_8000);

fn mem_total() -> u64 {
    MEM_TOTAL.load(Ordering::Relaxed)
}

fn mem_used() -> u64 {
    MEM_USED.load(Ordering::Relaxed)
}

fn alloc_count() -> u32 {
    ALLOC_COUNT.load(Ordering::Relaxed)
}

fn set_alloc_count(v: u32) {
    ALLOC_COUNT.store(v, Ordering::Relaxed);
    ALLOC_PEAK.fetch_max(v, Ordering::Relaxed);
}

fn alloc_peak() -> u32 {
    ALLOC_PEAK.load(Ordering::Relaxed)
}

fn quantum_us() -> u32 {
    QUANTUM_US.load(Ordering::Relaxed)
}

fn set_quantum_us(v: u32) {
    QUANTUM_US.store(v, Ordering::Relaxed);
}

fn runqueue() -> u16 {
    RUNQUEUE.load(Ordering::Relaxed)
}

fn idle_task() -> usize {
    IDLE_TASK.load(Ordering::Relaxed)
}

const STATIC_ENTRIES: &[StaticEntry] = &[
    StaticEntry::new("mem", "total", Accessor::read_only(Getter::U64(mem_total))),
    StaticEntry::new("mem", "used", Accessor::read_only(Getter::U64(mem_used))),
    StaticEntry::new(
        "mem",
        "alloc_count",
        Accessor::read_write(Getter::U32(alloc_count), Setter::U32(set_alloc_count)),
    ),
    StaticEntry::new(
        "mem",
        "alloc_count/peak",
        Accessor::read_only(Getter::U32(alloc_peak)),
    ),
    StaticEntry::new(
        "sched",
        "quantum_us",
        Accessor::read_write(Getter::U32(quantum_us), Setter::U32(set_quantum_us)),
    ),
    StaticEntry::new("sched", "runqueue", Accessor::read_only(Getter::U16(runqueue))),
    StaticEntry::new("sched", "idle_task", Accessor::read_only(Getter::Ptr(idle_task))),
];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli)?;

    let config = RegistryConfig::load(cli.config.as_deref()).context("loading configuration")?;
    debug!(?config, "Configuration loaded");
    let registry = SyncRegistry::with_static(config, STATIC_ENTRIES)?;
    info!(entries = STATIC_ENTRIES.len(), "Demonstration registry ready");

    match cli.command {
        Commands::List => list_command(&registry),
        Commands::Get { path, ty } => get_command(&registry, &path, ty),
        Commands::Set { path, value } => set_command(&registry, &path, &value),
        Commands::Dump => {
            println!("{}", serde_json::to_string_pretty(&registry.snapshot())?);
            Ok(())
        }
        Commands::Stats => stats_command(&registry),
    }
}

/// Setup logging on stderr so command output stays clean
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);
    let filter = EnvFilter::from_default_env().add_directive(log_level.into());

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init()?;
    }

    Ok(())
}

fn list_command(registry: &SyncRegistry) -> anyhow::Result<()> {
    for (path, entry) in registry.walk() {
        let accessor = entry.accessor();
        let ty = accessor.ty().map_or("-", PrimitiveType::name);
        let flags = format!(
            "{}{}",
            if accessor.has_getter() { 'r' } else { '-' },
            if accessor.has_setter() { 'w' } else { '-' }
        );
        println!("{:<24} {:<5} {}", path, ty, flags);
    }
    Ok(())
}

fn get_command(
    registry: &SyncRegistry,
    path: &str,
    ty: Option<PrimitiveType>,
) -> anyhow::Result<()> {
    let entry = registry.try_lookup(path)?;
    let result = match ty.or_else(|| entry.ty()) {
        Some(ty) => registry.read(&entry, ty).map_err(anyhow::Error::from),
        None => Err(anyhow!("'{}' has no type", path)),
    };
    registry.release(&entry)?;
    println!("{}", result?);
    Ok(())
}

fn set_command(registry: &SyncRegistry, path: &str, text: &str) -> anyhow::Result<()> {
    let entry = registry.try_lookup(path)?;
    let result = (|| -> anyhow::Result<Option<String>> {
        let ty = entry.ty().ok_or_else(|| anyhow!("'{}' has no type", path))?;
        let value = ty.parse_value(text)?;
        registry.write(&entry, value)?;
        if entry.accessor().has_getter() {
            Ok(Some(registry.read(&entry, ty)?.to_string()))
        } else {
            Ok(None)
        }
    })();
    registry.release(&entry)?;

    match result? {
        Some(readback) => println!("{} = {}", path, readback),
        None => println!("{} written", path),
    }
    Ok(())
}

fn stats_command(registry: &SyncRegistry) -> anyhow::Result<()> {
    // Warm the cache so the numbers mean something for a one-shot process
    for (path, _) in registry.walk() {
        for _ in 0..2 {
            if let Some(entry) = registry.lookup(&path) {
                registry.release(&entry)?;
            }
        }
    }

    let stats = registry.stats();
    println!("folders:         {}", stats.folders);
    println!("entries:         {}", stats.entries);
    println!("  static:        {}", stats.static_entries);
    println!("  dynamic:       {}", stats.dynamic_entries);
    match stats.cache {
        Some(cache) => {
            println!("cache buckets:   {}", cache.buckets);
            println!("cache size:      {}/{}", cache.size, cache.capacity);
            println!("cache hits:      {}", cache.hits);
            println!("cache misses:    {}", cache.misses);
            println!("cache hit rate:  {:.1}%", cache.hit_rate * 100.0);
            println!("cache evictions: {}", cache.evictions);
        }
        None => println!("cache:           disabled"),
    }
    Ok(())
}

//! SensorFlow - Main Entry Point
//!
//! Loads a pipeline configuration, runs it on the pipeline thread and logs
//! the messages it produces. Type `stats`, `topology` or `quit` on stdin to
//! control it.
//!
//! ```text
//! sensorflow [--check] [CONFIG]
//! ```
//!
//! Without `CONFIG` the path comes from `SENSORFLOW_CONFIG`, then from the
//! platform config directory.

use anyhow::{bail, Context};
use sensorflow_rs::{
    config::{self, PipelineConfig},
    pipeline::{
        ModuleFactory, ModuleStatus, PipelineBuilder, PipelineCommand, PipelineCompiler,
        PipelineMessage,
    },
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct Args {
    check: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        check: false,
        config: None,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--check" => args.check = true,
            flag if flag.starts_with("--") => bail!("unknown flag '{}'", flag),
            path if args.config.is_none() => args.config = Some(PathBuf::from(path)),
            extra => bail!("unexpected argument '{}'", extra),
        }
    }
    Ok(args)
}

fn config_path(args: &Args) -> anyhow::Result<PathBuf> {
    if let Some(path) = &args.config {
        return Ok(path.clone());
    }
    if let Some(path) = std::env::var_os("SENSORFLOW_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    config::default_path().context("no config path given and no config directory available")
}

/// Console logging plus an optional non-blocking file layer. The returned
/// guard must live until exit so buffered lines are flushed.
fn init_logging(config: &PipelineConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match &config.logging.filter {
            Some(filter) => EnvFilter::try_new(filter),
            None => EnvFilter::try_new("info,sensorflow_rs=debug"),
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.logging.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn log_message(msg: &PipelineMessage) {
    match msg {
        PipelineMessage::ModuleStatus { id, status } => match status {
            ModuleStatus::Running => tracing::info!("Module {} is running", id),
            ModuleStatus::Stopped => tracing::info!("Module {} stopped", id),
        },
        PipelineMessage::ModuleError { id, message } => {
            tracing::error!("Module {}: {}", id, message)
        }
        PipelineMessage::Packets { module, packets } => {
            let events: usize = packets.iter().map(|p| p.len()).sum();
            tracing::debug!("Sink {}: {} packets, {} events", module, packets.len(), events);
        }
        PipelineMessage::Statistics { module, snapshot } => tracing::info!(
            "Statistics {}: {:.0} events/s ({:.0} valid/s), max gap {} us",
            module,
            snapshot.events_per_second,
            snapshot.valid_per_second,
            snapshot.max_gap_us
        ),
        PipelineMessage::Stats(stats) => tracing::info!(
            "Ticks: {}, running: {}, stopped: {}, generation {}",
            stats.ticks,
            stats.running_modules,
            stats.stopped_modules,
            stats.generation
        ),
        PipelineMessage::Topology(topology) => {
            for module in &topology.modules {
                tracing::info!(
                    "{} '{}' ({}) {} <- {:?} -> {:?}",
                    module.id,
                    module.name,
                    module.library,
                    module.status,
                    module.input_deps,
                    module.output_rev_deps
                );
            }
        }
        PipelineMessage::BuildFailed(reason) => tracing::error!("Build failed: {}", reason),
        PipelineMessage::Shutdown => tracing::info!("Pipeline shut down"),
    }
}

fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let path = config_path(&args)?;
    let config = PipelineConfig::load(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    let _guard = init_logging(&config);
    tracing::info!("Starting SensorFlow with {:?}", path);

    if args.check {
        let decls = ModuleFactory::new().declarations(&config)?;
        let plan = PipelineCompiler::compile(&decls, 0)?;
        for (pos, id) in plan.order.iter().enumerate() {
            let name = decls.iter().find(|d| d.id == *id).map_or("?", |d| d.name.as_str());
            println!("{:>3}  {:<6} {}", pos, id.to_string(), name);
        }
        println!(
            "{} streams, {} slots, {} copies",
            plan.stats.streams, plan.stats.slots, plan.stats.copies
        );
        return Ok(());
    }

    let handle = PipelineBuilder::new(config).spawn()?;

    // stdin commands
    let commands = handle.bridge.cmd_tx.clone();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let cmd = match line.trim() {
                    "stats" => PipelineCommand::RequestStats,
                    "topology" => PipelineCommand::RequestTopology,
                    "quit" | "q" => PipelineCommand::Shutdown,
                    "" => continue,
                    other => {
                        tracing::warn!("Unknown command '{}'", other);
                        continue;
                    }
                };
                if commands.send(cmd).is_err() {
                    break;
                }
            }
        })?;

    while handle.is_running() {
        if let Some(msg) = handle.bridge.recv_timeout(Duration::from_millis(500)) {
            log_message(&msg);
            if matches!(msg, PipelineMessage::Shutdown) {
                break;
            }
        }
    }

    tracing::info!("Shutting down...");
    handle.join();
    Ok(())
}

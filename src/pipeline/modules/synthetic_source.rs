//! SyntheticSource: generates pseudo-random polarity events.
//!
//! A worker thread produces one packet every `batch_us` microseconds with
//! `rate_hz * batch_us / 1e6` events spread over a `width` x `height` array,
//! queues it and wakes the scheduler. `run` drains the queue into a single
//! output packet, and fails if the thread has died.

use crate::pipeline::bridge::DataNotifier;
use crate::pipeline::descriptor::{ModuleInfo, ModuleKind, OutputStreamSpec};
use crate::pipeline::error::{ModuleError, ModuleResult};
use crate::pipeline::id::{EventTypeId, ModuleId};
use crate::pipeline::module::{ModuleContext, ModulePlugin, PacketIo, Params};
use crate::pipeline::packet::{Event, EventPacket};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const LIBRARY: &str = "synthetic_source";

/// Longest generator interval accepted, one second.
pub const MAX_BATCH_US: i64 = 1_000_000;
/// Upper bound on events allocated for a single batch.
pub const MAX_EVENTS_PER_BATCH: u64 = 1 << 22;

#[derive(Debug, Clone, Copy, PartialEq)]
struct GeneratorSettings {
    rate_hz: u64,
    batch_us: u64,
    width: u16,
    height: u16,
    seed: u64,
}

impl GeneratorSettings {
    fn from_ctx(ctx: &ModuleContext) -> ModuleResult<Self> {
        let rate_hz = ctx.param_int("rate_hz", 10_000);
        let batch_us = ctx.param_int("batch_us", 10_000);
        let width = ctx.param_int("width", 240);
        let height = ctx.param_int("height", 180);

        if rate_hz < 0 {
            return Err(invalid("rate_hz", "must not be negative"));
        }
        if !(1..=MAX_BATCH_US).contains(&batch_us) {
            return Err(invalid("batch_us", "must be in 1..=1000000"));
        }
        if !(1..=i64::from(u16::MAX)).contains(&width) {
            return Err(invalid("width", "must be in 1..=65535"));
        }
        if !(1..=i64::from(u16::MAX)).contains(&height) {
            return Err(invalid("height", "must be in 1..=65535"));
        }

        let per_batch = (rate_hz as u64)
            .checked_mul(batch_us as u64)
            .map(|product| product / 1_000_000);
        if !per_batch.is_some_and(|count| count <= MAX_EVENTS_PER_BATCH) {
            return Err(invalid(
                "rate_hz",
                &format!(
                    "rate_hz * batch_us / 1e6 exceeds {} events per batch",
                    MAX_EVENTS_PER_BATCH
                ),
            ));
        }

        Ok(Self {
            rate_hz: rate_hz as u64,
            batch_us: batch_us as u64,
            width: width as u16,
            height: height as u16,
            seed: ctx.param_int("seed", 1) as u64,
        })
    }

    fn events_per_batch(&self) -> usize {
        let count = self.rate_hz.saturating_mul(self.batch_us) / 1_000_000;
        count.min(MAX_EVENTS_PER_BATCH) as usize
    }
}

fn invalid(key: &str, reason: &str) -> ModuleError {
    ModuleError::InvalidParam {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    rx: Receiver<Vec<Event>>,
}

/// Source module backed by a background generator thread.
pub struct SyntheticSourceModule {
    info: ModuleInfo,
    worker: Option<Worker>,
    settings: Option<GeneratorSettings>,
    queue_capacity: usize,
    dropped_batches: u64,
}

impl SyntheticSourceModule {
    pub fn new() -> Self {
        Self::with_queue_capacity(64)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            info: ModuleInfo::new("SyntheticSource", ModuleKind::Source)
                .description("Generates pseudo-random polarity events.")
                .output(OutputStreamSpec::fixed(EventTypeId::POLARITY)),
            worker: None,
            settings: None,
            queue_capacity: queue_capacity.max(1),
            dropped_batches: 0,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.worker.is_some()
    }

    /// Batches discarded by resets since the last init.
    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches
    }

    fn spawn(&mut self, settings: GeneratorSettings, notifier: DataNotifier) -> ModuleResult<()> {
        let (tx, rx) = bounded(self.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("synthetic-source".to_string())
            .spawn(move || generate(settings, tx, notifier, stop_flag))?;

        self.worker = Some(Worker { stop, handle, rx });
        self.settings = Some(settings);
        Ok(())
    }

    /// Collects a generator thread that exited on its own.
    fn reap(&mut self) -> ModuleError {
        self.settings = None;
        match self.worker.take().map(|worker| worker.handle.join()) {
            Some(Err(_)) => ModuleError::failed("generator thread panicked"),
            _ => ModuleError::failed("generator thread stopped"),
        }
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);
            if worker.handle.join().is_err() {
                tracing::error!("SyntheticSource: generator thread panicked");
            }
        }
        self.settings = None;
    }
}

impl Default for SyntheticSourceModule {
    fn default() -> Self {
        Self::new()
    }
}

fn generate(
    settings: GeneratorSettings,
    tx: Sender<Vec<Event>>,
    notifier: DataNotifier,
    stop: Arc<AtomicBool>,
) {
    let mut rng = fastrand::Rng::with_seed(settings.seed);
    let interval = Duration::from_micros(settings.batch_us);
    let start = Instant::now();
    let mut batch_start_us: i64 = 0;

    while !stop.load(Ordering::Relaxed) {
        let count = settings.events_per_batch();
        let mut events = Vec::with_capacity(count);
        let step = if count == 0 {
            0
        } else {
            settings.batch_us as i64 / count as i64
        };

        for i in 0..count {
            events.push(Event::new(
                batch_start_us + step * i as i64,
                rng.u16(0..settings.width),
                rng.u16(0..settings.height),
                rng.bool() as i32,
            ));
        }
        batch_start_us += settings.batch_us as i64;

        match tx.try_send(events) {
            Ok(()) => {
                if !notifier.notify() {
                    break;
                }
            }
            Err(TrySendError::Full(_)) => {
                tracing::trace!("SyntheticSource: queue full, batch dropped");
            }
            Err(TrySendError::Disconnected(_)) => break,
        }

        let target = start + Duration::from_micros(batch_start_us as u64);
        let now = Instant::now();
        if target > now {
            std::thread::sleep((target - now).min(interval));
        }
    }
}

impl ModulePlugin for SyntheticSourceModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn config_init(&self, params: &mut Params) {
        params.entry("rate_hz".into()).or_insert(10_000i64.into());
        params.entry("batch_us".into()).or_insert(10_000i64.into());
        params.entry("width".into()).or_insert(240i64.into());
        params.entry("height".into()).or_insert(180i64.into());
        params.entry("seed".into()).or_insert(1i64.into());
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        let settings = GeneratorSettings::from_ctx(ctx)?;
        self.dropped_batches = 0;
        self.spawn(settings, ctx.notifier.clone())?;
        tracing::info!(
            "SyntheticSource: generating {} events/s in {}x{}",
            settings.rate_hz,
            settings.width,
            settings.height
        );
        Ok(())
    }

    fn run(&mut self, ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        if self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.handle.is_finished())
        {
            return Err(self.reap());
        }
        let Some(worker) = &self.worker else {
            return Ok(());
        };

        let mut packet = EventPacket::new(ctx.id, EventTypeId::POLARITY);
        for batch in worker.rx.try_iter() {
            for event in batch {
                packet.push(event);
            }
        }

        if !packet.is_empty() {
            io.emit(packet);
        }
        Ok(())
    }

    fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        let settings = GeneratorSettings::from_ctx(ctx)?;
        if self.settings != Some(settings) {
            self.shutdown();
            self.spawn(settings, ctx.notifier.clone())?;
            tracing::debug!("SyntheticSource: generator restarted with new settings");
        }
        Ok(())
    }

    fn exit(&mut self, _ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.shutdown();
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut ModuleContext, _source: ModuleId) -> ModuleResult<()> {
        if let Some(worker) = &self.worker {
            self.dropped_batches += worker.rx.try_iter().count() as u64;
        }
        Ok(())
    }
}

impl Drop for SyntheticSourceModule {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! Statistics: event rate sink.
//!
//! Counts total and valid events and tracks the largest timestamp gap
//! between consecutive packets. Every `interval_ms` a `Statistics` message
//! with per-second rates is published and the counters restart.

use crate::pipeline::bridge::{PipelineMessage, StatisticsSnapshot};
use crate::pipeline::descriptor::{InputCount, InputStreamSpec, InputType, ModuleInfo, ModuleKind};
use crate::pipeline::error::{ModuleError, ModuleResult};
use crate::pipeline::id::ModuleId;
use crate::pipeline::module::{ModuleContext, ModulePlugin, PacketIo, Params};
use std::time::Duration;

pub const LIBRARY: &str = "statistics";

pub struct StatisticsModule {
    info: ModuleInfo,
    interval: Duration,
    window_start: Option<Duration>,
    total: u64,
    valid: u64,
    max_gap_us: i64,
    last_timestamp: Option<i64>,
    last_snapshot: Option<StatisticsSnapshot>,
}

impl StatisticsModule {
    pub fn new() -> Self {
        Self {
            info: ModuleInfo::new("Statistics", ModuleKind::Sink)
                .description("Publishes event rates once per interval.")
                .input(InputStreamSpec::read_only(InputType::Any, InputCount::ONE)),
            interval: Duration::from_secs(1),
            window_start: None,
            total: 0,
            valid: 0,
            max_gap_us: 0,
            last_timestamp: None,
            last_snapshot: None,
        }
    }

    pub fn last_snapshot(&self) -> Option<&StatisticsSnapshot> {
        self.last_snapshot.as_ref()
    }

    fn load_params(&mut self, ctx: &ModuleContext) -> ModuleResult<()> {
        let interval_ms = ctx.param_int("interval_ms", 1_000);
        if interval_ms <= 0 {
            return Err(ModuleError::InvalidParam {
                key: "interval_ms".into(),
                reason: "must be positive".into(),
            });
        }
        self.interval = Duration::from_millis(interval_ms as u64);
        Ok(())
    }

    fn clear(&mut self) {
        self.window_start = None;
        self.total = 0;
        self.valid = 0;
        self.max_gap_us = 0;
        self.last_timestamp = None;
    }

    fn publish(&mut self, ctx: &ModuleContext, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let snapshot = StatisticsSnapshot {
            total_events: self.total,
            valid_events: self.valid,
            events_per_second: self.total as f64 / secs,
            valid_per_second: self.valid as f64 / secs,
            max_gap_us: self.max_gap_us,
        };
        tracing::debug!(
            "Statistics: {:.0} events/s ({:.0} valid), max gap {} us",
            snapshot.events_per_second,
            snapshot.valid_per_second,
            snapshot.max_gap_us
        );
        ctx.publish(PipelineMessage::Statistics {
            module: ctx.id,
            snapshot: snapshot.clone(),
        });
        self.last_snapshot = Some(snapshot);

        self.total = 0;
        self.valid = 0;
        self.max_gap_us = 0;
    }
}

impl Default for StatisticsModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ModulePlugin for StatisticsModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn config_init(&self, params: &mut Params) {
        params.entry("interval_ms".into()).or_insert(1_000i64.into());
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.clear();
        self.last_snapshot = None;
        self.load_params(ctx)
    }

    fn run(&mut self, ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        let start = *self.window_start.get_or_insert(ctx.timestamp);

        for packet in io.inputs() {
            self.total += packet.len() as u64;
            self.valid += packet.valid_count() as u64;

            if let (Some(prev), Some(first)) = (self.last_timestamp, packet.first_timestamp()) {
                self.max_gap_us = self.max_gap_us.max(first - prev);
            }
            if let Some(last) = packet.last_timestamp() {
                self.last_timestamp = Some(last);
            }
        }

        let elapsed = ctx.timestamp.saturating_sub(start);
        if elapsed >= self.interval {
            self.publish(ctx, elapsed);
            self.window_start = Some(ctx.timestamp);
        }
        Ok(())
    }

    fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.load_params(ctx)
    }

    fn reset(&mut self, _ctx: &mut ModuleContext, source: ModuleId) -> ModuleResult<()> {
        tracing::debug!("Statistics: counters cleared on reset from {}", source);
        self.clear();
        Ok(())
    }
}

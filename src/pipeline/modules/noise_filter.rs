//! NoiseFilter: background-activity filter for polarity events.
//!
//! An event survives when at least `support_min` of its eight neighbours
//! fired within `window_us` before it. With `refractory_us > 0`, an event
//! following another one on the same pixel closer than that is dropped too.
//! Filtered events are invalidated in place, never removed.

use crate::pipeline::descriptor::{InputCount, InputStreamSpec, InputType, ModuleInfo, ModuleKind};
use crate::pipeline::error::{ModuleError, ModuleResult};
use crate::pipeline::id::{EventTypeId, ModuleId};
use crate::pipeline::module::{ModuleContext, ModulePlugin, PacketIo, Params};
use crate::pipeline::packet::EventPacket;

pub const LIBRARY: &str = "noise_filter";

const NEVER: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq)]
struct FilterSettings {
    window_us: i64,
    support_min: u8,
    refractory_us: i64,
    check_polarity: bool,
    width: usize,
    height: usize,
}

impl FilterSettings {
    fn from_ctx(ctx: &ModuleContext) -> ModuleResult<Self> {
        let window_us = ctx.param_int("window_us", 2_000);
        let support_min = ctx.param_int("support_min", 1);
        let refractory_us = ctx.param_int("refractory_us", 0);
        let width = ctx.param_int("width", 240);
        let height = ctx.param_int("height", 180);

        if window_us <= 0 {
            return Err(invalid("window_us", "must be positive"));
        }
        if !(1..=8).contains(&support_min) {
            return Err(invalid("support_min", "must be in 1..=8"));
        }
        if refractory_us < 0 {
            return Err(invalid("refractory_us", "must not be negative"));
        }
        if width <= 0 || height <= 0 {
            return Err(invalid("width", "array size must be positive"));
        }

        Ok(Self {
            window_us,
            support_min: support_min as u8,
            refractory_us,
            check_polarity: ctx.param_bool("check_polarity", false),
            width: width as usize,
            height: height as usize,
        })
    }
}

fn invalid(key: &str, reason: &str) -> ModuleError {
    ModuleError::InvalidParam {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Last event seen on one pixel.
#[derive(Debug, Clone, Copy)]
struct PixelState {
    timestamp: i64,
    polarity: bool,
}

impl Default for PixelState {
    fn default() -> Self {
        Self {
            timestamp: NEVER,
            polarity: false,
        }
    }
}

/// Background-activity and refractory-period filter.
pub struct NoiseFilterModule {
    info: ModuleInfo,
    settings: Option<FilterSettings>,
    pixels: Vec<PixelState>,
    background_filtered: u64,
    refractory_filtered: u64,
    out_of_range: u64,
}

impl NoiseFilterModule {
    pub fn new() -> Self {
        Self {
            info: ModuleInfo::new("NoiseFilter", ModuleKind::Processor)
                .description("Filters background activity from polarity events.")
                .input(InputStreamSpec::mutating(
                    InputType::Fixed(EventTypeId::POLARITY),
                    InputCount::Any,
                )),
            settings: None,
            pixels: Vec::new(),
            background_filtered: 0,
            refractory_filtered: 0,
            out_of_range: 0,
        }
    }

    pub fn background_filtered(&self) -> u64 {
        self.background_filtered
    }

    pub fn refractory_filtered(&self) -> u64 {
        self.refractory_filtered
    }

    pub fn out_of_range(&self) -> u64 {
        self.out_of_range
    }

    fn apply_settings(&mut self, settings: FilterSettings) -> ModuleResult<()> {
        let size = settings.width * settings.height;
        let resize = self
            .settings
            .map(|s| s.width != settings.width || s.height != settings.height)
            .unwrap_or(true);

        if resize {
            let mut pixels = Vec::new();
            pixels.try_reserve_exact(size).map_err(|_| {
                ModuleError::failed(format!("cannot allocate {} pixel states", size))
            })?;
            pixels.resize(size, PixelState::default());
            self.pixels = pixels;
        }
        self.settings = Some(settings);
        Ok(())
    }

    fn clear_history(&mut self) {
        self.pixels.fill(PixelState::default());
    }

    fn filter_packet(&mut self, packet: &mut EventPacket) {
        let Some(s) = self.settings else {
            return;
        };

        for event in packet.iter_mut() {
            if !event.valid {
                continue;
            }

            let (x, y) = (event.x as usize, event.y as usize);
            if x >= s.width || y >= s.height {
                event.invalidate();
                self.out_of_range += 1;
                continue;
            }

            let idx = y * s.width + x;
            let ts = event.timestamp_us;
            let polarity = event.polarity();
            let previous = self.pixels[idx];
            self.pixels[idx] = PixelState {
                timestamp: ts,
                polarity,
            };

            if s.refractory_us > 0
                && previous.timestamp != NEVER
                && ts - previous.timestamp < s.refractory_us
            {
                event.invalidate();
                self.refractory_filtered += 1;
                continue;
            }

            let mut support = 0u8;
            for ny in y.saturating_sub(1)..=(y + 1).min(s.height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(s.width - 1) {
                    if nx == x && ny == y {
                        continue;
                    }
                    let n = self.pixels[ny * s.width + nx];
                    if n.timestamp == NEVER || ts - n.timestamp > s.window_us {
                        continue;
                    }
                    if s.check_polarity && n.polarity != polarity {
                        continue;
                    }
                    support += 1;
                }
            }

            if support < s.support_min {
                event.invalidate();
                self.background_filtered += 1;
            }
        }
    }
}

impl Default for NoiseFilterModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ModulePlugin for NoiseFilterModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn config_init(&self, params: &mut Params) {
        params.entry("window_us".into()).or_insert(2_000i64.into());
        params.entry("support_min".into()).or_insert(1i64.into());
        params.entry("refractory_us".into()).or_insert(0i64.into());
        params.entry("check_polarity".into()).or_insert(false.into());
        params.entry("width".into()).or_insert(240i64.into());
        params.entry("height".into()).or_insert(180i64.into());
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.settings = None;
        self.apply_settings(FilterSettings::from_ctx(ctx)?)?;
        self.clear_history();
        self.background_filtered = 0;
        self.refractory_filtered = 0;
        self.out_of_range = 0;
        Ok(())
    }

    fn run(&mut self, _ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        for i in 0..io.input_count() {
            if let Some(packet) = io.input_mut(i) {
                self.filter_packet(packet);
            }
        }
        Ok(())
    }

    fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.apply_settings(FilterSettings::from_ctx(ctx)?)
    }

    fn exit(&mut self, _ctx: &mut ModuleContext) -> ModuleResult<()> {
        tracing::debug!(
            "NoiseFilter: {} background, {} refractory, {} out of range",
            self.background_filtered,
            self.refractory_filtered,
            self.out_of_range
        );
        self.pixels = Vec::new();
        self.settings = None;
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut ModuleContext, source: ModuleId) -> ModuleResult<()> {
        tracing::debug!("NoiseFilter: history cleared on reset from {}", source);
        self.clear_history();
        Ok(())
    }
}

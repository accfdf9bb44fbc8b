//! Accumulator: integrates polarity events into count frames.
//!
//! Valid polarity events are summed per pixel over `frame_us` windows. Each
//! completed window becomes a set of frame events (one per non-zero pixel,
//! `value` = count, timestamp = window end). All frames completed during one
//! tick are emitted as a single packet of event type 2.

use crate::pipeline::descriptor::{
    InputCount, InputStreamSpec, InputType, ModuleInfo, ModuleKind, OutputStreamSpec,
};
use crate::pipeline::error::{ModuleError, ModuleResult};
use crate::pipeline::id::{EventTypeId, ModuleId};
use crate::pipeline::module::{ModuleContext, ModulePlugin, PacketIo, Params};
use crate::pipeline::packet::{Event, EventPacket};

pub const LIBRARY: &str = "accumulator";

pub struct AccumulatorModule {
    info: ModuleInfo,
    frame_us: i64,
    signed: bool,
    width: usize,
    height: usize,
    counts: Vec<i32>,
    frame_start: Option<i64>,
    frames_emitted: u64,
}

impl AccumulatorModule {
    pub fn new() -> Self {
        Self {
            info: ModuleInfo::new("Accumulator", ModuleKind::Processor)
                .description("Accumulates polarity events into count frames.")
                .input(InputStreamSpec::read_only(
                    InputType::Fixed(EventTypeId::POLARITY),
                    InputCount::ONE,
                ))
                .output(OutputStreamSpec::fixed(EventTypeId::FRAME)),
            frame_us: 33_000,
            signed: false,
            width: 0,
            height: 0,
            counts: Vec::new(),
            frame_start: None,
            frames_emitted: 0,
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    fn load_params(&mut self, ctx: &ModuleContext) -> ModuleResult<()> {
        let frame_us = ctx.param_int("frame_us", 33_000);
        let width = ctx.param_int("width", 240);
        let height = ctx.param_int("height", 180);

        if frame_us <= 0 {
            return Err(ModuleError::InvalidParam {
                key: "frame_us".into(),
                reason: "must be positive".into(),
            });
        }
        if width <= 0 || height <= 0 {
            return Err(ModuleError::InvalidParam {
                key: "width".into(),
                reason: "array size must be positive".into(),
            });
        }

        let (width, height) = (width as usize, height as usize);
        if width != self.width || height != self.height {
            let mut counts = Vec::new();
            counts
                .try_reserve_exact(width * height)
                .map_err(|_| ModuleError::failed("cannot allocate frame buffer"))?;
            counts.resize(width * height, 0);
            self.counts = counts;
            self.width = width;
            self.height = height;
            self.frame_start = None;
        }

        self.frame_us = frame_us;
        self.signed = ctx.param_bool("signed", false);
        Ok(())
    }

    fn flush_frame(&mut self, frame_end: i64, out: &mut EventPacket) {
        for (idx, count) in self.counts.iter_mut().enumerate() {
            if *count != 0 {
                let x = (idx % self.width) as u16;
                let y = (idx / self.width) as u16;
                out.push(Event::new(frame_end, x, y, *count));
                *count = 0;
            }
        }
        self.frames_emitted += 1;
    }

    fn clear(&mut self) {
        self.counts.fill(0);
        self.frame_start = None;
    }
}

impl Default for AccumulatorModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ModulePlugin for AccumulatorModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn config_init(&self, params: &mut Params) {
        params.entry("frame_us".into()).or_insert(33_000i64.into());
        params.entry("width".into()).or_insert(240i64.into());
        params.entry("height".into()).or_insert(180i64.into());
        params.entry("signed".into()).or_insert(false.into());
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.width = 0;
        self.height = 0;
        self.frames_emitted = 0;
        self.load_params(ctx)
    }

    fn run(&mut self, ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        let mut frames = EventPacket::new(ctx.id, EventTypeId::FRAME);

        for i in 0..io.input_count() {
            let Some(packet) = io.input(i) else {
                continue;
            };
            for event in packet.valid() {
                let start = *self.frame_start.get_or_insert(event.timestamp_us);
                if event.timestamp_us >= start + self.frame_us {
                    let elapsed = (event.timestamp_us - start) / self.frame_us;
                    let end = start + self.frame_us;
                    self.flush_frame(end, &mut frames);
                    self.frame_start = Some(start + elapsed * self.frame_us);
                }

                let (x, y) = (event.x as usize, event.y as usize);
                if x < self.width && y < self.height {
                    let delta = if self.signed && !event.polarity() { -1 } else { 1 };
                    let cell = &mut self.counts[y * self.width + x];
                    *cell = cell.saturating_add(delta);
                }
            }
        }

        if !frames.is_empty() {
            io.emit(frames);
        }
        Ok(())
    }

    fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.load_params(ctx)
    }

    fn exit(&mut self, _ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.counts = Vec::new();
        self.width = 0;
        self.height = 0;
        self.frame_start = None;
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut ModuleContext, _source: ModuleId) -> ModuleResult<()> {
        self.clear();
        Ok(())
    }
}

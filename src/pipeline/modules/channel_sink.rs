//! ChannelSink: forwards every input packet to the controller.

use crate::pipeline::bridge::PipelineMessage;
use crate::pipeline::descriptor::{InputCount, InputStreamSpec, InputType, ModuleInfo, ModuleKind};
use crate::pipeline::error::ModuleResult;
use crate::pipeline::module::{ModuleContext, ModulePlugin, PacketIo, Params};

pub const LIBRARY: &str = "channel_sink";

/// Sink that publishes copies of its inputs as `PipelineMessage::Packets`.
pub struct ChannelSinkModule {
    info: ModuleInfo,
    skip_empty: bool,
    forwarded: u64,
    dropped: u64,
}

impl ChannelSinkModule {
    pub fn new() -> Self {
        Self {
            info: ModuleInfo::new("ChannelSink", ModuleKind::Sink)
                .description("Forwards input packets to the controller.")
                .input(InputStreamSpec::read_only(InputType::Any, InputCount::Any)),
            skip_empty: true,
            forwarded: 0,
            dropped: 0,
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Batches lost because the message channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for ChannelSinkModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ModulePlugin for ChannelSinkModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn config_init(&self, params: &mut Params) {
        params.entry("skip_empty".into()).or_insert(true.into());
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.skip_empty = ctx.param_bool("skip_empty", true);
        self.forwarded = 0;
        self.dropped = 0;
        Ok(())
    }

    fn run(&mut self, ctx: &mut ModuleContext, io: &mut PacketIo) -> ModuleResult<()> {
        let packets: Vec<_> = io
            .inputs()
            .filter(|p| !(self.skip_empty && p.is_empty()))
            .cloned()
            .collect();
        if packets.is_empty() {
            return Ok(());
        }

        let count = packets.len() as u64;
        if ctx.publish(PipelineMessage::Packets {
            module: ctx.id,
            packets,
        }) {
            self.forwarded += count;
        } else {
            self.dropped += 1;
        }
        Ok(())
    }

    fn config(&mut self, ctx: &mut ModuleContext) -> ModuleResult<()> {
        self.skip_empty = ctx.param_bool("skip_empty", true);
        Ok(())
    }
}

//! Integration tests for the pipeline lifecycle
//!
//! These tests validate the complete execution workflow:
//! - Start and stop cascades along stream dependencies
//! - Copy isolation between original and modified readers
//! - Failure handling and reset propagation
//! - Placement of emitted packets by output type
//! - The threaded pipeline with built-in modules

mod common;

use common::builders::ConfigBuilder;
use common::forwarded_packets;
use common::mock_helpers::{call_log, calls_of, CallLog, MockModule, TestPipeline};
use sensorflow_rs::pipeline::{
    EventTypeId, ModuleFactory, ModuleId, ModuleStatus, PipelineBuilder, PipelineCommand,
    PipelineMessage,
};
use sensorflow_rs::scripting::builtins;
use std::time::{Duration, Instant};

fn mock_factory(
    log: &CallLog,
    configure: impl Fn(&str, MockModule) -> MockModule + Send + Sync + Clone + 'static,
) -> ModuleFactory {
    let mut factory = ModuleFactory::new();

    let (l, c) = (log.clone(), configure.clone());
    factory.register("mock_source", move || {
        Box::new(c("source", MockModule::source(l.clone())))
    });
    let (l, c) = (log.clone(), configure.clone());
    factory.register("mock_mutator", move || {
        Box::new(c("mutator", MockModule::processor(l.clone(), true)))
    });
    let (l, c) = (log.clone(), configure.clone());
    factory.register("mock_producer", move || {
        Box::new(c("producer", MockModule::processor(l.clone(), false).emitting()))
    });
    let (l, c) = (log.clone(), configure);
    factory.register("mock_sink", move || {
        Box::new(c("sink", MockModule::sink(l.clone())))
    });
    factory
}

fn plain(_: &str, module: MockModule) -> MockModule {
    module
}

fn status(test: &TestPipeline, id: u16) -> Option<ModuleStatus> {
    test.pipeline.module_status(ModuleId(id))
}

fn module_errors(messages: Vec<PipelineMessage>) -> Vec<(ModuleId, String)> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            PipelineMessage::ModuleError { id, message } => Some((id, message)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_modified_stream_is_invisible_to_original_reader() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "script_filter", Some("1[1]"))
        .with(|m| m.with_param("predicate", builtins::ON_ONLY))
        .module(3, "channel_sink", Some("1[1]"))
        .module(4, "channel_sink", Some("1[1a2]"))
        .build();

    let mut test = TestPipeline::build(config, mock_factory(&log, plain));
    test.ticks(4);

    let messages = test.drain();
    let original = forwarded_packets(&messages, 3);
    let filtered = forwarded_packets(&messages, 4);

    assert_eq!(original.len(), 3);
    assert_eq!(filtered.len(), 3);
    for packet in &original {
        assert_eq!(packet.source(), ModuleId(1));
        assert_eq!(packet.valid_count(), 2);
    }
    for packet in &filtered {
        assert_eq!(packet.len(), 2);
        assert_eq!(packet.valid_count(), 1);
        assert!(packet.valid().all(|e| e.polarity()));
    }
}

#[test]
fn test_stop_cascades_and_restart_follows_producer() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_mutator", Some("1[1]"))
        .module(3, "mock_sink", Some("1[1a2]"))
        .module(4, "mock_sink", Some("1[1]"))
        .build();

    let mut test = TestPipeline::build(config, mock_factory(&log, plain));
    test.ticks(1);
    for id in 1..=4 {
        assert_eq!(status(&test, id), Some(ModuleStatus::Running), "module {}", id);
    }

    test.command(PipelineCommand::StopModule(ModuleId(1)));
    test.ticks(1);
    for id in 1..=4 {
        assert_eq!(status(&test, id), Some(ModuleStatus::Stopped), "module {}", id);
    }
    assert_eq!(calls_of(&log, "mock_sink3").last().map(String::as_str), Some("exit"));

    // stopped modules stay idle
    test.ticks(2);
    assert_eq!(status(&test, 2), Some(ModuleStatus::Stopped));

    test.command(PipelineCommand::StartModule(ModuleId(1)));
    test.ticks(1);
    for id in 1..=4 {
        assert_eq!(status(&test, id), Some(ModuleStatus::Running), "module {}", id);
    }
    assert_eq!(
        calls_of(&log, "mock_mutator2"),
        vec!["init", "exit", "init"]
    );
}

#[test]
fn test_manual_module_waits_for_start_command() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_sink", Some("1[1]"))
        .with(|m| m.with_run_at_startup(false))
        .build();

    let mut test = TestPipeline::build(config, mock_factory(&log, plain));
    test.ticks(3);
    assert_eq!(status(&test, 1), Some(ModuleStatus::Running));
    assert_eq!(status(&test, 2), Some(ModuleStatus::Stopped));
    assert!(calls_of(&log, "mock_sink2").is_empty());

    test.command(PipelineCommand::StartModule(ModuleId(2)));
    test.ticks(2);
    assert_eq!(status(&test, 2), Some(ModuleStatus::Running));
    assert_eq!(calls_of(&log, "mock_sink2"), vec!["init", "run 4 2"]);
}

#[test]
fn test_failed_init_is_retried_and_reported_once() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_sink", Some("1[1]"))
        .build();
    let factory = mock_factory(&log, |role, module| {
        if role == "sink" {
            module.failing_init(2)
        } else {
            module
        }
    });

    let mut test = TestPipeline::build(config, factory);
    test.ticks(4);

    assert_eq!(
        calls_of(&log, "mock_sink2"),
        vec!["init-failed", "init-failed", "init", "run 3 2"]
    );
    let errors = test
        .drain()
        .into_iter()
        .filter(|m| matches!(m, PipelineMessage::ModuleError { .. }))
        .count();
    assert_eq!(errors, 1);
}

#[test]
fn test_run_failure_stops_module_and_its_consumers() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_producer", Some("1[1]"))
        .module(3, "mock_sink", Some("2[1]"))
        .module(4, "mock_sink", Some("1[1]"))
        .build();
    let factory = mock_factory(&log, |role, module| {
        if role == "producer" {
            module.failing_run_at(2)
        } else {
            module
        }
    });

    let mut test = TestPipeline::build(config, factory);
    test.ticks(4);

    assert_eq!(status(&test, 1), Some(ModuleStatus::Running));
    assert_eq!(status(&test, 2), Some(ModuleStatus::Stopped));
    assert_eq!(status(&test, 3), Some(ModuleStatus::Stopped));
    assert_eq!(status(&test, 4), Some(ModuleStatus::Running));
    assert_eq!(calls_of(&log, "mock_sink3"), vec!["init", "run 1 2", "exit"]);
    assert_eq!(
        calls_of(&log, "mock_sink4"),
        vec!["init", "run 1 2", "run 2 2", "run 3 2"]
    );

    let failures: Vec<_> = test
        .drain()
        .into_iter()
        .filter_map(|m| match m {
            PipelineMessage::ModuleError { id, message } => Some((id, message)),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, ModuleId(2));
    assert!(failures[0].1.contains("run failed: run failure"));
}

#[test]
fn test_stopped_mutator_still_feeds_tap_after_reader() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_mutator", Some("1[1]"))
        .module(3, "channel_sink", Some("1[1a2]"))
        .module(4, "channel_sink", Some("1[1]"))
        .build();

    let mut test = TestPipeline::build(config, mock_factory(&log, plain));
    test.ticks(2);
    test.drain();

    test.command(PipelineCommand::StopModule(ModuleId(2)));
    test.ticks(3);

    assert_eq!(status(&test, 1), Some(ModuleStatus::Running));
    assert_eq!(status(&test, 2), Some(ModuleStatus::Stopped));
    assert_eq!(status(&test, 3), Some(ModuleStatus::Running));
    assert_eq!(status(&test, 4), Some(ModuleStatus::Running));
    assert_eq!(
        calls_of(&log, "mock_mutator2"),
        vec!["init", "run 1 2", "exit"]
    );

    let messages = test.drain();
    for sink in [3, 4] {
        let packets = forwarded_packets(&messages, sink);
        assert_eq!(packets.len(), 3, "sink {}", sink);
        for packet in &packets {
            assert_eq!(packet.source(), ModuleId(1));
            assert_eq!(packet.valid_count(), 2);
        }
    }
}

#[test]
fn test_undeclared_output_type_is_dropped() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_producer", Some("1[1]"))
        .module(3, "mock_sink", Some("2[1]"))
        .build();
    let factory = mock_factory(&log, |role, module| {
        if role == "producer" {
            module.also_emitting(EventTypeId::FRAME)
        } else {
            module
        }
    });

    let mut test = TestPipeline::build(config, factory);
    test.ticks(3);

    assert_eq!(status(&test, 2), Some(ModuleStatus::Running));
    assert_eq!(status(&test, 3), Some(ModuleStatus::Running));
    assert_eq!(calls_of(&log, "mock_sink3"), vec!["init", "run 1 2", "run 2 2"]);
    assert!(module_errors(test.drain()).is_empty());
}

#[test]
fn test_undefined_output_follows_output_attribute() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_producer", Some("1[1]"))
        .with(|m| m.with_output("1,5"))
        .module(3, "mock_sink", Some("2[5]"))
        .module(4, "mock_sink", Some("2[1]"))
        .build();
    let factory = mock_factory(&log, |role, module| {
        if role == "producer" {
            module
                .with_undefined_output()
                .also_emitting(EventTypeId(5))
                .also_emitting(EventTypeId(7))
        } else {
            module
        }
    });

    let mut test = TestPipeline::build(config, factory);
    test.ticks(3);

    assert_eq!(status(&test, 2), Some(ModuleStatus::Running));
    // type 5 comes from the attribute, type 7 is outside it
    assert_eq!(calls_of(&log, "mock_sink3"), vec!["init", "run 1 1", "run 2 1"]);
    assert_eq!(calls_of(&log, "mock_sink4"), vec!["init", "run 1 2", "run 2 2"]);
    assert!(module_errors(test.drain()).is_empty());
}

#[test]
fn test_foreign_source_id_fails_the_run() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_producer", Some("1[1]"))
        .module(3, "mock_sink", Some("2[1]"))
        .module(4, "mock_sink", Some("1[1]"))
        .build();
    let factory = mock_factory(&log, |role, module| {
        if role == "producer" {
            module.emitting_as(ModuleId(1))
        } else {
            module
        }
    });

    let mut test = TestPipeline::build(config, factory);
    test.ticks(3);

    assert_eq!(status(&test, 1), Some(ModuleStatus::Running));
    assert_eq!(status(&test, 2), Some(ModuleStatus::Stopped));
    assert_eq!(status(&test, 3), Some(ModuleStatus::Stopped));
    assert_eq!(status(&test, 4), Some(ModuleStatus::Running));
    assert_eq!(calls_of(&log, "mock_producer2"), vec!["init", "run 1 2", "exit"]);
    assert_eq!(calls_of(&log, "mock_sink3").last().map(String::as_str), Some("exit"));

    let failures = module_errors(test.drain());
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, ModuleId(2));
    assert!(failures[0].1.contains("emitted a packet with source id #1"));
}

#[test]
fn test_oversized_generator_batches_are_reported() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "synthetic_source", None)
        .with(|m| {
            m.with_param("rate_hz", 10_000_000_000_000i64)
                .with_param("batch_us", 10_000_000i64)
        })
        .module(2, "mock_sink", Some("1[1]"))
        .build();

    let mut test = TestPipeline::build(config, mock_factory(&log, plain));
    test.ticks(3);

    assert_eq!(status(&test, 1), Some(ModuleStatus::Stopped));
    assert!(calls_of(&log, "mock_sink2")
        .iter()
        .all(|call| !call.starts_with("run")));
    let failures = module_errors(test.drain());
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, ModuleId(1));
    assert!(failures[0].1.contains("batch_us"), "{}", failures[0].1);
}

#[test]
fn test_downstream_reset_reaches_running_consumers() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_sink", Some("1[1]"))
        .build();
    let factory = mock_factory(&log, |role, module| {
        if role == "source" {
            module.resetting_downstream_at(2)
        } else {
            module
        }
    });

    let mut test = TestPipeline::build(config, factory);
    test.ticks(4);

    assert_eq!(
        calls_of(&log, "mock_sink2"),
        vec!["init", "run 1 2", "run 2 2", "reset 1", "run 3 2"]
    );
}

#[test]
fn test_parameter_change_runs_config_before_next_run() {
    let log = call_log();
    let config = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_sink", Some("1[1]"))
        .build();

    let mut test = TestPipeline::build(config, mock_factory(&log, plain));
    test.ticks(2);
    test.command(PipelineCommand::SetParam {
        module: ModuleId(2),
        key: "gain".into(),
        value: 4i64.into(),
    });
    test.ticks(1);

    assert_eq!(
        calls_of(&log, "mock_sink2"),
        vec!["init", "run 1 2", "config", "run 2 2"]
    );
}

#[test]
fn test_threaded_pipeline_with_builtin_modules() {
    let config = ConfigBuilder::new()
        .module(1, "synthetic_source", None)
        .with(|m| m.with_param("rate_hz", 50_000i64).with_param("batch_us", 2_000i64))
        .module(2, "noise_filter", Some("1[1]"))
        .module(3, "statistics", Some("1[1]"))
        .with(|m| m.with_param("interval_ms", 50i64))
        .module(4, "channel_sink", Some("1[1a2]"))
        .build();

    let handle = PipelineBuilder::new(config).spawn().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut packets = 0;
    let mut statistics = 0;
    while Instant::now() < deadline && (packets == 0 || statistics == 0) {
        match handle.bridge.recv_timeout(Duration::from_millis(100)) {
            Some(PipelineMessage::Packets { module, .. }) if module == ModuleId(4) => packets += 1,
            Some(PipelineMessage::Statistics { snapshot, .. }) => {
                statistics += 1;
                assert!(snapshot.valid_events <= snapshot.total_events);
            }
            Some(PipelineMessage::ModuleError { message, .. }) => panic!("{}", message),
            _ => {}
        }
    }
    assert!(packets > 0, "no packets forwarded");
    assert!(statistics > 0, "no statistics published");

    handle.bridge.request_topology();
    let topology = loop {
        match handle.bridge.recv_timeout(Duration::from_secs(2)) {
            Some(PipelineMessage::Topology(topology)) => break topology,
            Some(_) => continue,
            None => panic!("no topology"),
        }
    };
    assert_eq!(topology.modules.len(), 4);
    assert!(topology
        .modules
        .iter()
        .all(|m| m.status == ModuleStatus::Running));

    handle.join();
}

#[test]
fn test_reconfigure_through_bridge() {
    let log = call_log();
    let first = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(2, "mock_sink", Some("1[1]"))
        .build();
    let second = ConfigBuilder::new()
        .module(1, "mock_source", None)
        .module(5, "mock_sink", Some("1[1]"))
        .build();

    let handle = PipelineBuilder::new(first)
        .with_factory(mock_factory(&log, plain))
        .spawn()
        .unwrap();

    handle.bridge.reconfigure(second);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "module 5 never started");
        match handle.bridge.recv_timeout(Duration::from_millis(100)) {
            Some(PipelineMessage::ModuleStatus { id, status })
                if id == ModuleId(5) && status == ModuleStatus::Running =>
            {
                break
            }
            Some(PipelineMessage::BuildFailed(reason)) => panic!("{}", reason),
            _ => {}
        }
    }

    handle.bridge.request_stats();
    let stats = loop {
        match handle.bridge.recv_timeout(Duration::from_secs(2)) {
            Some(PipelineMessage::Stats(stats)) => break stats,
            Some(PipelineMessage::BuildFailed(reason)) => panic!("{}", reason),
            Some(_) => continue,
            None => panic!("no stats"),
        }
    };
    assert_eq!(stats.generation, 2);
    handle.join();

    assert_eq!(calls_of(&log, "mock_sink2").last().map(String::as_str), Some("exit"));
    assert!(calls_of(&log, "mock_sink5").contains(&"init".to_string()));
}

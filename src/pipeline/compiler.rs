use super::compiled_plan::{CompiledPlan, InputRoute, ModuleRoutes, PlanStats};
use super::dependency_tree::{merge_all, DependencyTree, StreamTree};
use super::descriptor::{ModuleInfo, ModuleKind};
use super::error::{PipelineError, PipelineResult};
use super::id::{EventTypeId, ModuleId, SlotIndex, StreamKey, TapPoint};
use super::order;
use super::stream::StreamRegistry;
use super::wiring::{self, InputDefinition};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Everything the compiler needs to know about one configured module.
#[derive(Debug, Clone)]
pub struct ModuleDecl {
    pub id: ModuleId,
    pub name: String,
    pub info: ModuleInfo,
    /// Raw `input` wiring attribute
    pub input: Option<String>,
    /// Raw `output` wiring attribute
    pub output: Option<String>,
}

impl ModuleDecl {
    fn kind(&self) -> ModuleKind {
        self.info.kind
    }
}

/// Compiles module declarations and their wiring into an execution plan
pub struct PipelineCompiler;

impl PipelineCompiler {
    /// Validate the wiring and derive order, slots and copies.
    ///
    /// All configuration errors are reported here, before any module runs.
    pub fn compile(decls: &[ModuleDecl], generation: u64) -> PipelineResult<CompiledPlan> {
        let start_time = std::time::Instant::now();

        let by_id = Self::index_declarations(decls)?;
        for decl in decls {
            decl.info
                .validate()
                .map_err(|reason| PipelineError::config(&decl.name, reason))?;
            Self::check_attributes(decl)?;
        }
        Self::check_has_endpoints(decls)?;

        // Stream registry from every producer's outputs
        let (mut streams, outputs) = Self::build_streams(decls)?;

        // Parse the consumer side, registering users
        let kinds: HashMap<ModuleId, ModuleKind> =
            decls.iter().map(|d| (d.id, d.kind())).collect();
        let inputs = Self::parse_inputs(decls, &kinds, &mut streams)?;

        let pruned = streams.prune_unused();
        if !pruned.is_empty() {
            tracing::debug!("Pruned {} unused stream(s): {:?}", pruned.len(), pruned);
        }

        for decl in decls.iter().filter(|d| d.kind() == ModuleKind::Source) {
            if !streams.has_streams_from(decl.id) {
                return Err(PipelineError::config(
                    &decl.name,
                    "SOURCE module is not connected to anything",
                ));
            }
        }

        Self::check_tap_points(&by_id, &inputs, &streams)?;
        streams.check_cycles()?;

        // Per-stream trees, merged into one
        let trees = Self::build_trees(&streams, &inputs)?;
        let merged = merge_all(&trees)?;

        let order = Self::execution_order(&merged, &inputs, decls)?;
        streams.reorder_users(&order);

        let (routes, slot_count, copies) = Self::assign_slots(&order, &outputs, &inputs, &streams)?;
        Self::check_dead_code(&order, &routes, &inputs, &by_id)?;

        let stats = PlanStats {
            total_modules: decls.len(),
            source_modules: Self::count_kind(decls, ModuleKind::Source),
            processor_modules: Self::count_kind(decls, ModuleKind::Processor),
            sink_modules: Self::count_kind(decls, ModuleKind::Sink),
            streams: streams.len(),
            slots: slot_count,
            copies,
            fillers: merged.filler_count(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        let plan = CompiledPlan {
            order,
            routes,
            slot_count,
            streams,
            inputs,
            generation,
            stats,
        };

        Self::log_plan(&plan, &trees, &merged, &by_id);
        Ok(plan)
    }

    fn index_declarations(decls: &[ModuleDecl]) -> PipelineResult<HashMap<ModuleId, &ModuleDecl>> {
        let mut by_id = HashMap::with_capacity(decls.len());
        for decl in decls {
            if by_id.insert(decl.id, decl).is_some() {
                return Err(PipelineError::config(
                    &decl.name,
                    format!("module id {} is used more than once", decl.id.0),
                ));
            }
        }
        Ok(by_id)
    }

    /// Presence rules for the `input` / `output` attributes
    fn check_attributes(decl: &ModuleDecl) -> PipelineResult<()> {
        let has_input = decl.input.as_deref().is_some_and(|s| !s.trim().is_empty());
        let has_output = decl.output.as_deref().is_some_and(|s| !s.trim().is_empty());

        match decl.kind() {
            ModuleKind::Source if has_input => {
                return Err(PipelineError::config(
                    &decl.name,
                    "SOURCE module cannot have an 'input' attribute",
                ))
            }
            ModuleKind::Processor | ModuleKind::Sink if !has_input => {
                return Err(PipelineError::config(
                    &decl.name,
                    format!("{} module requires an 'input' attribute", decl.kind()),
                ))
            }
            ModuleKind::Sink if has_output => {
                return Err(PipelineError::config(
                    &decl.name,
                    "SINK module cannot have an 'output' attribute",
                ))
            }
            _ => {}
        }

        if decl.info.has_undefined_output() && !has_output {
            return Err(PipelineError::config(
                &decl.name,
                "module with undefined outputs requires an 'output' attribute",
            ));
        }
        if has_output && !decl.info.has_undefined_output() {
            tracing::warn!(
                "Module '{}': 'output' attribute ignored, outputs are fixed by the module",
                decl.name
            );
        }

        Ok(())
    }

    fn check_has_endpoints(decls: &[ModuleDecl]) -> PipelineResult<()> {
        if Self::count_kind(decls, ModuleKind::Source) == 0 {
            return Err(PipelineError::config(
                "pipeline",
                "at least one SOURCE module is required",
            ));
        }
        if Self::count_kind(decls, ModuleKind::Sink) == 0 {
            return Err(PipelineError::config(
                "pipeline",
                "at least one SINK module is required",
            ));
        }
        Ok(())
    }

    fn count_kind(decls: &[ModuleDecl], kind: ModuleKind) -> usize {
        decls.iter().filter(|d| d.kind() == kind).count()
    }

    fn build_streams(
        decls: &[ModuleDecl],
    ) -> PipelineResult<(StreamRegistry, HashMap<ModuleId, Vec<EventTypeId>>)> {
        let mut streams = StreamRegistry::new();
        let mut outputs = HashMap::new();

        for decl in decls.iter().filter(|d| d.kind() != ModuleKind::Sink) {
            let types = if decl.info.has_undefined_output() {
                let text = decl.output.as_deref().unwrap_or_default();
                wiring::parse_output_types(text).map_err(|reason| {
                    PipelineError::config(
                        &decl.name,
                        format!("Invalid 'output' attribute: {}", reason),
                    )
                })?
            } else {
                decl.info.fixed_outputs().collect()
            };

            for &ty in &types {
                streams.register(
                    StreamKey::new(decl.id, ty),
                    decl.kind() == ModuleKind::Processor,
                );
            }
            outputs.insert(decl.id, types);
        }

        Ok((streams, outputs))
    }

    fn parse_inputs(
        decls: &[ModuleDecl],
        kinds: &HashMap<ModuleId, ModuleKind>,
        streams: &mut StreamRegistry,
    ) -> PipelineResult<HashMap<ModuleId, InputDefinition>> {
        let mut inputs = HashMap::new();

        for decl in decls.iter().filter(|d| d.kind() != ModuleKind::Source) {
            let invalid = |reason: String| {
                PipelineError::config(
                    &decl.name,
                    format!("Invalid 'input' attribute: {}", reason),
                )
            };

            let text = decl.input.as_deref().unwrap_or_default();
            let mut definition =
                wiring::parse_input_definition(text, decl.id, kinds, streams).map_err(invalid)?;
            wiring::check_against_specs(&definition, &decl.info.inputs).map_err(invalid)?;
            wiring::mark_copy_needed(&mut definition, &decl.info.inputs);

            inputs.insert(decl.id, definition);
        }

        Ok(inputs)
    }

    /// Every non-producer tap point must consume and modify that same stream
    fn check_tap_points(
        by_id: &HashMap<ModuleId, &ModuleDecl>,
        inputs: &HashMap<ModuleId, InputDefinition>,
        streams: &StreamRegistry,
    ) -> PipelineResult<()> {
        for (consumer, definition) in inputs {
            let name = by_id.get(consumer).map(|d| d.name.as_str()).unwrap_or("?");

            for (&producer, requests) in definition {
                for request in requests {
                    let TapPoint::After(tap) = request.tap else {
                        continue;
                    };
                    let key = StreamKey::new(producer, request.event_type);

                    let is_user = streams.find(key).is_some_and(|s| s.users.contains(&tap));
                    if !is_user {
                        return Err(PipelineError::config(
                            name,
                            format!(
                                "Invalid 'input' attribute: tap point {} on stream {}: referenced module is not part of stream",
                                tap.0, key
                            ),
                        ));
                    }

                    let modifies = inputs
                        .get(&tap)
                        .and_then(|d| d.get(&producer))
                        .is_some_and(|reqs| {
                            reqs.iter()
                                .any(|r| r.event_type == request.event_type && r.copy_needed)
                        });
                    if !modifies {
                        return Err(PipelineError::config(
                            name,
                            format!(
                                "Invalid 'input' attribute: tap point {} on stream {}: tap point does not modify this stream",
                                tap.0, key
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn build_trees(
        streams: &StreamRegistry,
        inputs: &HashMap<ModuleId, InputDefinition>,
    ) -> PipelineResult<Vec<StreamTree>> {
        let mut trees = Vec::with_capacity(streams.len());

        for stream in streams.iter() {
            let users: Vec<(ModuleId, TapPoint)> = stream
                .users
                .iter()
                .map(|&user| {
                    let tap = inputs
                        .get(&user)
                        .and_then(|d| d.get(&stream.key.producer))
                        .and_then(|reqs| {
                            reqs.iter().find(|r| r.event_type == stream.key.event_type)
                        })
                        .map(|r| r.tap)
                        .unwrap_or(TapPoint::Source);
                    (user, tap)
                })
                .collect();

            trees.push(StreamTree {
                key: stream.key,
                from_processor: stream.from_processor,
                tree: DependencyTree::build_for_stream(stream.key, &users)?,
            });
        }

        Ok(trees)
    }

    fn execution_order(
        merged: &DependencyTree,
        inputs: &HashMap<ModuleId, InputDefinition>,
        decls: &[ModuleDecl],
    ) -> PipelineResult<Vec<ModuleId>> {
        let copy_counts: HashMap<ModuleId, usize> = inputs
            .iter()
            .map(|(&id, def)| (id, def.values().flatten().filter(|r| r.copy_needed).count()))
            .collect();
        let flat = order::flatten(merged, &copy_counts);

        let placed: HashSet<ModuleId> = flat.iter().copied().collect();
        let mut missing: Vec<ModuleId> = decls
            .iter()
            .map(|d| d.id)
            .filter(|id| !placed.contains(id))
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(PipelineError::GraphCycle(format!(
                "modules {:?} could not be placed in the execution order",
                missing
            )));
        }

        let after: HashMap<ModuleId, Vec<ModuleId>> = inputs
            .iter()
            .map(|(&id, def)| {
                let deps = def
                    .iter()
                    .flat_map(|(&producer, reqs)| {
                        reqs.iter().map(move |r| r.tap.module(producer))
                    })
                    .collect();
                (id, deps)
            })
            .collect();

        let normalized = order::normalize(&flat, &after)?;
        if normalized != flat {
            tracing::debug!(
                "Execution order adjusted to honor cross-stream constraints: {:?} -> {:?}",
                flat,
                normalized
            );
        }
        Ok(normalized)
    }

    /// One forward pass over the order assigning slots and copies
    fn assign_slots(
        order: &[ModuleId],
        outputs: &HashMap<ModuleId, Vec<EventTypeId>>,
        inputs: &HashMap<ModuleId, InputDefinition>,
        streams: &StreamRegistry,
    ) -> PipelineResult<(Vec<ModuleRoutes>, usize, usize)> {
        let mut routes = Vec::new();
        routes.try_reserve_exact(order.len()).map_err(|e| {
            PipelineError::ResourceAllocation(format!("routing table: {}", e))
        })?;

        let mut table: HashMap<(StreamKey, TapPoint), SlotIndex> = HashMap::new();
        let mut next_slot = 0u32;
        let mut copies = 0usize;
        let mut alloc = || {
            let slot = SlotIndex(next_slot);
            next_slot += 1;
            slot
        };

        for &id in order {
            let mut module_routes = ModuleRoutes::default();

            if let Some(definition) = inputs.get(&id) {
                for (&producer, requests) in definition {
                    for request in requests {
                        let key = StreamKey::new(producer, request.event_type);
                        let Some(&slot) = table.get(&(key, request.tap)) else {
                            return Err(PipelineError::GraphCycle(format!(
                                "module {} reads stream {} before it is produced",
                                id, key
                            )));
                        };

                        if !request.copy_needed {
                            module_routes.inputs.push(InputRoute {
                                stream: key,
                                tap: request.tap,
                                slot,
                                copy_from: None,
                                writable: false,
                            });
                            continue;
                        }

                        let used_slot =
                            if Self::later_user_needs(id, key, request.tap, inputs, streams) {
                                let fresh = alloc();
                                copies += 1;
                                module_routes.inputs.push(InputRoute {
                                    stream: key,
                                    tap: request.tap,
                                    slot: fresh,
                                    copy_from: Some(slot),
                                    writable: true,
                                });
                                fresh
                            } else {
                                module_routes.inputs.push(InputRoute {
                                    stream: key,
                                    tap: request.tap,
                                    slot,
                                    copy_from: None,
                                    writable: true,
                                });
                                slot
                            };

                        table.insert((key, TapPoint::After(id)), used_slot);
                    }
                }
                module_routes.inputs.sort_by_key(|r| r.stream);
            }

            if let Some(types) = outputs.get(&id) {
                for &ty in types {
                    let key = StreamKey::new(id, ty);
                    let slot = if streams.find(key).is_some() {
                        let slot = alloc();
                        table.insert((key, TapPoint::Source), slot);
                        Some(slot)
                    } else {
                        None
                    };
                    module_routes.outputs.push((ty, slot));
                }
            }

            routes.push(module_routes);
        }

        Ok((routes, next_slot as usize, copies))
    }

    /// Does a module after `id` on stream `key` read the same tap?
    fn later_user_needs(
        id: ModuleId,
        key: StreamKey,
        tap: TapPoint,
        inputs: &HashMap<ModuleId, InputDefinition>,
        streams: &StreamRegistry,
    ) -> bool {
        let Some(stream) = streams.find(key) else {
            return false;
        };
        let Some(pos) = stream.users.iter().position(|&u| u == id) else {
            return false;
        };

        stream.users[pos + 1..].iter().any(|user| {
            inputs
                .get(user)
                .and_then(|d| d.get(&key.producer))
                .is_some_and(|reqs| {
                    reqs.iter()
                        .any(|r| r.event_type == key.event_type && r.tap == tap)
                })
        })
    }

    fn check_dead_code(
        order: &[ModuleId],
        routes: &[ModuleRoutes],
        inputs: &HashMap<ModuleId, InputDefinition>,
        by_id: &HashMap<ModuleId, &ModuleDecl>,
    ) -> PipelineResult<()> {
        let tapped: HashSet<ModuleId> = inputs
            .values()
            .flat_map(|d| d.values().flatten())
            .filter_map(|r| match r.tap {
                TapPoint::After(m) => Some(m),
                TapPoint::Source => None,
            })
            .collect();

        for (&id, module_routes) in order.iter().zip(routes) {
            let Some(decl) = by_id.get(&id) else {
                continue;
            };
            if decl.kind() != ModuleKind::Processor {
                continue;
            }
            let output_used = module_routes.outputs.iter().any(|(_, s)| s.is_some());
            if !output_used && !tapped.contains(&id) {
                return Err(PipelineError::DeadCode {
                    module: decl.name.clone(),
                    id,
                });
            }
        }
        Ok(())
    }

    fn log_plan(
        plan: &CompiledPlan,
        trees: &[StreamTree],
        merged: &DependencyTree,
        by_id: &HashMap<ModuleId, &ModuleDecl>,
    ) {
        tracing::info!(
            "Pipeline compiled: {} modules, {} streams, {} slots, {} copies (gen {}, {} us)",
            plan.stats.total_modules,
            plan.stats.streams,
            plan.stats.slots,
            plan.stats.copies,
            plan.generation,
            plan.stats.compile_time_us,
        );

        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }

        for stream in plan.streams.iter() {
            tracing::debug!(
                "Stream {}{}: users {:?}",
                stream.key,
                if stream.from_processor { " (processor)" } else { "" },
                stream.users
            );
        }
        for st in trees {
            tracing::debug!("Dependency tree of stream {}:\n{}", st.key, st.tree);
        }
        tracing::debug!("Merged dependency tree:\n{}", merged);

        let names: Vec<&str> = plan
            .order
            .iter()
            .map(|id| by_id.get(id).map(|d| d.name.as_str()).unwrap_or("?"))
            .collect();
        tracing::debug!("Global execution order: {:?}", names);

        for (id, routes) in plan.order.iter().zip(&plan.routes) {
            let outputs: BTreeMap<_, _> = routes.outputs.iter().copied().collect();
            tracing::debug!(
                "Module {}: inputs {:?}, outputs {:?}",
                id,
                routes
                    .inputs
                    .iter()
                    .map(|r| (r.slot.0, r.copy_from.map(|s| s.0)))
                    .collect::<Vec<_>>(),
                outputs
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::descriptor::{
        InputCount, InputStreamSpec, InputType, OutputStreamSpec,
    };
    use crate::pipeline::error::ErrorKind;

    const T1: EventTypeId = EventTypeId(1);
    const T2: EventTypeId = EventTypeId(2);

    fn source(id: u16) -> ModuleDecl {
        ModuleDecl {
            id: ModuleId(id),
            name: format!("src{}", id),
            info: ModuleInfo::new("source", ModuleKind::Source).output(OutputStreamSpec::fixed(T1)),
            input: None,
            output: None,
        }
    }

    fn processor(id: u16, input: &str, mutates: bool, output: bool) -> ModuleDecl {
        let mut info = ModuleInfo::new("processor", ModuleKind::Processor).input(
            InputStreamSpec::new(InputType::Fixed(T1), InputCount::Any, mutates),
        );
        if output {
            info = info.output(OutputStreamSpec::fixed(T1));
        }
        ModuleDecl {
            id: ModuleId(id),
            name: format!("proc{}", id),
            info,
            input: Some(input.to_string()),
            output: None,
        }
    }

    fn sink(id: u16, input: &str) -> ModuleDecl {
        ModuleDecl {
            id: ModuleId(id),
            name: format!("sink{}", id),
            info: ModuleInfo::new("sink", ModuleKind::Sink)
                .input(InputStreamSpec::read_only(InputType::Any, InputCount::Any)),
            input: Some(input.to_string()),
            output: None,
        }
    }

    fn order_of(plan: &CompiledPlan) -> Vec<u16> {
        plan.order.iter().map(|m| m.0).collect()
    }

    #[test]
    fn test_linear_chain() {
        let decls = vec![source(1), processor(2, "1[1]", false, true), sink(3, "2[1]")];
        let plan = PipelineCompiler::compile(&decls, 1).unwrap();
        assert_eq!(order_of(&plan), vec![1, 2, 3]);
        assert_eq!(plan.stats.copies, 0);
        assert_eq!(plan.slot_count, 2);
        assert_eq!(plan.generation, 1);
    }

    #[test]
    fn test_read_only_processor_shares_source_slot() {
        // S=1, P1=2 reads read-only and outputs, O=3 reads (1,1) and (2,1)
        let decls = vec![
            source(1),
            processor(2, "1[1]", false, true),
            sink(3, "1[1] 2[1a2]"),
        ];
        let plan = PipelineCompiler::compile(&decls, 0).unwrap();
        assert_eq!(order_of(&plan), vec![1, 2, 3]);
        assert_eq!(plan.stats.copies, 0);

        let p1 = plan.routes_for(ModuleId(2)).unwrap();
        let o = plan.routes_for(ModuleId(3)).unwrap();
        assert_eq!(p1.inputs[0].slot, o.inputs[0].slot);
        assert!(!o.inputs[0].writable);
    }

    #[test]
    fn test_mutating_processor_in_place_when_original_read_first() {
        // P=2 mutates (1,1); O1=3 reads original, O2=4 reads after P.
        let decls = vec![
            source(1),
            processor(2, "1[1]", true, false),
            sink(3, "1[1]"),
            sink(4, "1[1a2]"),
        ];
        let plan = PipelineCompiler::compile(&decls, 0).unwrap();
        assert_eq!(order_of(&plan), vec![1, 3, 2, 4]);
        assert_eq!(plan.stats.copies, 0);
        let p = plan.routes_for(ModuleId(2)).unwrap();
        assert!(p.inputs[0].writable);
        assert_eq!(p.inputs[0].copy_from, None);
    }

    #[test]
    fn test_sibling_mutators_get_one_copy() {
        let decls = vec![
            source(1),
            processor(2, "1[1]", true, false),
            processor(3, "1[1]", true, false),
            sink(4, "1[1a2]"),
            sink(5, "1[1a3]"),
        ];
        let plan = PipelineCompiler::compile(&decls, 0).unwrap();
        assert_eq!(order_of(&plan), vec![1, 2, 3, 4, 5]);
        assert_eq!(plan.stats.copies, 1);

        let p2 = plan.routes_for(ModuleId(2)).unwrap();
        let p3 = plan.routes_for(ModuleId(3)).unwrap();
        let o4 = plan.routes_for(ModuleId(4)).unwrap();
        let o5 = plan.routes_for(ModuleId(5)).unwrap();
        assert_eq!(p2.inputs[0].copy_from, Some(p3.inputs[0].slot));
        assert_eq!(o4.inputs[0].slot, p2.inputs[0].slot);
        assert_eq!(o5.inputs[0].slot, p3.inputs[0].slot);
        assert_ne!(o4.inputs[0].slot, o5.inputs[0].slot);
    }

    #[test]
    fn test_non_processor_tap_point_rejected() {
        let mut src2 = source(2);
        src2.info = ModuleInfo::new("source", ModuleKind::Source)
            .output(OutputStreamSpec::fixed(EventTypeId(5)));
        let decls = vec![src2, sink(9, "2[5]"), sink(10, "2[5a9]")];
        let err = PipelineCompiler::compile(&decls, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("tap point does not modify this stream"));
        assert!(err.to_string().contains("sink10"));
    }

    #[test]
    fn test_dead_processor() {
        // Processor output has no consumers and nobody taps after it.
        let decls = vec![
            source(1),
            processor(2, "1[1]", true, true),
            sink(3, "1[1]"),
        ];
        let err = PipelineCompiler::compile(&decls, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadCode);
        assert!(err.to_string().contains("proc2"));
    }

    #[test]
    fn test_unconnected_source() {
        let decls = vec![source(1), source(2), sink(3, "1[1]")];
        let err = PipelineCompiler::compile(&decls, 0).unwrap_err();
        assert!(err.to_string().contains("src2"));
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_missing_endpoints() {
        assert!(PipelineCompiler::compile(&[source(1)], 0).is_err());
        assert!(PipelineCompiler::compile(&[sink(2, "1[1]")], 0).is_err());
        assert!(PipelineCompiler::compile(&[], 0).is_err());
    }

    #[test]
    fn test_attribute_presence() {
        let mut s = source(1);
        s.input = Some("2[1]".into());
        assert!(PipelineCompiler::compile(&[s, sink(2, "1[1]")], 0).is_err());

        let mut o = sink(2, "1[1]");
        o.output = Some("1".into());
        assert!(PipelineCompiler::compile(&[source(1), o], 0).is_err());

        let mut bare = sink(2, "");
        bare.input = None;
        let err = PipelineCompiler::compile(&[source(1), bare], 0).unwrap_err();
        assert!(err.to_string().contains("requires an 'input' attribute"));
    }

    #[test]
    fn test_undefined_output_from_attribute() {
        let mut src = source(1);
        src.info = ModuleInfo::new("source", ModuleKind::Source).output(OutputStreamSpec::UNDEFINED);
        assert!(PipelineCompiler::compile(&[src.clone(), sink(2, "1[2]")], 0).is_err());

        src.output = Some("2,1".into());
        let plan = PipelineCompiler::compile(&[src, sink(2, "1[2]")], 0).unwrap();
        assert!(plan.stream_exists(ModuleId(1), T2));
        assert!(!plan.stream_exists(ModuleId(1), T1));
        let routes = plan.routes_for(ModuleId(1)).unwrap();
        assert_eq!(routes.outputs.len(), 2);
    }

    #[test]
    fn test_tap_point_not_part_of_stream() {
        let decls = vec![
            source(1),
            source(5),
            processor(2, "5[1]", true, false),
            sink(3, "1[1a2]"),
            sink(4, "5[1a2]"),
        ];
        let err = PipelineCompiler::compile(&decls, 0).unwrap_err();
        assert!(err.to_string().contains("not part of stream"));
    }

    #[test]
    fn test_processor_consuming_itself_is_cycle() {
        let decls = vec![
            source(1),
            processor(2, "1[1] 2[1]", false, true),
            sink(3, "2[1]"),
        ];
        let err = PipelineCompiler::compile(&decls, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GraphCycle);
        assert!(err.to_string().contains("its own producer"));
    }

    #[test]
    fn test_cross_stream_cycle() {
        // 2 and 3 each consume the other's output.
        let mut p2 = processor(2, "1[1] 3[1]", false, true);
        let mut p3 = processor(3, "2[1]", false, true);
        p2.info.inputs[0].count = InputCount::Any;
        p3.info.inputs[0].count = InputCount::Any;
        let decls = vec![source(1), p2, p3, sink(4, "3[1]")];
        let err = PipelineCompiler::compile(&decls, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GraphCycle);
    }

    #[test]
    fn test_queries() {
        let decls = vec![
            source(1),
            processor(2, "1[1]", false, true),
            sink(3, "1[1] 2[1]"),
            sink(4, "2[1]"),
        ];
        let plan = PipelineCompiler::compile(&decls, 0).unwrap();
        assert_eq!(plan.input_deps(ModuleId(3)), vec![ModuleId(1), ModuleId(2)]);
        assert!(plan.input_deps(ModuleId(1)).is_empty());
        assert_eq!(plan.output_rev_deps(ModuleId(1)), vec![ModuleId(2), ModuleId(3)]);
        assert_eq!(plan.output_rev_deps(ModuleId(2)), vec![ModuleId(3), ModuleId(4)]);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let decls = vec![
            source(1),
            processor(2, "1[1]", true, false),
            processor(3, "1[1]", true, false),
            sink(4, "1[1a2]"),
            sink(5, "1[1a3] 1[1]"),
        ];
        // duplicate producer block in sink 5
        assert!(PipelineCompiler::compile(&decls, 0).is_err());

        let decls = vec![
            source(1),
            processor(2, "1[1]", true, false),
            processor(3, "1[1]", true, false),
            sink(4, "1[1a2]"),
            sink(5, "1[1a3]"),
        ];
        let a = PipelineCompiler::compile(&decls, 0).unwrap();
        let b = PipelineCompiler::compile(&decls, 1).unwrap();
        assert_eq!(a.order, b.order);
        assert_eq!(a.routes, b.routes);
    }
}

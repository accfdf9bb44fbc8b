//! Parsing and validation of the `input` and `output` wiring attributes.
//!
//! Input wiring is a whitespace-separated list of producer blocks:
//!
//! ```text
//! 1[1,2]        types 1 and 2 straight from module 1
//! 1[1a3]        type 1 from module 1, after processor 3 has modified it
//! 1[1] 4[2a5]   two producer blocks
//! ```
//!
//! Output wiring is a comma-separated list of event types (`"1,2"`).

use crate::pipeline::descriptor::{InputCount, InputStreamSpec, InputType, ModuleKind};
use crate::pipeline::id::{EventTypeId, ModuleId, StreamKey, TapPoint, MAX_ID};
use crate::pipeline::stream::StreamRegistry;
use std::collections::{BTreeMap, HashMap};

/// One consumed stream, as requested by a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapRequest {
    pub event_type: EventTypeId,
    pub tap: TapPoint,
    /// Set when the consumer modifies this stream in place.
    pub copy_needed: bool,
}

/// Producer id to the tap requests of one consumer.
pub type InputDefinition = BTreeMap<ModuleId, Vec<TapRequest>>;

/// Parse an `output` attribute into a list of event types.
pub fn parse_output_types(text: &str) -> Result<Vec<EventTypeId>, String> {
    let mut types = Vec::new();
    for part in text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format!("empty type in '{}'", text.trim()));
        }
        let ty = parse_id(part).map_err(|e| format!("type '{}': {}", part, e))?;
        let ty = EventTypeId(ty);
        if types.contains(&ty) {
            return Err(format!("duplicate type {}", ty));
        }
        types.push(ty);
    }
    types.sort_unstable();
    Ok(types)
}

/// Parse an `input` attribute and register the consumer on every stream it names.
///
/// `kinds` holds every configured module.
pub fn parse_input_definition(
    text: &str,
    consumer: ModuleId,
    kinds: &HashMap<ModuleId, ModuleKind>,
    streams: &mut StreamRegistry,
) -> Result<InputDefinition, String> {
    let mut definition = InputDefinition::new();

    for block in text.split_whitespace() {
        let (producer, entries) = split_block(block)?;

        if definition.contains_key(&producer) {
            return Err(format!("duplicate producer block for module {}", producer.0));
        }
        if !kinds.contains_key(&producer) {
            return Err(format!("unknown producer module {}", producer.0));
        }

        let mut requests: Vec<TapRequest> = Vec::new();
        for entry in entries.split(',') {
            let request = parse_entry(entry, producer, kinds)?;

            if requests.iter().any(|r| r.event_type == request.event_type) {
                return Err(format!(
                    "duplicate type {} in block '{}'",
                    request.event_type, block
                ));
            }

            let key = StreamKey::new(producer, request.event_type);
            if !streams.mark_user(key, consumer) {
                return Err(format!("no stream {} exists", key));
            }

            requests.push(request);
        }

        definition.insert(producer, requests);
    }

    if definition.is_empty() {
        return Err("no producer blocks given".to_string());
    }

    Ok(definition)
}

fn split_block(block: &str) -> Result<(ModuleId, &str), String> {
    let malformed = || format!("malformed block '{}'", block);

    let open = block.find('[').ok_or_else(malformed)?;
    let inner = block[open + 1..].strip_suffix(']').ok_or_else(malformed)?;
    if inner.is_empty() || inner.contains(['[', ']']) {
        return Err(malformed());
    }

    let producer = parse_id(&block[..open]).map_err(|e| format!("{} in '{}'", e, block))?;
    Ok((ModuleId(producer), inner))
}

fn parse_entry(
    entry: &str,
    producer: ModuleId,
    kinds: &HashMap<ModuleId, ModuleKind>,
) -> Result<TapRequest, String> {
    let (ty, tap) = match entry.split_once('a') {
        Some((ty, tap)) => (ty, Some(tap)),
        None => (entry, None),
    };

    let event_type = EventTypeId(parse_id(ty).map_err(|e| format!("type '{}': {}", entry, e))?);

    let tap = match tap {
        None => TapPoint::Source,
        Some(tap) => {
            let tap = ModuleId(parse_id(tap).map_err(|e| format!("tap point '{}': {}", entry, e))?);
            match kinds.get(&tap) {
                None => return Err(format!("tap point {} is not a configured module", tap.0)),
                Some(ModuleKind::Processor) => {}
                Some(kind) => {
                    return Err(format!(
                        "tap point does not modify this stream: module {} is a {}, not a PROCESSOR",
                        tap.0, kind
                    ))
                }
            }
            if tap == producer {
                TapPoint::Source
            } else {
                TapPoint::After(tap)
            }
        }
    };

    Ok(TapRequest {
        event_type,
        tap,
        copy_needed: false,
    })
}

fn parse_id(text: &str) -> Result<u16, String> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{}' is not a number", text));
    }
    match text.parse::<u32>() {
        Ok(v) if v <= MAX_ID as u32 => Ok(v as u16),
        _ => Err(format!("{} is out of range 0..={}", text, MAX_ID)),
    }
}

/// Check the parsed requests against the consumer's declared input specs.
pub fn check_against_specs(
    definition: &InputDefinition,
    specs: &[InputStreamSpec],
) -> Result<(), String> {
    let mut per_type: BTreeMap<EventTypeId, usize> = BTreeMap::new();
    for request in definition.values().flatten() {
        *per_type.entry(request.event_type).or_default() += 1;
    }
    let total: usize = per_type.values().sum();

    if let [spec] = specs {
        if spec.event_type == InputType::Any {
            return match spec.count {
                InputCount::Any if total == 0 => {
                    Err("module requires at least one input stream".into())
                }
                InputCount::Exactly(1) if total != 1 => Err(format!(
                    "module requires exactly one input stream, {} given",
                    total
                )),
                _ => Ok(()),
            };
        }
    }

    if let Some(ty) = per_type
        .keys()
        .find(|ty| !specs.iter().any(|s| s.event_type == InputType::Fixed(**ty)))
    {
        return Err(format!("module does not accept input type {}", ty));
    }

    for spec in specs {
        let InputType::Fixed(ty) = spec.event_type else {
            continue;
        };
        let count = per_type.get(&ty).copied().unwrap_or(0);
        match spec.count {
            InputCount::Any if count == 0 => {
                return Err(format!("module requires at least one stream of type {}", ty))
            }
            InputCount::Exactly(n) if count != usize::from(n) => {
                return Err(format!(
                    "module requires exactly {} stream(s) of type {}, {} given",
                    n, ty, count
                ))
            }
            _ => {}
        }
    }

    Ok(())
}

/// Flag requests whose matching input spec modifies data.
pub fn mark_copy_needed(definition: &mut InputDefinition, specs: &[InputStreamSpec]) {
    for spec in specs.iter().filter(|s| s.mutates_data) {
        for request in definition.values_mut().flatten() {
            if spec.accepts(request.event_type) {
                request.copy_needed = true;
            }
        }
    }
}

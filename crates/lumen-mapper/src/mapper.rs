//! Per-frame execution: the state-effects phase (priority-ordered envelope
//! selection) followed by the directive phase (trigger → value → write),
//! dispatched through links.

use std::collections::HashMap;

use lumen_core::{Blackboard, LightEngine, StateValue};
use rand::Rng;

use crate::expr::EvalContext;
use crate::program::{Aggregate, LinkSpec, MappingConfig, RangeSpec, ScaleSrc, Trigger, ValueSpec};
use crate::state_effect::{self, ActiveStateEffect, MAPPER_SENDER};

const DEFAULT_COOLDOWN_S: f64 = 1.0;
const DEFAULT_THRESHOLD: f64 = 0.25;

/// A property write pending an effect rather than an immediate set, carrying
/// the computed end value.
struct DurationEntry {
    value: i32,
    duration_s: f64,
    keep_state: bool,
}

/// Owns every light's resolved mapping config plus the cross-frame state
/// the mapper needs: per-(light, property) last-write clocks and the
/// currently applied state-effect per light.
pub struct Mapper {
    configs: HashMap<String, MappingConfig>,
    light_order: Vec<String>,
    prop_last_update: HashMap<String, HashMap<String, f64>>,
    applied: HashMap<String, (usize, ActiveStateEffect)>,
}

impl Mapper {
    pub fn new(configs: HashMap<String, MappingConfig>) -> Self {
        let mut light_order: Vec<String> = configs.keys().cloned().collect();
        light_order.sort();
        Self {
            configs,
            light_order,
            prop_last_update: HashMap::new(),
            applied: HashMap::new(),
        }
    }

    pub fn run(&mut self, engine: &mut LightEngine, blackboard: &Blackboard) {
        for light in self.light_order.clone() {
            self.run_state_effects(&light, engine, blackboard);
            self.run_directives(&light, engine, blackboard);
        }
    }

    fn run_state_effects(&mut self, light: &str, engine: &mut LightEngine, blackboard: &Blackboard) {
        let Some(config) = self.configs.get(light) else {
            return;
        };
        if config.state_effects.is_empty() {
            return;
        }
        let now = blackboard.now;
        let applicable_idx = config.state_effects.iter().position(|def| {
            let ctx = EvalContext {
                blackboard,
                light,
                prop_last_update: &self.prop_last_update,
            };
            def.when.eval(&ctx)
        });

        let mut slot = self.applied.remove(light);

        // No longer the top-priority applicable effect (either some other
        // effect outranks it now, or nothing applies to it at all): drop it,
        // restoring its snapshot only if nothing else is about to take over.
        if let Some((idx, active)) = slot.take() {
            if applicable_idx == Some(idx) {
                slot = Some((idx, active));
            } else {
                state_effect::unapply(&active, light, engine, applicable_idx.is_none());
            }
        }

        // Still the top-priority applicable effect, but its sub-effects have
        // all finished: refresh it.
        if let Some((idx, active)) = slot.take() {
            if state_effect::check(&active, engine) {
                slot = Some((idx, active));
            } else {
                let config = self.configs.get(light).expect("light config disappeared mid-frame");
                let fresh = state_effect::apply(&config.state_effects[idx], engine, now);
                slot = Some((idx, fresh));
            }
        }

        if slot.is_none() {
            if let Some(idx) = applicable_idx {
                let config = self.configs.get(light).expect("light config disappeared mid-frame");
                let active = state_effect::apply(&config.state_effects[idx], engine, now);
                slot = Some((idx, active));
            }
        }

        if let Some(entry) = slot {
            self.applied.insert(light.to_string(), entry);
        }
    }

    fn run_directives(&mut self, light: &str, engine: &mut LightEngine, blackboard: &Blackboard) {
        let Some(config) = self.configs.get(light) else {
            return;
        };
        if config.program.is_empty() {
            return;
        }
        let now = blackboard.now;
        let mut rng = rand::thread_rng();
        let mut state: HashMap<String, i32> = HashMap::new();
        let mut durations: HashMap<String, DurationEntry> = HashMap::new();

        for directive in &config.program {
            let last = *self
                .prop_last_update
                .entry(light.to_string())
                .or_default()
                .entry(directive.function.clone())
                .or_insert(-10_000.0);
            let cooldown = config
                .cooldown
                .get(&directive.function)
                .copied()
                .unwrap_or(DEFAULT_COOLDOWN_S);
            if now - last < cooldown {
                continue;
            }

            let needs_frequency = directive.trigger == Trigger::Frequency || directive.scale_src == Some(ScaleSrc::Frequency);
            let mut freq_agg = None;
            let mut freq_peak = None;
            if needs_frequency {
                let Some(audio) = &blackboard.audio else {
                    continue;
                };
                let bins: Vec<f32> = if directive.bins.is_empty() {
                    audio.clone()
                } else {
                    let mut out = Vec::with_capacity(directive.bins.len());
                    let mut in_range = true;
                    for &i in &directive.bins {
                        match audio.get(i) {
                            Some(v) => out.push(*v),
                            None => {
                                tracing::error!(light = %light, function = %directive.function, bin = i, bins = audio.len(), "bin index out of range, skipping directive");
                                in_range = false;
                                break;
                            }
                        }
                    }
                    if !in_range {
                        continue;
                    }
                    out
                };
                if bins.is_empty() {
                    continue;
                }
                let agg = match directive.aggregate {
                    Aggregate::Max => bins.iter().copied().fold(f32::MIN, f32::max),
                    Aggregate::Avg => bins.iter().copied().sum::<f32>() / bins.len() as f32,
                };
                let (peak_idx, _) = bins
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).expect("audio bins are never NaN"))
                    .expect("bins checked non-empty above");
                freq_agg = Some(f64::from(agg));
                freq_peak = Some(1.0 - (peak_idx as f64 / bins.len() as f64));
            }

            let trigger_value = match directive.trigger {
                Trigger::Onset => {
                    if blackboard.is_onset != Some(true) {
                        continue;
                    }
                    1.0
                }
                Trigger::Beat => {
                    if blackboard.is_beat != Some(true) {
                        continue;
                    }
                    1.0
                }
                Trigger::Frequency => {
                    let Some(agg) = freq_agg else { continue };
                    let threshold = directive.threshold.unwrap_or(DEFAULT_THRESHOLD);
                    let passes = if threshold < 0.0 { agg < threshold.abs() } else { agg >= threshold };
                    if !passes {
                        continue;
                    }
                    agg
                }
            };

            let mut value = match directive.value {
                ValueSpec::Default => trigger_value * 255.0,
                ValueSpec::Random => f64::from(rng.gen_range(0..=255u8)),
                ValueSpec::Literal(n) => f64::from(n),
            };

            match directive.range {
                Some(RangeSpec::Scaled) => {
                    let scale = match directive.scale_src {
                        None => trigger_value,
                        Some(ScaleSrc::Frequency) => freq_peak.unwrap_or(0.0),
                    };
                    value *= scale;
                }
                Some(RangeSpec::Explicit(lo, hi)) => {
                    value = value.clamp(f64::from(lo), f64::from(hi));
                }
                None => {}
            }

            let value = value.clamp(0.0, 255.0) as i32;

            match directive.duration {
                Some(duration_s) => {
                    durations.insert(
                        directive.function.clone(),
                        DurationEntry {
                            value,
                            duration_s,
                            keep_state: directive.keep_state,
                        },
                    );
                }
                None => {
                    state.insert(directive.function.clone(), value);
                }
            }

            self.prop_last_update.get_mut(light).expect("just inserted above").insert(directive.function.clone(), now);
        }

        if state.is_empty() && durations.is_empty() {
            return;
        }

        for (function, entry) in &durations {
            if let Err(err) = engine.create_effect(
                MAPPER_SENDER,
                light,
                function,
                None,
                Some(entry.value),
                entry.duration_s,
                entry.keep_state,
                now,
                true,
            ) {
                tracing::warn!(light = %light, function = %function, error = %err, "mapper directive effect rejected");
            }
        }

        if !state.is_empty() {
            let values: HashMap<String, StateValue> = state.iter().map(|(k, v)| (k.clone(), StateValue::Number(*v))).collect();
            engine.set_state(MAPPER_SENDER, light, values);

            let Some(config) = self.configs.get(light) else {
                return;
            };
            for (linked_name, link_spec) in &config.links {
                let mut linked_state = state.clone();
                if let LinkSpec::Invert(props) = link_spec {
                    for prop in props {
                        if let Some(v) = linked_state.get_mut(prop) {
                            *v = 255 - *v;
                        }
                    }
                }
                let values: HashMap<String, StateValue> = linked_state.into_iter().map(|(k, v)| (k, StateValue::Number(v))).collect();
                engine.set_state(MAPPER_SENDER, linked_name, values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Predicate;
    use crate::program::Directive;
    use lumen_core::{DmxSink, FunctionDescriptor, Light};
    use std::collections::HashMap as Map;

    struct NullSink;
    impl DmxSink for NullSink {
        fn set_channel(&mut self, _chan: u16, _value: u8) {}
        fn render(&mut self) {}
    }

    fn engine_with_lights(names: &[&str]) -> LightEngine {
        let lights = names
            .iter()
            .map(|name| {
                let mut functions = Map::new();
                functions.insert("dim".to_string(), FunctionDescriptor::range(1));
                functions.insert("pan".to_string(), FunctionDescriptor::range(2));
                Light::new(*name, "generic", "default", 1, functions, Map::new())
            })
            .collect();
        let mut devices: Map<String, Box<dyn DmxSink>> = Map::new();
        devices.insert("default".to_string(), Box::new(NullSink));
        LightEngine::new(lights, devices).unwrap()
    }

    fn directive(function: &str, trigger: Trigger, bins: Vec<usize>, threshold: Option<f64>) -> Directive {
        Directive {
            trigger,
            bins,
            aggregate: Aggregate::Max,
            threshold,
            scale_src: None,
            range: None,
            function: function.to_string(),
            value: ValueSpec::Default,
            duration: None,
            keep_state: true,
        }
    }

    #[test]
    fn threshold_directive_skips_below_and_writes_above() {
        let mut engine = engine_with_lights(&["X"]);
        let mut configs = HashMap::new();
        configs.insert(
            "X".to_string(),
            MappingConfig {
                program: vec![directive("dim", Trigger::Frequency, vec![0], Some(0.5))],
                ..Default::default()
            },
        );
        let mut mapper = Mapper::new(configs);

        let mut bb = Blackboard::new(0.0);
        bb.audio = Some(vec![0.4]);
        mapper.run(&mut engine, &bb);
        assert_eq!(engine.get_state("X").unwrap().get("dim"), None);

        let mut bb2 = Blackboard::new(1.0);
        bb2.audio = Some(vec![0.6]);
        mapper.run(&mut engine, &bb2);
        assert_eq!(engine.get_state("X").unwrap().get("dim"), Some(&153));
    }

    #[test]
    fn invert_link_mirrors_into_linked_light() {
        let mut engine = engine_with_lights(&["A", "B", "C"]);
        let mut configs = HashMap::new();
        let mut a = MappingConfig {
            program: vec![directive("pan", Trigger::Onset, vec![], None)],
            ..Default::default()
        };
        a.program[0].value = ValueSpec::Literal(200);
        a.links.insert("B".to_string(), LinkSpec::Invert(vec!["pan".to_string()]));
        a.links.insert("C".to_string(), LinkSpec::Plain);
        configs.insert("A".to_string(), a);
        let mut mapper = Mapper::new(configs);

        let mut bb = Blackboard::new(0.0);
        bb.is_onset = Some(true);
        mapper.run(&mut engine, &bb);

        assert_eq!(engine.get_state("A").unwrap().get("pan"), Some(&200));
        assert_eq!(engine.get_state("B").unwrap().get("pan"), Some(&55));
        assert_eq!(engine.get_state("C").unwrap().get("pan"), Some(&200));
    }

    #[test]
    fn cooldown_blocks_a_second_write_within_the_window() {
        let mut engine = engine_with_lights(&["X"]);
        let mut configs = HashMap::new();
        let mut cfg = MappingConfig {
            program: vec![directive("dim", Trigger::Onset, vec![], None)],
            ..Default::default()
        };
        cfg.cooldown.insert("dim".to_string(), 5.0);
        configs.insert("X".to_string(), cfg);
        let mut mapper = Mapper::new(configs);

        let mut bb = Blackboard::new(0.0);
        bb.is_onset = Some(true);
        mapper.run(&mut engine, &bb);
        assert_eq!(engine.get_state("X").unwrap().get("dim"), Some(&255));

        engine.set_state("mapper", "X", HashMap::from([("dim".to_string(), StateValue::Number(0))]));
        let mut bb2 = Blackboard::new(1.0);
        bb2.is_onset = Some(true);
        mapper.run(&mut engine, &bb2);
        assert_eq!(engine.get_state("X").unwrap().get("dim"), Some(&0));
    }

    #[test]
    fn state_effect_preempts_the_directive_write_on_reset_property() {
        let mut engine = engine_with_lights(&["X"]);
        let mut configs = HashMap::new();
        let def = crate::program::StateEffectDef {
            name: "flash".to_string(),
            light: "X".to_string(),
            when: Predicate::parse("is_beat").unwrap(),
            effects: HashMap::from([(
                "dim".to_string(),
                crate::program::EffectArgs {
                    start_value: Some(crate::program::EffectValue::Number(255)),
                    end_value: Some(crate::program::EffectValue::Number(255)),
                    duration_s: 10.0,
                    keep_state: true,
                },
            )]),
            reset: vec!["dim".to_string()],
            priority: 10,
            keep_state: true,
        };
        configs.insert(
            "X".to_string(),
            MappingConfig {
                state_effects: vec![def],
                ..Default::default()
            },
        );
        let mut mapper = Mapper::new(configs);

        let mut bb = Blackboard::new(0.0);
        bb.is_beat = Some(true);
        mapper.run(&mut engine, &bb);
        // The sub-effect is only registered here; its initial write is
        // flushed on the engine's own frame step.
        let mut out = Blackboard::new(0.0);
        engine.run(0.0, &mut out);
        assert_eq!(engine.get_state("X").unwrap().get("dim"), Some(&255));
    }
}

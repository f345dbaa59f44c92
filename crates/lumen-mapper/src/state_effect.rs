//! Runtime state for one applied [`StateEffectDef`]: the engine effect ids
//! it owns and the pre-apply snapshot used to restore its `reset`
//! properties on unapply.

use std::collections::HashMap;

use lumen_core::{EffectId, LightEngine};
use rand::Rng;

use crate::program::{EffectValue, StateEffectDef};

pub const MAPPER_SENDER: &str = "mapper";

/// A [`StateEffectDef`] currently applied to its light.
pub struct ActiveStateEffect {
    pub def_name: String,
    effect_ids: HashMap<String, EffectId>,
    snapshot: HashMap<String, i32>,
}

/// Resolve an [`EffectValue`], rolling a fresh random byte for `Random` —
/// once, at apply time, never re-rolled per frame.
fn resolve_value(v: Option<EffectValue>, rng: &mut impl Rng) -> Option<i32> {
    match v? {
        EffectValue::Number(n) => Some(n),
        EffectValue::Random => Some(rng.gen_range(0..=255)),
    }
}

/// Snapshot `def.reset` from the engine's current state, create one engine
/// effect per sub-effect, and return the resulting [`ActiveStateEffect`].
pub fn apply(def: &StateEffectDef, engine: &mut LightEngine, now: f64) -> ActiveStateEffect {
    let mut rng = rand::thread_rng();
    let current = engine.get_state(&def.light).unwrap_or_default();
    let snapshot: HashMap<String, i32> = def
        .reset
        .iter()
        .filter_map(|prop| current.get(prop).map(|v| (prop.clone(), *v)))
        .collect();

    let mut effect_ids = HashMap::new();
    for (property, args) in &def.effects {
        let start_value = resolve_value(args.start_value, &mut rng);
        let end_value = resolve_value(args.end_value, &mut rng);
        match engine.create_effect(
            MAPPER_SENDER,
            &def.light,
            property,
            start_value,
            end_value,
            args.duration_s,
            args.keep_state,
            now,
            true,
        ) {
            Ok(Some(id)) => {
                effect_ids.insert(property.clone(), id);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(light = %def.light, property = %property, state_effect = %def.name, error = %err, "failed to apply state-effect sub-effect"),
        }
    }

    ActiveStateEffect {
        def_name: def.name.clone(),
        effect_ids,
        snapshot,
    }
}

/// Whether any sub-effect this state-effect created is still running.
pub fn check(active: &ActiveStateEffect, engine: &LightEngine) -> bool {
    active.effect_ids.values().any(|id| engine.effect_exists(*id))
}

/// Cancel every sub-effect; if `reset_state`, restore the properties
/// captured in the apply-time snapshot.
pub fn unapply(active: &ActiveStateEffect, light: &str, engine: &mut LightEngine, reset_state: bool) {
    for id in active.effect_ids.values() {
        engine.cancel_effect_by_id(*id);
    }
    if reset_state && !active.snapshot.is_empty() {
        let state = active
            .snapshot
            .iter()
            .map(|(k, v)| (k.clone(), lumen_core::StateValue::Number(*v)))
            .collect();
        engine.set_state(MAPPER_SENDER, light, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Predicate;
    use lumen_core::{DmxSink, FunctionDescriptor, Light};
    use std::collections::HashMap as Map;

    struct NullSink;
    impl DmxSink for NullSink {
        fn set_channel(&mut self, _chan: u16, _value: u8) {}
        fn render(&mut self) {}
    }

    fn engine_with_light() -> LightEngine {
        let mut functions = Map::new();
        functions.insert("dim".to_string(), FunctionDescriptor::range(1));
        functions.insert("pan".to_string(), FunctionDescriptor::range(2));
        let light = Light::new("L", "generic", "default", 1, functions, Map::new());
        let mut devices: Map<String, Box<dyn DmxSink>> = Map::new();
        devices.insert("default".to_string(), Box::new(NullSink));
        LightEngine::new(vec![light], devices).unwrap()
    }

    fn def() -> StateEffectDef {
        StateEffectDef {
            name: "flash".to_string(),
            light: "L".to_string(),
            when: Predicate::parse("true").unwrap(),
            effects: HashMap::from([(
                "dim".to_string(),
                crate::program::EffectArgs {
                    start_value: Some(EffectValue::Number(255)),
                    end_value: Some(EffectValue::Number(0)),
                    duration_s: 1.0,
                    keep_state: false,
                },
            )]),
            reset: vec!["dim".to_string()],
            priority: 0,
            keep_state: false,
        }
    }

    #[test]
    fn apply_creates_a_sub_effect_and_check_reports_it_active() {
        let mut engine = engine_with_light();
        let d = def();
        let active = apply(&d, &mut engine, 0.0);
        assert!(check(&active, &engine));
    }

    #[test]
    fn unapply_with_reset_restores_the_snapshot() {
        let mut engine = engine_with_light();
        let d = def();
        let active = apply(&d, &mut engine, 0.0);
        unapply(&active, "L", &mut engine, true);
        let state = engine.get_state("L").unwrap();
        assert_eq!(state.get("dim"), Some(&0));
    }

    #[test]
    fn unapply_without_reset_leaves_state_as_is() {
        let mut engine = engine_with_light();
        let d = def();
        let active = apply(&d, &mut engine, 0.0);
        let mut bb = lumen_core::Blackboard::new(0.0);
        engine.run(0.0, &mut bb);
        unapply(&active, "L", &mut engine, false);
        assert!(!check(&active, &engine));
    }
}

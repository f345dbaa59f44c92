//! The light state/effect engine: exclusivity, time-based effects, and
//! per-frame reconciliation into DMX frames.

use std::collections::HashMap;

use crate::blackboard::Blackboard;
use crate::error::EngineError;
use crate::fixture::{send_batch, DmxSink, Light, StateValue};

/// Opaque handle to a running [`Effect`]. Holders never keep a live
/// reference to the effect itself — cancellation is always "cancel by id".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

/// A time-bounded interpolation of one function's value.
#[derive(Debug, Clone)]
pub struct Effect {
    pub id: EffectId,
    pub sender: String,
    pub light_name: String,
    pub function: String,
    pub start_value: i32,
    pub end_value: i32,
    pub duration_s: f64,
    pub start_time_s: f64,
    pub keep_state: bool,
    /// `(slowest_ms, fastest_ms)`, present only for speed-encoded moves.
    pub speed_config: Option<(f64, f64)>,
    pub orig_speed: Option<i32>,
    pub is_new: bool,
    pub is_cancelled: bool,
}

impl Effect {
    /// The speed-channel value to write for a speed-encoded move, or `None`
    /// if this function isn't speed-encoded.
    pub fn speed(&self) -> Option<i32> {
        let (_slowest, fastest) = self.speed_config?;
        let full_move_speed = 255.0 - (255.0 * (self.duration_s / fastest)).clamp(0.0, 255.0);
        let magnitude = (self.end_value - self.start_value).unsigned_abs() as f64 / 255.0;
        Some((full_move_speed * magnitude) as i32)
    }

    /// The interpolated value at time `now`, clamped to the range spanned
    /// by `start_value`/`end_value` regardless of direction.
    pub fn value(&self, now: f64) -> i32 {
        let t = now - self.start_time_s;
        let raw = self.start_value as f64
            + (self.end_value - self.start_value) as f64 * (t / self.duration_s);
        let lo = self.start_value.min(self.end_value) as f64;
        let hi = self.start_value.max(self.end_value) as f64;
        raw.clamp(lo, hi) as i32
    }

    pub fn done(&self, now: f64) -> bool {
        self.is_cancelled || (now - self.start_time_s) >= self.duration_s
    }
}

/// `(light_name, property) -> owning sender`. `property = None` locks the
/// whole light.
type ExclusivityKey = (String, Option<String>);

/// Holds lights, devices, in-flight effects, and the queued state writes
/// accumulated during a frame so that multiple stages see a consistent
/// "current + queued" view.
pub struct LightEngine {
    lights: HashMap<String, Light>,
    light_order: Vec<String>,
    devices: HashMap<String, Box<dyn DmxSink>>,
    exclusive: HashMap<ExclusivityKey, String>,
    effects: HashMap<EffectId, Effect>,
    state_queue: Vec<(String, HashMap<String, StateValue>)>,
    next_effect_id: u64,
}

impl LightEngine {
    pub fn new(
        lights: Vec<Light>,
        devices: HashMap<String, Box<dyn DmxSink>>,
    ) -> Result<Self, EngineError> {
        if devices.is_empty() {
            return Err(EngineError::NoDevices);
        }
        if !devices.contains_key("default") {
            return Err(EngineError::NoDefaultDevice);
        }
        let mut light_order = Vec::with_capacity(lights.len());
        let mut map = HashMap::with_capacity(lights.len());
        for light in lights {
            if map.contains_key(&light.name) {
                return Err(EngineError::DuplicateLight(light.name));
            }
            light_order.push(light.name.clone());
            map.insert(light.name.clone(), light);
        }
        Ok(Self {
            lights: map,
            light_order,
            devices,
            exclusive: HashMap::new(),
            effects: HashMap::new(),
            state_queue: Vec::new(),
            next_effect_id: 0,
        })
    }

    pub fn light_names(&self) -> impl Iterator<Item = &str> {
        self.light_order.iter().map(String::as_str)
    }

    /// Whether an effect handed out by `create_effect` is still registered
    /// (i.e. hasn't finished or been cancelled yet).
    pub fn effect_exists(&self, id: EffectId) -> bool {
        self.effects.contains_key(&id)
    }

    fn owner_allows(&self, light: &str, prop: &str, sender: &str) -> bool {
        match self.exclusive.get(&(light.to_string(), Some(prop.to_string()))) {
            Some(owner) => owner == sender,
            None => true,
        }
    }

    /// Filter `state` by exclusivity and enqueue what remains. Returns the
    /// accepted subset.
    pub fn set_state(
        &mut self,
        sender: &str,
        light_name: &str,
        state: HashMap<String, StateValue>,
    ) -> HashMap<String, StateValue> {
        let accepted: HashMap<String, StateValue> = state
            .into_iter()
            .filter(|(prop, _)| self.owner_allows(light_name, prop, sender))
            .collect();
        if !accepted.is_empty() {
            self.state_queue.push((light_name.to_string(), accepted.clone()));
        }
        accepted
    }

    /// `light.state` merged with any writes already queued this frame.
    pub fn get_state(&self, light_name: &str) -> Result<HashMap<String, i32>, EngineError> {
        let light = self
            .lights
            .get(light_name)
            .ok_or_else(|| EngineError::UnknownLight(light_name.to_string()))?;
        let mut out = light.state.clone();
        for (name, state) in &self.state_queue {
            if name != light_name {
                continue;
            }
            for (k, v) in state {
                if let StateValue::Number(n) = v {
                    out.insert(k.clone(), *n);
                }
            }
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_effect(
        &mut self,
        sender: &str,
        light_name: &str,
        function: &str,
        start_value: Option<i32>,
        end_value: Option<i32>,
        duration_s: f64,
        keep_state: bool,
        now: f64,
        override_existing: bool,
    ) -> Result<Option<EffectId>, EngineError> {
        let light = self
            .lights
            .get(light_name)
            .ok_or_else(|| EngineError::UnknownLight(light_name.to_string()))?;
        let fd = light
            .functions
            .get(function)
            .ok_or_else(|| EngineError::UnknownFunction(light_name.to_string(), function.to_string()))?;

        if !duration_s.is_finite() || duration_s <= 0.0 {
            return Err(EngineError::MissingDuration(light_name.to_string(), function.to_string()));
        }

        if !self.owner_allows(light_name, function, sender) {
            return Err(EngineError::Exclusive(light_name.to_string(), function.to_string()));
        }

        let mut to_cancel = None;
        for eff in self.effects.values() {
            if eff.light_name == light_name && eff.function == function {
                if eff.sender != sender {
                    return Err(EngineError::EffectConflict(
                        light_name.to_string(),
                        function.to_string(),
                    ));
                } else if override_existing {
                    to_cancel = Some(eff.id);
                    break;
                } else {
                    return Ok(None);
                }
            }
        }
        if let Some(id) = to_cancel {
            self.cancel_effect_by_id(id);
        }

        let light = self.lights.get(light_name).expect("checked above");
        let current = *light.state.get(function).unwrap_or(&0);
        let start_value = start_value.unwrap_or(current);
        let end_value = end_value.unwrap_or(current);
        let speed_config = fd.speed;
        let orig_speed = speed_config.map(|_| *light.initialize.get("speed").unwrap_or(&0));

        let id = EffectId(self.next_effect_id);
        self.next_effect_id += 1;
        self.effects.insert(
            id,
            Effect {
                id,
                sender: sender.to_string(),
                light_name: light_name.to_string(),
                function: function.to_string(),
                start_value,
                end_value,
                duration_s,
                start_time_s: now,
                keep_state,
                speed_config,
                orig_speed,
                is_new: true,
                is_cancelled: false,
            },
        );
        Ok(Some(id))
    }

    /// Cancel every effect matching `(light, function)`, or all effects on
    /// `light` if `function` is `None`.
    pub fn cancel_effect(&mut self, light: &str, function: Option<&str>) {
        let ids: Vec<EffectId> = self
            .effects
            .values()
            .filter(|e| e.light_name == light && function.is_none_or(|f| e.function == f))
            .map(|e| e.id)
            .collect();
        for id in ids {
            self.cancel_effect_by_id(id);
        }
    }

    pub fn cancel_effect_by_id(&mut self, id: EffectId) {
        let Some(eff) = self.effects.remove(&id) else {
            tracing::debug!(?id, "tried to cancel an effect that doesn't exist");
            return;
        };
        let mut new_state = HashMap::new();
        if !eff.keep_state {
            new_state.insert(eff.function.clone(), StateValue::Number(eff.start_value));
        }
        if let Some(orig_speed) = eff.orig_speed {
            new_state.insert("speed".to_string(), StateValue::Number(orig_speed));
        }
        if !new_state.is_empty() {
            self.set_state(&eff.sender, &eff.light_name, new_state);
        }
    }

    /// Set or clear exclusivity over the cross product of `lights` x
    /// `functions`. Acquiring fails atomically if any target is held by a
    /// different sender.
    pub fn set_exclusive(
        &mut self,
        sender: &str,
        lights: &[String],
        functions: &[Option<String>],
        acquire: bool,
    ) -> Result<(), EngineError> {
        let keys: Vec<ExclusivityKey> = lights
            .iter()
            .flat_map(|l| functions.iter().map(move |f| (l.clone(), f.clone())))
            .collect();
        if acquire {
            for key in &keys {
                if let Some(owner) = self.exclusive.get(key) {
                    if owner != sender {
                        return Err(EngineError::Exclusive(
                            key.0.clone(),
                            key.1.clone().unwrap_or_default(),
                        ));
                    }
                }
            }
            for key in keys {
                self.exclusive.insert(key, sender.to_string());
            }
        } else {
            for key in keys {
                if self.exclusive.get(&key).is_some_and(|s| s == sender) {
                    self.exclusive.remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Step every in-flight effect, flush the queue into the fixture model,
    /// render DMX, and attach the rendered light state to the blackboard.
    pub fn run(&mut self, now: f64, blackboard: &mut Blackboard) {
        let ids: Vec<EffectId> = self.effects.keys().copied().collect();
        for id in ids {
            let Some(eff) = self.effects.get(&id) else {
                continue;
            };
            if eff.is_new {
                let (sender, light_name, function, start_value, end_value) = (
                    eff.sender.clone(),
                    eff.light_name.clone(),
                    eff.function.clone(),
                    eff.start_value,
                    eff.end_value,
                );
                let speed = eff.speed();
                self.effects.get_mut(&id).unwrap().is_new = false;
                match speed {
                    None => {
                        self.set_state(
                            &sender,
                            &light_name,
                            HashMap::from([(function, StateValue::Number(start_value))]),
                        );
                    }
                    Some(speed) => {
                        self.set_state(
                            &sender,
                            &light_name,
                            HashMap::from([
                                ("speed".to_string(), StateValue::Number(speed)),
                                (function, StateValue::Number(end_value)),
                            ]),
                        );
                    }
                }
            } else {
                if eff.speed_config.is_none() {
                    let (sender, light_name, function, value) =
                        (eff.sender.clone(), eff.light_name.clone(), eff.function.clone(), eff.value(now));
                    self.set_state(&sender, &light_name, HashMap::from([(function, StateValue::Number(value))]));
                }
                if self.effects.get(&id).is_some_and(|e| e.done(now)) {
                    self.cancel_effect_by_id(id);
                }
            }
        }

        let queue = std::mem::take(&mut self.state_queue);
        let mut merged: HashMap<String, HashMap<String, StateValue>> = HashMap::new();
        for (light, state) in queue {
            merged.entry(light).or_default().extend(state);
        }
        for (light_name, state) in merged {
            if let Some(light) = self.lights.get_mut(&light_name) {
                light.set_state(state);
            }
        }

        let mut lights_mut: Vec<&mut Light> = self
            .light_order
            .iter()
            .filter_map(|name| self.lights.get_mut(name))
            .collect();
        send_batch(&mut self.devices, &mut lights_mut);

        blackboard.rendered_state = self
            .lights
            .iter()
            .map(|(name, light)| (name.clone(), light.state.clone()))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FunctionDescriptor;
    use std::collections::HashMap as Map;

    struct NullSink;
    impl DmxSink for NullSink {
        fn set_channel(&mut self, _chan: u16, _value: u8) {}
        fn render(&mut self) {}
    }

    fn engine_with_one_light() -> LightEngine {
        let mut functions = Map::new();
        functions.insert("dim".to_string(), FunctionDescriptor::range(1));
        functions.insert("pan".to_string(), FunctionDescriptor::range(2));
        let light = Light::new("L", "generic", "default", 1, functions, Map::new());
        let mut devices: HashMap<String, Box<dyn DmxSink>> = HashMap::new();
        devices.insert("default".to_string(), Box::new(NullSink));
        LightEngine::new(vec![light], devices).unwrap()
    }

    #[test]
    fn exclusivity_blocks_other_senders() {
        let mut engine = engine_with_one_light();
        engine
            .set_exclusive("s1", &["L".to_string()], &[Some("dim".to_string())], true)
            .unwrap();

        let accepted = engine.set_state(
            "s2",
            "L",
            Map::from([
                ("dim".to_string(), StateValue::Number(100)),
                ("pan".to_string(), StateValue::Number(50)),
            ]),
        );
        assert_eq!(accepted.len(), 1);
        assert!(accepted.contains_key("pan"));

        let err = engine
            .create_effect("s2", "L", "dim", Some(0), Some(255), 1.0, false, 0.0, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::Exclusive(_, _)));
    }

    #[test]
    fn effect_value_is_monotone_and_bounded() {
        let mut engine = engine_with_one_light();
        let id = engine
            .create_effect("x", "L", "dim", Some(0), Some(255), 1.0, false, 0.0, false)
            .unwrap()
            .unwrap();
        let eff = engine.effects.get(&id).unwrap();
        assert_eq!(eff.value(0.0), 0);
        assert_eq!(eff.value(1.0), 255);
        assert_eq!(eff.value(0.5), 127);
    }

    #[test]
    fn speed_encoded_effect_writes_speed_and_end_value_once() {
        let mut functions = Map::new();
        functions.insert(
            "pan".to_string(),
            FunctionDescriptor {
                speed: Some((25.0, 1.0)),
                ..FunctionDescriptor::range(1)
            },
        );
        let light = Light::new("L", "moving_head", "default", 1, functions, Map::new());
        let mut devices: HashMap<String, Box<dyn DmxSink>> = HashMap::new();
        devices.insert("default".to_string(), Box::new(NullSink));
        let mut engine = LightEngine::new(vec![light], devices).unwrap();

        let mut bb = Blackboard::new(0.0);
        engine
            .create_effect("x", "L", "pan", Some(0), Some(255), 1.0, false, 0.0, false)
            .unwrap();
        engine.run(0.0, &mut bb);
        assert_eq!(bb.rendered_state["L"]["pan"], 255);
    }

    #[test]
    fn create_effect_rejects_non_positive_duration() {
        let mut engine = engine_with_one_light();
        let err = engine
            .create_effect("x", "L", "dim", Some(0), Some(255), 0.0, false, 0.0, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingDuration(_, _)));

        let err = engine
            .create_effect("x", "L", "dim", Some(0), Some(255), f64::NAN, false, 0.0, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingDuration(_, _)));
    }
}

//! The fixture model: per-light function definitions, current/last/diff
//! state, DMX channel mapping, choice maps, and reset rules.

use std::collections::HashMap;

/// A value handed to [`Light::set_state`]. Mirrors the dynamic typing the
/// source config format allows: a raw number, a named choice-map label, or a
/// boolean.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Number(i32),
    Label(String),
    Bool(bool),
}

impl From<i32> for StateValue {
    fn from(v: i32) -> Self {
        StateValue::Number(v)
    }
}

/// `label -> [lo, hi]` inclusive DMX byte range. Order is preserved so that
/// label resolution matches the configuration's declaration order, the way a
/// plain dict would in the source implementation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceMap {
    entries: Vec<(String, (u8, u8))>,
}

impl ChoiceMap {
    pub fn new(entries: Vec<(String, (u8, u8))>) -> Self {
        Self { entries }
    }

    pub fn get(&self, label: &str) -> Option<(u8, u8)> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, r)| *r)
    }

    /// The label whose range contains `value`, if any.
    pub fn label_for(&self, value: i32) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, (lo, hi))| value >= *lo as i32 && value <= *hi as i32)
            .map(|(l, _)| l.as_str())
    }
}

/// A choice map that only applies when `when_property`'s current value
/// resolves (through its own map) to `when_label`.
#[derive(Debug, Clone)]
pub struct ConditionalMap {
    pub when_property: String,
    pub when_label: String,
    pub map: ChoiceMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Range,
    Static,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetRule {
    None,
    Truthy,
    Range(u8, u8),
}

/// One addressable control on a fixture type, e.g. `pan` or `dim`.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    /// 1-based channel offset within the fixture.
    pub channel: u16,
    pub invert: bool,
    pub kind: FunctionKind,
    pub map: Option<ChoiceMap>,
    pub maps: Vec<ConditionalMap>,
    pub resets: ResetRule,
    /// `(slowest_ms, fastest_ms)` for speed-encoded moves.
    pub speed: Option<(f64, f64)>,
}

impl FunctionDescriptor {
    pub fn range(channel: u16) -> Self {
        Self {
            channel,
            invert: false,
            kind: FunctionKind::Range,
            map: None,
            maps: Vec::new(),
            resets: ResetRule::None,
            speed: None,
        }
    }
}

/// One configured lighting fixture.
#[derive(Debug, Clone)]
pub struct Light {
    pub name: String,
    pub type_name: String,
    pub device_name: String,
    pub address: u16,
    pub functions: HashMap<String, FunctionDescriptor>,
    pub initialize: HashMap<String, i32>,
    pub state: HashMap<String, i32>,
    pub last_state: HashMap<String, i32>,
    pub diff_state: HashMap<String, i32>,
}

impl Light {
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        device_name: impl Into<String>,
        address: u16,
        functions: HashMap<String, FunctionDescriptor>,
        initialize: HashMap<String, i32>,
    ) -> Self {
        let mut light = Self {
            name: name.into(),
            type_name: type_name.into(),
            device_name: device_name.into(),
            address,
            functions,
            initialize,
            state: HashMap::new(),
            last_state: HashMap::new(),
            diff_state: HashMap::new(),
        };
        light.init_state();
        light
    }

    /// Reset every property to its configured initial value and mark the
    /// whole state as changed, so the next `send_batch` re-sends everything.
    pub fn init_state(&mut self) {
        self.state = self
            .functions
            .keys()
            .map(|k| (k.clone(), *self.initialize.get(k).unwrap_or(&0)))
            .collect();
        self.last_state = self.state.clone();
        self.diff_state = self.state.clone();
    }

    /// Resolve the map that governs a static property: its own `map` if
    /// present, otherwise the first `maps` entry whose condition currently
    /// holds.
    fn resolve_map(&self, prop: &str) -> Option<&ChoiceMap> {
        let fd = self.functions.get(prop)?;
        if let Some(map) = &fd.map {
            return Some(map);
        }
        for cm in &fd.maps {
            let current = *self.state.get(&cm.when_property).unwrap_or(&0);
            let active_label = self
                .resolve_map(&cm.when_property)
                .and_then(|m| m.label_for(current));
            if active_label == Some(cm.when_label.as_str()) {
                return Some(&cm.map);
            }
        }
        None
    }

    /// Apply a batch of property writes, resolving choice-map labels,
    /// coercing booleans, and clamping ranges. Numeric writes to `static`
    /// properties bypass their map entirely and are stored verbatim — this
    /// is intentional (see DESIGN.md).
    pub fn set_state(&mut self, updates: HashMap<String, StateValue>) {
        let mut deferred: Vec<String> = Vec::new();

        for (k, v) in &updates {
            let Some(fd) = self.functions.get(k) else {
                continue;
            };
            match fd.kind {
                FunctionKind::Static => match v {
                    StateValue::Label(label) => {
                        if let Some(map) = &fd.map {
                            match map.get(label) {
                                Some((lo, _)) => {
                                    self.state.insert(k.clone(), lo as i32);
                                }
                                None => tracing::error!(
                                    light = %self.name, property = %k, value = %label,
                                    "value not in property map"
                                ),
                            }
                        } else if !fd.maps.is_empty() {
                            deferred.push(k.clone());
                        } else {
                            tracing::error!(
                                light = %self.name, property = %k, value = %label,
                                "can't set value for property with no map"
                            );
                        }
                    }
                    StateValue::Number(n) => {
                        self.state.insert(k.clone(), *n);
                    }
                    StateValue::Bool(b) => {
                        self.state.insert(k.clone(), *b as i32);
                    }
                },
                FunctionKind::Boolean => {
                    let truthy = match v {
                        StateValue::Bool(b) => *b,
                        StateValue::Number(n) => *n != 0,
                        StateValue::Label(s) => !s.is_empty(),
                    };
                    self.state.insert(k.clone(), truthy as i32);
                }
                FunctionKind::Range => match v {
                    StateValue::Number(n) => {
                        self.state.insert(k.clone(), (*n).clamp(0, 255));
                    }
                    StateValue::Bool(b) => {
                        self.state.insert(k.clone(), *b as i32);
                    }
                    StateValue::Label(label) => tracing::error!(
                        light = %self.name, property = %k, value = %label,
                        "can't set a label value on a range property"
                    ),
                },
            }
        }

        for k in deferred {
            let Some(StateValue::Label(label)) = updates.get(&k) else {
                continue;
            };
            match self.resolve_map(&k) {
                Some(map) => match map.get(label) {
                    Some((lo, _)) => {
                        self.state.insert(k.clone(), lo as i32);
                    }
                    None => tracing::error!(
                        light = %self.name, property = %k, value = %label,
                        "value not in property map"
                    ),
                },
                None => tracing::error!(
                    light = %self.name, property = %k,
                    "no conditional map currently applies"
                ),
            }
        }

        self.diff_state.clear();
        for (k, v) in &self.state {
            if self.last_state.get(k) != Some(v) {
                self.diff_state.insert(k.clone(), *v);
            }
        }
    }

    /// The absolute DMX channel -> byte value for every function, honoring
    /// per-function inversion.
    pub fn get_dmx(&self) -> HashMap<u16, u8> {
        self.functions
            .iter()
            .map(|(name, fd)| {
                let raw = (*self.state.get(name).unwrap_or(&0)).clamp(0, 255) as u8;
                let v = if fd.invert { 255 - raw } else { raw };
                (self.address - 1 + fd.channel, v)
            })
            .collect()
    }

    /// Commit the diff, or, if a reset property just crossed its threshold,
    /// re-initialize so the full state re-sends on the next frame.
    pub fn mark_sent(&mut self) {
        for (k, v) in &self.diff_state {
            let Some(fd) = self.functions.get(k) else {
                continue;
            };
            let resets = match fd.resets {
                ResetRule::None => false,
                ResetRule::Truthy => *v != 0,
                ResetRule::Range(lo, hi) => *v >= lo as i32 && *v <= hi as i32,
            };
            if resets {
                self.init_state();
                return;
            }
        }
        self.last_state = self.state.clone();
        self.diff_state.clear();
    }
}

/// A sink for rendered DMX frames, implemented by `lumen-io`.
pub trait DmxSink {
    fn set_channel(&mut self, chan: u16, value: u8);
    fn render(&mut self);
}

/// For every light with a non-empty diff, merge its DMX bytes into its
/// device's buffer and mark it sent; then render every touched device.
pub fn send_batch(devices: &mut HashMap<String, Box<dyn DmxSink>>, lights: &mut [&mut Light]) {
    let mut dev_data: HashMap<String, HashMap<u16, u8>> = HashMap::new();
    for light in lights.iter_mut() {
        if !light.diff_state.is_empty() {
            dev_data
                .entry(light.device_name.clone())
                .or_default()
                .extend(light.get_dmx());
            light.mark_sent();
        }
    }
    for (dname, data) in dev_data {
        if let Some(dev) = devices.get_mut(&dname) {
            for (chan, val) in data {
                dev.set_channel(chan, val);
            }
            dev.render();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim_fn() -> FunctionDescriptor {
        FunctionDescriptor::range(1)
    }

    fn make_light() -> Light {
        let mut functions = HashMap::new();
        functions.insert("dim".to_string(), dim_fn());
        functions.insert(
            "pan".to_string(),
            FunctionDescriptor {
                invert: true,
                ..FunctionDescriptor::range(2)
            },
        );
        Light::new("L", "generic", "default", 1, functions, HashMap::new())
    }

    #[test]
    fn diff_tracks_changes_from_last_sent() {
        let mut light = make_light();
        light.mark_sent();
        assert!(light.diff_state.is_empty());

        light.set_state(HashMap::from([("dim".to_string(), StateValue::Number(100))]));
        assert_eq!(light.diff_state.get("dim"), Some(&100));
        assert_eq!(light.state.get("pan"), Some(&0));
    }

    #[test]
    fn diff_state_is_rebuilt_not_accumulated() {
        let mut light = make_light();
        light.set_state(HashMap::from([("dim".to_string(), StateValue::Number(100))]));
        light.mark_sent();

        // Two set_state calls in the same frame: one changes dim away from
        // last_state, the next restores it. diff_state must reflect only
        // the net result, not every intermediate write.
        light.set_state(HashMap::from([("dim".to_string(), StateValue::Number(50))]));
        light.set_state(HashMap::from([("dim".to_string(), StateValue::Number(100))]));
        assert!(light.diff_state.is_empty());
    }

    #[test]
    fn get_dmx_honors_address_and_invert() {
        let mut light = make_light();
        light.set_state(HashMap::from([
            ("dim".to_string(), StateValue::Number(100)),
            ("pan".to_string(), StateValue::Number(200)),
        ]));
        let dmx = light.get_dmx();
        assert_eq!(dmx.get(&1), Some(&100));
        assert_eq!(dmx.get(&2), Some(&55));
    }

    #[test]
    fn static_numeric_write_bypasses_map() {
        let mut functions = HashMap::new();
        functions.insert(
            "mode".to_string(),
            FunctionDescriptor {
                kind: FunctionKind::Static,
                map: Some(ChoiceMap::new(vec![("on".to_string(), (200, 255))])),
                ..FunctionDescriptor::range(1)
            },
        );
        let mut light = Light::new("L", "laser", "default", 1, functions, HashMap::new());
        light.set_state(HashMap::from([("mode".to_string(), StateValue::Number(7))]));
        assert_eq!(light.state.get("mode"), Some(&7));
    }

    #[test]
    fn conditional_map_resolution() {
        // Generic4ColorLaser-style fixture from spec.md scenario 6.
        let mut functions = HashMap::new();
        functions.insert(
            "mode".to_string(),
            FunctionDescriptor {
                kind: FunctionKind::Static,
                map: Some(ChoiceMap::new(vec![
                    ("dynamic".to_string(), (100, 149)),
                    ("static".to_string(), (50, 99)),
                ])),
                ..FunctionDescriptor::range(1)
            },
        );
        functions.insert(
            "pattern".to_string(),
            FunctionDescriptor {
                kind: FunctionKind::Static,
                maps: vec![
                    ConditionalMap {
                        when_property: "mode".to_string(),
                        when_label: "dynamic".to_string(),
                        map: ChoiceMap::new(vec![("v_line_1".to_string(), (0, 20))]),
                    },
                    ConditionalMap {
                        when_property: "mode".to_string(),
                        when_label: "static".to_string(),
                        map: ChoiceMap::new(vec![("v_line_2".to_string(), (70, 90))]),
                    },
                ],
                ..FunctionDescriptor::range(2)
            },
        );
        let mut light = Light::new("L", "laser", "default", 1, functions, HashMap::new());

        light.set_state(HashMap::from([
            ("mode".to_string(), StateValue::Label("dynamic".to_string())),
            ("pattern".to_string(), StateValue::Label("v_line_2".to_string())),
        ]));
        assert_eq!(light.state.get("mode"), Some(&100));
        // v_line_2 isn't in the dynamic map, so pattern is left unchanged (0).
        assert_eq!(light.state.get("pattern"), Some(&0));

        light.set_state(HashMap::from([
            ("mode".to_string(), StateValue::Label("static".to_string())),
            ("pattern".to_string(), StateValue::Label("v_line_2".to_string())),
        ]));
        assert_eq!(light.state.get("mode"), Some(&50));
        assert_eq!(light.state.get("pattern"), Some(&70));
    }

    #[test]
    fn mark_sent_reset_channel_reinitializes() {
        let mut functions = HashMap::new();
        functions.insert(
            "reset".to_string(),
            FunctionDescriptor {
                resets: ResetRule::Truthy,
                ..FunctionDescriptor::range(3)
            },
        );
        functions.insert("dim".to_string(), dim_fn());
        let mut initialize = HashMap::new();
        initialize.insert("dim".to_string(), 10);
        let mut light = Light::new("L", "generic", "default", 1, functions, initialize);
        light.mark_sent();

        light.set_state(HashMap::from([
            ("dim".to_string(), StateValue::Number(250)),
            ("reset".to_string(), StateValue::Number(1)),
        ]));
        light.mark_sent();
        // Reset fired: state is back to the initialize defaults, and
        // pretends everything changed so the next frame re-sends it all.
        assert_eq!(light.state.get("dim"), Some(&10));
        assert_eq!(light.diff_state.get("dim"), Some(&10));
    }
}

//! Converts a parsed [`crate::raw::RawConfig`] into the engine-ready types
//! the rest of the workspace consumes: `lumen_core::Light`s and DMX sinks,
//! `lumen_analysis` processor configs, and a fully resolved
//! `lumen_mapper::MappingConfig` per light (indirection followed, bins
//! expanded, state-effects priority-sorted).

use std::collections::HashMap;

use lumen_analysis::{BeatConfig, IdleConfig, PitchConfig, SmoothingConfig};
use lumen_core::{
    ChoiceMap, ConditionalMap, DmxSink, FunctionDescriptor, FunctionKind, Light, ResetRule,
};
use lumen_io::{SinkDevice, VirtualSinkDevice};
use lumen_mapper::{
    Aggregate, BinSpec, Directive, EffectArgs, EffectValue, Field, LinkSpec, MappingConfig,
    Predicate, RangeSpec, ScaleSrc, StateEffectDef, Trigger, ValueSpec, expand_bins, resolve,
    sort_state_effects,
};

use crate::error::ConfigError;
use crate::raw::{
    RawBinSpec, RawConditionalMap, RawConfig, RawDirective, RawEffectValue, RawFunction,
    RawLinkSpec, RawMapping, RawRangeSpec, RawResets, RawStateEffect, RawValueSpec,
};

/// Capture-device parameters, resolved straight from `Capture` with no
/// further processing.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub method: String,
    pub device: String,
    pub sample_rate: u32,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

/// Everything a `lumen-cli` main loop needs to start the scheduler.
pub struct Config {
    pub capture: CaptureConfig,
    pub smoothing: SmoothingConfig,
    pub beat: BeatConfig,
    pub pitch: PitchConfig,
    pub idle: IdleConfig,
    pub lights: Vec<Light>,
    pub devices: HashMap<String, Box<dyn DmxSink>>,
    pub mapping: HashMap<String, MappingConfig>,
    pub network: NetworkConfig,
}

pub fn build(raw: RawConfig) -> Result<Config, ConfigError> {
    let capture = CaptureConfig {
        method: raw.capture.method,
        device: raw.capture.device,
        sample_rate: raw.capture.sample_rate,
        fps: raw.capture.fps,
    };

    let smoothing = {
        let mut c = SmoothingConfig {
            sample_rate: capture.sample_rate,
            fps: capture.fps,
            ..SmoothingConfig::default()
        };
        if let Some(r) = &raw.processors.smoothing {
            if let Some(v) = r.rolling_history {
                c.rolling_history = v;
            }
            if let Some(v) = r.fft_bins {
                c.fft_bins = v;
            }
            if let Some(v) = r.min_freq {
                c.min_freq = v;
            }
            if let Some(v) = r.max_freq {
                c.max_freq = v;
            }
            if let Some(v) = r.min_volume_threshold {
                c.min_volume_threshold = v;
            }
        }
        c
    };

    let beat = {
        let mut c = BeatConfig {
            sample_rate: capture.sample_rate,
            fps: capture.fps,
            ..BeatConfig::default()
        };
        if let Some(r) = &raw.processors.beat {
            if let Some(v) = r.sensitivity {
                c.sensitivity = v;
            }
            if let Some(v) = r.min_interval_s {
                c.min_interval_s = v;
            }
        }
        c
    };

    let pitch = {
        let mut c = PitchConfig {
            sample_rate: capture.sample_rate,
            ..PitchConfig::default()
        };
        if let Some(r) = &raw.processors.pitch {
            if let Some(v) = r.min_freq_hz {
                c.min_freq_hz = v;
            }
            if let Some(v) = r.max_freq_hz {
                c.max_freq_hz = v;
            }
        }
        c
    };

    let idle = {
        let mut c = IdleConfig::default();
        if let Some(r) = &raw.processors.idle {
            if let Some(v) = r.threshold {
                c.threshold = v;
            }
        }
        c
    };

    let network = NetworkConfig {
        host: raw.network.host,
        port: raw.network.port,
    };

    let devices = build_devices(&raw.dmx_devices);

    let mut lights = Vec::with_capacity(raw.lights.len());
    for (name, light) in &raw.lights {
        let light_type = raw
            .light_types
            .get(&light.type_name)
            .ok_or_else(|| ConfigError::UnknownFixtureType(name.clone(), light.type_name.clone()))?;
        if light_type.raw_type != "dmx" {
            return Err(ConfigError::UnknownRawType(
                light.type_name.clone(),
                light_type.raw_type.clone(),
            ));
        }

        let mut functions = HashMap::with_capacity(light_type.functions.len());
        for (fn_name, raw_fn) in &light_type.functions {
            functions.insert(fn_name.clone(), build_function(name, fn_name, raw_fn)?);
        }

        lights.push(Light::new(
            name.clone(),
            light.type_name.clone(),
            light.device.clone().unwrap_or_else(|| "default".to_string()),
            light.address,
            functions,
            light.initialize.clone(),
        ));
    }

    let mapping = build_mapping(&raw.mapping, raw.lights.keys())?;

    Ok(Config {
        capture,
        smoothing,
        beat,
        pitch,
        idle,
        lights,
        devices,
        mapping,
        network,
    })
}

fn build_devices(raw: &HashMap<String, String>) -> HashMap<String, Box<dyn DmxSink>> {
    raw.iter()
        .map(|(name, spec)| (name.clone(), build_device(name, spec)))
        .collect()
}

fn build_device(name: &str, spec: &str) -> Box<dyn DmxSink> {
    match spec {
        "sink" => Box::new(SinkDevice),
        "vsink" => Box::new(VirtualSinkDevice::new(name)),
        other => {
            #[cfg(feature = "serial")]
            {
                use lumen_io::{DeviceLocator, NullLocator, SerialDmxDevice};
                match NullLocator.resolve(other).and_then(|path| SerialDmxDevice::open(&path, 250_000)) {
                    Ok(dev) => return Box::new(dev),
                    Err(err) => {
                        tracing::error!(device = %name, spec = %other, error = %err, "failed to open DMX device, falling back to a virtual sink");
                    }
                }
            }
            #[cfg(not(feature = "serial"))]
            {
                tracing::warn!(device = %name, spec = %other, "serial DMX transport not compiled in, falling back to a virtual sink");
            }
            Box::new(VirtualSinkDevice::new(name))
        }
    }
}

fn build_choice_map(m: &serde_yaml::Mapping, light: &str, context: &str) -> Result<ChoiceMap, ConfigError> {
    let mut entries = Vec::with_capacity(m.len());
    for (k, v) in m.iter() {
        let label = k
            .as_str()
            .ok_or_else(|| ConfigError::InvalidMapping(light.to_string(), format!("{context}: map label must be a string")))?
            .to_string();
        let range: (u8, u8) = serde_yaml::from_value(v.clone())
            .map_err(|_| ConfigError::InvalidMapping(light.to_string(), format!("{context}: map range must be [lo, hi]")))?;
        entries.push((label, range));
    }
    Ok(ChoiceMap::new(entries))
}

fn build_function(light: &str, fn_name: &str, raw: &RawFunction) -> Result<FunctionDescriptor, ConfigError> {
    let kind = match raw.kind.as_deref() {
        None | Some("range") => FunctionKind::Range,
        Some("static") => FunctionKind::Static,
        Some("boolean") => FunctionKind::Boolean,
        Some(other) => {
            return Err(ConfigError::InvalidMapping(
                light.to_string(),
                format!("{fn_name}: unknown function type '{other}'"),
            ));
        }
    };

    let map = raw
        .map
        .as_ref()
        .map(|m| build_choice_map(m, light, fn_name))
        .transpose()?;

    let mut maps = Vec::with_capacity(raw.maps.len());
    for RawConditionalMap { when, map } in &raw.maps {
        maps.push(ConditionalMap {
            when_property: when.0.clone(),
            when_label: when.1.clone(),
            map: build_choice_map(map, light, fn_name)?,
        });
    }

    let resets = match raw.resets {
        None | Some(RawResets::Bool(false)) => ResetRule::None,
        Some(RawResets::Bool(true)) => ResetRule::Truthy,
        Some(RawResets::Range(lo, hi)) => ResetRule::Range(lo, hi),
    };

    Ok(FunctionDescriptor {
        channel: raw.channel,
        invert: raw.invert,
        kind,
        map,
        maps,
        resets,
        speed: raw.speed,
    })
}

fn build_mapping<'a>(
    raw: &HashMap<String, RawMapping>,
    light_names: impl Iterator<Item = &'a String>,
) -> Result<HashMap<String, MappingConfig>, ConfigError> {
    let mut program_raw: HashMap<String, Field<Vec<Directive>>> = HashMap::new();
    let mut cooldown_raw: HashMap<String, Field<HashMap<String, f64>>> = HashMap::new();
    let mut state_effects_raw: HashMap<String, Field<Vec<StateEffectDef>>> = HashMap::new();
    let mut links: HashMap<String, HashMap<String, LinkSpec>> = HashMap::new();

    for (light, m) in raw {
        if let Some(p) = &m.program {
            program_raw.insert(light.clone(), build_program_field(light, p)?);
        }
        if let Some(c) = &m.cooldown {
            cooldown_raw.insert(light.clone(), build_cooldown_field(c));
        }
        if let Some(s) = &m.state_effects {
            state_effects_raw.insert(light.clone(), build_state_effects_field(light, s)?);
        }
        if !m.links.is_empty() {
            links.insert(light.clone(), build_links(&m.links)?);
        }
    }

    let mut out = HashMap::new();
    for light in light_names {
        let program = resolve(&program_raw, light);
        let cooldown = resolve(&cooldown_raw, light);
        let mut state_effects = resolve(&state_effects_raw, light);
        sort_state_effects(&mut state_effects);
        out.insert(
            light.clone(),
            MappingConfig {
                program,
                cooldown,
                state_effects,
                links: links.get(light).cloned().unwrap_or_default(),
            },
        );
    }
    Ok(out)
}

fn build_program_field(light: &str, field: &crate::raw::RawField<Vec<RawDirective>>) -> Result<Field<Vec<Directive>>, ConfigError> {
    match field {
        crate::raw::RawField::Named(n) => Ok(Field::Named(n.clone())),
        crate::raw::RawField::Value(directives) => {
            let mut out = Vec::with_capacity(directives.len());
            for d in directives {
                out.push(build_directive(light, d)?);
            }
            Ok(Field::Value(out))
        }
    }
}

fn build_cooldown_field(field: &crate::raw::RawField<HashMap<String, f64>>) -> Field<HashMap<String, f64>> {
    match field {
        crate::raw::RawField::Named(n) => Field::Named(n.clone()),
        crate::raw::RawField::Value(v) => Field::Value(v.clone()),
    }
}

fn build_state_effects_field(
    light: &str,
    field: &crate::raw::RawField<Vec<RawStateEffect>>,
) -> Result<Field<Vec<StateEffectDef>>, ConfigError> {
    match field {
        crate::raw::RawField::Named(n) => Ok(Field::Named(n.clone())),
        crate::raw::RawField::Value(defs) => {
            let mut out = Vec::with_capacity(defs.len());
            for (idx, def) in defs.iter().enumerate() {
                out.push(build_state_effect(light, def, idx as i32)?);
            }
            Ok(Field::Value(out))
        }
    }
}

fn build_directive(light: &str, raw: &RawDirective) -> Result<Directive, ConfigError> {
    let trigger = match raw.trigger.as_str() {
        "onset" => Trigger::Onset,
        "beat" => Trigger::Beat,
        "frequency" => Trigger::Frequency,
        other => {
            return Err(ConfigError::InvalidMapping(
                light.to_string(),
                format!("{}: unknown trigger '{other}'", raw.function),
            ));
        }
    };

    let bins = expand_bins(
        &raw.bins
            .iter()
            .map(|b| match *b {
                RawBinSpec::Index(i) => BinSpec::Index(i),
                RawBinSpec::Range(a, b) => BinSpec::Range(a, b),
            })
            .collect::<Vec<_>>(),
    );

    let aggregate = match raw.aggregate.as_deref() {
        None | Some("max") => Aggregate::Max,
        Some("avg") => Aggregate::Avg,
        Some(other) => {
            return Err(ConfigError::InvalidMapping(
                light.to_string(),
                format!("{}: unknown aggregate '{other}'", raw.function),
            ));
        }
    };

    let scale_src = match raw.scale_src.as_deref() {
        None => None,
        Some("frequency") => Some(ScaleSrc::Frequency),
        Some(other) => {
            return Err(ConfigError::InvalidMapping(
                light.to_string(),
                format!("{}: unknown scale_src '{other}'", raw.function),
            ));
        }
    };

    let range = match &raw.range {
        None => None,
        Some(RawRangeSpec::Explicit(lo, hi)) => Some(RangeSpec::Explicit(*lo, *hi)),
        Some(RawRangeSpec::Scaled(s)) if s == "scaled" => Some(RangeSpec::Scaled),
        Some(RawRangeSpec::Scaled(other)) => {
            return Err(ConfigError::InvalidMapping(
                light.to_string(),
                format!("{}: unknown range spec '{other}'", raw.function),
            ));
        }
    };

    let value = match &raw.value {
        None => ValueSpec::Default,
        Some(RawValueSpec::Number(n)) => ValueSpec::Literal(*n as i32),
        Some(RawValueSpec::Text(s)) if s == "random" => ValueSpec::Random,
        Some(RawValueSpec::Text(other)) => {
            return Err(ConfigError::InvalidMapping(
                light.to_string(),
                format!("{}: unknown value spec '{other}'", raw.function),
            ));
        }
    };

    Ok(Directive {
        trigger,
        bins,
        aggregate,
        threshold: raw.threshold,
        scale_src,
        range,
        function: raw.function.clone(),
        value,
        duration: raw.duration,
        keep_state: raw.keep_state,
    })
}

fn build_effect_value(v: &RawEffectValue, light: &str, context: &str) -> Result<EffectValue, ConfigError> {
    match v {
        RawEffectValue::Number(n) => Ok(EffectValue::Number(*n)),
        RawEffectValue::Text(s) if s == "random" => Ok(EffectValue::Random),
        RawEffectValue::Text(other) => Err(ConfigError::InvalidMapping(
            light.to_string(),
            format!("{context}: unknown effect value '{other}'"),
        )),
    }
}

fn build_state_effect(light: &str, raw: &RawStateEffect, index: i32) -> Result<StateEffectDef, ConfigError> {
    let when = Predicate::parse(&raw.when)
        .map_err(|e| ConfigError::InvalidPredicate(raw.name.clone(), light.to_string(), e))?;

    let mut effects = HashMap::with_capacity(raw.effects.len());
    for (prop, args) in &raw.effects {
        let context = format!("{}/{prop}", raw.name);
        effects.insert(
            prop.clone(),
            EffectArgs {
                start_value: args.start_value.as_ref().map(|v| build_effect_value(v, light, &context)).transpose()?,
                end_value: args.end_value.as_ref().map(|v| build_effect_value(v, light, &context)).transpose()?,
                duration_s: args.duration,
                keep_state: args.keep_state,
            },
        );
    }

    Ok(StateEffectDef {
        name: raw.name.clone(),
        light: light.to_string(),
        when,
        effects,
        reset: raw.reset.clone(),
        priority: raw.priority.unwrap_or(index),
        keep_state: raw.keep_state,
    })
}

fn build_links(raw: &HashMap<String, RawLinkSpec>) -> Result<HashMap<String, LinkSpec>, ConfigError> {
    Ok(raw
        .iter()
        .filter_map(|(target, spec)| match spec {
            RawLinkSpec::Plain(false) => None,
            RawLinkSpec::Plain(true) => Some((target.clone(), LinkSpec::Plain)),
            RawLinkSpec::Invert { invert } => Some((target.clone(), LinkSpec::Invert(invert.clone()))),
        })
        .collect())
}

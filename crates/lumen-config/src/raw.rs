//! The literal YAML shape of a lumenpipe configuration file, matching
//! spec.md §6. Deserialization only; `build.rs` converts this into the
//! runtime types the engine, mapper, and I/O crates actually use.

use std::collections::HashMap;

use serde::Deserialize;

/// Either a concrete value, or the name of another light whose entry
/// should be used instead — the `Program`/`Cooldown`/`StateEffects`
/// indirection from spec.md §4.E.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawField<T> {
    Value(T),
    Named(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    #[serde(rename = "Capture")]
    pub capture: RawCapture,
    #[serde(rename = "Processors", default)]
    pub processors: RawProcessors,
    #[serde(rename = "DMXDevices")]
    pub dmx_devices: HashMap<String, String>,
    #[serde(rename = "LightTypes")]
    pub light_types: HashMap<String, RawLightType>,
    #[serde(rename = "Lights")]
    pub lights: HashMap<String, RawLight>,
    #[serde(rename = "Mapping", default)]
    pub mapping: HashMap<String, RawMapping>,
    #[serde(rename = "Network", default)]
    pub network: RawNetwork,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCapture {
    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "Device")]
    pub device: String,
    #[serde(rename = "SampleRate")]
    pub sample_rate: u32,
    #[serde(rename = "FPS")]
    pub fps: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProcessors {
    #[serde(rename = "Smoothing", default)]
    pub smoothing: Option<RawSmoothingConfig>,
    #[serde(rename = "Beat", default)]
    pub beat: Option<RawBeatConfig>,
    #[serde(rename = "Pitch", default)]
    pub pitch: Option<RawPitchConfig>,
    #[serde(rename = "Idle", default)]
    pub idle: Option<RawIdleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSmoothingConfig {
    pub rolling_history: Option<usize>,
    pub fft_bins: Option<usize>,
    pub min_freq: Option<f32>,
    pub max_freq: Option<f32>,
    pub min_volume_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBeatConfig {
    pub sensitivity: Option<f32>,
    pub min_interval_s: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPitchConfig {
    pub min_freq_hz: Option<f32>,
    pub max_freq_hz: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIdleConfig {
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNetwork {
    #[serde(rename = "Host", default = "default_host")]
    pub host: String,
    #[serde(rename = "Port", default = "default_port")]
    pub port: u16,
}

impl Default for RawNetwork {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    37737
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLightType {
    #[serde(rename = "RawType")]
    pub raw_type: String,
    #[serde(rename = "Channels")]
    pub channels: u16,
    #[serde(rename = "Functions")]
    pub functions: HashMap<String, RawFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFunction {
    pub channel: u16,
    #[serde(default)]
    pub invert: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub map: Option<serde_yaml::Mapping>,
    #[serde(default)]
    pub maps: Vec<RawConditionalMap>,
    pub resets: Option<RawResets>,
    pub speed: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConditionalMap {
    pub when: (String, String),
    pub map: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawResets {
    Bool(bool),
    Range(u8, u8),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLight {
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(rename = "Address")]
    pub address: u16,
    #[serde(rename = "Device", default)]
    pub device: Option<String>,
    #[serde(rename = "Initialize", default)]
    pub initialize: HashMap<String, i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMapping {
    #[serde(rename = "Program", default)]
    pub program: Option<RawField<Vec<RawDirective>>>,
    #[serde(rename = "Cooldown", default)]
    pub cooldown: Option<RawField<HashMap<String, f64>>>,
    #[serde(rename = "StateEffects", default)]
    pub state_effects: Option<RawField<Vec<RawStateEffect>>>,
    #[serde(rename = "Links", default)]
    pub links: HashMap<String, RawLinkSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLinkSpec {
    Plain(bool),
    Invert {
        #[serde(rename = "Invert")]
        invert: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDirective {
    pub trigger: String,
    #[serde(default)]
    pub bins: Vec<RawBinSpec>,
    pub aggregate: Option<String>,
    pub threshold: Option<f64>,
    pub scale_src: Option<String>,
    pub range: Option<RawRangeSpec>,
    pub function: String,
    pub value: Option<RawValueSpec>,
    pub duration: Option<f64>,
    #[serde(default = "default_true")]
    pub keep_state: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum RawBinSpec {
    Index(usize),
    Range(usize, usize),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawRangeSpec {
    Scaled(String),
    Explicit(u8, u8),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawValueSpec {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStateEffect {
    pub name: String,
    pub when: String,
    pub effects: HashMap<String, RawEffectArgs>,
    #[serde(default)]
    pub reset: Vec<String>,
    pub priority: Option<i32>,
    #[serde(default = "default_true")]
    pub keep_state: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEffectArgs {
    pub start_value: Option<RawEffectValue>,
    pub end_value: Option<RawEffectValue>,
    pub duration: f64,
    #[serde(default = "default_true")]
    pub keep_state: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEffectValue {
    Number(i32),
    Text(String),
}

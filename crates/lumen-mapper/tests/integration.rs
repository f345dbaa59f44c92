use std::collections::HashMap;

use lumen_core::{Blackboard, DmxSink, FunctionDescriptor, Light, LightEngine};
use lumen_mapper::{
    Aggregate, Directive, Mapper, MappingConfig, Predicate, RangeSpec, ScaleSrc, Trigger, ValueSpec,
};

struct NullSink;
impl DmxSink for NullSink {
    fn set_channel(&mut self, _chan: u16, _value: u8) {}
    fn render(&mut self) {}
}

fn engine_with_light(name: &str) -> LightEngine {
    let mut functions = HashMap::new();
    functions.insert("strobe".to_string(), FunctionDescriptor::range(1));
    functions.insert("pan".to_string(), FunctionDescriptor::range(2));
    let light = Light::new(name, "generic", "default", 1, functions, HashMap::new());
    let mut devices: HashMap<String, Box<dyn DmxSink>> = HashMap::new();
    devices.insert("default".to_string(), Box::new(NullSink));
    LightEngine::new(vec![light], devices).unwrap()
}

#[test]
fn duration_directive_creates_an_expiring_engine_effect() {
    let mut engine = engine_with_light("front");
    let directive = Directive {
        trigger: Trigger::Frequency,
        bins: vec![0, 1],
        aggregate: Aggregate::Max,
        threshold: Some(0.1),
        scale_src: None,
        range: None,
        function: "strobe".to_string(),
        value: ValueSpec::Literal(255),
        duration: Some(0.5),
        keep_state: false,
    };
    let mut configs = HashMap::new();
    configs.insert(
        "front".to_string(),
        MappingConfig {
            program: vec![directive],
            ..Default::default()
        },
    );
    let mut mapper = Mapper::new(configs);

    let mut bb = Blackboard::new(0.0);
    bb.audio = Some(vec![0.9, 0.2]);
    mapper.run(&mut engine, &bb);
    // The mapper only registers the effect; the first engine frame observes
    // it as new and writes its start value (the property's value before the
    // directive fired), then every later frame ramps toward the target.
    engine.run(0.0, &mut bb);
    assert_eq!(engine.get_state("front").unwrap().get("strobe"), Some(&0));

    let mut bb_mid = Blackboard::new(0.25);
    engine.run(0.25, &mut bb_mid);
    assert_eq!(bb_mid.rendered_state["front"]["strobe"], 127);

    // Past the duration, the effect is done and (keep_state=false) reverts.
    let mut bb_done = Blackboard::new(0.6);
    engine.run(0.6, &mut bb_done);
    assert_eq!(bb_done.rendered_state["front"]["strobe"], 0);
}

#[test]
fn frequency_scaled_by_a_different_source_uses_the_peak_not_the_aggregate() {
    let mut engine = engine_with_light("laser");
    let directive = Directive {
        trigger: Trigger::Onset,
        bins: vec![],
        aggregate: Aggregate::Max,
        threshold: None,
        scale_src: Some(ScaleSrc::Frequency),
        range: Some(RangeSpec::Scaled),
        function: "pan".to_string(),
        value: ValueSpec::Literal(255),
        duration: None,
        keep_state: true,
    };
    let mut configs = HashMap::new();
    configs.insert(
        "laser".to_string(),
        MappingConfig {
            program: vec![directive],
            ..Default::default()
        },
    );
    let mut mapper = Mapper::new(configs);

    // Peak bin is index 0 of 4 -> freq_peak = 1 - 0/4 = 1.0, so the
    // directive's literal value of 255 survives the frequency scale
    // untouched even though the onset trigger_value alone would have
    // scaled it to 255 too — this exercises the scale_src dispatch path,
    // not its numeric coincidence.
    let mut bb = Blackboard::new(0.0);
    bb.is_onset = Some(true);
    bb.audio = Some(vec![0.9, 0.1, 0.1, 0.1]);
    mapper.run(&mut engine, &bb);
    assert_eq!(engine.get_state("laser").unwrap().get("pan"), Some(&255));
}

#[test]
fn when_expression_gates_a_state_effect_on_blackboard_fields() {
    let mut engine = engine_with_light("back");
    let def = lumen_mapper::StateEffectDef {
        name: "strobe_on_onset".to_string(),
        light: "back".to_string(),
        when: Predicate::parse("is_onset && pitch > 60").unwrap(),
        effects: HashMap::from([(
            "strobe".to_string(),
            lumen_mapper::EffectArgs {
                start_value: Some(lumen_mapper::EffectValue::Number(255)),
                end_value: Some(lumen_mapper::EffectValue::Number(255)),
                duration_s: 5.0,
                keep_state: true,
            },
        )]),
        reset: vec!["strobe".to_string()],
        priority: 1,
        keep_state: true,
    };
    let mut configs = HashMap::new();
    configs.insert(
        "back".to_string(),
        MappingConfig {
            state_effects: vec![def],
            ..Default::default()
        },
    );
    let mut mapper = Mapper::new(configs);

    let mut bb = Blackboard::new(0.0);
    bb.is_onset = Some(true);
    bb.pitch = Some(40.0);
    mapper.run(&mut engine, &bb);
    engine.run(0.0, &mut bb);
    assert_eq!(bb.rendered_state["back"]["strobe"], 0);

    let mut bb2 = Blackboard::new(1.0);
    bb2.is_onset = Some(true);
    bb2.pitch = Some(72.0);
    mapper.run(&mut engine, &bb2);
    engine.run(1.0, &mut bb2);
    assert_eq!(bb2.rendered_state["back"]["strobe"], 255);
}

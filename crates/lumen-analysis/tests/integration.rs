use lumen_analysis::{IdleConfig, IdleProcessor, Processor, SmoothingConfig, SmoothingProcessor};
use lumen_core::Blackboard;

#[test]
fn smoothing_then_idle_pipeline_reports_idle_on_silence() {
    let mut smoothing = SmoothingProcessor::new(SmoothingConfig {
        sample_rate: 8000,
        fps: 50,
        ..Default::default()
    });
    let mut idle = IdleProcessor::new(IdleConfig::default());

    let samples = vec![0i16; 160];
    let mut bb = Blackboard::new(5.0);
    smoothing.process(Some(&samples), &mut bb);
    idle.process(Some(&samples), &mut bb);

    assert_eq!(bb.audio, Some(vec![0.0; 24]));
    assert_eq!(bb.idle_for, Some(0.0));
    assert_eq!(bb.dead_for, Some(0.0));
}

#[test]
fn driver_underrun_preserves_processor_state_across_frames() {
    let mut smoothing = SmoothingProcessor::new(SmoothingConfig {
        sample_rate: 8000,
        fps: 50,
        ..Default::default()
    });

    let mut bb_ok = Blackboard::new(0.0);
    smoothing.process(Some(&vec![0i16; 160]), &mut bb_ok);
    assert!(bb_ok.audio.is_some());

    let mut bb_underrun = Blackboard::new(0.02);
    smoothing.process(None, &mut bb_underrun);
    assert!(bb_underrun.audio.is_none());

    let mut bb_recovered = Blackboard::new(0.04);
    smoothing.process(Some(&vec![0i16; 160]), &mut bb_recovered);
    assert!(bb_recovered.audio.is_some());
}

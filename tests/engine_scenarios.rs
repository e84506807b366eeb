use pixfn::config::Session;
use pixfn::engine::{EngineState, PlayState};
use pixfn::formula::CompileErrorKind;
use pixfn::schedule::{drive, ManualClock, Schedule, Speed, Ticker};
use pixfn::slots::{Channel, FormulaLayout, SlotId};
use pixfn::{clamp_channel, compile, read_pixel};

fn row(engine: &EngineState) -> Vec<[u8; 4]> {
    let raster = engine.raster();
    (0..raster.width())
        .map(|x| raster.rgba(x, 0).expect("pixel in range"))
        .collect()
}

#[test]
fn default_formulas_seed_a_ramp_then_add_the_step() {
    let mut engine = EngineState::new(4, 1, FormulaLayout::Full).expect("engine");
    assert_eq!(
        row(&engine),
        vec![[0, 0, 0, 255], [1, 1, 1, 255], [2, 2, 2, 255], [3, 3, 3, 255]]
    );

    engine.set_step(10);
    engine.step_once();
    assert_eq!(
        row(&engine),
        vec![
            [10, 10, 10, 255],
            [11, 11, 11, 255],
            [12, 12, 12, 255],
            [13, 13, 13, 255]
        ]
    );
}

#[test]
fn channels_wrap_instead_of_saturating() {
    let mut engine = EngineState::new(2, 1, FormulaLayout::Full).expect("engine");
    engine
        .set_formula(SlotId::start(Channel::Red), "255")
        .expect("constant compiles");
    engine.reset();
    engine.step_once();
    assert_eq!(read_pixel(engine.raster(), 0, 0), Some([0, 1, 1]));
    assert_eq!(clamp_channel(300.0), 44);
    assert_eq!(clamp_channel(-1.0), 255);
}

#[test]
fn seeding_is_deterministic() {
    let build = || {
        let mut engine = EngineState::new(64, 48, FormulaLayout::Full).expect("engine");
        engine.set_formulas([
            (SlotId::start(Channel::Red), "x*y"),
            (SlotId::start(Channel::Green), "x^2-y"),
            (SlotId::start(Channel::Blue), "(x+y)/3"),
        ]);
        engine.reset();
        engine.raster().digest()
    };
    assert_eq!(build(), build());
}

#[test]
fn zero_step_identity_leaves_the_canvas_alone() {
    let mut engine = EngineState::new(16, 16, FormulaLayout::Full).expect("engine");
    engine.set_step(0);
    let before = engine.raster().digest();
    for _ in 0..5 {
        engine.step_once();
    }
    assert_eq!(engine.raster().digest(), before);
    assert_eq!(engine.step_passes(), 5);
}

#[test]
fn stopping_cancels_a_pass_that_was_already_scheduled() {
    let mut engine = EngineState::new(8, 8, FormulaLayout::Full).expect("engine");
    engine.play();
    let ticket = engine.schedule_pass();
    engine.stop();
    let before = engine.raster().digest();

    assert!(engine.run_scheduled(ticket).is_none());
    assert_eq!(engine.raster().digest(), before);

    // A fresh play does not revive the stale ticket either.
    engine.play();
    assert!(engine.run_scheduled(ticket).is_none());
    assert_eq!(engine.play_state(), PlayState::Running);
}

#[test]
fn reset_while_running_reseeds_and_keeps_playing() {
    let mut engine = EngineState::new(8, 8, FormulaLayout::Full).expect("engine");
    let seeded = engine.raster().digest();
    engine.play();
    let mut ticker = Ticker::new(Schedule::from_speed(Speed::Slow));
    drive(&mut engine, &mut ticker, 3, &ManualClock::new(), |_, _| Ok(())).expect("drive");
    assert_ne!(engine.raster().digest(), seeded);

    engine.reset();
    assert_eq!(engine.raster().digest(), seeded);
    assert!(engine.is_running());
    assert_eq!(engine.step_passes(), 0);
}

#[test]
fn implicit_multiplication_matches_explicit_form() {
    let implicit = compile(&["x", "y"], "2x+3y").expect("implicit");
    let explicit = compile(&["x", "y"], "2*x+3*y").expect("explicit");
    assert_eq!(implicit, explicit);
    assert_eq!(implicit.evaluate(&[2.0, 3.0]), 13.0);
    assert_eq!(compile(&["x", "y"], "x(y+1)").expect("grouped").evaluate(&[2.0, 3.0]), 8.0);
}

#[test]
fn foreign_characters_are_rejected_before_parsing() {
    let error = compile(&["r", "g", "b", "s", "x", "y"], "alert(1)").expect_err("rejected");
    assert_eq!(error.kind(), CompileErrorKind::InvalidExpression);

    let error = compile(&["x", "y"], "x+(y").expect_err("unclosed");
    assert_eq!(error.kind(), CompileErrorKind::Syntax);
}

#[test]
fn session_overrides_flow_into_the_engine() {
    let session = Session::from_yaml_str(
        r#"
canvas: { width: 3, height: 2 }
step: 5
start:
  r: "x*10"
change:
  r: "r+s"
  g: ""
"#,
        "inline",
    )
    .expect("session parses");
    let mut engine = session.build_engine().expect("engine");
    assert_eq!(read_pixel(engine.raster(), 2, 1), Some([20, 3, 3]));

    engine.step_once();
    assert_eq!(read_pixel(engine.raster(), 2, 1), Some([25, 8, 8]));
}

#[test]
fn indexed_layout_sees_byte_offsets() {
    let engine = EngineState::new(3, 2, FormulaLayout::Indexed).expect("engine");
    // pixel (1, 1) starts at byte (1 + 1 * 3) * 4
    assert_eq!(read_pixel(engine.raster(), 1, 1), Some([16, 16, 16]));
}

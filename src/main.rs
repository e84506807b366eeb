use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, info};
use serde_json::json;

use pixfn::config::{load_session, Session, SlotOverride};
use pixfn::engine::EngineState;
use pixfn::error_codes::{envelope_for, find_coded_error, CodedError, CodedErrorKind};
use pixfn::export::{
    negotiate_formats, output_file_name, write_png, ExportFormat, FfmpegMode, FfmpegProbe,
    Recorder, VideoSpec,
};
use pixfn::schedule::{drive, ManualClock, Schedule, Speed, SystemClock, Ticker};
use pixfn::slots::SlotId;

#[derive(Debug, Parser)]
#[command(name = "pixfn")]
#[command(about = "Formula-driven pixel canvas: seed with f(x, y), evolve with f(r, g, b, s, x, y)")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON (including error envelopes) on stdout.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Session YAML file. Defaults apply when omitted.
    session: Option<PathBuf>,
    /// Override a formula, e.g. `--set r.start=x*y` (repeatable).
    #[arg(long = "set", value_name = "SLOT=FORMULA")]
    overrides: Vec<String>,
    /// Override the step scalar.
    #[arg(long, allow_hyphen_values = true)]
    step: Option<i64>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compile every formula and print its normalized form.
    Check {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Seed, run step passes, write a PNG.
    Render {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        passes: u64,
    },
    /// Play in real time on the session's schedule.
    Run {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long, default_value_t = 100)]
        passes: u64,
        #[arg(long, value_enum)]
        speed: Option<SpeedArg>,
        /// Log the pixel under this cursor after every pass.
        #[arg(long, value_name = "X,Y", value_parser = parse_point)]
        watch: Option<(i64, i64)>,
        /// Write the final frame as PNG.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Record seed + step passes to a video file.
    Record {
        #[command(flatten)]
        session: SessionArgs,
        /// File name without extension; a timestamped name when omitted.
        #[arg(short = 'o', long = "output")]
        output: Option<String>,
        #[arg(long, value_enum)]
        format: Option<ExportFormat>,
        #[arg(long, default_value_t = 150)]
        passes: u64,
        /// Use a downloaded ffmpeg instead of the system one.
        #[arg(long)]
        sidecar: bool,
    },
    /// Report the colour of one pixel after some passes.
    Inspect {
        #[command(flatten)]
        session: SessionArgs,
        #[arg(long, allow_hyphen_values = true)]
        x: i64,
        #[arg(long, allow_hyphen_values = true)]
        y: i64,
        #[arg(long, default_value_t = 0)]
        passes: u64,
    },
    /// List the export formats the local ffmpeg supports.
    Formats,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SpeedArg {
    Slow,
    Medium,
    Fast,
    Continuous,
}

impl SpeedArg {
    fn schedule(self) -> Schedule {
        match self {
            Self::Slow => Schedule::from_speed(Speed::Slow),
            Self::Medium => Schedule::from_speed(Speed::Medium),
            Self::Fast => Schedule::from_speed(Speed::Fast),
            Self::Continuous => Schedule::continuous(),
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    debug!(
        "pixfn {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("PIXFN_GIT_HASH").unwrap_or("unknown")
    );

    let cli = Cli::parse();
    let json_output = cli.json;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if json_output {
                match serde_json::to_string_pretty(&envelope_for(&error)) {
                    Ok(text) => println!("{text}"),
                    Err(_) => eprintln!("error: {error:#}"),
                }
            } else {
                eprintln!("error: {error:#}");
            }
            match find_coded_error(&error).map(|coded| coded.kind) {
                Some(CodedErrorKind::Usage | CodedErrorKind::Formula | CodedErrorKind::Session) => {
                    ExitCode::from(2)
                }
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let json_output = cli.json;
    match cli.command {
        Commands::Check { session } => run_check(&session, json_output),
        Commands::Render {
            session,
            output,
            passes,
        } => run_render(&session, &output, passes, json_output),
        Commands::Run {
            session,
            passes,
            speed,
            watch,
            output,
        } => run_play(&session, passes, speed, watch, output.as_deref(), json_output),
        Commands::Record {
            session,
            output,
            format,
            passes,
            sidecar,
        } => run_record(&session, output.as_deref(), format, passes, sidecar, json_output),
        Commands::Inspect {
            session,
            x,
            y,
            passes,
        } => run_inspect(&session, x, y, passes, json_output),
        Commands::Formats => run_formats(json_output),
    }
}

fn load(args: &SessionArgs) -> Result<Session> {
    let mut session = match &args.session {
        Some(path) => load_session(path)?,
        None => Session::default(),
    };
    let overrides = args
        .overrides
        .iter()
        .map(|raw| {
            SlotOverride::parse(raw).map_err(|error| anyhow!(CodedError::usage("USAGE", error.to_string())))
        })
        .collect::<Result<Vec<_>>>()?;
    session.apply_overrides(&overrides);
    if let Some(step) = args.step {
        session.step = step;
    }
    Ok(session)
}

fn run_check(args: &SessionArgs, json_output: bool) -> Result<()> {
    let session = load(args)?;
    let engine = session.build_engine()?;
    let formulas = engine.formulas();
    let layout = formulas.layout();
    let (width, height) = session.canvas.buffer_size();

    if json_output {
        let slots = SlotId::ALL
            .iter()
            .map(|slot| {
                let formula = formulas.get(*slot);
                json!({
                    "slot": slot.to_string(),
                    "signature": layout.signature(slot.kind),
                    "source": formula.source(),
                    "normalized": formula.normalized(),
                })
            })
            .collect::<Vec<_>>();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "ok": true,
                "layout": layout.label(),
                "canvas": { "width": width, "height": height },
                "step": engine.step_scalar(),
                "slots": slots,
            }))?
        );
        return Ok(());
    }

    println!(
        "OK: {}x{} canvas, {} layout, step {}",
        width,
        height,
        layout.label(),
        engine.step_scalar()
    );
    for slot in SlotId::ALL {
        let formula = formulas.get(slot);
        println!(
            "{:<9} {} => {}",
            slot.to_string(),
            layout.signature(slot.kind),
            formula.normalized()
        );
    }
    Ok(())
}

/// Seed and run `passes` step passes as fast as possible.
fn fast_forward(engine: &mut EngineState, passes: u64) -> Result<u64> {
    if passes == 0 {
        return Ok(0);
    }
    let mut ticker = Ticker::new(Schedule::continuous());
    engine.play();
    let summary = drive(engine, &mut ticker, passes, &ManualClock::new(), |_, _| Ok(()))?;
    engine.stop();
    Ok(summary.passes)
}

fn run_render(args: &SessionArgs, output: &Path, passes: u64, json_output: bool) -> Result<()> {
    let session = load(args)?;
    let mut engine = session.build_engine()?;
    let ran = fast_forward(&mut engine, passes)?;
    write_png(engine.raster(), output)?;

    let digest = engine.raster().digest();
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "ok": true,
                "output": output.display().to_string(),
                "passes": ran,
                "sha256": digest,
            }))?
        );
    } else {
        println!("Wrote {} after {ran} pass(es) (sha256 {digest})", output.display());
    }
    Ok(())
}

fn run_play(
    args: &SessionArgs,
    passes: u64,
    speed: Option<SpeedArg>,
    watch: Option<(i64, i64)>,
    output: Option<&Path>,
    json_output: bool,
) -> Result<()> {
    let session = load(args)?;
    let schedule = match speed {
        Some(speed) => speed.schedule(),
        None => session.schedule.resolve()?,
    };
    let mut engine = session.build_engine()?;
    if let Some((x, y)) = watch {
        let (cursor, width, height) = engine.cursor_mut();
        if !cursor.place(x, y, width, height) {
            return Err(anyhow!(CodedError::usage(
                "USAGE",
                format!("--watch {x},{y} is outside the {width}x{height} canvas")
            )));
        }
    }

    info!("running up to {passes} pass(es) every {:?}", schedule.period());
    let mut ticker = Ticker::new(schedule);
    engine.play();
    let summary = drive(&mut engine, &mut ticker, passes, &SystemClock, |engine, report| {
        if let Some(readout) = engine.readout() {
            info!(
                "pass {}: {readout} {} ({:.1}ms)",
                engine.step_passes(),
                readout.hex(),
                report.elapsed.as_secs_f64() * 1000.0
            );
        }
        Ok(())
    })?;
    engine.stop();

    if let Some(path) = output {
        write_png(engine.raster(), path)?;
    }

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "ok": true,
                "passes": summary.passes,
                "faults": summary.faults,
                "cursor": engine.readout(),
                "sha256": engine.raster().digest(),
            }))?
        );
    } else {
        println!(
            "Ran {} pass(es), {} fault(s)",
            summary.passes, summary.faults
        );
        if let Some(path) = output {
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn run_record(
    args: &SessionArgs,
    output: Option<&str>,
    format: Option<ExportFormat>,
    passes: u64,
    sidecar: bool,
    json_output: bool,
) -> Result<()> {
    let session = load(args)?;
    let format = format.unwrap_or(session.export.format);
    let mode = if sidecar {
        FfmpegMode::Sidecar
    } else {
        FfmpegMode::System
    };

    if mode == FfmpegMode::System {
        let supported = negotiate_formats(&FfmpegProbe::system())?;
        if !supported.contains(&format) {
            let names = supported
                .iter()
                .map(|format| format.extension())
                .collect::<Vec<_>>();
            return Err(anyhow!(CodedError::unsupported_format(format!(
                "ffmpeg cannot write {} here (supported: {})",
                format.extension(),
                if names.is_empty() {
                    "none".to_owned()
                } else {
                    names.join(", ")
                }
            ))
            .with_details(json!({ "supported": names }))));
        }
    }

    let stem = output
        .or(session.export.file_name.as_deref())
        .unwrap_or_default();
    let output_path = PathBuf::from(output_file_name(stem, format, Local::now()));

    let mut engine = session.build_engine()?;
    let spec = VideoSpec {
        width: engine.raster().width(),
        height: engine.raster().height(),
        fps: session.export.fps,
        format,
    };
    let mut recorder = Recorder::start(spec, &output_path, mode)?;

    // Frames are spaced by the video's fps, not by wall-clock time.
    let frame_period = Duration::from_nanos(1_000_000_000 / u64::from(spec.fps.max(1)));
    let clock = ManualClock::new();
    let mut ticker = Ticker::new(Schedule::Interval(frame_period));
    let recorded = recorder.push_frame(engine.raster()).and_then(|()| {
        engine.play();
        drive(&mut engine, &mut ticker, passes, &clock, |engine, _| {
            recorder.push_frame(engine.raster())
        })
    });
    engine.stop();

    // Always reap the encoder; its error is the most specific one.
    let finished = recorder.finish();
    let summary = match recorded {
        Ok(_) => finished?,
        Err(error) => return Err(finished.err().unwrap_or(error)),
    };
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "ok": true,
                "output": summary.output_path.display().to_string(),
                "frames": summary.frames,
                "format": summary.format.extension(),
            }))?
        );
    } else {
        println!(
            "Wrote {} ({} frames, {})",
            summary.output_path.display(),
            summary.frames,
            summary.format.mime_type()
        );
    }
    Ok(())
}

fn run_inspect(args: &SessionArgs, x: i64, y: i64, passes: u64, json_output: bool) -> Result<()> {
    let session = load(args)?;
    let mut engine = session.build_engine()?;
    {
        let (cursor, width, height) = engine.cursor_mut();
        if !cursor.place(x, y, width, height) {
            return Err(anyhow!(CodedError::usage(
                "USAGE",
                format!("pixel {x},{y} is outside the {width}x{height} canvas")
            )));
        }
    }
    let ran = fast_forward(&mut engine, passes)?;
    let readout = engine
        .readout()
        .ok_or_else(|| anyhow!("cursor was lost while running passes"))?;

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "ok": true,
                "passes": ran,
                "pixel": readout,
                "hex": readout.hex(),
            }))?
        );
    } else {
        println!("{readout} {}", readout.hex());
    }
    Ok(())
}

fn run_formats(json_output: bool) -> Result<()> {
    let supported = negotiate_formats(&FfmpegProbe::system())?;
    if json_output {
        let names = supported
            .iter()
            .map(|format| format.extension())
            .collect::<Vec<_>>();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "ok": true, "formats": names }))?
        );
        return Ok(());
    }

    if supported.is_empty() {
        println!("No supported export formats found");
    }
    for format in supported {
        println!(
            "{:<5} {} ({}, {})",
            format.extension(),
            format.mime_type(),
            format.muxer(),
            format.encoder()
        );
    }
    Ok(())
}

fn parse_point(raw: &str) -> Result<(i64, i64), String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("'{raw}' must look like X,Y"))?;
    let x = x.trim().parse::<i64>().map_err(|error| format!("bad x '{x}': {error}"))?;
    let y = y.trim().parse::<i64>().map_err(|error| format!("bad y '{y}': {error}"))?;
    Ok((x, y))
}

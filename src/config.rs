use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::engine::{EngineState, DEFAULT_STEP};
use crate::error_codes::CodedError;
use crate::export::ExportFormat;
use crate::schedule::{Schedule, Speed};
use crate::slots::{Channel, FormulaLayout, FormulaSet, SlotId, SlotKind};

pub const MAX_CANVAS_SIDE: u32 = 8192;
pub const MAX_EXPORT_FPS: u32 = 240;

/// One canvas session: size, layout, formulas, step, schedule and export
/// settings. Every field is optional in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Session {
    #[serde(default)]
    pub canvas: Canvas,
    #[serde(default)]
    pub layout: FormulaLayout,
    #[serde(default = "default_step")]
    pub step: i64,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub start: ChannelFormulas,
    #[serde(default)]
    pub change: ChannelFormulas,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            layout: FormulaLayout::default(),
            step: DEFAULT_STEP,
            schedule: ScheduleConfig::default(),
            start: ChannelFormulas::default(),
            change: ChannelFormulas::default(),
            export: ExportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Canvas {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Buffer pixels per canvas pixel, like a browser's devicePixelRatio.
    #[serde(default = "default_device_pixel_ratio")]
    pub device_pixel_ratio: f64,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            device_pixel_ratio: default_device_pixel_ratio(),
        }
    }
}

impl Canvas {
    /// Buffer size after device pixel ratio scaling.
    pub fn buffer_size(&self) -> (u32, u32) {
        let scale = |side: u32| (f64::from(side) * self.device_pixel_ratio).round() as u32;
        (scale(self.width), scale(self.height))
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!(
                "canvas must be positive, got {}x{}",
                self.width,
                self.height
            );
        }
        if !self.device_pixel_ratio.is_finite() || self.device_pixel_ratio <= 0.0 {
            bail!(
                "device_pixel_ratio must be a positive number, got {}",
                self.device_pixel_ratio
            );
        }

        let (width, height) = self.buffer_size();
        if width == 0 || height == 0 {
            bail!("canvas scales to an empty {width}x{height} buffer");
        }
        if width > MAX_CANVAS_SIDE || height > MAX_CANVAS_SIDE {
            bail!(
                "canvas buffer {width}x{height} exceeds the {MAX_CANVAS_SIDE}px limit per side"
            );
        }
        Ok(())
    }
}

/// `continuous: true`, `speed: fast` or `interval_ms: 250`; one at most.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub continuous: bool,
    pub refresh_hz: Option<u32>,
    pub speed: Option<Speed>,
    pub interval_ms: Option<u64>,
}

impl ScheduleConfig {
    pub fn resolve(&self) -> Result<Schedule> {
        let timed = self.speed.is_some() || self.interval_ms.is_some();
        if self.speed.is_some() && self.interval_ms.is_some() {
            bail!("schedule: set either speed or interval_ms, not both");
        }
        if self.continuous && timed {
            bail!("schedule: continuous cannot be combined with speed or interval_ms");
        }
        if self.refresh_hz.is_some() && timed {
            bail!("schedule: refresh_hz only applies to continuous playback");
        }

        if let Some(speed) = self.speed {
            return Ok(Schedule::from_speed(speed));
        }
        if let Some(interval_ms) = self.interval_ms {
            if interval_ms == 0 {
                bail!("schedule: interval_ms must be >= 1");
            }
            return Ok(Schedule::Interval(Duration::from_millis(interval_ms)));
        }
        match self.refresh_hz {
            Some(0) => bail!("schedule: refresh_hz must be >= 1"),
            Some(refresh_hz) => Ok(Schedule::Continuous { refresh_hz }),
            None => Ok(Schedule::continuous()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelFormulas {
    pub r: Option<String>,
    pub g: Option<String>,
    pub b: Option<String>,
}

impl ChannelFormulas {
    pub fn get(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Red => self.r.as_deref(),
            Channel::Green => self.g.as_deref(),
            Channel::Blue => self.b.as_deref(),
        }
    }

    fn set(&mut self, channel: Channel, text: String) {
        match channel {
            Channel::Red => self.r = Some(text),
            Channel::Green => self.g = Some(text),
            Channel::Blue => self.b = Some(text),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::default(),
            fps: default_fps(),
            file_name: None,
        }
    }
}

/// `r.start=x*y` from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotOverride {
    pub slot: SlotId,
    pub text: String,
}

impl SlotOverride {
    pub fn parse(raw: &str) -> Result<Self> {
        let (slot, text) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("override '{raw}' must look like r.start=<formula>"))?;
        let slot = slot.parse::<SlotId>().map_err(|message| anyhow!(message))?;
        Ok(Self {
            slot,
            text: text.to_owned(),
        })
    }
}

impl Session {
    pub fn from_yaml_str(contents: &str, origin: &str) -> Result<Self> {
        let session: Session = serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(CodedError::session(format!(
                "failed to parse yaml in {origin} at {location}: {error}"
            )))
        })?;
        session.validate()?;
        Ok(session)
    }

    pub fn validate(&self) -> Result<()> {
        self.canvas
            .validate()
            .and_then(|()| self.schedule.resolve().map(|_| ()))
            .and_then(|()| {
                if self.export.fps == 0 || self.export.fps > MAX_EXPORT_FPS {
                    bail!(
                        "export fps must be between 1 and {MAX_EXPORT_FPS}, got {}",
                        self.export.fps
                    );
                }
                Ok(())
            })
            .map_err(|error| anyhow!(CodedError::session(format!("{error:#}"))))
    }

    pub fn formula(&self, slot: SlotId) -> Option<&str> {
        match slot.kind {
            SlotKind::Start => self.start.get(slot.channel),
            SlotKind::Change => self.change.get(slot.channel),
        }
    }

    pub fn apply_overrides(&mut self, overrides: &[SlotOverride]) {
        for item in overrides {
            let target = match item.slot.kind {
                SlotKind::Start => &mut self.start,
                SlotKind::Change => &mut self.change,
            };
            target.set(item.slot.channel, item.text.clone());
        }
    }

    /// Build a seeded engine. Any formula that does not compile is an error
    /// naming its slot.
    pub fn build_engine(&self) -> Result<EngineState> {
        let mut formulas = FormulaSet::new(self.layout)
            .map_err(|error| anyhow!(CodedError::formula(&error)))?;
        let edits = SlotId::ALL
            .into_iter()
            .filter_map(|slot| self.formula(slot).map(|text| (slot, text)));
        let errors = formulas.set_many(edits);
        if let Some(first) = errors.first() {
            let mut coded = CodedError::formula(first);
            if errors.len() > 1 {
                coded.message = format!(
                    "{} (and {} more invalid formula(s))",
                    coded.message,
                    errors.len() - 1
                );
            }
            return Err(anyhow!(coded));
        }

        let (width, height) = self.canvas.buffer_size();
        let mut engine = EngineState::with_formulas(width, height, formulas)?;
        engine.set_step(self.step);
        Ok(engine)
    }
}

pub fn load_session(path: &Path) -> Result<Session> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read session {}", path.display()))?;
    Session::from_yaml_str(&contents, &path.display().to_string())
}

fn default_step() -> i64 {
    DEFAULT_STEP
}

fn default_width() -> u32 {
    320
}

fn default_height() -> u32 {
    200
}

fn default_device_pixel_ratio() -> f64 {
    1.0
}

fn default_fps() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::find_coded_error;
    use crate::raster::read_pixel;

    #[test]
    fn empty_document_uses_defaults() {
        let session = Session::from_yaml_str("{}", "inline").expect("defaults");
        assert_eq!(session.canvas.buffer_size(), (320, 200));
        assert_eq!(session.layout, FormulaLayout::Full);
        assert_eq!(session.step, 1);
        assert_eq!(session.schedule.resolve().expect("schedule"), Schedule::continuous());
        assert_eq!(session.export.format, ExportFormat::Webm);
    }

    #[test]
    fn full_document_parses() {
        let yaml = r#"
canvas: { width: 40, height: 30, device_pixel_ratio: 2 }
layout: positional
step: 3
schedule: { speed: fast }
start: { r: "x", g: "y" }
change: { b: "c*2" }
export: { format: mp4, fps: 24, file_name: drift }
"#;
        let session = Session::from_yaml_str(yaml, "inline").expect("session");
        assert_eq!(session.canvas.buffer_size(), (80, 60));
        assert_eq!(session.layout, FormulaLayout::Positional);
        assert_eq!(
            session.schedule.resolve().expect("schedule"),
            Schedule::Interval(Duration::from_millis(100))
        );
        assert_eq!(session.formula(SlotId::start(Channel::Green)), Some("y"));
        assert_eq!(session.formula(SlotId::start(Channel::Blue)), None);

        let engine = session.build_engine().expect("engine");
        assert_eq!(engine.step_scalar(), 3);
        assert_eq!(read_pixel(engine.raster(), 7, 5), Some([7, 5, 12]));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = Session::from_yaml_str("canvas: { depth: 3 }", "inline").expect_err("unknown");
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, "INVALID_SESSION");
    }

    #[test]
    fn oversized_canvas_is_rejected() {
        let yaml = "canvas: { width: 5000, height: 10, device_pixel_ratio: 2 }";
        let error = Session::from_yaml_str(yaml, "inline").expect_err("too big");
        assert!(error.to_string().contains("8192px"));
    }

    #[test]
    fn conflicting_schedule_is_rejected() {
        let yaml = "schedule: { speed: slow, interval_ms: 20 }";
        assert!(Session::from_yaml_str(yaml, "inline").is_err());
        let yaml = "schedule: { continuous: true, speed: slow }";
        assert!(Session::from_yaml_str(yaml, "inline").is_err());
    }

    #[test]
    fn invalid_formula_names_its_slot() {
        let session =
            Session::from_yaml_str("change: { g: \"alert(1)\" }", "inline").expect("parses");
        let error = session.build_engine().expect_err("formula rejected");
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, "INVALID_EXPRESSION");
        assert!(coded.message.contains("invalid change function for g"));
    }

    #[test]
    fn overrides_replace_session_formulas() {
        let mut session = Session::default();
        let item = SlotOverride::parse("b.change=b - 2s").expect("override");
        assert_eq!(item.slot, SlotId::change(Channel::Blue));
        session.apply_overrides(&[item]);
        assert_eq!(session.formula(SlotId::change(Channel::Blue)), Some("b - 2s"));
        assert!(SlotOverride::parse("b.change").is_err());
        assert!(SlotOverride::parse("q.start=1").is_err());
    }
}

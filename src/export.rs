use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use image::{ImageFormat, RgbaImage};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::raster::Raster;

/// Video containers a recording can be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Mp4,
    Mpeg,
    Ogg,
    #[default]
    Webm,
}

impl ExportFormat {
    pub const ALL: [Self; 4] = [Self::Mp4, Self::Mpeg, Self::Ogg, Self::Webm];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mpeg => "mpeg",
            Self::Ogg => "ogg",
            Self::Webm => "webm",
        }
    }

    pub fn mime_type(self) -> String {
        format!("video/{}", self.extension())
    }

    /// ffmpeg muxer name (`-f`).
    pub fn muxer(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mpeg => "mpeg",
            Self::Ogg => "ogg",
            Self::Webm => "webm",
        }
    }

    /// ffmpeg video encoder (`-c:v`).
    pub fn encoder(self) -> &'static str {
        match self {
            Self::Mp4 => "libx264",
            Self::Mpeg => "mpeg1video",
            Self::Ogg => "libtheora",
            Self::Webm => "libvpx-vp9",
        }
    }

    fn codec_args(self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_owned(),
            self.encoder().to_owned(),
            "-pix_fmt".to_owned(),
            "yuv420p".to_owned(),
        ];
        match self {
            Self::Mp4 => {
                args.extend(["-crf", "18", "-movflags", "+faststart"].map(str::to_owned));
            }
            Self::Mpeg => args.extend(["-q:v", "2"].map(str::to_owned)),
            Self::Ogg => args.extend(["-q:v", "8"].map(str::to_owned)),
            Self::Webm => args.extend(["-crf", "30", "-b:v", "0"].map(str::to_owned)),
        }
        args
    }
}

/// What the local encoder can do. Split out so negotiation can be tested
/// without ffmpeg installed.
pub trait EncoderProbe {
    /// Output of `ffmpeg -muxers`.
    fn muxers(&self) -> Result<String>;
    /// Output of `ffmpeg -encoders`.
    fn encoders(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffmpeg_path: PathBuf,
}

impl FfmpegProbe {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn system() -> Self {
        Self::new("ffmpeg")
    }

    fn listing(&self, flag: &str) -> Result<String> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", flag])
            .stdin(Stdio::null())
            .output()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    anyhow!(
                        "ffmpeg executable not found (resolved_path={})",
                        self.ffmpeg_path.display()
                    )
                } else {
                    anyhow!("failed to run ffmpeg {flag}: {error}")
                }
            })?;
        if !output.status.success() {
            bail!("ffmpeg {flag} exited with {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl EncoderProbe for FfmpegProbe {
    fn muxers(&self) -> Result<String> {
        self.listing("-muxers")
    }

    fn encoders(&self) -> Result<String> {
        self.listing("-encoders")
    }
}

/// Formats whose muxer and encoder both appear in the probe's listings, in
/// [`ExportFormat::ALL`] order.
pub fn negotiate_formats(probe: &dyn EncoderProbe) -> Result<Vec<ExportFormat>> {
    let muxers = listed_names(&probe.muxers()?, 'E');
    let encoders = listed_names(&probe.encoders()?, 'V');
    let supported = ExportFormat::ALL
        .into_iter()
        .filter(|format| {
            muxers.iter().any(|name| name == format.muxer())
                && encoders.iter().any(|name| name == format.encoder())
        })
        .collect::<Vec<_>>();
    debug!("negotiated export formats: {supported:?}");
    Ok(supported)
}

/// Names from an ffmpeg capability table whose flag column contains `flag`.
///
/// Rows look like ` E  mp4   MP4 (MPEG-4 Part 14)` or
/// ` V....D libx264   libx264 H.264`; header lines are skipped because they
/// lack a description column or precede the ` --` separator.
fn listed_names(listing: &str, flag: char) -> Vec<String> {
    let body = match listing.find(" --") {
        Some(separator) => &listing[separator..],
        None => listing,
    };
    body.lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let flags = columns.next()?;
            let names = columns.next()?;
            columns.next()?;
            flags.contains(flag).then_some(names)
        })
        .flat_map(|names| names.split(',').map(str::to_owned))
        .collect()
}

/// `stem.ext`, or a timestamped stem when `stem` is blank.
pub fn output_file_name(stem: &str, format: ExportFormat, now: DateTime<Local>) -> String {
    let stem = stem.trim();
    if stem.is_empty() {
        format!("pixfn-{}.{}", now.format("%Y%m%d-%H%M%S"), format.extension())
    } else {
        format!("{stem}.{}", format.extension())
    }
}

/// Write the canvas as an RGBA PNG.
pub fn write_png(raster: &Raster, path: &Path) -> Result<()> {
    let image = RgbaImage::from_raw(raster.width(), raster.height(), raster.to_frame())
        .ok_or_else(|| anyhow!("canvas buffer does not match its dimensions"))?;
    image
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: ExportFormat,
}

/// Which ffmpeg binary a recording runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfmpegMode {
    /// `ffmpeg` from `PATH`.
    System,
    /// A downloaded copy, fetched on first use (`sidecar_ffmpeg` feature).
    Sidecar,
}

impl FfmpegMode {
    pub fn ffmpeg_path(self) -> Result<PathBuf> {
        match self {
            Self::System => Ok(PathBuf::from("ffmpeg")),
            Self::Sidecar => sidecar_ffmpeg_path(),
        }
    }
}

#[cfg(feature = "sidecar_ffmpeg")]
fn sidecar_ffmpeg_path() -> Result<PathBuf> {
    let path = ffmpeg_sidecar::paths::ffmpeg_path();
    if !path.exists() {
        info!("downloading ffmpeg to {}", path.display());
        ffmpeg_sidecar::download::auto_download().context("failed to download ffmpeg")?;
    }
    Ok(path)
}

#[cfg(not(feature = "sidecar_ffmpeg"))]
fn sidecar_ffmpeg_path() -> Result<PathBuf> {
    bail!("--sidecar needs pixfn built with `--features sidecar_ffmpeg`")
}

/// Streams frames to an encoder and produces one video file.
pub struct Recorder {
    encoder: EncoderWorker,
    spec: VideoSpec,
    output_path: PathBuf,
    frames: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub output_path: PathBuf,
    pub frames: u64,
    pub format: ExportFormat,
}

impl Recorder {
    pub fn start(spec: VideoSpec, output_path: &Path, mode: FfmpegMode) -> Result<Self> {
        Self::with_ffmpeg(spec, output_path, mode.ffmpeg_path()?)
    }

    /// Record with an explicit ffmpeg executable.
    pub fn with_ffmpeg(
        spec: VideoSpec,
        output_path: &Path,
        ffmpeg_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let ffmpeg_path = ffmpeg_path.into();
        let args = ffmpeg_args(spec, output_path);
        let encoder = EncoderWorker::spawn(ffmpeg_path, args)?;
        info!(
            "recording {}x{} @ {}fps to {} ({})",
            spec.width,
            spec.height,
            spec.fps,
            output_path.display(),
            spec.format.mime_type()
        );
        Ok(Self {
            encoder,
            spec,
            output_path: output_path.to_path_buf(),
            frames: 0,
        })
    }

    /// Queue the canvas as the next frame. The canvas must not have been
    /// resized since recording started. Fails with ffmpeg's own diagnostics
    /// once the encoder has quit.
    pub fn push_frame(&mut self, raster: &Raster) -> Result<()> {
        if raster.width() != self.spec.width || raster.height() != self.spec.height {
            bail!(
                "frame is {}x{} but the recording is {}x{}",
                raster.width(),
                raster.height(),
                self.spec.width,
                self.spec.height
            );
        }
        self.encoder.send(raster.to_frame())?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Close the frame stream and wait for ffmpeg to write the file.
    pub fn finish(mut self) -> Result<RecordingSummary> {
        self.encoder.close()?;
        info!(
            "wrote {} frame(s) to {}",
            self.frames,
            self.output_path.display()
        );
        Ok(RecordingSummary {
            output_path: self.output_path,
            frames: self.frames,
            format: self.spec.format,
        })
    }
}

/// Owns the ffmpeg child on a worker thread, fed through a bounded channel
/// of owned RGBA frames.
struct EncoderWorker {
    frames: Option<mpsc::SyncSender<Vec<u8>>>,
    handle: Option<JoinHandle<Result<()>>>,
    failure: Option<String>,
}

impl EncoderWorker {
    fn spawn(ffmpeg_path: PathBuf, args: Vec<String>) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);
        let handle = thread::Builder::new()
            .name("pixfn-encoder".to_owned())
            .spawn(move || encode(&ffmpeg_path, &args, receiver))
            .context("failed to start the encoder thread")?;
        Ok(Self {
            frames: Some(sender),
            handle: Some(handle),
            failure: None,
        })
    }

    fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        let Some(frames) = &self.frames else {
            bail!("recording has already finished");
        };
        if frames.send(frame).is_ok() {
            return Ok(());
        }

        // The worker dropped its receiver, so it has quit; its result says why.
        let error = match self.join() {
            Err(error) => error,
            Ok(()) => anyhow!("encoder stopped accepting frames"),
        };
        self.failure = Some(format!("{error:#}"));
        Err(error)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(message) = self.failure.take() {
            bail!("{message}");
        }
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        drop(self.frames.take());
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| anyhow!("encoder thread panicked"))?
    }
}

/// Pipe every received frame into one ffmpeg run. The child is always
/// reaped, and a failed run reports the end of ffmpeg's stderr.
fn encode(ffmpeg_path: &Path, args: &[String], frames: mpsc::Receiver<Vec<u8>>) -> Result<()> {
    let mut child = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| match error.kind() {
            ErrorKind::NotFound => anyhow!(
                "ffmpeg not found at {}; install it or pass --sidecar",
                ffmpeg_path.display()
            ),
            _ => anyhow!("failed to start {}: {error}", ffmpeg_path.display()),
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("ffmpeg stdin was not captured"))?;
    let stderr = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            // Whatever was read before an error is still useful.
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let mut written = 0u64;
    let mut write_error = None;
    for frame in &frames {
        if let Err(error) = stdin.write_all(&frame) {
            write_error = Some(error);
            break;
        }
        written += 1;
    }
    // Unblock the sender before waiting on the child.
    drop(frames);
    if write_error.is_none() {
        write_error = stdin.flush().err();
    }
    drop(stdin);

    let status = child.wait().context("failed waiting for ffmpeg")?;
    let diagnostics = stderr
        .and_then(|reader| reader.join().ok())
        .map(|buf| tail_chars(&String::from_utf8_lossy(&buf), 500))
        .unwrap_or_default();
    debug!("ffmpeg exited with {status} after {written} frame(s)");

    if !status.success() {
        bail!(
            "ffmpeg exited with {status} after {written} frame(s): {}",
            or_silent(&diagnostics)
        );
    }
    if let Some(error) = write_error {
        bail!(
            "ffmpeg stopped reading frames after {written} ({error}): {}",
            or_silent(&diagnostics)
        );
    }
    Ok(())
}

fn or_silent(diagnostics: &str) -> &str {
    if diagnostics.is_empty() {
        "no output on stderr"
    } else {
        diagnostics
    }
}

fn ffmpeg_args(spec: VideoSpec, output_path: &Path) -> Vec<String> {
    let size = format!("{}x{}", spec.width, spec.height);
    let fps = spec.fps.to_string();
    let mut args = Vec::from([
        "-hide_banner", "-loglevel", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgba",
        "-s:v", size.as_str(), "-r", fps.as_str(), "-i", "-", "-an",
        // yuv420p needs even dimensions; pad odd canvases by one pixel.
        "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2",
    ]
    .map(str::to_owned));
    args.extend(spec.format.codec_args());
    args.push("-f".to_owned());
    args.push(spec.format.muxer().to_owned());
    args.push(output_path.to_string_lossy().into_owned());
    args
}

/// The last `max_chars` characters of `text`, trimmed.
fn tail_chars(text: &str, max_chars: usize) -> String {
    let skip = text.chars().count().saturating_sub(max_chars);
    text.chars().skip(skip).collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedProbe {
        muxers: &'static str,
        encoders: &'static str,
    }

    impl EncoderProbe for FixedProbe {
        fn muxers(&self) -> Result<String> {
            Ok(self.muxers.to_owned())
        }

        fn encoders(&self) -> Result<String> {
            Ok(self.encoders.to_owned())
        }
    }

    const MUXERS: &str = "File formats:
 D. = Demuxing supported
 .E = Muxing supported
 --
  E mp4             MP4 (MPEG-4 Part 14)
  E mpeg            MPEG-1 Systems / MPEG program stream
  E ogg             Ogg
  E webm            WebM
";

    const ENCODERS: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 V..... mpeg1video           MPEG-1 video
 A....D libvorbis            libvorbis (codec vorbis)
";

    #[test]
    fn negotiation_requires_muxer_and_encoder() {
        let probe = FixedProbe {
            muxers: MUXERS,
            encoders: ENCODERS,
        };
        let formats = negotiate_formats(&probe).expect("negotiate");
        assert_eq!(formats, vec![ExportFormat::Mpeg, ExportFormat::Webm]);
    }

    #[test]
    fn negotiation_with_nothing_listed_is_empty() {
        let probe = FixedProbe {
            muxers: "",
            encoders: "",
        };
        assert!(negotiate_formats(&probe).expect("negotiate").is_empty());
    }

    #[test]
    fn file_name_uses_extension_or_timestamp() {
        let now = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("valid local time");
        assert_eq!(output_file_name("drift", ExportFormat::Webm, now), "drift.webm");
        assert_eq!(
            output_file_name("  ", ExportFormat::Mp4, now),
            "pixfn-20240309-140507.mp4"
        );
    }

    #[test]
    fn ffmpeg_args_describe_raw_rgba_input() {
        let spec = VideoSpec {
            width: 33,
            height: 20,
            fps: 30,
            format: ExportFormat::Ogg,
        };
        let args = ffmpeg_args(spec, Path::new("out.ogg"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s:v 33x20 -r 30 -i -"));
        assert!(joined.contains("-c:v libtheora"));
        assert!(joined.ends_with("-f ogg out.ogg"));
    }

    #[test]
    fn png_round_trips_canvas_pixels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.png");
        let mut engine =
            crate::engine::EngineState::new(3, 2, crate::slots::FormulaLayout::Full)
                .expect("engine");
        engine.step_once();
        write_png(engine.raster(), &path).expect("png");

        let decoded = image::open(&path).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.as_raw(), engine.raster().as_bytes());
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        assert_eq!(tail_chars("  abcdef  ", 4), "ef");
        assert_eq!(tail_chars("abc", 10), "abc");
    }

    #[cfg(unix)]
    fn failing_ffmpeg(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ffmpeg");
        std::fs::write(
            &path,
            "#!/bin/sh\necho 'Unknown encoder libvpx-vp9 (build lacks it)' >&2\nexit 1\n",
        )
        .expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    #[cfg(unix)]
    #[test]
    fn encoder_failure_reports_ffmpeg_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ffmpeg = failing_ffmpeg(dir.path());
        let spec = VideoSpec {
            width: 256,
            height: 256,
            fps: 30,
            format: ExportFormat::Webm,
        };
        let engine = crate::engine::EngineState::new(256, 256, crate::slots::FormulaLayout::Full)
            .expect("engine");
        let mut recorder =
            Recorder::with_ffmpeg(spec, &dir.path().join("out.webm"), ffmpeg).expect("start");

        let mut pushed = Ok(());
        for _ in 0..200 {
            pushed = recorder.push_frame(engine.raster());
            if pushed.is_err() {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        let pushed = pushed.expect_err("a dead encoder must reject frames");
        assert!(
            format!("{pushed:#}").contains("Unknown encoder libvpx-vp9"),
            "push error lacks ffmpeg stderr: {pushed:#}"
        );

        let finished = recorder.finish().expect_err("finish reports the failure");
        assert!(format!("{finished:#}").contains("Unknown encoder libvpx-vp9"));
    }

    #[cfg(unix)]
    #[test]
    fn finish_surfaces_stderr_when_frames_were_buffered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ffmpeg = failing_ffmpeg(dir.path());
        let spec = VideoSpec {
            width: 2,
            height: 2,
            fps: 30,
            format: ExportFormat::Webm,
        };
        let engine = crate::engine::EngineState::new(2, 2, crate::slots::FormulaLayout::Full)
            .expect("engine");
        let mut recorder =
            Recorder::with_ffmpeg(spec, &dir.path().join("out.webm"), ffmpeg).expect("start");
        // Tiny frames fit in the pipe buffer, so pushing may or may not notice.
        let _ = recorder.push_frame(engine.raster());

        let error = recorder.finish().expect_err("ffmpeg exited 1");
        assert!(format!("{error:#}").contains("Unknown encoder libvpx-vp9"));
    }
}

//! Probing the source and launching the decoder that feeds raw frames.
//!
//! Both collaborators are plain child processes: `ffprobe` reports the native
//! geometry and frame rate as one CSV line, and `ffmpeg` writes headerless
//! `rgb24` frames back-to-back on its stdout.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::str::FromStr;

use crate::{
    config::DecoderConfig,
    frame::{FrameBuffer, FrameReader, ReadOutcome, BYTES_PER_PIXEL},
    timeline::FrameSource,
    PlayerError, Result,
};

/// Frame rate as the prober reports it, e.g. `24000/1001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if num == 0 || den == 0 {
            return Err(PlayerError::invalid_input(format!(
                "frame rate {num}/{den} must be positive"
            )));
        }
        Ok(Self { num, den })
    }

    pub fn whole(fps: u32) -> Result<Self> {
        Self::new(fps, 1)
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl FromStr for FrameRate {
    type Err = PlayerError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (num, den) = raw.split_once('/').unwrap_or((raw, "1"));
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| PlayerError::invalid_input(format!("invalid frame rate `{raw}`")))
        };
        Self::new(parse(num)?, parse(den)?)
    }
}

/// Native properties reported by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
}

/// How the decoder output size is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRequest {
    /// Exact output size in pixels.
    Fixed { width: u32, height: u32 },
    /// Largest aspect-preserving size that fits a terminal of this many
    /// cells. Each pixel occupies two columns.
    Fit { max_cols: u32, max_rows: u32 },
}

/// Everything needed to start a session.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub path: PathBuf,
    pub size: SizeRequest,
    /// Query the prober before launching. Required for [`SizeRequest::Fit`].
    pub probe: bool,
    pub fps_override: Option<FrameRate>,
    /// Rate assumed when probing is skipped and no override is given.
    pub default_fps: u32,
}

impl LaunchOptions {
    pub fn new(path: impl Into<PathBuf>, size: SizeRequest) -> Self {
        Self {
            path: path.into(),
            size,
            probe: true,
            fps_override: None,
            default_fps: 30,
        }
    }
}

/// Parses `WIDTHxHEIGHT`.
pub fn parse_size(raw: &str) -> Result<(u32, u32)> {
    let invalid = || PlayerError::invalid_input(format!("invalid size `{raw}`, expected WIDTHxHEIGHT"));
    let (width, height) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(invalid)?;
    let width: u32 = width.trim().parse().map_err(|_| invalid())?;
    let height: u32 = height.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

/// Scales `width x height` down (or up) to the largest size whose rendering
/// fits in `max_cols x max_rows` terminal cells, preserving aspect ratio.
pub fn fit_resolution(width: u32, height: u32, max_cols: u32, max_rows: u32) -> (u32, u32) {
    let max_w = (max_cols / 2).max(1);
    let max_h = max_rows.max(1);
    if width == 0 || height == 0 {
        return (max_w, max_h);
    }

    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let fit_w = (width as f64 * scale).round() as u32;
    let fit_h = (height as f64 * scale).round() as u32;
    (fit_w.clamp(1, max_w), fit_h.clamp(1, max_h))
}

pub(crate) fn probe_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,r_frame_rate",
        "-of",
        "csv=p=0",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

/// Parses `width,height,num/den` from the prober's first non-empty line.
pub fn parse_probe_output(path: &Path, stdout: &str) -> Result<SourceInfo> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| PlayerError::invalid_source(path, "no video stream reported"))?;

    let tokens: Vec<&str> = line.split(',').map(str::trim).collect();
    let [width, height, rate, ..] = tokens.as_slice() else {
        return Err(PlayerError::invalid_source(
            path,
            format!("unexpected probe output `{line}`"),
        ));
    };

    let dimension = |token: &str| match token.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(PlayerError::invalid_source(
            path,
            format!("invalid dimension `{token}` in probe output"),
        )),
    };
    let frame_rate = rate
        .parse::<FrameRate>()
        .map_err(|_| PlayerError::invalid_source(path, format!("invalid frame rate `{rate}`")))?;

    Ok(SourceInfo {
        width: dimension(*width)?,
        height: dimension(*height)?,
        frame_rate,
    })
}

/// Runs the prober once and parses its answer.
pub fn probe_source(config: &DecoderConfig, path: &Path) -> Result<SourceInfo> {
    let output = Command::new(&config.ffprobe)
        .args(probe_args(path))
        .stdin(Stdio::null())
        .output()
        .map_err(|error| match PlayerError::spawn(&config.ffprobe, error) {
            missing @ PlayerError::ToolNotFound { .. } => missing,
            other => PlayerError::invalid_source(path, other.to_string()),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PlayerError::invalid_source(
            path,
            format!("{} exited with {}: {}", config.ffprobe, output.status, stderr.trim()),
        ));
    }

    let info = parse_probe_output(path, &String::from_utf8_lossy(&output.stdout))?;
    tracing::debug!(
        width = info.width,
        height = info.height,
        frame_rate = %info.frame_rate,
        "probed source"
    );
    Ok(info)
}

pub(crate) fn decoder_args(
    path: &Path,
    width: u32,
    height: u32,
    frame_rate: FrameRate,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "quiet".into(),
        "-i".into(),
        path.as_os_str().to_owned(),
        "-r".into(),
        frame_rate.to_string().into(),
    ];
    args.extend(
        [
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{width}x{height}"),
            "-an".to_string(),
            "-sn".to_string(),
            "pipe:1".to_string(),
        ]
        .map(OsString::from),
    );
    args
}

/// Output geometry, frame rate and decoder arguments for one session.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DecoderPlan {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub args: Vec<OsString>,
}

/// Resolves size and rate, probing if asked. The decoder is always told the
/// resolved rate so its output matches the pace the player keeps.
pub(crate) fn plan_decoder(config: &DecoderConfig, options: &LaunchOptions) -> Result<DecoderPlan> {
    let (width, height, frame_rate) = if options.probe {
        let info = probe_source(config, &options.path)?;
        let (width, height) = match options.size {
            SizeRequest::Fixed { width, height } => (width, height),
            SizeRequest::Fit { max_cols, max_rows } => {
                fit_resolution(info.width, info.height, max_cols, max_rows)
            }
        };
        (width, height, options.fps_override.unwrap_or(info.frame_rate))
    } else {
        let SizeRequest::Fixed { width, height } = options.size else {
            return Err(PlayerError::invalid_input(
                "fitting to the terminal needs the prober; pass a fixed size",
            ));
        };
        let rate = match options.fps_override {
            Some(rate) => rate,
            None => FrameRate::whole(options.default_fps)?,
        };
        (width, height, rate)
    };

    if width == 0 || height == 0 {
        return Err(PlayerError::invalid_input("output size must be non-zero"));
    }

    Ok(DecoderPlan {
        width,
        height,
        frame_rate,
        args: decoder_args(&options.path, width, height, frame_rate),
    })
}

/// Resolves geometry and frame rate, then starts the decoder.
pub fn launch(config: &DecoderConfig, options: &LaunchOptions) -> Result<DecoderStream> {
    if !options.path.exists() {
        return Err(PlayerError::invalid_source(&options.path, "file does not exist"));
    }

    let DecoderPlan {
        width,
        height,
        frame_rate,
        args,
    } = plan_decoder(config, options)?;
    tracing::debug!(program = %config.ffmpeg, ?args, "launching decoder");

    let mut child = Command::new(&config.ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|error| PlayerError::spawn(&config.ffmpeg, error))?;

    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(PlayerError::msg("failed to capture decoder stdout"));
    };

    Ok(DecoderStream {
        child,
        reader: FrameReader::new(stdout),
        frame_rate,
        width,
        height,
    })
}

/// Running decoder: its stdout pipe, declared frame rate and output size.
#[derive(Debug)]
pub struct DecoderStream {
    child: Child,
    reader: FrameReader<ChildStdout>,
    frame_rate: FrameRate,
    width: u32,
    height: u32,
}

impl DecoderStream {
    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    pub fn fps(&self) -> f64 {
        self.frame_rate.as_f64()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Allocates the session's single reusable frame buffer.
    pub fn frame_buffer(&self) -> FrameBuffer {
        FrameBuffer::new(self.width, self.height)
    }
}

impl FrameSource for DecoderStream {
    fn read_frame(&mut self, frame: &mut FrameBuffer) -> ReadOutcome {
        self.reader.read_into(frame)
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

impl Drop for DecoderStream {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

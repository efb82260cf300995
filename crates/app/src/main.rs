use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use vidterm_core::{
    install_interrupt_handler, launch, parse_size, AppConfig, FrameRate, FrameRenderer,
    IdleStrategy, LaunchOptions, Palette, PlaybackSummary, Player, SizeRequest, SystemClock,
    TerminalGuard,
};

const FALLBACK_TERMINAL: (u32, u32) = (80, 24);
const DEFAULT_SLEEP_MICROS: u64 = 1_000;

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(summary) => {
            tracing::info!(
                frames = summary.frames_rendered,
                elapsed = ?summary.elapsed,
                termination = ?summary.termination,
                "playback finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("vidterm: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> vidterm_core::Result<PlaybackSummary> {
    let config = load_config(cli.config.as_deref())?;
    let ramp = cli.palette.as_deref().unwrap_or(&config.playback.palette);
    let palette = Arc::new(Palette::parse(ramp)?);
    let idle = resolve_idle(cli.idle, config.playback.idle);

    let options = LaunchOptions {
        path: cli.file.clone(),
        size: resolve_size(cli)?,
        probe: !cli.no_probe,
        fps_override: cli.fps,
        default_fps: config.playback.default_fps,
    };
    let stream = launch(&config.decoder, &options)?;
    tracing::info!(
        file = %cli.file.display(),
        width = stream.width(),
        height = stream.height(),
        frame_rate = %stream.frame_rate(),
        "starting playback"
    );

    install_interrupt_handler()?;

    let frame = stream.frame_buffer();
    let renderer = FrameRenderer::with_capacity(palette, stream.width(), stream.height());
    let fps = stream.fps();

    // Declared before the player so the decoder is reaped before the screen
    // is restored.
    let _terminal = TerminalGuard::enter()?;
    let mut player = Player::new(stream, frame, renderer, fps, SystemClock, io::stdout())?
        .with_idle(idle)
        .with_decoder_polling(config.playback.poll_decoder);
    player.run()
}

fn load_config(path: Option<&Path>) -> vidterm_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::debug!(?path, "loading configuration");
            AppConfig::from_path(path)
        }
        None => Ok(AppConfig::default()),
    }
}

fn resolve_size(cli: &Cli) -> vidterm_core::Result<SizeRequest> {
    if let Some(raw) = cli.size.as_deref() {
        let (width, height) = parse_size(raw)?;
        return Ok(SizeRequest::Fixed { width, height });
    }

    if let Some(rows) = cli.rows {
        return Ok(SizeRequest::Fit {
            max_cols: u32::MAX,
            max_rows: rows,
        });
    }

    let (cols, rows) = terminal_size();
    // Keep the last row free so the trailing newline does not scroll.
    Ok(SizeRequest::Fit {
        max_cols: cols,
        max_rows: rows.saturating_sub(1).max(1),
    })
}

fn terminal_size() -> (u32, u32) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols as u32, rows as u32),
        Ok(_) => FALLBACK_TERMINAL,
        Err(err) => {
            tracing::warn!(error = %err, "could not query terminal size, assuming 80x24");
            FALLBACK_TERMINAL
        }
    }
}

fn resolve_idle(arg: Option<IdleArg>, configured: IdleStrategy) -> IdleStrategy {
    match arg {
        None => configured,
        Some(IdleArg::Spin) => IdleStrategy::Spin,
        Some(IdleArg::Yield) => IdleStrategy::Yield,
        Some(IdleArg::Sleep) => match configured {
            sleep @ IdleStrategy::Sleep { .. } => sleep,
            _ => IdleStrategy::Sleep {
                max_micros: DEFAULT_SLEEP_MICROS,
            },
        },
    }
}

fn init_tracing() {
    // Frames own stdout; diagnostics go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Play a video as coloured text in the terminal", long_about = None)]
struct Cli {
    /// Video file to play.
    file: PathBuf,
    /// Fixed output size in pixels, e.g. `96x54`. Each pixel takes two columns.
    #[arg(short, long, conflicts_with = "rows")]
    size: Option<String>,
    /// Fit the video to this many rows instead of the terminal height.
    #[arg(short, long)]
    rows: Option<u32>,
    /// Override the frame rate, e.g. `24` or `30000/1001`.
    #[arg(long)]
    fps: Option<FrameRate>,
    /// Glyph ramp from darkest to brightest.
    #[arg(short, long)]
    palette: Option<String>,
    /// Skip the prober. Requires `--size`.
    #[arg(long, requires = "size")]
    no_probe: bool,
    /// What the loop does while waiting for the next frame.
    #[arg(long, value_enum)]
    idle: Option<IdleArg>,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum IdleArg {
    Spin,
    Yield,
    Sleep,
}

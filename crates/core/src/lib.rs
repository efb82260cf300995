//! Core library for vidterm, a terminal video player.
//!
//! An external decoder turns the source into raw RGB frames on a pipe. The
//! [`timeline::Player`] loop pulls one frame per interval through the
//! [`frame`] reader, converts it to coloured glyphs with the [`render`]
//! pipeline and writes each frame to the terminal in a single batch.

pub mod config;
pub mod error;
pub mod frame;
pub mod render;
pub mod source;
pub mod terminal;
pub mod timeline;

pub use config::{AppConfig, DecoderConfig, PlaybackConfig, DEFAULT_PALETTE};
pub use error::{PlayerError, Result};
pub use frame::{read_frame, FrameBuffer, FrameReader, ReadOutcome};
pub use render::{luminance, palette_index, FrameRenderer, Palette};
pub use source::{
    fit_resolution, launch, parse_size, probe_source, DecoderStream, FrameRate, LaunchOptions,
    SizeRequest, SourceInfo,
};
pub use terminal::{install_interrupt_handler, TerminalGuard};
pub use timeline::{
    Clock, FramePacer, FrameSource, IdleStrategy, PlaybackState, PlaybackSummary, Player,
    SystemClock, Termination,
};

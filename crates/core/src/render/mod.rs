use std::io::Write;
use std::sync::Arc;

use crate::{frame::FrameBuffer, frame::BYTES_PER_PIXEL, PlayerError, Result};

/// Moves the cursor to the top-left cell without clearing the screen.
pub const CURSOR_HOME: &[u8] = b"\x1b[H";

// BT.709 luma weights scaled by 10_000 so palette lookup stays in integers.
const WEIGHT_R: u64 = 2126;
const WEIGHT_G: u64 = 7152;
const WEIGHT_B: u64 = 722;
const WEIGHT_SCALE: u64 = 10_000;

/// Glyphs each pixel is drawn with; two narrow cells approximate a square.
const GLYPHS_PER_PIXEL: usize = 2;

/// Worst-case bytes for `ESC[38;2;255;255;255m`.
const MAX_COLOR_ESCAPE_LEN: usize = 19;

/// Ordered glyph ramp, darkest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    glyphs: Vec<char>,
}

impl Palette {
    pub fn new(glyphs: impl IntoIterator<Item = char>) -> Result<Self> {
        let glyphs: Vec<char> = glyphs.into_iter().collect();
        if glyphs.is_empty() {
            return Err(PlayerError::invalid_input(
                "palette must contain at least one glyph",
            ));
        }
        Ok(Self { glyphs })
    }

    pub fn parse(ramp: &str) -> Result<Self> {
        Self::new(ramp.chars())
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn glyph(&self, index: usize) -> char {
        self.glyphs[index.min(self.glyphs.len() - 1)]
    }

    /// Glyph for a pixel.
    pub fn glyph_for(&self, r: u8, g: u8, b: u8) -> char {
        self.glyphs[palette_index(r, g, b, self.glyphs.len())]
    }

    fn max_glyph_len(&self) -> usize {
        self.glyphs.iter().map(|c| c.len_utf8()).max().unwrap_or(1)
    }
}

/// Perceived brightness in `[0, 1]` using BT.709 weights.
///
/// This is the reference value [`palette_index`] quantises. The render path
/// uses the integer form so the palette ends are hit exactly.
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    let weighted = 0.2126 * (r as f32 / 255.0)
        + 0.7152 * (g as f32 / 255.0)
        + 0.0722 * (b as f32 / 255.0);
    weighted.clamp(0.0, 1.0)
}

/// `floor(luminance * (len - 1))`, clamped to `[0, len - 1]`.
///
/// Evaluated with integer weights so that pure white lands exactly on the last
/// glyph instead of one below it through float rounding. `len` of zero is
/// treated as one.
pub fn palette_index(r: u8, g: u8, b: u8, len: usize) -> usize {
    let last = len.saturating_sub(1) as u64;
    let index = weighted_sum(r, g, b) * last / (255 * WEIGHT_SCALE);
    index.min(last) as usize
}

/// Luminance scaled by `255 * WEIGHT_SCALE`, exact in integers.
fn weighted_sum(r: u8, g: u8, b: u8) -> u64 {
    WEIGHT_R * r as u64 + WEIGHT_G * g as u64 + WEIGHT_B * b as u64
}

/// Turns frame buffers into one batched escape-sequence payload per frame.
#[derive(Debug)]
pub struct FrameRenderer {
    palette: Arc<Palette>,
    out: Vec<u8>,
}

impl FrameRenderer {
    pub fn new(palette: Arc<Palette>) -> Self {
        Self {
            palette,
            out: Vec::new(),
        }
    }

    /// Pre-sizes the output buffer for frames of the given dimensions.
    pub fn with_capacity(palette: Arc<Palette>, width: u32, height: u32) -> Self {
        let mut renderer = Self::new(palette);
        let capacity = renderer.frame_capacity(width as usize, height as usize);
        renderer.out.reserve(capacity);
        renderer
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Builds the terminal payload for `frame` and returns it. The buffer is
    /// reused between calls.
    pub fn render(&mut self, frame: &FrameBuffer) -> &[u8] {
        self.out.clear();
        self.out.extend_from_slice(CURSOR_HOME);

        let mut glyph_utf8 = [0_u8; 4];
        for row in frame.rows() {
            for pixel in row.chunks_exact(BYTES_PER_PIXEL) {
                let (r, g, b) = (pixel[0], pixel[1], pixel[2]);
                push_foreground(&mut self.out, r, g, b);

                let glyph = self.palette.glyph_for(r, g, b).encode_utf8(&mut glyph_utf8);
                for _ in 0..GLYPHS_PER_PIXEL {
                    self.out.extend_from_slice(glyph.as_bytes());
                }
            }
            self.out.push(b'\n');
        }

        &self.out
    }

    /// Renders `frame` and hands it to `sink` in a single `write_all`, then
    /// flushes.
    pub fn render_to<W: Write + ?Sized>(&mut self, frame: &FrameBuffer, sink: &mut W) -> Result<()> {
        self.render(frame);
        sink.write_all(&self.out)?;
        sink.flush()?;
        Ok(())
    }

    fn frame_capacity(&self, width: usize, height: usize) -> usize {
        let per_pixel = MAX_COLOR_ESCAPE_LEN + GLYPHS_PER_PIXEL * self.palette.max_glyph_len();
        CURSOR_HOME.len() + height * (width * per_pixel + 1)
    }
}

/// Appends `ESC[38;2;R;G;Bm`.
fn push_foreground(out: &mut Vec<u8>, r: u8, g: u8, b: u8) {
    out.extend_from_slice(b"\x1b[38;2;");
    push_decimal(out, r);
    out.push(b';');
    push_decimal(out, g);
    out.push(b';');
    push_decimal(out, b);
    out.push(b'm');
}

fn push_decimal(out: &mut Vec<u8>, value: u8) {
    if value >= 100 {
        out.push(b'0' + value / 100);
    }
    if value >= 10 {
        out.push(b'0' + (value / 10) % 10);
    }
    out.push(b'0' + value % 10);
}

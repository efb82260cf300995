use std::io::{ErrorKind, Read};

/// Bytes per pixel in the decoder's `rgb24` output.
pub const BYTES_PER_PIXEL: usize = 3;

/// One reusable frame of interleaved RGB pixels, row-major.
///
/// The buffer is allocated once per session and overwritten by every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width as usize;
        let height = height as usize;
        Self {
            width,
            height,
            data: vec![0; width * height * BYTES_PER_PIXEL],
        }
    }

    /// Wraps existing pixel bytes. Returns `None` when the length does not
    /// match `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        (data.len() == expected).then(|| Self {
            width: width as usize,
            height: height as usize,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Iterates rows as slices of `[r, g, b]` pixels.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact((self.width * BYTES_PER_PIXEL).max(1))
    }
}

/// Result of pulling one frame from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The buffer now holds a complete frame.
    Frame,
    /// The stream closed or failed. Any partial frame has been discarded.
    End,
}

/// Fills `buf` completely from `reader`, absorbing short reads.
///
/// A zero-byte read, or any error other than `Interrupted`, ends the stream.
/// Both are reported as [`ReadOutcome::End`] because playback treats a
/// finished decoder and a broken pipe the same way.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> ReadOutcome {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!(error = %err, "decoder stream read failed");
                break;
            }
        }
    }

    if filled == buf.len() {
        ReadOutcome::Frame
    } else {
        if filled > 0 {
            tracing::debug!(
                filled,
                expected = buf.len(),
                "discarding partial trailing frame"
            );
        }
        ReadOutcome::End
    }
}

/// Frame reader bound to a byte stream. Once the stream has ended every
/// further call reports [`ReadOutcome::End`] without touching the reader.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    pub fn read_into(&mut self, frame: &mut FrameBuffer) -> ReadOutcome {
        if self.finished {
            return ReadOutcome::End;
        }

        let outcome = read_frame(&mut self.inner, frame.as_bytes_mut());
        if outcome == ReadOutcome::End {
            self.finished = true;
        }
        outcome
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;

    /// Hands out pre-cut chunks, one per `read` call, regardless of buffer
    /// size, like a pipe would.
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkedReader {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into(),
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    fn ramp(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn exact_frame_then_end() {
        let bytes = ramp(2 * 2 * BYTES_PER_PIXEL);
        let mut reader = FrameReader::new(ChunkedReader::new(vec![bytes.clone()]));
        let mut frame = FrameBuffer::new(2, 2);

        assert_eq!(reader.read_into(&mut frame), ReadOutcome::Frame);
        assert_eq!(frame.as_bytes(), bytes.as_slice());
        assert_eq!(reader.read_into(&mut frame), ReadOutcome::End);
        assert!(reader.is_finished());
    }

    #[test]
    fn assembles_frame_from_split_chunks() {
        let bytes = ramp(3 * 2 * BYTES_PER_PIXEL);
        let (head, tail) = bytes.split_at(5);
        let mut reader = FrameReader::new(ChunkedReader::new(vec![head.to_vec(), tail.to_vec()]));
        let mut frame = FrameBuffer::new(3, 2);

        assert_eq!(reader.read_into(&mut frame), ReadOutcome::Frame);
        assert_eq!(frame.as_bytes(), bytes.as_slice());
        assert_eq!(reader.read_into(&mut frame), ReadOutcome::End);
    }

    #[test]
    fn tolerates_single_byte_reads() {
        let bytes = ramp(BYTES_PER_PIXEL * 4);
        let chunks = bytes.iter().map(|b| vec![*b]).collect();
        let mut frame = FrameBuffer::new(4, 1);

        let outcome = read_frame(&mut ChunkedReader::new(chunks), frame.as_bytes_mut());
        assert_eq!(outcome, ReadOutcome::Frame);
        assert_eq!(frame.as_bytes(), bytes.as_slice());
    }

    #[test]
    fn partial_trailing_frame_is_end() {
        let bytes = ramp(2 * 2 * BYTES_PER_PIXEL + 4);
        let mut reader = FrameReader::new(ChunkedReader::new(vec![bytes]));
        let mut frame = FrameBuffer::new(2, 2);

        assert_eq!(reader.read_into(&mut frame), ReadOutcome::Frame);
        assert_eq!(reader.read_into(&mut frame), ReadOutcome::End);
    }

    #[test]
    fn read_error_is_end_not_failure() {
        let mut frame = FrameBuffer::new(1, 1);
        assert_eq!(
            read_frame(&mut FailingReader, frame.as_bytes_mut()),
            ReadOutcome::End
        );
    }

    #[test]
    fn from_rgb_checks_length() {
        assert!(FrameBuffer::from_rgb(2, 1, vec![0; 6]).is_some());
        assert!(FrameBuffer::from_rgb(2, 1, vec![0; 5]).is_none());
    }
}

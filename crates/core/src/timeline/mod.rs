use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    frame::{FrameBuffer, ReadOutcome},
    render::FrameRenderer,
    PlayerError, Result,
};

/// Source of the current instant. Playback uses [`SystemClock`]; tests swap
/// in a manual one.
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Anything the scheduler can pull frames from.
pub trait FrameSource {
    /// Fills `frame` with the next frame, or reports that the stream is over.
    fn read_frame(&mut self, frame: &mut FrameBuffer) -> ReadOutcome;

    /// Non-blocking liveness check of whatever produces the stream.
    fn has_exited(&mut self) -> bool;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn read_frame(&mut self, frame: &mut FrameBuffer) -> ReadOutcome {
        (**self).read_frame(frame)
    }

    fn has_exited(&mut self) -> bool {
        (**self).has_exited()
    }
}

/// What the loop does between deadlines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleStrategy {
    /// Busy-poll the clock.
    #[default]
    Spin,
    /// Give the rest of the time slice back to the OS scheduler.
    Yield,
    /// Sleep for at most `max_micros`, never past the next deadline.
    Sleep { max_micros: u64 },
}

impl IdleStrategy {
    pub fn idle(self, remaining: Duration) {
        match self {
            Self::Spin => std::hint::spin_loop(),
            Self::Yield => thread::yield_now(),
            Self::Sleep { max_micros } => {
                let nap = remaining.min(Duration::from_micros(max_micros));
                if !nap.is_zero() {
                    thread::sleep(nap);
                }
            }
        }
    }
}

/// Gates frames on wall-clock time against a fixed interval.
///
/// A poll that crosses the deadline re-arms from *that* instant, so a stall
/// of several intervals yields a single frame rather than a burst.
#[derive(Debug, Clone, Copy)]
pub struct FramePacer {
    interval: Duration,
    last_frame: Instant,
}

impl FramePacer {
    pub fn new(fps: f64, start: Instant) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(PlayerError::invalid_input(format!(
                "frames per second must be positive, got {fps}"
            )));
        }
        let interval = Duration::try_from_secs_f64(1.0 / fps).map_err(|err| {
            PlayerError::invalid_input(format!("frame interval for {fps} fps: {err}"))
        })?;
        Ok(Self {
            interval,
            last_frame: start,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` when a frame is due at `now` and re-arms the timer.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_frame) < self.interval {
            return false;
        }
        self.last_frame = now;
        true
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.interval
            .saturating_sub(now.saturating_duration_since(self.last_frame))
    }
}

/// Why playback stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The frame stream closed or broke.
    StreamEnded,
    /// The decoder process was observed to have exited.
    DecoderExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Reading,
    Rendering,
    Terminated(Termination),
}

/// Totals reported once playback ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub frames_rendered: u64,
    pub elapsed: Duration,
    pub termination: Termination,
}

/// Single-threaded playback loop: pace, read, render, check the decoder.
#[derive(Debug)]
pub struct Player<S, C, W> {
    source: S,
    clock: C,
    sink: W,
    renderer: FrameRenderer,
    frame: FrameBuffer,
    pacer: FramePacer,
    state: PlaybackState,
    idle: IdleStrategy,
    poll_decoder: bool,
    started: Instant,
    frames_rendered: u64,
}

impl<S, C, W> Player<S, C, W>
where
    S: FrameSource,
    C: Clock,
    W: Write,
{
    pub fn new(
        source: S,
        frame: FrameBuffer,
        renderer: FrameRenderer,
        fps: f64,
        clock: C,
        sink: W,
    ) -> Result<Self> {
        let started = clock.now();
        let pacer = FramePacer::new(fps, started)?;
        Ok(Self {
            source,
            clock,
            sink,
            renderer,
            frame,
            pacer,
            state: PlaybackState::Idle,
            idle: IdleStrategy::Spin,
            poll_decoder: true,
            started,
            frames_rendered: 0,
        })
    }

    pub fn with_idle(mut self, idle: IdleStrategy) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_decoder_polling(mut self, enabled: bool) -> Self {
        self.poll_decoder = enabled;
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn interval(&self) -> Duration {
        self.pacer.interval()
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Runs one loop iteration and returns the state it settled in.
    ///
    /// No I/O happens unless the frame interval has elapsed. Once terminated
    /// the player stays terminated.
    pub fn tick(&mut self) -> Result<PlaybackState> {
        if let PlaybackState::Terminated(_) = self.state {
            return Ok(self.state);
        }

        if !self.pacer.poll(self.clock.now()) {
            self.state = PlaybackState::Idle;
            return Ok(self.state);
        }

        self.state = PlaybackState::Reading;
        if self.source.read_frame(&mut self.frame) == ReadOutcome::End {
            return Ok(self.terminate(Termination::StreamEnded));
        }

        self.state = PlaybackState::Rendering;
        self.renderer.render_to(&self.frame, &mut self.sink)?;
        self.frames_rendered += 1;

        // A blocking read may never see EOF on some platforms once the
        // decoder is gone, so its exit is checked independently.
        if self.poll_decoder && self.source.has_exited() {
            return Ok(self.terminate(Termination::DecoderExited));
        }

        self.state = PlaybackState::Idle;
        Ok(self.state)
    }

    /// Ticks until the stream ends or the decoder exits.
    pub fn run(&mut self) -> Result<PlaybackSummary> {
        tracing::debug!(interval = ?self.pacer.interval(), idle = ?self.idle, "playback loop started");
        loop {
            match self.tick()? {
                PlaybackState::Terminated(termination) => {
                    return Ok(PlaybackSummary {
                        frames_rendered: self.frames_rendered,
                        elapsed: self.clock.now().saturating_duration_since(self.started),
                        termination,
                    });
                }
                _ => self.idle.idle(self.pacer.remaining(self.clock.now())),
            }
        }
    }

    fn terminate(&mut self, termination: Termination) -> PlaybackState {
        tracing::debug!(?termination, frames = self.frames_rendered, "playback finished");
        self.state = PlaybackState::Terminated(termination);
        self.state
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io;
    use std::sync::Arc;

    use super::*;
    use crate::render::Palette;

    struct ManualClock {
        now: Cell<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Cell::new(Instant::now()),
            }
        }

        fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.now.get()
        }
    }

    /// Moves forward by `step` every time it is read.
    struct SteppingClock {
        now: Cell<Instant>,
        step: Duration,
    }

    impl Clock for SteppingClock {
        fn now(&self) -> Instant {
            let now = self.now.get() + self.step;
            self.now.set(now);
            now
        }
    }

    #[derive(Default)]
    struct ScriptedSource {
        frames_left: usize,
        exit_after: Option<usize>,
        reads: usize,
        liveness_polls: usize,
    }

    impl ScriptedSource {
        fn with_frames(frames: usize) -> Self {
            Self {
                frames_left: frames,
                ..Default::default()
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self, frame: &mut FrameBuffer) -> ReadOutcome {
            self.reads += 1;
            if self.frames_left == 0 {
                return ReadOutcome::End;
            }
            self.frames_left -= 1;
            frame.as_bytes_mut().fill(self.reads as u8);
            ReadOutcome::Frame
        }

        fn has_exited(&mut self) -> bool {
            self.liveness_polls += 1;
            self.exit_after.is_some_and(|after| self.reads >= after)
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn renderer() -> FrameRenderer {
        FrameRenderer::new(Arc::new(Palette::parse(".o#").unwrap()))
    }

    fn player<'a, S: FrameSource, C: Clock>(
        source: S,
        clock: C,
        sink: &'a mut Vec<u8>,
        fps: f64,
    ) -> Player<S, C, &'a mut Vec<u8>> {
        Player::new(source, FrameBuffer::new(2, 1), renderer(), fps, clock, sink).unwrap()
    }

    #[test]
    fn rejects_non_positive_fps() {
        assert!(FramePacer::new(0.0, Instant::now()).is_err());
        assert!(FramePacer::new(f64::NAN, Instant::now()).is_err());
        assert!(FramePacer::new(-24.0, Instant::now()).is_err());
    }

    #[test]
    fn vanishing_fps_is_an_error_not_a_panic() {
        let err = FramePacer::new(1e-300, Instant::now()).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidInput(_)));

        let mut out = Vec::new();
        let result = Player::new(
            ScriptedSource::with_frames(1),
            FrameBuffer::new(1, 1),
            renderer(),
            1e-300,
            SystemClock,
            &mut out,
        );
        assert!(matches!(result, Err(PlayerError::InvalidInput(_))));
    }

    #[test]
    fn nothing_renders_before_the_interval() {
        let clock = ManualClock::new();
        let mut source = ScriptedSource::with_frames(10);
        let mut out = Vec::new();
        let mut player = player(&mut source, &clock, &mut out, 24.0);

        for _ in 0..41 {
            clock.advance(Duration::from_millis(1));
            assert_eq!(player.tick().unwrap(), PlaybackState::Idle);
        }
        assert_eq!(player.frames_rendered(), 0);
        drop(player);
        assert_eq!(source.reads, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn one_frame_per_interval_crossing() {
        let clock = ManualClock::new();
        let mut source = ScriptedSource::with_frames(100);
        let mut out = Vec::new();
        let mut player = player(&mut source, &clock, &mut out, 24.0);

        clock.advance(Duration::from_millis(42));
        player.tick().unwrap();
        assert_eq!(player.frames_rendered(), 1);
        player.tick().unwrap();
        assert_eq!(player.frames_rendered(), 1);

        // Simulated second at 1ms resolution: the timer re-arms at each
        // 42ms crossing, 23 more frames.
        for _ in 0..1000 {
            clock.advance(Duration::from_millis(1));
            player.tick().unwrap();
        }
        assert_eq!(player.frames_rendered(), 1 + 23);
    }

    #[test]
    fn stall_is_not_caught_up_with_a_burst() {
        let clock = ManualClock::new();
        let mut source = ScriptedSource::with_frames(100);
        let mut out = Vec::new();
        let mut player = player(&mut source, &clock, &mut out, 24.0);

        clock.advance(Duration::from_millis(500));
        for _ in 0..5 {
            player.tick().unwrap();
        }
        assert_eq!(player.frames_rendered(), 1);
        drop(player);
        assert_eq!(source.reads, 1);
    }

    #[test]
    fn stream_end_terminates() {
        let clock = SteppingClock {
            now: Cell::new(Instant::now()),
            step: Duration::from_millis(5),
        };
        let mut out = Vec::new();
        let mut player = player(ScriptedSource::with_frames(3), clock, &mut out, 60.0);

        let summary = player.run().unwrap();
        assert_eq!(summary.termination, Termination::StreamEnded);
        assert_eq!(summary.frames_rendered, 3);
        assert_eq!(player.state(), PlaybackState::Terminated(Termination::StreamEnded));
        assert_eq!(player.tick().unwrap(), PlaybackState::Terminated(Termination::StreamEnded));
        assert!(summary.elapsed >= Duration::from_millis(4 * 15));
    }

    #[test]
    fn decoder_exit_terminates_even_with_data_left() {
        let clock = SteppingClock {
            now: Cell::new(Instant::now()),
            step: Duration::from_millis(50),
        };
        let mut source = ScriptedSource {
            frames_left: 10,
            exit_after: Some(2),
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut player = player(&mut source, clock, &mut out, 24.0);

        let summary = player.run().unwrap();
        assert_eq!(summary.termination, Termination::DecoderExited);
        assert_eq!(summary.frames_rendered, 2);
    }

    #[test]
    fn decoder_polling_can_be_disabled() {
        let clock = SteppingClock {
            now: Cell::new(Instant::now()),
            step: Duration::from_millis(50),
        };
        let mut source = ScriptedSource {
            frames_left: 4,
            exit_after: Some(1),
            ..Default::default()
        };
        let mut out = Vec::new();
        let mut player = player(&mut source, clock, &mut out, 24.0).with_decoder_polling(false);

        let summary = player.run().unwrap();
        assert_eq!(summary.termination, Termination::StreamEnded);
        assert_eq!(summary.frames_rendered, 4);
        drop(player);
        assert_eq!(source.liveness_polls, 0);
    }

    #[test]
    fn each_rendered_frame_is_written() {
        let clock = SteppingClock {
            now: Cell::new(Instant::now()),
            step: Duration::from_millis(50),
        };
        let mut out = Vec::new();
        let mut player = player(ScriptedSource::with_frames(2), clock, &mut out, 24.0);
        player.run().unwrap();
        drop(player);

        let frames = out.windows(3).filter(|w| *w == b"\x1b[H").count();
        assert_eq!(frames, 2);
    }

    #[test]
    fn sink_failure_propagates() {
        let clock = ManualClock::new();
        let mut player = Player::new(
            ScriptedSource::with_frames(1),
            FrameBuffer::new(1, 1),
            renderer(),
            24.0,
            &clock,
            BrokenSink,
        )
        .unwrap();

        clock.advance(Duration::from_millis(50));
        assert!(matches!(player.tick(), Err(PlayerError::Io(_))));
    }

    #[test]
    fn sleep_idle_never_oversleeps_the_deadline() {
        let started = Instant::now();
        IdleStrategy::Sleep { max_micros: 1_000_000 }.idle(Duration::from_millis(1));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let start = Instant::now();
        let pacer = FramePacer::new(10.0, start).unwrap();
        assert_eq!(pacer.remaining(start), Duration::from_millis(100));
        assert_eq!(pacer.remaining(start + Duration::from_millis(40)), Duration::from_millis(60));
        assert_eq!(pacer.remaining(start + Duration::from_secs(1)), Duration::ZERO);
    }
}

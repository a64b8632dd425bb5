//! Frame sources and decoding sessions.
//!
//! A [`FrameSource`] opens one [`DecodingSession`] per analysis. Sessions are
//! strictly sequential and owned by a single blocking worker; they are always
//! wrapped in a [`SessionGuard`] so the decoder is released on every exit
//! path, including panics and cancellation.
//!
//! Admission checks run in a fixed order inside [`open_session`]:
//! 1. byte size against the cap (no decoder is opened on failure)
//! 2. open + probe
//! 3. declared duration against the cap (the session is released on failure)

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout};
use std::thread::JoinHandle;

use dfd_models::AnalysisConfig;
use tracing::{debug, warn};

use crate::command::RawVideoCommand;
use crate::error::{MediaError, MediaResult};
use crate::frame::RawFrame;
use crate::probe::probe_video;

/// Longest stderr excerpt kept for error reporting.
const STDERR_LIMIT: usize = 16 * 1024;

/// Per-request decoding limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceLimits {
    pub max_file_size_bytes: u64,
    pub max_duration_seconds: f64,
    /// Keep 1 of every N decoded frames (N >= 1)
    pub frame_skip_stride: u32,
    /// Hard cap on frames pulled from the decoder, kept or not
    pub max_frames_examined: usize,
}

impl From<&AnalysisConfig> for SourceLimits {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_file_size_bytes: config.max_file_size_bytes,
            max_duration_seconds: config.max_duration_seconds,
            frame_skip_stride: config.frame_skip_stride.max(1),
            max_frames_examined: config.max_frames_examined,
        }
    }
}

/// Stream properties known once a session is open.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Declared duration in seconds (0 when unknown)
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// A stateful, sequential frame reader over one media file.
pub trait DecodingSession: Send {
    fn info(&self) -> &StreamInfo;

    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> MediaResult<Option<RawFrame>>;

    /// Release the decoder. Must be idempotent.
    fn close(&mut self);
}

/// Opens decoding sessions.
pub trait FrameSource: Send + Sync {
    fn open(&self, path: &Path) -> MediaResult<Box<dyn DecodingSession>>;

    fn name(&self) -> &'static str;
}

/// Check the byte size of `path` against `limit` without opening a decoder.
pub fn check_file_size(path: &Path, limit: u64) -> MediaResult<u64> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MediaError::FileNotFound(path.to_path_buf()),
        _ => MediaError::Io(e),
    })?;

    if !metadata.is_file() {
        return Err(MediaError::unreadable(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    let size = metadata.len();
    if size > limit {
        return Err(MediaError::FileTooLarge { size, limit });
    }
    Ok(size)
}

/// Open a session on `path`, enforcing the size and duration caps.
pub fn open_session(
    source: &dyn FrameSource,
    path: &Path,
    limits: &SourceLimits,
) -> MediaResult<SessionGuard> {
    check_file_size(path, limits.max_file_size_bytes)?;

    let guard = SessionGuard::new(source.open(path)?);

    // Whole seconds count: a 60.4 s clip passes a 60 s cap
    let duration = guard.info().duration_seconds;
    if duration.trunc() > limits.max_duration_seconds {
        // guard drops here and closes the session
        return Err(MediaError::DurationExceeded {
            duration,
            limit: limits.max_duration_seconds,
        });
    }

    debug!(
        source = source.name(),
        duration,
        width = guard.info().width,
        height = guard.info().height,
        "Decoding session opened"
    );
    Ok(guard)
}

/// Owns a session and closes it exactly once.
pub struct SessionGuard {
    session: Box<dyn DecodingSession>,
    closed: bool,
}

impl SessionGuard {
    pub fn new(session: Box<dyn DecodingSession>) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    pub fn info(&self) -> &StreamInfo {
        self.session.info()
    }

    /// Pull the next frame. A closed session reports end of stream.
    pub fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.closed {
            return Ok(None);
        }
        self.session.next_frame()
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Applies the frame-skip stride and the pulled-frame cap to a session.
pub struct FrameSampler<'a> {
    session: &'a mut SessionGuard,
    stride: u64,
    cap: usize,
    pulled: usize,
}

impl<'a> FrameSampler<'a> {
    pub fn new(session: &'a mut SessionGuard, limits: &SourceLimits) -> Self {
        Self {
            session,
            stride: u64::from(limits.frame_skip_stride.max(1)),
            cap: limits.max_frames_examined,
            pulled: 0,
        }
    }

    /// Next frame that survives the stride, or `None` once the stream or the
    /// cap is exhausted.
    pub fn next_kept(&mut self) -> MediaResult<Option<RawFrame>> {
        while self.pulled < self.cap {
            let Some(frame) = self.session.next_frame()? else {
                return Ok(None);
            };
            let position = self.pulled as u64;
            self.pulled += 1;
            if position % self.stride == 0 {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// Frames pulled from the decoder so far.
    pub fn pulled(&self) -> usize {
        self.pulled
    }
}

/// Frame source backed by the `ffprobe` / `ffmpeg` CLIs.
#[derive(Debug, Default, Clone)]
pub struct FfmpegFrameSource;

impl FfmpegFrameSource {
    pub fn new() -> Self {
        Self
    }

    /// Whether both binaries are on PATH.
    pub fn is_available() -> bool {
        which::which("ffmpeg").is_ok() && which::which("ffprobe").is_ok()
    }
}

impl FrameSource for FfmpegFrameSource {
    fn open(&self, path: &Path) -> MediaResult<Box<dyn DecodingSession>> {
        let info = probe_video(path).map_err(|e| match e {
            MediaError::FfprobeFailed { stderr, .. } => MediaError::unreadable(format!(
                "ffprobe rejected {}: {}",
                path.display(),
                stderr.unwrap_or_default().trim()
            )),
            MediaError::JsonParse(e) => {
                MediaError::unreadable(format!("ffprobe output unreadable: {}", e))
            }
            other => other,
        })?;

        if info.width == 0 || info.height == 0 {
            return Err(MediaError::unreadable(format!(
                "{} has no decodable video dimensions",
                path.display()
            )));
        }

        Ok(Box::new(FfmpegSession {
            path: path.to_path_buf(),
            info: StreamInfo {
                duration_seconds: info.duration,
                width: info.width,
                height: info.height,
                fps: info.fps,
            },
            decoder: None,
            frames_read: 0,
            finished: false,
        }))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// Session over a piped `ffmpeg -f rawvideo` process.
///
/// The process is spawned lazily on the first pull, so a session rejected on
/// duration never starts a decoder.
struct FfmpegSession {
    path: PathBuf,
    info: StreamInfo,
    decoder: Option<DecoderProcess>,
    frames_read: u64,
    finished: bool,
}

struct DecoderProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

impl DecoderProcess {
    fn spawn(path: &Path) -> MediaResult<Self> {
        let mut child = RawVideoCommand::new(path).spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stdout not captured"))?;

        // Drain stderr so ffmpeg never blocks on a full pipe
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                while let Ok(n) = pipe.read(&mut chunk) {
                    if n == 0 {
                        break;
                    }
                    if buf.len() < STDERR_LIMIT {
                        let take = n.min(STDERR_LIMIT - buf.len());
                        buf.extend_from_slice(&chunk[..take]);
                    }
                }
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        Ok(Self {
            child,
            stdout: BufReader::with_capacity(1 << 20, stdout),
            stderr,
        })
    }

    /// Stop the process and collect whatever it wrote to stderr.
    fn shutdown(mut self, kill: bool) -> (Option<std::process::ExitStatus>, String) {
        if kill {
            let _ = self.child.kill();
        }
        let status = self.child.wait().ok();
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        (status, stderr)
    }
}

impl DecodingSession for FfmpegSession {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.finished {
            return Ok(None);
        }

        if self.decoder.is_none() {
            self.decoder = Some(DecoderProcess::spawn(&self.path)?);
        }

        let frame_len = RawFrame::byte_len(self.info.width, self.info.height)?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(frame_len).map_err(|_| {
            MediaError::resource_exhausted(format!("Cannot allocate {} byte frame", frame_len))
        })?;
        buf.resize(frame_len, 0);

        let read = match self.decoder.as_mut() {
            Some(decoder) => read_full(&mut decoder.stdout, &mut buf)?,
            None => 0,
        };

        if read == frame_len {
            let index = self.frames_read;
            self.frames_read += 1;
            return RawFrame::new(index, self.info.width, self.info.height, buf).map(Some);
        }

        // End of stream (or a truncated trailing frame)
        self.finished = true;
        let Some(decoder) = self.decoder.take() else {
            return Ok(None);
        };
        let (status, stderr) = decoder.shutdown(false);
        let failed = status.map(|s| !s.success()).unwrap_or(true);

        if failed && self.frames_read == 0 {
            return Err(MediaError::unreadable(format!(
                "ffmpeg could not decode {}: {}",
                self.path.display(),
                stderr.trim()
            )));
        }
        if failed || read > 0 {
            warn!(
                path = %self.path.display(),
                frames = self.frames_read,
                "Decoding stopped early: {}",
                stderr.trim()
            );
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.finished = true;
        if let Some(decoder) = self.decoder.take() {
            let _ = decoder.shutdown(true);
            debug!(path = %self.path.display(), frames = self.frames_read, "Decoder released");
        }
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fill `buf` from `reader`, returning fewer bytes only at end of stream.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSession {
        info: StreamInfo,
        remaining: u64,
        next_index: u64,
        closes: Arc<AtomicUsize>,
    }

    impl DecodingSession for CountingSession {
        fn info(&self) -> &StreamInfo {
            &self.info
        }

        fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            let index = self.next_index;
            self.next_index += 1;
            RawFrame::new(index, 2, 2, vec![0; 12]).map(Some)
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingSource {
        frames: u64,
        duration: f64,
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
    }

    impl CountingSource {
        fn new(frames: u64, duration: f64) -> Self {
            Self {
                frames,
                duration,
                opens: AtomicUsize::new(0),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FrameSource for CountingSource {
        fn open(&self, _path: &Path) -> MediaResult<Box<dyn DecodingSession>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSession {
                info: StreamInfo {
                    duration_seconds: self.duration,
                    width: 2,
                    height: 2,
                    fps: 30.0,
                },
                remaining: self.frames,
                next_index: 0,
                closes: self.closes.clone(),
            }))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn limits(stride: u32, cap: usize) -> SourceLimits {
        SourceLimits {
            max_file_size_bytes: 1024,
            max_duration_seconds: 60.0,
            frame_skip_stride: stride,
            max_frames_examined: cap,
        }
    }

    fn sized_file(len: u64) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; len as usize]).unwrap();
        file
    }

    #[test]
    fn test_oversized_file_never_opens_a_session() {
        let file = sized_file(2048);
        let source = CountingSource::new(10, 1.0);

        let err = open_session(&source, file.path(), &limits(1, 100)).err().unwrap();
        assert!(matches!(
            err,
            MediaError::FileTooLarge {
                size: 2048,
                limit: 1024
            }
        ));
        assert_eq!(source.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_file() {
        let source = CountingSource::new(10, 1.0);
        let err = open_session(&source, Path::new("/no/such/video.mp4"), &limits(1, 100))
            .err()
            .unwrap();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_overlong_video_is_closed_before_any_pull() {
        let file = sized_file(16);
        let source = CountingSource::new(10, 61.0);

        let err = open_session(&source, file.path(), &limits(1, 100)).err().unwrap();
        assert!(matches!(err, MediaError::DurationExceeded { .. }));
        assert_eq!(source.opens.load(Ordering::SeqCst), 1);
        assert_eq!(source.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duration_cap_counts_whole_seconds() {
        let file = sized_file(16);

        let source = CountingSource::new(1, 60.4);
        let guard = open_session(&source, file.path(), &limits(1, 100));
        assert!(guard.is_ok());

        let source = CountingSource::new(1, 61.0);
        let err = open_session(&source, file.path(), &limits(1, 100)).err().unwrap();
        assert!(matches!(err, MediaError::DurationExceeded { .. }));
    }

    /// A `.mp4` file holding bytes no demuxer accepts.
    fn garbage_video() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.mp4");
        std::fs::write(&path, b"not a video stream\n".repeat(256)).unwrap();
        (dir, path)
    }

    #[test]
    fn test_ffmpeg_source_rejects_corrupt_file() {
        if !FfmpegFrameSource::is_available() {
            eprintln!("ffmpeg/ffprobe not on PATH, skipping");
            return;
        }
        let (_dir, path) = garbage_video();
        let source = FfmpegFrameSource::new();

        let err = match source.open(&path) {
            Err(e) => e,
            Ok(mut session) => session.next_frame().err().unwrap(),
        };
        assert!(matches!(err, MediaError::UnreadableMedia(_)), "got {err:?}");
    }

    #[test]
    fn test_decoder_failure_before_first_frame_is_unreadable() {
        if !FfmpegFrameSource::is_available() {
            eprintln!("ffmpeg/ffprobe not on PATH, skipping");
            return;
        }
        let (_dir, path) = garbage_video();
        // Built directly so the decoder itself meets the bad input
        let mut session = FfmpegSession {
            path,
            info: StreamInfo {
                duration_seconds: 1.0,
                width: 4,
                height: 4,
                fps: 25.0,
            },
            decoder: None,
            frames_read: 0,
            finished: false,
        };

        let err = session.next_frame().err().unwrap();
        assert!(matches!(err, MediaError::UnreadableMedia(_)), "got {err:?}");
        assert!(session.next_frame().unwrap().is_none());
        session.close();
    }

    #[test]
    fn test_guard_closes_exactly_once() {
        let file = sized_file(16);
        let source = CountingSource::new(3, 1.0);

        let mut guard = open_session(&source, file.path(), &limits(1, 100)).unwrap();
        guard.close();
        guard.close();
        assert!(guard.next_frame().unwrap().is_none());
        drop(guard);
        assert_eq!(source.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sampler_applies_stride() {
        let file = sized_file(16);
        let source = CountingSource::new(10, 1.0);
        let mut guard = open_session(&source, file.path(), &limits(3, 100)).unwrap();

        let mut sampler = FrameSampler::new(&mut guard, &limits(3, 100));
        let mut kept = Vec::new();
        while let Some(frame) = sampler.next_kept().unwrap() {
            kept.push(frame.index);
        }
        assert_eq!(kept, vec![0, 3, 6, 9]);
        assert_eq!(sampler.pulled(), 10);
    }

    #[test]
    fn test_sampler_caps_pulled_frames() {
        let file = sized_file(16);
        let source = CountingSource::new(100, 1.0);
        let mut guard = open_session(&source, file.path(), &limits(2, 5)).unwrap();

        let mut sampler = FrameSampler::new(&mut guard, &limits(2, 5));
        let mut kept = Vec::new();
        while let Some(frame) = sampler.next_kept().unwrap() {
            kept.push(frame.index);
        }
        assert_eq!(kept, vec![0, 2, 4]);
        assert_eq!(sampler.pulled(), 5);
    }

    #[test]
    fn test_read_full_handles_short_reads() {
        let data = vec![7u8; 10];
        let mut reader = std::io::Cursor::new(data);
        let mut buf = [0u8; 4];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }
}

use std::fmt;
use std::sync::Arc;

use tracing::{info, info_span, Span};

use crate::address::StreamAddress;
use crate::config::{DecoderBackend, StreamConfig};
use crate::error::SessionError;
use crate::video::decoder::UdpImageOpener;
use crate::video::ffmpeg::FfmpegOpener;
use crate::video::frame::DecodedFrame;
use crate::video::source::SourceOpener;
use crate::video::worker::{StopHandle, StreamStats, StreamStatus, WorkerHandle};

/// Lifecycle state of a [`StreamSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Running => write!(f, "running"),
        }
    }
}

/// Owns at most one decoder worker and starts/stops it on request.
///
/// `start` and `stop` are idempotent and meant to be called from a single
/// control thread. Reads never block: before the first frame, after a
/// failure, and while idle they all return `None`. Use [`status`] to tell
/// those apart.
///
/// [`status`]: StreamSession::status
pub struct StreamSession {
    config: StreamConfig,
    opener: Arc<dyn SourceOpener>,
    span: Span,
    worker: Option<WorkerHandle>,
}

impl StreamSession {
    /// A session on `config.address` using the decoder `config.decoder` picks,
    /// logging under its own `stream_session` span.
    pub fn new(config: StreamConfig) -> Self {
        let span = info_span!("stream_session", address = %config.address);
        Self::in_span(config, span)
    }

    /// Like [`new`](Self::new), but session and worker logs are recorded
    /// under `span`.
    pub fn in_span(config: StreamConfig, span: Span) -> Self {
        let opener: Arc<dyn SourceOpener> = match &config.decoder {
            DecoderBackend::Datagram => Arc::new(UdpImageOpener),
            DecoderBackend::Ffmpeg(options) => Arc::new(FfmpegOpener::new(options.clone())),
        };
        Self::with_opener(config, opener, span)
    }

    /// A session whose worker reads from sources created by `opener`.
    pub fn with_opener(config: StreamConfig, opener: Arc<dyn SourceOpener>, span: Span) -> Self {
        info!(parent: &span, decoder = ?config.decoder, "stream session created");
        Self {
            config,
            opener,
            span,
            worker: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn address(&self) -> &StreamAddress {
        &self.config.address
    }

    pub fn state(&self) -> SessionState {
        if self.worker.is_some() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Open the source and launch the decoder thread.
    ///
    /// Returns once the thread is running, not once frames arrive; decode
    /// failures show up later through [`status`](Self::status). Does nothing
    /// if the session is already running.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let _enter = self.span.enter();

        if self.worker.is_some() {
            info!("video stream is already running");
            return Ok(());
        }

        let source = self.opener.open(&self.config.address, &self.config)?;
        let worker = WorkerHandle::spawn(source, self.config.clone(), self.span.clone())
            .map_err(SessionError::Spawn)?;
        self.worker = Some(worker);

        info!("video stream started");
        Ok(())
    }

    /// Ask the worker to stop and drop its frame slot.
    ///
    /// Returns immediately; the worker releases its source once it observes
    /// the request. Wait on the returned handle for confirmed teardown.
    /// Returns `None` if the session was idle.
    pub fn stop(&mut self) -> Option<StopHandle> {
        let _enter = self.span.enter();

        let Some(worker) = self.worker.take() else {
            info!("video stream is not running");
            return None;
        };

        let stats = worker.stats();
        let handle = worker.request_stop();
        info!(
            frames_decoded = stats.frames_decoded,
            frames_overwritten = stats.frames_overwritten,
            units_skipped = stats.units_skipped,
            "video stream stopped"
        );
        Some(handle)
    }

    /// [`stop`](Self::stop), then wait up to `shutdown_timeout` for the worker
    /// to exit. Returns `false` only if the worker had to be detached.
    pub fn stop_and_wait(&mut self) -> bool {
        let timeout = self.config.shutdown_timeout;
        match self.stop() {
            Some(handle) => {
                let _enter = self.span.enter();
                handle.wait(timeout)
            }
            None => true,
        }
    }

    /// The newest decoded frame, or `None` if there isn't one yet or the
    /// session is idle. Never blocks on the decoder.
    pub fn read_latest_frame(&self) -> Option<Arc<DecodedFrame>> {
        self.worker.as_ref().and_then(WorkerHandle::read)
    }

    /// Health of the current worker, or `None` while idle.
    pub fn status(&self) -> Option<StreamStatus> {
        self.worker.as_ref().map(WorkerHandle::status)
    }

    pub fn stats(&self) -> Option<StreamStats> {
        self.worker.as_ref().map(WorkerHandle::stats)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop_and_wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use image::{Rgb, RgbImage};
    use tracing_test::traced_test;

    use super::*;
    use crate::error::{StreamAddressError, StreamDecodeError};
    use crate::video::source::{FrameSource, SourceError, SourceEvent};

    /// Counts opens and closes across every source it hands out.
    #[derive(Default)]
    struct CountingOpener {
        opens: AtomicUsize,
        closes: Arc<AtomicUsize>,
        /// Frames each source yields before going silent.
        frames: usize,
        fail_bind: bool,
    }

    struct CountingSource {
        remaining: usize,
        produced: u8,
        closes: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn next_frame(&mut self, wait: Duration) -> Result<SourceEvent, SourceError> {
            if self.remaining == 0 {
                thread::sleep(wait);
                return Ok(SourceEvent::Pending);
            }
            self.remaining -= 1;
            self.produced += 1;
            Ok(SourceEvent::Frame {
                image: RgbImage::from_pixel(2, 2, Rgb([self.produced, 0, 0])),
                encoded_len: 8,
            })
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SourceOpener for CountingOpener {
        fn open(
            &self,
            address: &StreamAddress,
            _config: &StreamConfig,
        ) -> Result<Box<dyn FrameSource>, SessionError> {
            if self.fail_bind {
                return Err(StreamAddressError::Bind {
                    address: address.socket_addr(),
                    source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
                }
                .into());
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSource {
                remaining: self.frames,
                produced: 0,
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    fn config() -> StreamConfig {
        StreamConfig {
            address: StreamAddress::any(7777),
            first_frame_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(1),
            ..StreamConfig::default()
        }
    }

    fn session(opener: &Arc<CountingOpener>) -> StreamSession {
        StreamSession::with_opener(
            config(),
            Arc::clone(opener) as Arc<dyn SourceOpener>,
            Span::current(),
        )
    }

    fn wait_for_frame(session: &StreamSession) -> Arc<DecodedFrame> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(frame) = session.read_latest_frame() {
                return frame;
            }
            assert!(Instant::now() < deadline, "no frame within 2s");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    #[traced_test]
    fn address_is_configured_address() {
        let opener = Arc::new(CountingOpener::default());
        let session = session(&opener);
        assert_eq!(session.address().to_string(), "udp://@0.0.0.0:7777");
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(opener.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[traced_test]
    fn creation_is_logged_under_injected_span() {
        let opener = Arc::new(CountingOpener::default());
        let span = info_span!("injected_watch");
        let _session =
            StreamSession::with_opener(config(), opener as Arc<dyn SourceOpener>, span);

        logs_assert(|lines: &[&str]| {
            let under_span = lines
                .iter()
                .any(|line| line.contains("injected_watch") && line.contains("stream session created"));
            if under_span {
                Ok(())
            } else {
                Err("creation event not recorded under the injected span".to_string())
            }
        });
    }

    #[test]
    #[traced_test]
    fn ffmpeg_backend_launch_failure_keeps_session_idle() {
        let config = StreamConfig {
            address: StreamAddress::udp(std::net::Ipv4Addr::LOCALHOST.into(), 0),
            decoder: DecoderBackend::Ffmpeg(crate::config::FfmpegOptions {
                program: "/nonexistent/dronecast-ffmpeg".into(),
                ..Default::default()
            }),
            ..config()
        };
        let mut session = StreamSession::in_span(config, Span::current());

        let err = session.start().unwrap_err();
        assert!(matches!(err, SessionError::Decoder { .. }));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.status().is_none());
    }

    #[test]
    #[traced_test]
    fn idle_session_reads_nothing() {
        let opener = Arc::new(CountingOpener::default());
        let session = session(&opener);
        assert!(session.read_latest_frame().is_none());
        assert!(session.status().is_none());
        assert!(session.stats().is_none());
    }

    #[test]
    #[traced_test]
    fn start_twice_opens_one_source() {
        let opener = Arc::new(CountingOpener {
            frames: 1,
            ..Default::default()
        });
        let mut session = session(&opener);

        session.start().unwrap();
        session.start().unwrap();

        assert!(session.is_running());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert!(logs_contain("video stream is already running"));
        assert_eq!(wait_for_frame(&session).sequence, 0);
    }

    #[test]
    #[traced_test]
    fn stop_releases_source_and_empties_reads() {
        let opener = Arc::new(CountingOpener {
            frames: 3,
            ..Default::default()
        });
        let mut session = session(&opener);
        session.start().unwrap();
        wait_for_frame(&session);

        let handle = session.stop().expect("session was running");
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.read_latest_frame().is_none());

        assert!(handle.wait(Duration::from_secs(1)));
        assert_eq!(opener.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn stop_when_idle_is_noop() {
        let opener = Arc::new(CountingOpener::default());
        let mut session = session(&opener);

        assert!(session.stop().is_none());
        assert!(session.stop_and_wait());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(logs_contain("video stream is not running"));
    }

    #[test]
    #[traced_test]
    fn restart_uses_fresh_slot() {
        let opener = Arc::new(CountingOpener {
            frames: 2,
            ..Default::default()
        });
        let mut session = session(&opener);

        session.start().unwrap();
        wait_for_frame(&session);
        assert!(session.stop_and_wait());

        session.start().unwrap();
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
        // The new worker numbers frames from zero again.
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.stats().unwrap().frames_decoded < 2 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(session.read_latest_frame().unwrap().sequence, 1);
        assert!(session.stop_and_wait());
        assert_eq!(opener.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[traced_test]
    fn bind_failure_keeps_session_idle() {
        let opener = Arc::new(CountingOpener {
            fail_bind: true,
            ..Default::default()
        });
        let mut session = session(&opener);

        let err = session.start().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Address(StreamAddressError::Bind { .. })
        ));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    #[traced_test]
    fn silent_source_reports_failure_through_status() {
        let opener = Arc::new(CountingOpener::default());
        let mut session = session(&opener);
        session.start().unwrap();
        assert_eq!(session.status(), Some(StreamStatus::Connecting));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !session.status().unwrap().is_failed() {
            assert!(Instant::now() < deadline, "worker never gave up");
            thread::sleep(Duration::from_millis(10));
        }

        // Still running from the caller's point of view until stopped.
        assert!(session.is_running());
        assert!(session.read_latest_frame().is_none());
        assert_eq!(
            session.status().unwrap().error(),
            Some(&StreamDecodeError::NotEnoughFrames)
        );
        assert!(session.stop_and_wait());
        assert_eq!(opener.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn drop_joins_worker() {
        let opener = Arc::new(CountingOpener {
            frames: 1,
            ..Default::default()
        });
        {
            let mut session = session(&opener);
            session.start().unwrap();
            wait_for_frame(&session);
        }
        assert_eq!(opener.closes.load(Ordering::SeqCst), 1);
    }
}

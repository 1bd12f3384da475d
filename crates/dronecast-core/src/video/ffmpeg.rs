use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::net::UdpSocket;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use tracing::{debug, error, info, warn, Span};

use super::source::{FrameSource, SourceError, SourceEvent, SourceOpener};
use crate::address::StreamAddress;
use crate::config::{FfmpegOptions, StreamConfig};
use crate::error::{SessionError, StreamAddressError};

type RawFrame = io::Result<RgbImage>;

/// Build the ffmpeg arguments that demux and decode `address` into a stream
/// of fixed-size RGB24 frames on stdout.
pub fn ffmpeg_args(address: &StreamAddress, width: u32, height: u32) -> Vec<OsString> {
    let input = format!(
        "udp://{}?overrun_nonfatal=1&fifo_size=50000",
        address.socket_addr()
    );
    let scale = format!("scale={width}:{height}");

    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-fflags",
        "nobuffer+discardcorrupt",
        "-flags",
        "low_delay",
        "-i",
        &input,
        "-an",
        "-vf",
        &scale,
        "-pix_fmt",
        "rgb24",
        "-f",
        "rawvideo",
        "pipe:1",
    ]
    .into_iter()
    .map(OsString::from)
    .collect()
}

/// Decodes a real video stream (H.264 from a drone, MPEG-TS, ...) by piping
/// raw RGB24 frames out of an ffmpeg child process.
///
/// A reader thread pulls whole frames off ffmpeg's stdout so that
/// `next_frame` can wait with a timeout. `encoded_len` on the frames it
/// yields is the raw frame size, since ffmpeg does not report the size of
/// the compressed unit.
pub struct FfmpegSource {
    child: Option<Child>,
    frames: Option<Receiver<RawFrame>>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<()>>,
    frame_bytes: usize,
    frames_read: u64,
}

impl FfmpegSource {
    /// Launch `ffmpeg` receiving on `address`.
    pub fn spawn(address: &StreamAddress, options: &FfmpegOptions) -> Result<Self, SessionError> {
        let mut cmd = Command::new(&options.program);
        cmd.args(ffmpeg_args(address, options.frame_width, options.frame_height));

        info!(%address, program = ?options.program, "spawning ffmpeg decoder process");
        Self::from_command(cmd, options.frame_width, options.frame_height)
    }

    /// Run `cmd` and treat its stdout as back-to-back `width` x `height`
    /// RGB24 frames.
    pub fn from_command(mut cmd: Command, width: u32, height: u32) -> Result<Self, SessionError> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SessionError::Decoder {
                program: program.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SessionError::Decoder {
                program,
                source: io::Error::other("child pipes not captured"),
            });
        };

        let frame_bytes = width as usize * height as usize * 3;
        let (tx, frames) = crossbeam_channel::bounded(1);

        let reader = spawn_named("dronecast-ffmpeg-out", {
            let span = Span::current();
            move || {
                let _enter = span.enter();
                pump_frames(stdout, width, height, &tx);
            }
        });
        let stderr = spawn_named("dronecast-ffmpeg-err", {
            let span = Span::current();
            move || {
                let _enter = span.enter();
                forward_stderr(stderr);
            }
        });

        let (reader, stderr) = match (reader, stderr) {
            (Ok(reader), Ok(stderr)) => (reader, stderr),
            (Err(source), _) | (_, Err(source)) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SessionError::Spawn(source));
            }
        };

        info!(pid = child.id(), width, height, frame_bytes, "ffmpeg decoder opened");

        Ok(Self {
            child: Some(child),
            frames: Some(frames),
            reader: Some(reader),
            stderr: Some(stderr),
            frame_bytes,
            frames_read: 0,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self, wait: Duration) -> Result<SourceEvent, SourceError> {
        let Some(frames) = self.frames.as_ref() else {
            return Ok(SourceEvent::Ended);
        };

        match frames.recv_timeout(wait) {
            Ok(Ok(image)) => {
                self.frames_read += 1;
                debug!(frame = self.frames_read, "read raw frame from ffmpeg");
                Ok(SourceEvent::Frame {
                    image,
                    encoded_len: self.frame_bytes,
                })
            }
            Ok(Err(e)) => Err(e.into()),
            Err(RecvTimeoutError::Timeout) => Ok(SourceEvent::Pending),
            Err(RecvTimeoutError::Disconnected) => Ok(SourceEvent::Ended),
        }
    }

    fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!(frames_read = self.frames_read, "closing ffmpeg decoder");

        // Unblocks a reader parked on a full channel.
        self.frames = None;
        if let Err(e) = child.kill() {
            debug!(%e, "ffmpeg already exited");
        }
        match child.wait() {
            Ok(status) => debug!(%status, "ffmpeg reaped"),
            Err(e) => warn!(%e, "failed to reap ffmpeg"),
        }

        for handle in [self.reader.take(), self.stderr.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("ffmpeg pipe thread panicked");
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!("ffmpeg source dropped without close");
            self.close();
        }
    }
}

fn spawn_named<F>(name: &str, f: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(f)
}

fn pump_frames(mut stdout: ChildStdout, width: u32, height: u32, tx: &Sender<RawFrame>) {
    let frame_bytes = width as usize * height as usize * 3;
    loop {
        let frame = match read_frame(&mut stdout, frame_bytes) {
            Ok(Some(buf)) => RgbImage::from_raw(width, height, buf)
                .ok_or_else(|| io::Error::other("raw frame does not match frame size")),
            Ok(None) => {
                info!("ffmpeg output ended");
                return;
            }
            Err(e) => {
                error!(%e, "failed to read from ffmpeg pipe");
                Err(e)
            }
        };
        let failed = frame.is_err();
        if tx.send(frame).is_err() || failed {
            return;
        }
    }
}

/// Read exactly one frame. `Ok(None)` on a clean end between frames.
fn read_frame(pipe: &mut impl Read, frame_bytes: usize) -> io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; frame_bytes];
    let mut read = 0;

    while read < frame_bytes {
        match pipe.read(&mut buf[read..]) {
            Ok(0) if read == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("ffmpeg stream ended mid-frame (read {read}/{frame_bytes} bytes)"),
                ));
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Some(buf))
}

fn forward_stderr(stderr: ChildStderr) {
    for line in BufReader::new(stderr).lines() {
        match line {
            Ok(line) if !line.trim().is_empty() => warn!(%line, "ffmpeg"),
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

/// Opens an [`FfmpegSource`] per session start.
///
/// The port is bound once on the caller's thread first so that a taken port
/// fails `start()` instead of surfacing later as a worker failure.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOpener {
    options: FfmpegOptions,
}

impl FfmpegOpener {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }
}

impl SourceOpener for FfmpegOpener {
    fn open(
        &self,
        address: &StreamAddress,
        _config: &StreamConfig,
    ) -> Result<Box<dyn FrameSource>, SessionError> {
        let bind_addr = address.socket_addr();
        drop(
            UdpSocket::bind(bind_addr).map_err(|source| StreamAddressError::Bind {
                address: bind_addr,
                source,
            })?,
        );

        let source = FfmpegSource::spawn(address, &self.options)?;
        Ok(Box::new(source))
    }
}

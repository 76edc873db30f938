//! Frame capture from camera streams
//!
//! The decode/transport layer lives behind [`FrameSource`]. The default
//! implementation drives an `ffmpeg` child process that decodes the camera
//! URI and writes raw `rgb24` frames to its stdout.

use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use chrono::{DateTime, Local};
use image::RgbImage;
use parking_lot::Mutex;

use crate::config::CameraConfig;
use crate::error::SourceError;

/// A decoded frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data, sized to the camera geometry
    pub image: RgbImage,
    /// Wall-clock capture time
    pub captured_at: DateTime<Local>,
    /// Monotonic per-source sequence number
    pub sequence: u64,
}

impl Frame {
    /// Create a new frame
    pub fn new(image: RgbImage, captured_at: DateTime<Local>, sequence: u64) -> Self {
        Self {
            image,
            captured_at,
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Outcome of a single read
#[derive(Debug)]
pub enum SourceRead {
    /// A frame is available
    Frame(Frame),
    /// Nothing yet, the stream is still alive
    Pending,
    /// The stream ended; the caller should reopen after a delay
    EndOfStream,
}

/// Cloneable handle that closes a source from another thread.
///
/// Used to unblock a read that is stuck on a stalled stream.
#[derive(Clone)]
pub struct SourceCloser(Arc<dyn Fn() + Send + Sync>);

impl SourceCloser {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn close(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for SourceCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SourceCloser")
    }
}

/// A live sequence of frames from one camera
pub trait FrameSource: Send {
    /// Read the next frame; blocks until one is available or the stream ends
    fn read(&mut self) -> Result<SourceRead, SourceError>;

    /// Release the stream. Must be idempotent.
    fn close(&mut self);

    /// Handle for closing the source from outside the reading thread
    fn closer(&self) -> Option<SourceCloser> {
        None
    }
}

/// Opens frame sources for cameras
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Opens [`FfmpegSource`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSourceFactory;

impl FrameSourceFactory for FfmpegSourceFactory {
    fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        let source = FfmpegSource::open(
            &camera.ffmpeg_path,
            &camera.uri,
            camera.width,
            camera.height,
        )?;
        Ok(Box::new(source))
    }
}

/// Frame source backed by an `ffmpeg` decoder process
pub struct FfmpegSource {
    uri: String,
    width: u32,
    height: u32,
    child: Arc<Mutex<Option<Child>>>,
    stdout: Option<ChildStdout>,
    buffer: Vec<u8>,
    sequence: u64,
}

impl FfmpegSource {
    /// Spawn the decoder for `uri`, scaling to `width`x`height`
    pub fn open(ffmpeg: &str, uri: &str, width: u32, height: u32) -> Result<Self, SourceError> {
        let mut cmd = Command::new(ffmpeg);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            cmd.arg("-rtsp_transport").arg("tcp");
        }

        cmd.arg("-i")
            .arg(uri)
            .arg("-an")
            .arg("-vf")
            .arg(format!("scale={}:{}", width, height))
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|source| SourceError::Open {
            uri: uri.to_string(),
            source,
        })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceError::Open {
                    uri: uri.to_string(),
                    source: std::io::Error::new(ErrorKind::Other, "ffmpeg stdout unavailable"),
                });
            }
        };

        log::debug!("Spawned ffmpeg decoder for {} ({}x{})", uri, width, height);

        Ok(Self {
            uri: uri.to_string(),
            width,
            height,
            child: Arc::new(Mutex::new(Some(child))),
            stdout: Some(stdout),
            buffer: vec![0u8; width as usize * height as usize * 3],
            sequence: 0,
        })
    }
}

fn kill_child(slot: &Mutex<Option<Child>>) {
    if let Some(mut child) = slot.lock().take() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<SourceRead, SourceError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(SourceRead::EndOfStream);
        };

        match stdout.read_exact(&mut self.buffer) {
            Ok(()) => {
                let image = RgbImage::from_raw(self.width, self.height, self.buffer.clone())
                    .ok_or_else(|| SourceError::Decode("frame buffer size mismatch".to_string()))?;
                self.sequence += 1;
                Ok(SourceRead::Frame(Frame::new(image, Local::now(), self.sequence)))
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                log::debug!("ffmpeg stream for {} reached EOF", self.uri);
                self.stdout = None;
                Ok(SourceRead::EndOfStream)
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(SourceRead::Pending),
            Err(err) => Err(SourceError::Io(err)),
        }
    }

    fn close(&mut self) {
        self.stdout = None;
        kill_child(&self.child);
    }

    fn closer(&self) -> Option<SourceCloser> {
        let child = self.child.clone();
        Some(SourceCloser::new(move || kill_child(&child)))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

//! Video segment encoding
//!
//! Encoding and container writing sit behind [`SegmentWriter`]. The default
//! writer pipes raw `rgb24` frames into an `ffmpeg` child process.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;

use crate::config::CameraConfig;
use crate::error::RecorderError;

/// An open video file accepting frames
pub trait SegmentWriter: Send {
    /// Append one frame
    fn write(&mut self, frame: &RgbImage) -> Result<(), RecorderError>;

    /// Flush and finalize the file
    fn finish(self: Box<Self>) -> Result<(), RecorderError>;
}

/// Opens segment writers for a camera
pub trait SegmentWriterFactory: Send + Sync {
    fn create(&self, path: &Path, camera: &CameraConfig) -> Result<Box<dyn SegmentWriter>, RecorderError>;
}

/// Creates [`FfmpegSegmentWriter`]s using the camera's ffmpeg settings
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegWriterFactory;

impl SegmentWriterFactory for FfmpegWriterFactory {
    fn create(&self, path: &Path, camera: &CameraConfig) -> Result<Box<dyn SegmentWriter>, RecorderError> {
        let writer = FfmpegSegmentWriter::spawn(
            &camera.ffmpeg_path,
            path,
            (camera.width, camera.height),
            camera.fps,
            &camera.video_codec,
        )?;
        Ok(Box::new(writer))
    }
}

/// Segment writer backed by an `ffmpeg` encoder process
pub struct FfmpegSegmentWriter {
    path: PathBuf,
    size: (u32, u32),
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegSegmentWriter {
    /// Start an encoder writing `path`
    pub fn spawn(
        ffmpeg: &str,
        path: &Path,
        size: (u32, u32),
        fps: u32,
        codec: &str,
    ) -> Result<Self, RecorderError> {
        let mut cmd = Command::new(ffmpeg);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(format!("{}x{}", size.0, size.1))
            .arg("-r")
            .arg(fps.max(1).to_string())
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg(codec)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|source| RecorderError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RecorderError::Spawn {
                path: path.to_path_buf(),
                source: std::io::Error::new(ErrorKind::Other, "ffmpeg stdin unavailable"),
            });
        };

        log::debug!("Spawned ffmpeg encoder for {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            size,
            child: Some(child),
            stdin: Some(stdin),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn close(&mut self) -> Result<(), RecorderError> {
        // Closing stdin lets ffmpeg write the trailer and exit
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(|e| RecorderError::Finish {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(RecorderError::Finish {
                path: self.path.clone(),
                message: format!("ffmpeg exited with {}", status),
            })
        }
    }
}

impl SegmentWriter for FfmpegSegmentWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<(), RecorderError> {
        if frame.dimensions() != self.size {
            return Err(RecorderError::FrameSize {
                expected: self.size,
                actual: frame.dimensions(),
            });
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            RecorderError::Write(std::io::Error::new(ErrorKind::BrokenPipe, "encoder closed"))
        })?;
        stdin.write_all(frame.as_raw()).map_err(RecorderError::Write)
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecorderError> {
        self.close()
    }
}

impl Drop for FfmpegSegmentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("{}", e);
        }
    }
}

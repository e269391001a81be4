//! Raw RGB frame piping through FFmpeg.
//!
//! Decoding and encoding both go through `-f rawvideo -pix_fmt rgb24`
//! pipes, so frames cross the process boundary as fixed-size byte blocks
//! and never touch disk.

use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use image::RgbImage;

use crate::error::{MediaError, MediaResult};

/// Streaming decoder: reads a video as a sequence of RGB24 frames.
#[derive(Debug)]
pub struct FrameReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    frame_len: usize,
}

impl FrameReader {
    /// Open `video_path` for decoding at its native resolution.
    pub async fn open(video_path: impl AsRef<Path>, width: u32, height: u32) -> MediaResult<Self> {
        let video_path = video_path.as_ref();
        if !video_path.exists() {
            return Err(MediaError::FileNotFound(video_path.to_path_buf()));
        }
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(video_path)
            .args(["-pix_fmt", "rgb24", "-f", "rawvideo", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None))?;

        debug!("Opened frame reader for {}", video_path.display());

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            width,
            height,
            frame_len: (width * height * 3) as usize,
        })
    }

    /// Read the next frame, or `None` at end of stream.
    pub async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let mut buf = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {
                let image = RgbImage::from_raw(self.width, self.height, buf)
                    .ok_or_else(|| MediaError::internal("Frame buffer size mismatch"))?;
                Ok(Some(image))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop decoding and reap the FFmpeg process.
    pub async fn close(mut self) -> MediaResult<()> {
        // The decoder may still be mid-stream (early stop); kill is fine.
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
        Ok(())
    }
}

/// Streaming encoder: accepts RGB24 frames and writes an H.264 video.
pub struct FrameWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    frame_len: usize,
}

impl FrameWriter {
    /// Create an encoder writing to `output_path`.
    pub async fn create(
        output_path: impl AsRef<Path>,
        width: u32,
        height: u32,
        fps: f64,
    ) -> MediaResult<Self> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{}x{}", width, height),
                "-r",
                &format!("{:.3}", fps),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-preset",
                "medium",
                "-crf",
                "23",
            ])
            .arg(output_path.as_ref())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stdin", None, None))?;

        debug!("Opened frame writer for {}", output_path.as_ref().display());

        Ok(Self {
            child,
            stdin: Some(stdin),
            frame_len: (width * height * 3) as usize,
        })
    }

    /// Append one frame.
    pub async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        let data = frame.as_raw();
        if data.len() != self.frame_len {
            return Err(MediaError::internal(format!(
                "Frame size mismatch: expected {} bytes, got {}",
                self.frame_len,
                data.len()
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("Frame writer already finished"))?;
        stdin.write_all(data).await?;
        Ok(())
    }

    /// Close the input stream and wait for the encoder to flush.
    pub async fn finish(mut self) -> MediaResult<()> {
        // Dropping stdin signals EOF to FFmpeg.
        drop(self.stdin.take());

        let output = self.child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            warn!("FFmpeg encoder exited with {:?}", output.status.code());
            Err(MediaError::ffmpeg_failed(
                "FFmpeg encoder exited with non-zero status",
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
                output.status.code(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_rejects_missing_file() {
        let err = FrameReader::open("/nonexistent/clip.mp4", 64, 64)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}

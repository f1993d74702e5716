use super::{EncoderParams, MatteSink};
use crate::frame::Frame;
use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

/// Encodes the matte stream into a video file with an ffmpeg child process
///
/// Raw frames go to ffmpeg's stdin. Its stderr is drained on a separate
/// thread and handed back as diagnostics when the stream is finished.
pub struct FfmpegSink {
    output: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegSink {
    pub fn new<P: AsRef<Path>>(output: P) -> Self {
        Self {
            output: output.as_ref().to_path_buf(),
            child: None,
            stdin: None,
            stderr: None,
        }
    }

    /// Arguments for an ffmpeg that reads rawvideo from stdin
    pub fn encoder_args(params: &EncoderParams, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-y",
            "-nostats",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-vcodec",
            "rawvideo",
        ]
        .iter()
        .map(OsString::from)
        .collect();

        args.push("-s".into());
        args.push(format!("{}x{}", params.width, params.height).into());
        args.push("-pix_fmt".into());
        args.push(params.pixel_format.ffmpeg_name().into());
        args.push("-r".into());
        args.push(params.frame_rate.to_string().into());
        args.extend(
            ["-i", "-", "-an", "-vcodec", "mpeg4", "-b:v", "2000k"]
                .iter()
                .map(OsString::from),
        );
        args.push(output.as_os_str().to_os_string());
        args
    }

    fn collect_diagnostics(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl MatteSink for FfmpegSink {
    fn begin(&mut self, params: &EncoderParams) -> Result<()> {
        if self.child.is_some() {
            bail!("Encoder already started");
        }

        tracing::info!(
            "Starting encoder for {} ({}x{} {} @ {} fps)",
            self.output.display(),
            params.width,
            params.height,
            params.pixel_format,
            params.frame_rate
        );

        let mut child = Command::new("ffmpeg")
            .args(Self::encoder_args(params, &self.output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg encoder")?;

        self.stdin = child.stdin.take();
        self.stderr = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });
        self.child = Some(child);

        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let stdin = self.stdin.as_mut().context("Encoder is not running")?;
        stdin
            .write_all(frame.as_bytes())
            .context("Failed to write frame to ffmpeg")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<String>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        // Closing stdin signals end of stream
        drop(self.stdin.take());
        let status = child.wait().context("Failed to wait for ffmpeg")?;
        let diagnostics = self.collect_diagnostics();

        if !status.success() {
            bail!("ffmpeg exited with {}: {}", status, diagnostics.trim());
        }

        let diagnostics = diagnostics.trim();
        if diagnostics.is_empty() {
            Ok(None)
        } else {
            tracing::warn!("Encoder reported: {}", diagnostics);
            Ok(Some(diagnostics.to_string()))
        }
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return;
        };

        tracing::debug!("Aborting encoder for {}", self.output.display());
        let _ = child.kill();
        let _ = child.wait();
        self.collect_diagnostics();

        // A partial file is not a valid result
        if let Err(e) = std::fs::remove_file(&self.output) {
            tracing::debug!("Could not remove partial output {}: {}", self.output.display(), e);
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.abort();
    }
}

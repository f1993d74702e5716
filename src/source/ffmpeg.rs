use super::{VideoDecoder, VideoInfo};
use crate::frame::FrameShape;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Subset of `ffprobe -of json` output we rely on
#[derive(Debug, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
pub struct ProbeStream {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    /// ffprobe reports counters as strings
    pub nb_read_packets: Option<String>,
}

impl ProbeOutput {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse ffprobe output")
    }

    /// Resolve the first video stream into a [`VideoInfo`]
    pub fn video_info(&self) -> Result<VideoInfo> {
        let stream = self
            .streams
            .first()
            .ok_or_else(|| anyhow!("Source has no video stream"))?;

        let width = stream.width.context("ffprobe did not report a width")?;
        let height = stream.height.context("ffprobe did not report a height")?;
        let frame_count = stream
            .nb_read_packets
            .as_deref()
            .context("ffprobe did not report a packet count")?
            .trim()
            .parse::<usize>()
            .context("Invalid packet count")?;
        let frame_rate = parse_frame_rate(
            stream
                .r_frame_rate
                .as_deref()
                .context("ffprobe did not report a frame rate")?,
        )?;

        Ok(VideoInfo {
            frame_count,
            frame_rate,
            shape: FrameShape::rgb(height, width),
        })
    }
}

/// Parse an ffprobe rational such as `30000/1001`, rounding up
pub fn parse_frame_rate(rate: &str) -> Result<u32> {
    let rate = rate.trim();
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().context("Invalid frame rate numerator")?;
            let den: f64 = den.trim().parse().context("Invalid frame rate denominator")?;
            if den == 0.0 {
                bail!("Frame rate {rate} has a zero denominator");
            }
            num / den
        }
        None => rate.parse().context("Invalid frame rate")?,
    };

    if !value.is_finite() || value <= 0.0 {
        bail!("Frame rate {rate} is not positive");
    }

    Ok(value.ceil() as u32)
}

/// Decodes a video file by piping `rgb24` rawvideo out of an ffmpeg child
pub struct FfmpegDecoder {
    path: PathBuf,
    info: VideoInfo,
    child: Child,
    stdout: ChildStdout,
    decoded: usize,
}

impl FfmpegDecoder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Probing {}", path.display());

        let info = probe(path)?;
        tracing::info!(
            "Source: {}x{}, {} frames, {} fps detected",
            info.shape.width,
            info.shape.height,
            info.frame_count,
            info.frame_rate
        );

        let mut child = Command::new("ffmpeg")
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn ffmpeg decoder")?;

        let stdout = child
            .stdout
            .take()
            .context("ffmpeg decoder has no stdout")?;

        Ok(Self {
            path: path.to_path_buf(),
            info,
            child,
            stdout,
            decoded: 0,
        })
    }
}

fn probe(path: &Path) -> Result<VideoInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "stream=width,height,r_frame_rate,nb_read_packets",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        bail!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    ProbeOutput::parse(&String::from_utf8_lossy(&output.stdout))?.video_info()
}

/// Fill `buf` from `reader`, returning how many bytes arrived before EOF
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl VideoDecoder for FfmpegDecoder {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.info.shape.byte_len()];
        let filled = read_full(&mut self.stdout, &mut buf)
            .with_context(|| format!("Failed to read from ffmpeg decoding {}", self.path.display()))?;

        if filled == 0 {
            tracing::debug!("Decoder exhausted after {} frames", self.decoded);
            return Ok(None);
        }
        if filled < buf.len() {
            bail!(
                "Frame {} ended after {} of {} bytes",
                self.decoded,
                filled,
                buf.len()
            );
        }

        self.decoded += 1;
        Ok(Some(buf))
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        // Stop decoding whatever the pipeline did not ask for
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

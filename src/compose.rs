//! Final outputs built from the matte video
//!
//! Apart from [`Composite::Matte`], every mode first renders the matte into
//! a scratch directory, then lets ffmpeg merge it with the source as an
//! alpha channel (`scale2ref` + `alphamerge`) and optionally lay the result
//! over a background.

use crate::config::PipelineConfig;
use crate::pipeline::{self, PipelineReport};
use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

const ALPHAMERGE: &str = "[1][0]scale2ref[mask][main];[main][mask]alphamerge=shortest=1";
const GIF_PALETTE: &str = "fps=10,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse";

/// Still background rescaled to the source size, inside the scratch directory
const SCALED_BACKGROUND: &str = "background.jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Composite {
    /// The gray matte video itself
    Matte,
    /// Source with the matte as alpha, QuickTime Animation codec
    TransparentVideo,
    /// Source with the matte as alpha, as an animated GIF
    TransparentGif,
    /// Transparent GIF centred over a background image or GIF
    GifOverBackground(PathBuf),
    /// Transparent source laid over a background video
    VideoOverVideo(PathBuf),
    /// Transparent source centred over a still image scaled to the source size
    VideoOverImage(PathBuf),
}

/// Outcome of [`render`]
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub pipeline: PipelineReport,
    /// Diagnostics from the encoder or compositor that did not fail the run
    pub warnings: Vec<String>,
}

fn args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    items.into_iter().map(Into::into).collect()
}

fn input(path: &Path) -> Vec<OsString> {
    args([OsStr::new("-i"), path.as_os_str()])
}

fn ffmpeg_base() -> Vec<OsString> {
    args(["-y", "-nostats", "-loglevel", "error"])
}

impl Composite {
    /// Background input, if this mode uses one
    pub fn background(&self) -> Option<&Path> {
        match self {
            Composite::GifOverBackground(path)
            | Composite::VideoOverVideo(path)
            | Composite::VideoOverImage(path) => Some(path),
            _ => None,
        }
    }

    /// ffmpeg invocations, in order, that turn `matte` and `source` into `output`
    ///
    /// Intermediate files go to `scratch`. Empty for [`Composite::Matte`].
    pub fn ffmpeg_passes(
        &self,
        source: &Path,
        matte: &Path,
        scratch: &Path,
        output: &Path,
    ) -> Vec<Vec<OsString>> {
        let mut passes = Vec::new();
        let mut cmd = ffmpeg_base();
        cmd.extend(input(source));
        cmd.extend(input(matte));

        match self {
            Composite::Matte => return passes,
            Composite::TransparentVideo => {
                cmd.extend(args(["-filter_complex", ALPHAMERGE, "-c:v", "qtrle"]));
            }
            Composite::TransparentGif => {
                cmd.extend(args([
                    "-filter_complex".to_string(),
                    format!("{ALPHAMERGE},{GIF_PALETTE}"),
                ]));
            }
            Composite::GifOverBackground(background) => {
                cmd.extend(input(background));
                cmd.extend(args([
                    "-filter_complex".to_string(),
                    format!(
                        "{ALPHAMERGE}[fg];[2][fg]overlay=(main_w-overlay_w)/2:(main_h-overlay_h)/2:format=auto,{GIF_PALETTE}"
                    ),
                ]));
            }
            Composite::VideoOverVideo(background) => {
                cmd.extend(input(background));
                cmd.extend(args([
                    "-filter_complex".to_string(),
                    format!(
                        "{ALPHAMERGE}[vid];[vid][2:v]scale2ref[fg][bg];[bg][fg]overlay=shortest=1[out]"
                    ),
                    "-map".to_string(),
                    "[out]".to_string(),
                ]));
            }
            Composite::VideoOverImage(background) => {
                let scaled = scratch.join(SCALED_BACKGROUND);

                let mut scale = ffmpeg_base();
                scale.extend(input(background));
                scale.extend(input(source));
                scale.extend(args([
                    "-filter_complex",
                    "scale2ref[img][vid];[img]setsar=1;[vid]nullsink",
                    "-frames:v",
                    "1",
                    "-q:v",
                    "2",
                ]));
                scale.push(scaled.clone().into_os_string());
                passes.push(scale);

                cmd.extend(args(["-loop", "1"]));
                cmd.extend(input(&scaled));
                cmd.extend(args([
                    "-filter_complex".to_string(),
                    format!("{ALPHAMERGE}[fg];[2][fg]overlay=(W-w)/2:(H-h)/2:shortest=1[out]"),
                    "-map".to_string(),
                    "[out]".to_string(),
                ]));
            }
        }

        cmd.push("-shortest".into());
        cmd.push(output.as_os_str().to_os_string());
        passes.push(cmd);
        passes
    }
}

fn run_ffmpeg(cmd: &[OsString], warnings: &mut Vec<String>) -> Result<()> {
    let result = Command::new("ffmpeg")
        .args(cmd)
        .output()
        .context("Failed to run ffmpeg compositor")?;

    let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
    if !result.status.success() {
        bail!("ffmpeg compositor exited with {}: {}", result.status, stderr);
    }
    if !stderr.is_empty() {
        tracing::warn!("Compositor reported: {}", stderr);
        warnings.push(stderr);
    }
    Ok(())
}

/// Run the matting pipeline on `input` and write the requested composite
pub fn render(
    config: &PipelineConfig,
    composite: &Composite,
    input: &Path,
    output: &Path,
) -> Result<RenderReport> {
    if let Some(background) = composite.background() {
        if !background.exists() {
            bail!("Background {} does not exist", background.display());
        }
    }

    if *composite == Composite::Matte {
        let report = pipeline::matte_key(config, input, output)?;
        return Ok(RenderReport {
            warnings: report.warnings.iter().cloned().collect(),
            pipeline: report,
        });
    }

    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let matte = scratch.path().join("matte.mp4");

    let report = pipeline::matte_key(config, input, &matte)?;
    let mut warnings: Vec<String> = report.warnings.iter().cloned().collect();

    tracing::info!("Starting alphamerge into {}", output.display());
    for cmd in composite.ffmpeg_passes(input, &matte, scratch.path(), output) {
        run_ffmpeg(&cmd, &mut warnings)?;
    }

    if let Err(e) = scratch.close() {
        tracing::debug!("Ignoring scratch cleanup failure: {}", e);
    }

    tracing::info!("Process finished");
    Ok(RenderReport {
        pipeline: report,
        warnings,
    })
}

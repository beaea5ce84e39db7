use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{EncoderError, Result};

/// Named output resolutions and the scale they map to
///
/// Entries with an empty scale keep the frames' own size.
pub const RESOLUTIONS: &[(&str, &str)] = &[
    ("Unchanged", ""),
    ("160x120 (QQVGA)", "160:120"),
    ("320x240 (QVGA)", "320:240"),
    ("640x480 (VGA)", "640:480"),
    ("800x600 (SVGA)", "800:600"),
    ("1024x768 (XGA)", "1024:768"),
    ("1152x864 (XGA+)", "1152:864"),
    ("1280x960 (SXGA)", "1280:960"),
    ("1400x1050 (SXGA+)", "1400:1050"),
    ("1600x1200 (UXGA)", "1600:1200"),
    ("1920x1440 (1080P)", "1920:1440"),
    ("2048x1536 (QXGA)", "2048:1536"),
    ("2880x2160 (3K UHD)", "2880:2160"),
    ("3072x2304 (3K)", "3072:2304"),
    ("3840x2880 (4K UHD)", "3840:2880"),
    ("4096x3072 (HXGA)", "4096:3072"),
    ("5120x3840 (5K)", "5120:3840"),
    ("6144x4608 (6K)", "6144:4608"),
    ("7680x5760 (8K UHD)", "7680:5760"),
    ("8192x6144 (8K)", "8192:6144"),
    ("432x243 (FWQVGA)", "432:243"),
    ("640x360 (nHD)", "640:360"),
    ("896x504 (FWVGA)", "896:504"),
    ("960x540 (qHD)", "960:540"),
    ("1024x576 (EDTV)", "1024:576"),
    ("1280x720 (HD Ready)", "1280:720"),
    ("1360x765 (WXGA)", "1360:765"),
    ("1600x900 (HD+)", "1600:900"),
    ("1920x1080 (FHD)", "1920:1080"),
    ("2048x1152 (2K)", "2048:1152"),
    ("2560x1440 (QHD)", "2560:1440"),
    ("3072x1728 (3K)", "3072:1728"),
    ("3200x1800 (QHD+)", "3200:1800"),
    ("3840x2160 (4K-UHD)", "3840:2160"),
    ("4096x2304 (DCI 4K)", "4096:2304"),
    ("5120x2880 (5K UHD+)", "5120:2880"),
    ("7680x4320 (8K-UHD)", "7680:4320"),
    ("8192x4608 (True 8K)", "8192:4608"),
    ("15360x8640 (16K UHD)", "15360:8640"),
];

/// Map a resolution label to a `w:h` scale, `None` meaning unchanged
///
/// Besides the names in [`RESOLUTIONS`], a bare `WxH` label is accepted.
pub fn resolution_scale(label: &str) -> Result<Option<String>> {
    let label = label.trim();
    if label.is_empty() {
        return Ok(None);
    }
    if let Some((_, scale)) = RESOLUTIONS.iter().find(|(name, _)| *name == label) {
        return Ok(if scale.is_empty() { None } else { Some(scale.to_string()) });
    }

    // "1280x960 (SXGA???)" and plain "720x576" both start with WxH
    let size = label.split_whitespace().next().unwrap_or(label);
    let parsed = size.split_once(|c| c == 'x' || c == 'X').and_then(|(w, h)| {
        let w: u32 = w.trim().parse().ok()?;
        let h: u32 = h.trim().parse().ok()?;
        (w > 0 && h > 0).then(|| format!("{}:{}", w, h))
    });
    parsed
        .map(Some)
        .ok_or_else(|| EncoderError::UnknownResolution { label: label.to_string() }.into())
}

/// Border fill applied before scaling, hides scanner gate edges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillBorders {
    pub thickness: u32,
    /// One of the encoder's fill modes: smear, mirror, fixed, reflect, wrap, fade, margins
    pub mode: String,
}

impl Default for FillBorders {
    fn default() -> Self {
        Self {
            thickness: 5,
            mode: "smear".to_string(),
        }
    }
}

impl FillBorders {
    pub fn filter(&self) -> String {
        let t = self.thickness;
        format!(
            "fillborders=left={}:right={}:top={}:bottom={}:mode={}",
            t, t, t, t, self.mode
        )
    }
}

/// One invocation of the external encoder
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCommand {
    pub binary: String,
    /// Absolute number of the first input frame
    pub start_number: u32,
    pub framerate: u32,
    /// printf-style numbered input, e.g. `/target/picture_out-%05d.jpg`
    pub input_pattern: PathBuf,
    /// Size of the input frames, passed along when scaling
    pub input_size: Option<(u32, u32)>,
    pub frame_count: Option<usize>,
    pub fill_borders: Option<FillBorders>,
    /// `w:h` output scale
    pub scale: Option<String>,
    pub preset: String,
    pub crf: u8,
    pub output: PathBuf,
}

impl EncoderCommand {
    /// Filter graph: border fill then scaling, as one chain
    pub fn filter_graph(&self) -> Option<String> {
        let mut filters = Vec::new();
        if let Some(fill) = &self.fill_borders {
            filters.push(fill.filter());
        }
        if let Some(scale) = &self.scale {
            filters.push(format!("scale={}", scale));
        }
        if filters.is_empty() {
            None
        } else {
            Some(filters.join(","))
        }
    }

    /// Command line arguments, binary excluded
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-loglevel",
            "error",
            "-stats",
            "-flush_packets",
            "1",
            "-f",
            "image2",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("-start_number".to_string());
        args.push(self.start_number.to_string());
        args.push("-framerate".to_string());
        args.push(self.framerate.to_string());

        if self.scale.is_some() {
            if let Some((w, h)) = self.input_size {
                args.push("-s:v".to_string());
                args.push(format!("{}x{}", w, h));
            }
        }

        args.push("-i".to_string());
        args.push(self.input_pattern.display().to_string());

        if let Some(count) = self.frame_count {
            if count > 0 {
                args.push("-frames:v".to_string());
                args.push(count.to_string());
            }
        }

        if let Some(graph) = self.filter_graph() {
            args.push("-vf".to_string());
            args.push(graph);
        }

        for arg in ["-an", "-vcodec", "libx264", "-preset"] {
            args.push(arg.to_string());
        }
        args.push(self.preset.clone());
        args.push("-crf".to_string());
        args.push(self.crf.to_string());
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());
        args.push(self.output.display().to_string());
        args
    }

    /// Build the process with stdout and stderr piped
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

/// Check once that the encoder binary runs at all
pub fn probe_encoder(binary: &str) -> Result<()> {
    let available = Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);

    if available {
        info!("Encoder '{}' available", binary);
        Ok(())
    } else {
        error!("'{}' is NOT installed, video generation disabled", binary);
        Err(EncoderError::Missing {
            binary: binary.to_string(),
        }
        .into())
    }
}

/// Default video file name, timestamped
pub fn default_video_filename(now: DateTime<Local>) -> String {
    format!("stabilized-{}.mp4", now.format("%Y_%m_%d-%H-%M-%S"))
}

/// Use `name`, or a timestamped default, making sure it ends in a
/// container extension the encoder understands
pub fn resolve_video_filename(name: &str, now: DateTime<Local>) -> String {
    let name = name.trim();
    if name.is_empty() {
        return default_video_filename(now);
    }
    let known = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_lowercase().as_str(), "mp4" | "mkv"))
        .unwrap_or(false);
    if known {
        name.to_string()
    } else {
        format!("{}.mp4", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn command() -> EncoderCommand {
        EncoderCommand {
            binary: "ffmpeg".to_string(),
            start_number: 105,
            framerate: 18,
            input_pattern: PathBuf::from("/target/picture_out-%05d.jpg"),
            input_size: Some((1440, 1080)),
            frame_count: Some(50),
            fill_borders: None,
            scale: None,
            preset: "veryslow".to_string(),
            crf: 18,
            output: PathBuf::from("/video/out.mp4"),
        }
    }

    #[test]
    fn test_args_in_order() {
        let args = command().args();
        let expected: Vec<String> = [
            "-y", "-loglevel", "error", "-stats", "-flush_packets", "1", "-f", "image2",
            "-start_number", "105", "-framerate", "18", "-i", "/target/picture_out-%05d.jpg",
            "-frames:v", "50", "-an", "-vcodec", "libx264", "-preset", "veryslow", "-crf", "18",
            "-pix_fmt", "yuv420p", "/video/out.mp4",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn test_scale_and_fill_share_one_filter_chain() {
        let mut cmd = command();
        cmd.scale = Some("640:480".to_string());
        cmd.fill_borders = Some(FillBorders::default());
        let args = cmd.args();

        let size = args.iter().position(|a| a == "-s:v").unwrap();
        assert_eq!(args[size + 1], "1440x1080");
        assert!(size < args.iter().position(|a| a == "-i").unwrap());

        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(
            args[vf + 1],
            "fillborders=left=5:right=5:top=5:bottom=5:mode=smear,scale=640:480"
        );
        assert_eq!(args.iter().filter(|a| *a == "-vf").count(), 1);
    }

    #[test]
    fn test_resolution_labels() {
        assert_eq!(resolution_scale("Unchanged").unwrap(), None);
        assert_eq!(resolution_scale("640x480 (VGA)").unwrap(), Some("640:480".to_string()));
        assert_eq!(resolution_scale("1920x1080 (FHD)").unwrap(), Some("1920:1080".to_string()));
        assert_eq!(resolution_scale("720x576").unwrap(), Some("720:576".to_string()));
        assert_eq!(resolution_scale("1280x960 (SXGA???)").unwrap(), Some("1280:960".to_string()));
        assert!(resolution_scale("huge").is_err());
    }

    #[test]
    fn test_video_filename_defaults() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(default_video_filename(now), "stabilized-2024_03_09-14-05-07.mp4");
        assert_eq!(resolve_video_filename("", now), "stabilized-2024_03_09-14-05-07.mp4");
        assert_eq!(resolve_video_filename("holiday", now), "holiday.mp4");
        assert_eq!(resolve_video_filename("holiday.MKV", now), "holiday.MKV");
        assert_eq!(resolve_video_filename("reel.1974", now), "reel.1974.mp4");
    }
}

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{FrameError, Result, StabilizerError};

/// Ordered list of source frame files
///
/// Files are sorted lexicographically by name, which matches numeric order
/// because scanners zero-pad the frame number. The first number embedded in
/// the first filename is the absolute number of frame 0; output files and the
/// encoder's start number are both derived from it.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    dir: PathBuf,
    paths: Vec<PathBuf>,
    first_absolute_frame: u32,
    extension: String,
}

impl FrameSequence {
    /// Build a sequence from an explicit, already ordered list of paths
    pub fn from_paths(paths: Vec<PathBuf>) -> Result<Self> {
        let first = paths.first().ok_or_else(|| FrameError::NoFramesFound {
            dir: PathBuf::new(),
            pattern: String::new(),
        })?;

        let dir = first.parent().map(Path::to_path_buf).unwrap_or_default();
        let first_absolute_frame = extract_frame_number(first).unwrap_or(0);
        let extension = first
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_else(|| "jpg".to_string());

        Ok(Self {
            dir,
            paths,
            first_absolute_frame,
            extension,
        })
    }

    /// Discover frames in `dir` matching a filename glob (`*` and `?`)
    ///
    /// A `.jpg` glob that matches nothing is retried with `.png`.
    pub fn discover<P: AsRef<Path>>(dir: P, pattern: &str) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(FrameError::MissingDirectory { path: dir.to_path_buf() }.into());
        }

        let mut paths = list_matching(dir, pattern)?;
        if paths.is_empty() {
            if let Some(png_pattern) = png_variant(pattern) {
                debug!("No match for '{}', trying '{}'", pattern, png_pattern);
                paths = list_matching(dir, &png_pattern)?;
            }
        }

        if paths.is_empty() {
            return Err(FrameError::NoFramesFound {
                dir: dir.to_path_buf(),
                pattern: pattern.to_string(),
            }
            .into());
        }

        let sequence = Self::from_paths(paths)?;
        info!(
            "Found {} frames in {:?} (absolute {}-{})",
            sequence.len(),
            dir,
            sequence.first_absolute_frame(),
            sequence.last_absolute_frame()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            ..sequence
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn first_absolute_frame(&self) -> u32 {
        self.first_absolute_frame
    }

    pub fn last_absolute_frame(&self) -> u32 {
        self.first_absolute_frame + self.paths.len().saturating_sub(1) as u32
    }

    /// Map a 0-based sequence index to the absolute frame number
    pub fn absolute_index(&self, index: usize) -> u32 {
        self.first_absolute_frame + index as u32
    }

    /// Lowercased extension of the input files, reused for output files
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Index of the frame used to size templates; the first frames of a
    /// reel are often leader, so take one 10% into the set
    pub fn sample_index(&self) -> usize {
        (self.paths.len() as f64 * 0.1) as usize
    }
}

/// Which part of the sequence a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: usize,
    pub count: usize,
}

impl FrameRange {
    pub fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    /// Resolve a selection against a sequence of `available` frames
    ///
    /// `None` selects everything; `Some((from, to))` is inclusive and is
    /// clamped so it never runs past the end.
    pub fn resolve(selection: Option<(usize, usize)>, available: usize) -> Self {
        match selection {
            None => Self::new(0, available),
            Some((from, to)) => {
                let start = from.min(available);
                let requested = if to >= from { to - from + 1 } else { 0 };
                let count = requested.min(available - start);
                Self::new(start, count)
            }
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Naming scheme for processed frames, keyed by absolute frame number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    pub prefix: String,
    pub digits: usize,
    pub extension: String,
}

impl OutputNaming {
    pub fn new<S: Into<String>>(prefix: S, digits: usize, extension: S) -> Self {
        Self {
            prefix: prefix.into(),
            digits,
            extension: extension.into(),
        }
    }

    pub fn file_name(&self, absolute_frame: u32) -> String {
        format!(
            "{}{:0width$}.{}",
            self.prefix,
            absolute_frame,
            self.extension,
            width = self.digits
        )
    }

    pub fn path_in(&self, dir: &Path, absolute_frame: u32) -> PathBuf {
        dir.join(self.file_name(absolute_frame))
    }

    /// printf-style input pattern understood by the encoder's image2 demuxer
    pub fn encoder_pattern(&self) -> String {
        format!("{}%0{}d.{}", self.prefix, self.digits, self.extension)
    }
}

impl Default for OutputNaming {
    fn default() -> Self {
        Self::new("picture_out-", 5, "jpg")
    }
}

/// First run of digits in the file name, e.g. `picture-00042.jpg` -> 42
pub fn extract_frame_number(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Translate a filename glob into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StabilizerError::generic(format!("Invalid pattern '{}': {}", pattern, e)))
}

fn list_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = glob_to_regex(pattern)?;
    let mut paths = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable directory entry in {:?}: {}", dir, e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| matcher.is_match(name))
            .unwrap_or(false);
        if matches {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

fn png_variant(pattern: &str) -> Option<String> {
    let lower = pattern.to_lowercase();
    if lower.ends_with(".jpg") {
        Some(format!("{}png", &pattern[..pattern.len() - 3]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_discover_orders_and_offsets() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "picture-00012.jpg");
        touch(dir.path(), "picture-00010.jpg");
        touch(dir.path(), "picture-00011.jpg");
        touch(dir.path(), "notes.txt");

        let sequence = FrameSequence::discover(dir.path(), "picture-*.jpg").unwrap();
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.first_absolute_frame(), 10);
        assert_eq!(sequence.last_absolute_frame(), 12);
        assert_eq!(sequence.absolute_index(2), 12);
        assert!(sequence.path(0).unwrap().ends_with("picture-00010.jpg"));
        assert!(sequence.path(2).unwrap().ends_with("picture-00012.jpg"));
        assert_eq!(sequence.extension(), "jpg");
    }

    #[test]
    fn test_discover_falls_back_to_png() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "picture-00001.png");
        touch(dir.path(), "picture-00002.png");

        let sequence = FrameSequence::discover(dir.path(), "picture-*.jpg").unwrap();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.extension(), "png");
    }

    #[test]
    fn test_discover_empty_is_error() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "other-00001.jpg");
        assert!(FrameSequence::discover(dir.path(), "picture-*.jpg").is_err());
    }

    #[test]
    fn test_glob_question_mark() {
        let re = glob_to_regex("picture-?????.3.jpg").unwrap();
        assert!(re.is_match("picture-00001.3.jpg"));
        assert!(!re.is_match("picture-0001.3.jpg"));
        assert!(!re.is_match("picture-00001x3.jpg"));
    }

    #[test]
    fn test_range_resolution() {
        assert_eq!(FrameRange::resolve(None, 50), FrameRange::new(0, 50));
        assert_eq!(FrameRange::resolve(Some((10, 19)), 50), FrameRange::new(10, 10));
        // Clamped to the end of the sequence
        assert_eq!(FrameRange::resolve(Some((45, 60)), 50), FrameRange::new(45, 5));
        assert!(FrameRange::resolve(Some((60, 70)), 50).is_empty());
        assert!(FrameRange::resolve(Some((5, 4)), 50).is_empty());
    }

    #[test]
    fn test_output_naming() {
        let naming = OutputNaming::default();
        assert_eq!(naming.file_name(42), "picture_out-00042.jpg");
        assert_eq!(naming.encoder_pattern(), "picture_out-%05d.jpg");
    }
}

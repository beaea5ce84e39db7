use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    encoder::{resolution_scale, FillBorders},
    error::{ConfigError, Result},
    frames::{FrameRange, Point, Rect},
    templates::FilmType,
    transform::AspectLock,
};

/// Current `ProjectConfig` layout version
pub const PROJECT_VERSION: u32 = 2;

/// Application-level configuration for the stabilizer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reference pattern settings
    pub templates: TemplateConfig,

    /// Sprocket-hole search settings
    pub alignment: AlignmentConfig,

    /// External encoder settings
    pub encoder: EncoderConfig,

    /// Output frame file settings
    pub output: OutputConfig,

    /// Unattended batch settings
    pub batch: BatchConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.alignment.validate()?;
        self.encoder.validate()?;
        self.output.validate()?;
        Ok(())
    }
}

/// Where the stock patterns live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Directory with `Pattern.S8.jpg` and friends
    pub dir: PathBuf,

    /// Check the stock pattern hashes before any run
    pub verify_integrity: bool,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("templates"),
            verify_integrity: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Share of frame width searched for the hole, from the left edge
    pub stripe_proportion: f64,

    /// Pixels the inactive probe must sit higher before a film type change is suggested
    pub film_type_sensitivity: i32,

    /// Gaussian blur the search image before matching
    pub blur: bool,

    /// Matcher worker threads
    pub threads: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            stripe_proportion: 0.25,
            film_type_sensitivity: 0,
            blur: true,
            threads: num_cpus::get(),
        }
    }
}

impl AlignmentConfig {
    fn validate(&self) -> Result<()> {
        if !(self.stripe_proportion > 0.0 && self.stripe_proportion <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "alignment.stripe_proportion".to_string(),
                value: self.stripe_proportion.to_string()
            }.into());
        }

        if self.threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "alignment.threads".to_string(),
                value: self.threads.to_string()
            }.into());
        }

        if self.film_type_sensitivity < 0 {
            return Err(ConfigError::InvalidValue {
                key: "alignment.film_type_sensitivity".to_string(),
                value: self.film_type_sensitivity.to_string()
            }.into());
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable, looked up on PATH
    pub binary: String,

    /// Longest wait for one line of encoder output (ms)
    pub poll_interval_ms: u64,

    /// Constant rate factor
    pub crf: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            poll_interval_ms: 100,
            crf: 18,
        }
    }
}

impl EncoderConfig {
    fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            return Err(ConfigError::MissingKey { key: "encoder.binary".to_string() }.into());
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "encoder.poll_interval_ms".to_string(),
                value: self.poll_interval_ms.to_string()
            }.into());
        }

        if self.crf > 51 {
            return Err(ConfigError::InvalidValue {
                key: "encoder.crf".to_string(),
                value: self.crf.to_string()
            }.into());
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub prefix: String,
    /// Zero-padding width of the frame number
    pub digits: usize,
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            prefix: "picture_out-".to_string(),
            digits: 5,
            jpeg_quality: 95,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if self.digits == 0 || self.digits > 9 {
            return Err(ConfigError::InvalidValue {
                key: "output.digits".to_string(),
                value: self.digits.to_string()
            }.into());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ConfigError::InvalidValue {
                key: "output.jpeg_quality".to_string(),
                value: self.jpeg_quality.to_string()
            }.into());
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Shell command run after a batch when suspend is requested
    pub suspend_command: Option<String>,
}

/// One project: a source folder and everything needed to process it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub version: u32,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub video_target_dir: PathBuf,
    /// Filename glob of the scanned frames
    pub file_pattern: String,
    pub film_type: FilmType,
    /// Encode the frames already in the target directory without regenerating them
    pub skip_frame_regeneration: bool,
    pub crop: CropSettings,
    pub rotation: RotationSettings,
    pub stabilization: StabilizationSettings,
    pub frames: FrameSelection,
    pub video: VideoSettings,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            version: PROJECT_VERSION,
            source_dir: PathBuf::new(),
            target_dir: PathBuf::new(),
            video_target_dir: PathBuf::new(),
            file_pattern: "picture-*.jpg".to_string(),
            film_type: FilmType::S8,
            skip_frame_regeneration: false,
            crop: CropSettings::default(),
            rotation: RotationSettings::default(),
            stabilization: StabilizationSettings::default(),
            frames: FrameSelection::All,
            video: VideoSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CropSettings {
    pub enabled: bool,
    /// Only constrains drawing a new rectangle, never the stored one
    pub aspect: AspectLock,
    pub top_left: Point,
    pub bottom_right: Point,
}

impl CropSettings {
    pub fn rect(&self) -> Option<Rect> {
        if !self.enabled {
            return None;
        }
        let rect = Rect::new(self.top_left, self.bottom_right);
        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    pub enabled: bool,
    /// Degrees, counter-clockwise
    pub angle: f64,
}

impl RotationSettings {
    pub fn angle(&self) -> Option<f64> {
        (self.enabled && self.angle != 0.0).then_some(self.angle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizationSettings {
    pub enabled: bool,
    /// Binarization threshold used when capturing a custom pattern
    pub threshold: u8,
    /// Hole height measured on a previous run, skips the probe
    pub hole_height: Option<i32>,
    pub custom_template: Option<CustomTemplateSettings>,
}

impl Default for StabilizationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 220,
            hole_height: None,
            custom_template: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTemplateSettings {
    pub path: PathBuf,
    /// Frame position the pattern's top-left corner must land on
    pub expected: Point,
}

/// Which frames a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FrameSelection {
    #[default]
    All,
    /// Inclusive sequence indices
    Range { from: usize, to: usize },
}

impl FrameSelection {
    pub fn to_range(self, available: usize) -> FrameRange {
        match self {
            Self::All => FrameRange::resolve(None, available),
            Self::Range { from, to } => FrameRange::resolve(Some((from, to)), available),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub generate: bool,
    pub fps: u32,
    /// Label from the resolution table, or `WxH`
    pub resolution: String,
    pub preset: String,
    /// Empty for a timestamped name
    pub filename: String,
    pub fill_borders: Option<FillBorders>,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            generate: false,
            fps: 18,
            resolution: "Unchanged".to_string(),
            preset: "veryfast".to_string(),
            filename: String::new(),
            fill_borders: None,
        }
    }
}

impl VideoSettings {
    /// Short quality name used in job labels
    pub fn quality_label(&self) -> &'static str {
        match self.preset.as_str() {
            "veryslow" => "HQ video",
            "veryfast" => "Low Q. video",
            _ => "medium Q. video",
        }
    }
}

impl ProjectConfig {
    /// Load a project file
    ///
    /// `.json` files are legacy project dictionaries and go through
    /// [`migrate_legacy`]; anything else is read as TOML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let project = if is_json {
            let value: Value = serde_json::from_str(&content)
                .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
            let entries = legacy_projects(&value);
            let (key, entry) = entries
                .first()
                .ok_or_else(|| ConfigError::MissingKey { key: "projects".to_string() })?;
            if entries.len() > 1 {
                warn!("{} holds {} projects, using '{}'", path.display(), entries.len(), key);
            }
            info!("Migrating legacy project file {}", path.display());
            migrate_legacy(entry)?
        } else {
            let project: ProjectConfig = toml::from_str(&content)
                .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
            if project.version != PROJECT_VERSION {
                return Err(ConfigError::InvalidValue {
                    key: "version".to_string(),
                    value: project.version.to_string()
                }.into());
            }
            project
        };

        project.validate()?;
        Ok(project)
    }

    /// Save the project as TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "project".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey { key: "source_dir".to_string() }.into());
        }

        if self.target_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingKey { key: "target_dir".to_string() }.into());
        }

        if let FrameSelection::Range { from, to } = self.frames {
            if to < from {
                return Err(ConfigError::InvalidValue {
                    key: "frames".to_string(),
                    value: format!("{}-{}", from, to)
                }.into());
            }
        }

        if self.video.generate {
            if self.video.fps == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "video.fps".to_string(),
                    value: self.video.fps.to_string()
                }.into());
            }
            resolution_scale(&self.video.resolution)?;
        }

        Ok(())
    }

    /// Folder name of the source, used to tag logs and job labels
    pub fn name(&self) -> String {
        self.source_dir
            .file_name()
            .map(|name| name.to_string_lossy().replace(',', ";"))
            .unwrap_or_else(|| "project".to_string())
    }

    /// Directory the video is written to, the target folder when unset
    pub fn video_dir(&self) -> &Path {
        if self.video_target_dir.as_os_str().is_empty() {
            &self.target_dir
        } else {
            &self.video_target_dir
        }
    }
}

/// Project dictionaries in a legacy project file, keyed by source folder
///
/// Three layouts exist: a bare project dictionary, `[header, {folder: project}]`
/// and `{"header": ..., "projects": {folder: project}}`.
pub fn legacy_projects(value: &Value) -> Vec<(String, Value)> {
    let collect = |map: &Map<String, Value>| -> Vec<(String, Value)> {
        map.iter()
            .filter(|(_, v)| v.is_object())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };

    match value {
        Value::Object(map) => match map.get("projects") {
            Some(Value::Object(projects)) => collect(projects),
            _ => vec![(String::new(), value.clone())],
        },
        Value::Array(items) => match items.get(1) {
            Some(Value::Object(projects)) => collect(projects),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Legacy key to snake_case: `SourceDir` -> `source_dir`, `Force_4/3` -> `force_4_3`
fn legacy_key(key: &str) -> String {
    let key = key.replace('/', "_");
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev: Option<char> = None;
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            // Capital runs such as "FF" stay one word
            if prev.map(|p| p.is_ascii_lowercase() || p.is_ascii_digit()).unwrap_or(false) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

struct LegacyFields(Map<String, Value>);

impl LegacyFields {
    fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn number(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn point(value: &Value) -> Option<Point> {
        let pair = value.as_array()?;
        let x = pair.first()?.as_f64()?;
        let y = pair.get(1)?.as_f64()?;
        Some(Point::new(x.round() as i32, y.round() as i32))
    }
}

/// Turn one legacy project dictionary into a typed project
///
/// CamelCase and snake_case keys are both understood. Unknown keys are
/// ignored and missing ones take their defaults.
pub fn migrate_legacy(value: &Value) -> Result<ProjectConfig> {
    let map = value.as_object().ok_or_else(|| ConfigError::InvalidValue {
        key: "project".to_string(),
        value: "not a dictionary".to_string()
    })?;
    let fields = LegacyFields(map.iter().map(|(k, v)| (legacy_key(k), v.clone())).collect());
    let mut project = ProjectConfig::default();

    if let Some(dir) = fields.string("source_dir") {
        project.source_dir = PathBuf::from(dir);
    }
    if let Some(dir) = fields.string("target_dir") {
        project.target_dir = PathBuf::from(dir);
    }
    if let Some(dir) = fields.string("video_target_dir") {
        project.video_target_dir = PathBuf::from(dir);
    }
    if let Some(film) = fields.string("film_type") {
        project.film_type = film.parse().unwrap_or_else(|_| {
            warn!("Unknown film type '{}', using S8", film);
            FilmType::S8
        });
    }

    project.crop.enabled = fields.bool("perform_cropping").unwrap_or(false);
    if let Some(Value::Array(corners)) = fields.get("crop_rectangle") {
        if let (Some(tl), Some(br)) = (
            corners.first().and_then(LegacyFields::point),
            corners.get(1).and_then(LegacyFields::point),
        ) {
            project.crop.top_left = tl;
            project.crop.bottom_right = br;
        }
    }
    project.crop.aspect = AspectLock::from_flags(
        fields.bool("force_4_3").unwrap_or(false),
        fields.bool("force_16_9").unwrap_or(false),
    );

    project.rotation.enabled = fields.bool("perform_rotation").unwrap_or(false);
    project.rotation.angle = fields.number("rotation_angle").unwrap_or(0.0);

    project.stabilization.enabled = fields.bool("perform_stabilization").unwrap_or(false);
    if let Some(threshold) = fields.number("stabilization_threshold") {
        project.stabilization.threshold = threshold.clamp(0.0, 255.0).round() as u8;
    }
    let custom_defined = fields.bool("custom_template_defined").unwrap_or(false);
    let custom_file = fields.string("custom_template_filename").unwrap_or_default();
    if custom_defined && !custom_file.is_empty() {
        let expected = fields
            .get("custom_template_expected_pos")
            .and_then(LegacyFields::point)
            .unwrap_or_default();
        project.stabilization.custom_template = Some(CustomTemplateSettings {
            path: PathBuf::from(custom_file),
            expected,
        });
    }
    if let Some(height) = fields.number("hole_height") {
        project.stabilization.hole_height = Some(height.round() as i32);
    }

    let encode_all = fields.bool("encode_all_frames").unwrap_or(true);
    if !encode_all {
        let from = fields.number("frame_from").unwrap_or(0.0).max(0.0) as usize;
        let to = fields.number("frame_to").unwrap_or(0.0).max(0.0) as usize;
        project.frames = FrameSelection::Range { from, to: to.max(from) };
    }

    project.video.generate = fields.bool("generate_video").unwrap_or(false);
    if let Some(fps) = fields.number("video_fps") {
        project.video.fps = fps.round().max(1.0) as u32;
    }
    if let Some(resolution) = fields.string("video_resolution") {
        if !resolution.trim().is_empty() {
            project.video.resolution = resolution;
        }
    }
    if let Some(preset) = fields.string("ffmpeg_preset") {
        project.video.preset = preset;
    }
    project.video.filename = fields.string("video_filename").unwrap_or_default();
    if fields.bool("fill_borders").unwrap_or(false) {
        let defaults = FillBorders::default();
        project.video.fill_borders = Some(FillBorders {
            thickness: fields
                .number("fill_borders_thickness")
                .map(|t| t.max(0.0) as u32)
                .unwrap_or(defaults.thickness),
            mode: fields.string("fill_borders_mode").unwrap_or(defaults.mode),
        });
    }
    project.skip_frame_regeneration = fields.bool("skip_frame_regeneration").unwrap_or(false);

    debug!("Migrated legacy project for {}", project.source_dir.display());
    Ok(project)
}

//! One project from source folder to video
//!
//! [`ProjectRunner`] turns a [`ProjectConfig`] into a frame run followed by
//! an optional encode. Everything that can fail for the whole project
//! (missing folder, empty range, template too large for the search stripe)
//! fails in [`ProjectRunner::prepare`], before a single frame is written.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use super::context::{CancelFlag, PipelineContext};
use super::controller::{FrameController, RunStats};
use super::events::{EventSink, RunOutcome};
use crate::alignment::{AlignmentEngine, TemplateMatcher};
use crate::config::{Config, ProjectConfig};
use crate::encoder::{
    resolution_scale, resolve_video_filename, EncodeJob, EncodeReport, EncoderLauncher, EncoderOrchestrator,
};
use crate::error::{FrameError, Result};
use crate::frames::{Frame, FrameSequence, OutputNaming};
use crate::templates::TemplateRegistry;
use crate::transform::{rotate, TransformSettings, TransformStage};

/// Everything a project run produced
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectReport {
    /// `None` when frame regeneration was skipped
    pub frames: Option<RunStats>,
    /// `None` when no video was requested or the encoder is unavailable
    pub video: Option<EncodeReport>,
    pub outcome: RunOutcome,
}

/// A project ready to run
#[derive(Debug)]
pub struct PreparedRun {
    pub context: PipelineContext,
    pub controller: FrameController,
    /// Sample frame size after rotation, used when frames are not regenerated
    pub frame_size: (u32, u32),
}

pub struct ProjectRunner {
    config: Config,
    launcher: Arc<dyn EncoderLauncher>,
    encoder_available: bool,
}

impl ProjectRunner {
    pub fn new(config: Config, launcher: Arc<dyn EncoderLauncher>) -> Self {
        Self {
            config,
            launcher,
            encoder_available: true,
        }
    }

    /// Mark the encoder as missing; frames are still processed
    pub fn with_encoder_available(mut self, available: bool) -> Self {
        self.encoder_available = available;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the frame list, templates, transform stage and controller
    pub fn prepare(&self, project: &ProjectConfig, cancel: CancelFlag) -> Result<PreparedRun> {
        let sequence = FrameSequence::discover(&project.source_dir, &project.file_pattern)?;
        let range = project.frames.to_range(sequence.len());
        if range.is_empty() {
            return Err(FrameError::RangeEmpty.into());
        }
        std::fs::create_dir_all(&project.target_dir)?;

        let sample_path = sequence
            .path(sequence.sample_index())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let sample = Frame::open(&sample_path).map_err(|_| FrameError::DecodeFailed {
            index: sequence.sample_index(),
            path: sample_path.clone(),
        })?;
        let rotation = project.rotation.angle();
        let sample = match rotation {
            Some(angle) => rotate(&sample, angle),
            None => sample,
        };
        let frame_size = (sample.width(), sample.height());

        let engine = if project.stabilization.enabled {
            Some(self.build_engine(project, &sample)?)
        } else {
            None
        };

        let settings = TransformSettings {
            rotation,
            stabilize: engine.is_some(),
            crop: project.crop.rect(),
        };
        let naming = OutputNaming::new(
            self.config.output.prefix.as_str(),
            self.config.output.digits,
            sequence.extension(),
        );
        info!(
            "📁 {}: {} frames, range {}..{}",
            project.name(),
            sequence.len(),
            range.start,
            range.end()
        );

        let context = PipelineContext::new(project.name(), sequence, range, &project.target_dir, naming, cancel)
            .with_jpeg_quality(self.config.output.jpeg_quality);
        Ok(PreparedRun {
            context,
            controller: FrameController::new(TransformStage::new(settings, engine)),
            frame_size,
        })
    }

    fn build_engine(&self, project: &ProjectConfig, sample: &Frame) -> Result<AlignmentEngine> {
        let alignment = &self.config.alignment;
        let mut registry = TemplateRegistry::with_stock_templates(&self.config.templates.dir);
        registry.set_film_type(project.film_type);

        if let Some(custom) = &project.stabilization.custom_template {
            let path = if custom.path.is_absolute() {
                custom.path.clone()
            } else {
                project.source_dir.join(&custom.path)
            };
            registry.load_custom(path, custom.expected)?;
        }
        registry.refresh(sample.width());

        let matcher = TemplateMatcher::new(alignment.threads, alignment.blur)?;
        let mut engine = AlignmentEngine::new(matcher, alignment.stripe_proportion, alignment.film_type_sensitivity);
        engine.use_template(registry.active()?)?;

        if !registry.has_custom() {
            let hole_height = match project.stabilization.hole_height {
                Some(height) => height,
                None => match engine.probe_hole(sample, &registry, project.film_type) {
                    Ok(probe) => {
                        if let Some(suggestion) = probe.suggestion {
                            warn!(
                                "{}: film looks like {} rather than the configured {}",
                                project.name(),
                                suggestion.detected,
                                suggestion.configured
                            );
                        }
                        probe.hole_height
                    }
                    Err(e) => {
                        warn!("Hole probe skipped: {}", e);
                        -1
                    }
                },
            };
            if !engine.calibrate(hole_height, project.film_type, &registry)? {
                debug!("Using {} pattern at working scale", project.film_type);
            }
        }

        engine.validate_template_size(sample.width(), sample.height())?;
        Ok(engine)
    }

    /// Regenerate frames (unless skipped) and encode (if requested)
    pub fn run(&self, project: &ProjectConfig, cancel: CancelFlag, sink: &mut dyn EventSink) -> Result<ProjectReport> {
        let PreparedRun {
            mut context,
            mut controller,
            frame_size,
        } = self.prepare(project, cancel.clone())?;

        let (frames, output_size) = if project.skip_frame_regeneration {
            info!("Frame regeneration skipped, encoding existing frames");
            let size = first_output_size(&context).unwrap_or(frame_size);
            (None, size)
        } else {
            let stats = controller.run(&mut context, sink);
            let outcome = stats.outcome.clone().unwrap_or(RunOutcome::Completed);
            if !outcome.is_completed() {
                return Ok(ProjectReport {
                    frames: Some(stats),
                    video: None,
                    outcome,
                });
            }
            let size = stats.output_size.unwrap_or(frame_size);
            (Some(stats), size)
        };

        if !project.video.generate {
            return Ok(ProjectReport {
                frames,
                video: None,
                outcome: RunOutcome::Completed,
            });
        }
        if !self.encoder_available {
            warn!("{}: encoder missing, video not generated", project.name());
            return Ok(ProjectReport {
                frames,
                video: None,
                outcome: RunOutcome::Completed,
            });
        }

        let job = self.encode_job(project, &context, output_size)?;
        let mut orchestrator = EncoderOrchestrator::new(
            self.launcher.clone(),
            job,
            Duration::from_millis(self.config.encoder.poll_interval_ms),
        );
        let video = orchestrator.run(&cancel, sink);
        let outcome = video.outcome.clone();
        Ok(ProjectReport {
            frames,
            video: Some(video),
            outcome,
        })
    }

    fn encode_job(&self, project: &ProjectConfig, context: &PipelineContext, size: (u32, u32)) -> Result<EncodeJob> {
        let video_dir = project.video_dir();
        std::fs::create_dir_all(video_dir)?;
        let output: PathBuf = video_dir.join(resolve_video_filename(&project.video.filename, Local::now()));

        Ok(EncodeJob {
            binary: self.config.encoder.binary.clone(),
            target_dir: context.target_dir.clone(),
            naming: context.naming.clone(),
            first_frame: context.absolute_frame(context.range.start),
            frame_count: context.range.count,
            framerate: project.video.fps,
            input_size: Some(size),
            scale: resolution_scale(&project.video.resolution)?,
            fill_borders: project.video.fill_borders.clone(),
            preset: project.video.preset.clone(),
            crf: self.config.encoder.crf,
            output,
        })
    }
}

fn first_output_size(context: &PipelineContext) -> Option<(u32, u32)> {
    let first = context.absolute_frame(context.range.start);
    let path = context.naming.path_in(&context.target_dir, first);
    image::image_dimensions(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CustomTemplateSettings, FrameSelection};
    use crate::encoder::{EncoderCommand, EncoderProcess, LinePoll, ProcessExit};
    use crate::frames::{Point, Rect, SyntheticReel};
    use crate::pipeline::CollectingSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    struct CountingLauncher {
        spawns: AtomicUsize,
    }

    struct FinishedProcess;

    impl EncoderProcess for FinishedProcess {
        fn poll_line(&mut self, _wait: Duration) -> LinePoll {
            LinePoll::Closed
        }

        fn wait(&mut self) -> Result<ProcessExit> {
            Ok(ProcessExit { success: true, code: Some(0) })
        }

        fn terminate(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl EncoderLauncher for CountingLauncher {
        fn launch(&self, _command: &EncoderCommand) -> Result<Box<dyn EncoderProcess>> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FinishedProcess))
        }
    }

    fn launcher() -> Arc<CountingLauncher> {
        Arc::new(CountingLauncher {
            spawns: AtomicUsize::new(0),
        })
    }

    fn config(templates: &TempDir) -> Config {
        let mut config = Config::default();
        config.templates.dir = templates.path().to_path_buf();
        config.alignment.threads = 2;
        config
    }

    /// Source folder with a synthetic reel and a custom pattern cut from its
    /// unjittered frame
    fn reel_project(source: &TempDir, target: &TempDir, jitters: &[Point]) -> (SyntheticReel, ProjectConfig) {
        let reel = SyntheticReel::default();
        reel.write_sequence(source.path(), &OutputNaming::new("picture-", 5, "png"), 1, jitters)
            .unwrap();

        let region = reel.hole_region(6);
        TemplateRegistry::new(source.path())
            .capture_custom(&reel.render(Point::new(0, 0)), region, 200, source.path().join("custom.png"))
            .unwrap();

        let mut project = ProjectConfig {
            source_dir: source.path().to_path_buf(),
            target_dir: target.path().to_path_buf(),
            file_pattern: "picture-*.png".to_string(),
            ..ProjectConfig::default()
        };
        project.stabilization.enabled = true;
        project.stabilization.custom_template = Some(CustomTemplateSettings {
            path: PathBuf::from("custom.png"),
            expected: region.top_left,
        });
        (reel, project)
    }

    fn assert_hole_at_origin(frame: &Frame, reel: &SyntheticReel) {
        let o = reel.hole_origin;
        let (w, h) = (reel.hole_width as i32, reel.hole_height as i32);
        let bright = |x: i32, y: i32| frame.get_pixel(x as u32, y as u32)[0] > 200;
        // Inside corners stay inside with one pixel of slack
        assert!(bright(o.x + 1, o.y + 1));
        assert!(bright(o.x + w - 2, o.y + h - 2));
        // And the film base just outside stays dark
        assert!(!bright(o.x - 2, o.y + h / 2));
        assert!(!bright(o.x + w + 1, o.y + h / 2));
        assert!(!bright(o.x + w / 2, o.y - 2));
        assert!(!bright(o.x + w / 2, o.y + h + 1));
    }

    #[test]
    fn test_end_to_end_synthetic_reel() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        let templates = tempdir().unwrap();
        let jitters: Vec<Point> = [0, 3, -4, 5, -2, 1, -5, 4, 2, -1]
            .iter()
            .map(|&dx| Point::new(dx, 0))
            .collect();
        let (reel, project) = reel_project(&source, &target, &jitters);

        let runner = ProjectRunner::new(config(&templates), launcher());
        let mut sink = CollectingSink::new();
        let report = runner.run(&project, CancelFlag::new(), &mut sink).unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        let stats = report.frames.unwrap();
        assert_eq!(stats.processed, 10);
        assert_eq!(sink.alignments().count(), 10);
        assert_eq!(sink.out_of_bounds_count(), 0);

        for n in 1..=10u32 {
            let path = target.path().join(format!("picture_out-{:05}.png", n));
            let frame = Frame::open(&path).unwrap();
            assert_eq!((frame.width(), frame.height()), (320, 240));
            assert_hole_at_origin(&frame, &reel);
        }
    }

    #[test]
    fn test_vertical_jitter_inside_crop_margin() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        let templates = tempdir().unwrap();
        let jitters = [Point::new(0, 0), Point::new(2, 4), Point::new(-3, -5), Point::new(1, 6)];
        let (_, mut project) = reel_project(&source, &target, &jitters);
        project.crop.enabled = true;
        project.crop.top_left = Point::new(10, 10);
        project.crop.bottom_right = Point::new(310, 230);

        let runner = ProjectRunner::new(config(&templates), launcher());
        let mut sink = CollectingSink::new();
        let report = runner.run(&project, CancelFlag::new(), &mut sink).unwrap();

        assert_eq!(report.frames.unwrap().output_size, Some((300, 220)));
        let moves: Vec<i32> = sink.alignments().map(|a| a.move_y).collect();
        assert_eq!(moves.len(), 4);
        for (m, j) in moves.iter().zip(jitters.iter()) {
            assert!((m + j.y).abs() <= 1, "move {} for jitter {}", m, j.y);
        }
        assert_eq!(sink.out_of_bounds_count(), 0);
    }

    #[test]
    fn test_drift_past_crop_is_reported() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        let templates = tempdir().unwrap();
        let jitters = [Point::new(0, 0), Point::new(0, 12)];
        let (_, mut project) = reel_project(&source, &target, &jitters);
        project.crop.enabled = true;
        project.crop.top_left = Point::new(0, 4);
        project.crop.bottom_right = Point::new(320, 236);

        let runner = ProjectRunner::new(config(&templates), launcher());
        let mut sink = CollectingSink::new();
        runner.run(&project, CancelFlag::new(), &mut sink).unwrap();

        // Moving up 12 rows uncovers 8 rows at the bottom of the crop window
        let drifted: Vec<_> = sink.alignments().filter(|a| a.is_out_of_bounds()).collect();
        assert_eq!(drifted.len(), 1);
        assert_eq!(drifted[0].frame_index, 2);
        assert!((drifted[0].missing_rows - 8).abs() <= 1);
    }

    #[test]
    fn test_empty_selection_is_rejected_before_processing() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        let templates = tempdir().unwrap();
        let (_, mut project) = reel_project(&source, &target, &[Point::new(0, 0); 3]);
        project.frames = FrameSelection::Range { from: 10, to: 20 };

        let runner = ProjectRunner::new(config(&templates), launcher());
        assert!(runner.prepare(&project, CancelFlag::new()).is_err());
        assert_eq!(std::fs::read_dir(target.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_video_encoded_after_frames() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        let templates = tempdir().unwrap();
        let (_, mut project) = reel_project(&source, &target, &[Point::new(0, 0); 4]);
        project.stabilization.enabled = false;
        project.video.generate = true;
        project.video.filename = "reel".to_string();

        let counting = launcher();
        let runner = ProjectRunner::new(config(&templates), counting.clone());
        let mut sink = CollectingSink::new();
        let report = runner.run(&project, CancelFlag::new(), &mut sink).unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(counting.spawns.load(Ordering::SeqCst), 1);
        let video = report.video.unwrap();
        assert_eq!(video.output, target.path().join("reel.mp4"));
        assert_eq!(
            sink.statuses(),
            vec![("frames", RunOutcome::Completed), ("video", RunOutcome::Completed)]
        );
    }

    #[test]
    fn test_missing_encoder_still_processes_frames() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        let templates = tempdir().unwrap();
        let (_, mut project) = reel_project(&source, &target, &[Point::new(0, 0); 2]);
        project.stabilization.enabled = false;
        project.video.generate = true;

        let counting = launcher();
        let runner = ProjectRunner::new(config(&templates), counting.clone()).with_encoder_available(false);
        let report = runner.run(&project, CancelFlag::new(), &mut CollectingSink::new()).unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.frames.unwrap().processed, 2);
        assert!(report.video.is_none());
        assert_eq!(counting.spawns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_oversized_custom_template_fails_prepare() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        let templates = tempdir().unwrap();
        let (reel, mut project) = reel_project(&source, &target, &[Point::new(0, 0); 2]);

        // Wider than the 80 pixel search stripe
        let wide = Rect::new(Point::new(0, 60), Point::new(120, 160));
        TemplateRegistry::new(source.path())
            .capture_custom(&reel.render(Point::new(0, 0)), wide, 200, source.path().join("wide.png"))
            .unwrap();
        project.stabilization.custom_template = Some(CustomTemplateSettings {
            path: PathBuf::from("wide.png"),
            expected: wide.top_left,
        });

        let runner = ProjectRunner::new(config(&templates), launcher());
        assert!(runner.prepare(&project, CancelFlag::new()).is_err());
    }
}

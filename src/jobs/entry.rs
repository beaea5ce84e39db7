use serde::{Deserialize, Serialize};

use crate::config::{FrameSelection, ProjectConfig};
use crate::templates::FilmType;

/// A queued project run
///
/// The project is a snapshot taken when the job was added; only the
/// `done` flag changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    label: String,
    done: bool,
    project: ProjectConfig,
}

impl JobEntry {
    /// Snapshot `project`; `available_frames` is the size of its source
    /// folder, used to describe "all frames" selections
    pub fn new(project: ProjectConfig, available_frames: usize) -> Self {
        Self {
            label: job_label(&project, available_frames),
            done: false,
            project,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn mark_done(&mut self) {
        self.done = true;
    }

    /// Queue the job again
    pub fn rerun(&mut self) {
        self.done = false;
    }
}

/// `<name>, <gauge>, Frames <from>-<to> (<n> frames), <video>[, <resolution>]`
pub fn job_label(project: &ProjectConfig, available_frames: usize) -> String {
    let name = if project.video.filename.trim().is_empty() {
        project.name()
    } else {
        project.video.filename.trim().to_string()
    };
    let gauge = match project.film_type {
        FilmType::S8 => "S8",
        FilmType::R8 => "R8",
    };
    let (from, to, count) = match project.frames {
        FrameSelection::All => (0, available_frames, available_frames),
        FrameSelection::Range { from, to } => (from, to, to.saturating_sub(from) + 1),
    };

    let mut label = format!("{}, {}, Frames {}-{} ({} frames), ", name, gauge, from, to, count);
    if project.video.generate {
        label.push_str(project.video.quality_label());
    } else {
        label.push_str("no video");
    }
    if !project.video.resolution.trim().is_empty() {
        label.push_str(", ");
        label.push_str(project.video.resolution.trim());
    }
    label
}

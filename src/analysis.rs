//! Alignment log and run summaries
//!
//! [`AlignmentLog`] appends one line per alignment to a CSV file:
//! `project,frame,missing_rows,move_y,move_x`. Each run starts with a
//! header line `project,first_frame,count,9999,9999`. [`summarize`] reads
//! such a file back and counts out-of-bounds frames per run.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::pipeline::{EventSink, PipelineEvent};

/// Value in both move columns of a run header line
pub const RUN_MARKER: i64 = 9999;

/// Event sink writing the alignment CSV
#[derive(Debug)]
pub struct AlignmentLog {
    path: PathBuf,
    writer: BufWriter<File>,
    project: String,
}

impl AlignmentLog {
    /// Open `path` for appending, creating it when needed
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            project: String::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, fields: [i64; 4]) {
        let result = writeln!(
            self.writer,
            "{},{},{},{},{}",
            self.project, fields[0], fields[1], fields[2], fields[3]
        );
        if let Err(e) = result {
            warn!("Alignment log write failed: {}", e);
        }
    }
}

impl EventSink for AlignmentLog {
    fn emit(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::RunStarted {
                project,
                first_frame,
                count,
                ..
            } => {
                self.project = project.replace(',', ";");
                self.write_line([*first_frame as i64, *count as i64, RUN_MARKER, RUN_MARKER]);
            }
            PipelineEvent::Alignment(a) => {
                self.write_line([
                    a.frame_index as i64,
                    a.missing_rows as i64,
                    a.move_y as i64,
                    a.move_x as i64,
                ]);
            }
            PipelineEvent::Status { .. } => {
                if let Err(e) = self.writer.flush() {
                    warn!("Alignment log flush failed: {}", e);
                }
            }
            _ => {}
        }
    }
}

impl Drop for AlignmentLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// One parsed log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub project: String,
    pub frame: i64,
    pub missing_rows: i64,
    pub move_y: i64,
    pub move_x: i64,
}

impl LogRecord {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(',').map(str::trim);
        let project = parts.next()?.to_string();
        let mut number = || parts.next().and_then(|p| p.parse::<i64>().ok());
        let record = Self {
            frame: number()?,
            missing_rows: number()?,
            move_y: number()?,
            move_x: number()?,
            project,
        };
        Some(record)
    }

    pub fn is_run_header(&self) -> bool {
        self.move_y == RUN_MARKER && self.move_x == RUN_MARKER
    }
}

/// Out-of-bounds count for one run of one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub project: String,
    /// Number of this run among the project's runs, from 0
    pub run: usize,
    /// From the run header, when there was one
    pub first_frame: Option<i64>,
    pub frame_count: Option<i64>,
    pub aligned: usize,
    pub out_of_bounds: usize,
}

impl RunSummary {
    fn new(project: &str, run: usize) -> Self {
        Self {
            project: project.to_string(),
            run,
            first_frame: None,
            frame_count: None,
            aligned: 0,
            out_of_bounds: 0,
        }
    }
}

/// Split a log into runs and count out-of-bounds frames in each
///
/// A header line starts a new run for its project, and so does a frame
/// number lower than the previous one.
pub fn summarize<P: AsRef<Path>>(path: P) -> Result<Vec<RunSummary>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut runs: Vec<RunSummary> = Vec::new();
    // project -> (index into runs, last frame seen)
    let mut current: HashMap<String, (usize, i64)> = HashMap::new();
    let mut run_counts: HashMap<String, usize> = HashMap::new();

    for line in reader.lines() {
        let line = line?;
        let Some(record) = LogRecord::parse(&line) else {
            if !line.trim().is_empty() {
                debug!("Skipping log line: {}", line);
            }
            continue;
        };

        let starts_run = match current.get(&record.project) {
            None => true,
            Some(_) if record.is_run_header() => true,
            Some(&(_, last)) => record.frame < last,
        };
        if starts_run {
            let run = run_counts.entry(record.project.clone()).or_insert(0);
            runs.push(RunSummary::new(&record.project, *run));
            *run += 1;
            current.insert(record.project.clone(), (runs.len() - 1, i64::MIN));
        }

        let Some(&(index, _)) = current.get(&record.project) else {
            continue;
        };
        let summary = &mut runs[index];
        if record.is_run_header() {
            summary.first_frame = Some(record.frame);
            summary.frame_count = Some(record.missing_rows);
            continue;
        }
        summary.aligned += 1;
        if record.missing_rows != 0 {
            summary.out_of_bounds += 1;
        }
        current.insert(record.project.clone(), (index, record.frame));
    }

    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AlignmentEvent, RunOutcome};
    use tempfile::tempdir;

    fn started(project: &str, first_frame: u32, count: usize) -> PipelineEvent {
        PipelineEvent::RunStarted {
            project: project.to_string(),
            start: 0,
            first_frame,
            count,
        }
    }

    fn aligned(frame_index: u32, missing_rows: i32) -> PipelineEvent {
        PipelineEvent::Alignment(AlignmentEvent {
            frame_index,
            missing_rows,
            move_x: 1,
            move_y: -2,
        })
    }

    #[test]
    fn test_log_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("align.csv");
        {
            let mut log = AlignmentLog::create(&path).unwrap();
            log.emit(&started("reel, one", 100, 2));
            log.emit(&aligned(100, 0));
            log.emit(&aligned(101, -7));
            log.emit(&PipelineEvent::Status {
                stage: "frames",
                outcome: RunOutcome::Completed,
            });
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec!["reel; one,100,2,9999,9999", "reel; one,100,0,-2,1", "reel; one,101,-7,-2,1"]
        );
    }

    #[test]
    fn test_summarize_splits_runs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("align.csv");
        {
            let mut log = AlignmentLog::create(&path).unwrap();
            log.emit(&started("a", 10, 3));
            log.emit(&aligned(10, 0));
            log.emit(&aligned(11, 4));
            log.emit(&aligned(12, -3));
            log.emit(&started("b", 1, 1));
            log.emit(&aligned(1, 0));
            log.emit(&started("a", 10, 2));
            log.emit(&aligned(10, 0));
            log.emit(&aligned(11, 0));
        }
        // Runs without a header split on a frame number going back
        std::fs::write(
            dir.path().join("bare.csv"),
            "c,5,1,0,0\nc,6,0,0,0\nc,2,0,0,0\nnot a record\n",
        )
        .unwrap();

        let runs = summarize(&path).unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!((runs[0].project.as_str(), runs[0].run), ("a", 0));
        assert_eq!(runs[0].first_frame, Some(10));
        assert_eq!(runs[0].frame_count, Some(3));
        assert_eq!(runs[0].out_of_bounds, 2);
        assert_eq!(runs[1].project, "b");
        assert_eq!((runs[2].run, runs[2].aligned, runs[2].out_of_bounds), (1, 2, 0));

        let bare = summarize(dir.path().join("bare.csv")).unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!((bare[0].aligned, bare[0].out_of_bounds), (2, 1));
        assert_eq!(bare[1].first_frame, None);
    }
}

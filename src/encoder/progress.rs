//! Encoder progress parsing
//!
//! With `-stats` the encoder rewrites a single status line using carriage
//! returns, e.g. `frame=  212 fps= 31 q=-1.0 size= 1024kB time=...`. Output
//! is therefore split on both `\r` and `\n`.

/// What one output line says about progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressLine {
    /// Number of frames encoded so far
    Frame(u64),
    /// Non-empty line without a readable frame counter
    Desync(String),
    Empty,
}

/// Extract the `frame=<N>` counter from a status line
pub fn parse_progress_line(line: &str) -> ProgressLine {
    let line = line.trim();
    if line.is_empty() {
        return ProgressLine::Empty;
    }

    let counter = line.find("frame=").and_then(|pos| {
        let rest = line[pos + "frame=".len()..].trim_start();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u64>().ok()
    });

    match counter {
        Some(frame) => ProgressLine::Frame(frame),
        None => ProgressLine::Desync(line.to_string()),
    }
}

/// Incremental splitter turning raw output chunks into lines
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and get back every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Whatever is left once the stream has closed
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stats_line() {
        let line = "frame=  212 fps= 31 q=-1.0 size=    1024kB time=00:00:08.40 bitrate= 998.2kbits/s speed=1.23x";
        assert_eq!(parse_progress_line(line), ProgressLine::Frame(212));
        assert_eq!(parse_progress_line("frame=7"), ProgressLine::Frame(7));
    }

    #[test]
    fn test_garbled_line_is_desync() {
        assert_eq!(
            parse_progress_line("fra\u{fffd}e=12 fps=3"),
            ProgressLine::Desync("fra\u{fffd}e=12 fps=3".to_string())
        );
        assert!(matches!(parse_progress_line("frame= N/A"), ProgressLine::Desync(_)));
        assert_eq!(parse_progress_line("   "), ProgressLine::Empty);
    }

    #[test]
    fn test_splitter_handles_carriage_returns_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert_eq!(splitter.push(b"frame=  1 fps=0\rframe=  "), vec!["frame=  1 fps=0".to_string()]);
        assert_eq!(splitter.push(b"2 fps=1\r\n"), vec!["frame=  2 fps=1".to_string()]);
        assert!(splitter.push(b"\r\r\n").is_empty());
        assert!(splitter.push(b"tail").is_empty());
        assert_eq!(splitter.finish(), Some("tail".to_string()));
        assert_eq!(splitter.finish(), None);
    }
}

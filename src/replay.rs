// src/replay.rs
//
// Frame source for recorded sessions. Each line of a `.jsonl` file is one
// FrameRecord emitted by the pose extractor:
//
//   {"timestamp": 0.033, "features": [...], "image_path": "f/0001.jpg"}
//
// Relative image paths resolve against the frame file's directory. When a
// record carries no motion energy but has an image, it is computed here
// from consecutive snapshots.

use crate::motion::{GrayFrame, MotionEnergyMeter};
use crate::pipeline::FrameInput;
use crate::types::FrameRecord;
use crate::vision_client::FrameImage;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const FRAME_EXTENSION: &str = "jsonl";

/// One replayed frame plus what training needs beyond the loop input.
pub struct ReplayedFrame {
    pub input: FrameInput,
    pub image_ref: String,
    pub landmarks: Option<Vec<Vec<f32>>>,
}

/// `path` itself when it is a file, otherwise every `.jsonl` below it, sorted.
pub fn find_frame_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        anyhow::bail!("Frame source {} does not exist", path.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == FRAME_EXTENSION))
        .collect();
    files.sort();

    info!("Found {} frame file(s) in {}", files.len(), path.display());
    Ok(files)
}

pub struct FrameReplay {
    lines: io::Lines<Box<dyn BufRead + Send>>,
    base_dir: PathBuf,
    meter: MotionEnergyMeter,
    line_no: usize,
}

impl FrameReplay {
    pub fn new(reader: Box<dyn BufRead + Send>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            lines: reader.lines(),
            base_dir: base_dir.into(),
            meter: MotionEnergyMeter::new(),
            line_no: 0,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        info!("Replaying frames from {}", path.display());
        Ok(Self::new(Box::new(BufReader::new(file)), base_dir))
    }

    pub fn stdin() -> Self {
        info!("Replaying frames from stdin");
        Self::new(Box::new(BufReader::new(io::stdin())), PathBuf::from("."))
    }

    fn to_frame(&mut self, record: FrameRecord) -> ReplayedFrame {
        let mut image = None;
        let mut motion_energy = record.motion_energy;
        let image_ref = record.image_path.clone().unwrap_or_default();

        if let Some(rel) = &record.image_path {
            let path = self.base_dir.join(rel);
            match fs::read(&path) {
                Ok(bytes) => {
                    if motion_energy.is_none() {
                        motion_energy = GrayFrame::from_encoded(&bytes)
                            .and_then(|gray| self.meter.update(&gray));
                    }
                    image = Some(FrameImage::Jpeg(bytes));
                }
                Err(e) => debug!("Frame image {} unavailable: {}", path.display(), e),
            }
        }

        ReplayedFrame {
            input: FrameInput {
                timestamp: record.timestamp,
                features: record.features,
                motion_energy,
                image,
            },
            image_ref,
            landmarks: record.landmarks,
        }
    }
}

impl Iterator for FrameReplay {
    type Item = ReplayedFrame;

    /// Malformed lines are skipped; a read error ends the stream.
    fn next(&mut self) -> Option<ReplayedFrame> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!("Frame stream read failed at line {}: {}", self.line_no + 1, e);
                    return None;
                }
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<FrameRecord>(trimmed) {
                Ok(record) => return Some(self.to_frame(record)),
                Err(e) => warn!("Skipping malformed frame on line {}: {}", self.line_no, e),
            }
        }
    }
}

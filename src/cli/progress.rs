//! Progress bar for corridor preloading

use std::sync::Arc;

use butterfly_tiles::PreloadProgress;
use indicatif::{ProgressBar, ProgressStyle};

/// Creates a progress bar counting tiles
pub fn create_progress_bar(total_tiles: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_tiles);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} tiles ({percent}%) ETA: {eta}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Progress bar fed by the preloader's progress callback
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_tiles: u64, message: &str) -> Self {
        eprintln!("{message}");
        Self {
            pb: create_progress_bar(total_tiles),
        }
    }

    /// Callback that moves the bar; the length follows the reported total
    pub fn callback(&self) -> PreloadProgress {
        let pb = self.pb.clone();
        Arc::new(move |done, total| {
            let (done, total) = (done as u64, total as u64);
            if pb.length().unwrap_or(0) != total {
                pb.set_length(total);
            }
            pb.set_position(done);
            if done >= total {
                pb.finish_with_message("corridor loaded");
            }
        })
    }
}

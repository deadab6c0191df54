//! Audio capture for dictation.
//!
//! A continuously running input tap feeds a pre-roll ring buffer; episodes
//! splice that window onto their front and run through signal conditioning
//! when they end. Uses CPAL for capture.

pub mod conditioning;
pub mod engine;
pub mod levels;

pub use engine::{
    run_level_publisher, CaptureEngine, CaptureError, SampleRouter, DEFAULT_PREROLL_SECS,
    TARGET_SAMPLE_RATE,
};
pub use levels::{LevelMeter, LevelVector, LEVEL_BUCKETS};

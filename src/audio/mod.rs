//! Audio I/O module for capturing and playing back audio samples.
//!
//! Cross-platform capture and playback via cpal, with rubato-based
//! resampling whenever the device rate differs from the pipeline rate.

mod capture;
mod playback;
pub mod resampler;
pub mod util;

pub use capture::Capturer;
pub use playback::Player;

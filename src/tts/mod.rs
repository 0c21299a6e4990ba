//! Text-to-speech module using sherpa-rs.
//!
//! Synthesizes spoken clinical responses using Kokoro models.

mod synthesizer;

pub use synthesizer::{Synthesizer, split_sentences};

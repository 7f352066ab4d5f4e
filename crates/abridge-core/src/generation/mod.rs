//! Constrained sequence generation: beam search plus logits processors

pub mod beam;
pub mod params;
pub mod processors;

pub use beam::{BeamOutput, BeamSearch, DecodeStep};
pub use params::{GenerationParams, SpecialTokenIds, DEFAULT_LENGTH_PENALTY, DEFAULT_NUM_BEAMS};

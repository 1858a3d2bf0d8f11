mod backends;
mod evaluator;
mod scorer;

pub use backends::{HttpScorer, StubScorer};
pub use evaluator::{ClipEvaluator, ClipVerdict};
pub use scorer::FrameScorer;

//! Person detection over JPEG-encoded frames.
//!
//! A `Classifier` returns every label it sees with a confidence on a 0..100 scale.
//! `MatchRule` reduces that list to a single frame score: the highest confidence of
//! the match label at or above the threshold, or 0 when there is none.

mod backend;
mod backends;
mod result;

pub use backend::Classifier;
pub use backends::{HttpClassifier, HttpClassifierConfig, StubClassifier};
pub use result::{
    person_confidence, LabelScore, MatchRule, DEFAULT_MATCH_LABEL, DEFAULT_MIN_CONFIDENCE,
};

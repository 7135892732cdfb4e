use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::Classifier;
use crate::detect::result::{LabelScore, DEFAULT_MATCH_LABEL};

/// Offline classifier for demos and tests.
///
/// The person confidence is derived from a hash of the image, so the same frame
/// always gets the same score. `fixed` pins every score to one value.
pub struct StubClassifier {
    fixed: Option<f32>,
}

impl StubClassifier {
    pub fn new() -> Self {
        Self { fixed: None }
    }

    pub fn fixed(confidence: f32) -> Self {
        Self {
            fixed: Some(confidence),
        }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn score(&self, jpeg: &[u8]) -> Result<Vec<LabelScore>> {
        let confidence = match self.fixed {
            Some(value) => value,
            None => {
                let digest: [u8; 32] = Sha256::digest(jpeg).into();
                let raw = u16::from_be_bytes([digest[0], digest[1]]);
                (raw as f32 / u16::MAX as f32) * 100.0
            }
        };
        Ok(vec![LabelScore::new(DEFAULT_MATCH_LABEL, confidence)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_scores_are_deterministic_and_in_range() -> Result<()> {
        let classifier = StubClassifier::new();
        let a = classifier.score(b"frame-a")?;
        let again = classifier.score(b"frame-a")?;
        assert_eq!(a, again);
        assert!((0.0..=100.0).contains(&a[0].confidence));
        Ok(())
    }

    #[test]
    fn fixed_scores_ignore_the_image() -> Result<()> {
        let classifier = StubClassifier::fixed(90.0);
        assert_eq!(classifier.score(b"x")?[0].confidence, 90.0);
        assert_eq!(classifier.score(b"y")?[0].confidence, 90.0);
        Ok(())
    }
}

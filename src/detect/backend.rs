use anyhow::Result;

use crate::detect::result::LabelScore;

/// Image classifier trait.
///
/// Implementations are shared by every stream's processor thread and must not
/// keep the image beyond the `score` call.
pub trait Classifier: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Score a JPEG image. Confidences are percentages (0..100).
    fn score(&self, jpeg: &[u8]) -> Result<Vec<LabelScore>>;
}

use serde::{Deserialize, Serialize};

pub const DEFAULT_MATCH_LABEL: &str = "person";
pub const DEFAULT_MIN_CONFIDENCE: f32 = 75.0;

/// One label reported by a classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    #[serde(alias = "Name", alias = "name")]
    pub label: String,
    #[serde(alias = "Confidence", alias = "score")]
    pub confidence: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Which label counts as a detection, and from what confidence on.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRule {
    pub label: String,
    pub min_confidence: f32,
}

impl Default for MatchRule {
    fn default() -> Self {
        Self {
            label: DEFAULT_MATCH_LABEL.to_string(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl MatchRule {
    /// Highest confidence among matching labels, or 0.0 when nothing matches.
    pub fn confidence(&self, labels: &[LabelScore]) -> f32 {
        labels
            .iter()
            .filter(|l| l.label.eq_ignore_ascii_case(&self.label))
            .filter(|l| l.confidence.is_finite() && l.confidence >= self.min_confidence)
            .map(|l| l.confidence)
            .fold(0.0, f32::max)
    }
}

/// `MatchRule::default()` applied to `labels`.
pub fn person_confidence(labels: &[LabelScore]) -> f32 {
    MatchRule::default().confidence(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_below_threshold_scores_zero() {
        let labels = vec![LabelScore::new("Person", 74.9)];
        assert_eq!(person_confidence(&labels), 0.0);
    }

    #[test]
    fn threshold_is_inclusive_and_case_insensitive() {
        let labels = vec![LabelScore::new("PERSON", 75.0)];
        assert_eq!(person_confidence(&labels), 75.0);
    }

    #[test]
    fn maximum_matching_confidence_wins() {
        let labels = vec![
            LabelScore::new("Person", 81.5),
            LabelScore::new("Car", 99.0),
            LabelScore::new("person", 92.25),
            LabelScore::new("Human", 97.0),
        ];
        assert_eq!(person_confidence(&labels), 92.25);
    }

    #[test]
    fn custom_rule_uses_its_own_label() {
        let rule = MatchRule {
            label: "dog".to_string(),
            min_confidence: 50.0,
        };
        let labels = vec![LabelScore::new("Dog", 55.0), LabelScore::new("Person", 99.0)];
        assert_eq!(rule.confidence(&labels), 55.0);
    }

    #[test]
    fn empty_label_list_scores_zero() {
        assert_eq!(person_confidence(&[]), 0.0);
    }

    #[test]
    fn parses_rekognition_style_fields() -> anyhow::Result<()> {
        let parsed: LabelScore = serde_json::from_str(r#"{"Name":"Person","Confidence":88.0}"#)?;
        assert_eq!(parsed, LabelScore::new("Person", 88.0));
        Ok(())
    }
}

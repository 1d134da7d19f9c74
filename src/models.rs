use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Generation difficulty the quiz was produced with; scheduling ignores it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" | "e" => Some(Difficulty::Easy),
            "medium" | "m" | "normal" => Some(Difficulty::Medium),
            "hard" | "h" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

/// A quiz together with its spaced-repetition schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewableItem {
    pub id: i64,
    pub owner_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub difficulty: Difficulty,
    pub source_url: Option<String>,
    pub review_count: u32,
    /// Performance of the most recent scheduled attempt, in `[0, 1]`
    pub last_performance: Option<f64>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub next_review_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ReviewableItem {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at <= now
    }
}

// Fields supplied by the caller when a quiz is created
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub title: String,
    pub summary: Option<String>,
    pub difficulty: Difficulty,
    pub source_url: Option<String>,
}

impl NewItem {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// What the learner submitted for one question.
///
/// Serialized untagged, so `2` is an option index and `"paris"` is free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmittedAnswer {
    Choice(u32),
    Text(String),
}

/// One answered question inside an attempt.
///
/// Fields beyond the typed core are kept in `extra` and round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub question_index: u32,
    pub submitted: SubmittedAnswer,
    pub correct: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
impl AnswerEntry {
    pub fn new(question_index: u32, submitted: SubmittedAnswer, correct: bool) -> Self {
        Self {
            question_index,
            submitted,
            correct,
            extra: serde_json::Map::new(),
        }
    }
}

/// Immutable record of one completed review session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAttempt {
    pub id: i64,
    pub item_id: i64,
    pub owner_id: String,
    pub score: u32,
    pub total_questions: u32,
    pub answers: Vec<AnswerEntry>,
    pub time_taken_seconds: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

impl ReviewAttempt {
    pub fn performance(&self) -> f64 {
        // Stored attempts are validated on insert, so this cannot fail
        crate::scheduler::performance(self.score, self.total_questions).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub item_id: i64,
    pub owner_id: String,
    pub score: u32,
    pub total_questions: u32,
    pub answers: Vec<AnswerEntry>,
    pub time_taken_seconds: Option<f64>,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    mod difficulty_tests {
        use super::*;

        #[test]
        fn as_str_returns_correct_values() {
            assert_eq!(Difficulty::Easy.as_str(), "easy");
            assert_eq!(Difficulty::Medium.as_str(), "medium");
            assert_eq!(Difficulty::Hard.as_str(), "hard");
        }

        #[test]
        fn from_str_valid_inputs() {
            assert_eq!(Difficulty::from_str("easy"), Some(Difficulty::Easy));
            assert_eq!(Difficulty::from_str("M"), Some(Difficulty::Medium));
            assert_eq!(Difficulty::from_str(" Hard "), Some(Difficulty::Hard));
        }

        #[test]
        fn from_str_invalid_returns_none() {
            assert_eq!(Difficulty::from_str("extreme"), None);
            assert_eq!(Difficulty::from_str(""), None);
        }

        #[test]
        fn default_is_medium() {
            assert_eq!(Difficulty::default(), Difficulty::Medium);
        }

        #[test]
        fn serializes_lowercase() {
            let json = serde_json::to_string(&Difficulty::Hard).unwrap();
            assert_eq!(json, "\"hard\"");
        }
    }

    mod answer_tests {
        use super::*;

        #[test]
        fn submitted_number_is_choice() {
            let answer: SubmittedAnswer = serde_json::from_str("2").unwrap();
            assert_eq!(answer, SubmittedAnswer::Choice(2));
        }

        #[test]
        fn submitted_string_is_text() {
            let answer: SubmittedAnswer = serde_json::from_str("\"mitochondria\"").unwrap();
            assert_eq!(answer, SubmittedAnswer::Text("mitochondria".to_string()));
        }

        #[test]
        fn entry_keeps_unknown_fields_in_extra() {
            let raw = r#"{"question_index":0,"submitted":1,"correct":true,"hint_used":true}"#;
            let entry: AnswerEntry = serde_json::from_str(raw).unwrap();
            assert_eq!(entry.question_index, 0);
            assert!(entry.correct);
            assert_eq!(entry.extra.get("hint_used"), Some(&serde_json::json!(true)));

            let back = serde_json::to_value(&entry).unwrap();
            assert_eq!(back["hint_used"], serde_json::json!(true));
        }

        #[test]
        fn entry_without_extra_serializes_only_core_fields() {
            let entry = AnswerEntry::new(3, SubmittedAnswer::Text("b".into()), false);
            let value = serde_json::to_value(&entry).unwrap();
            assert_eq!(
                value,
                serde_json::json!({"question_index": 3, "submitted": "b", "correct": false})
            );
        }

        #[test]
        fn entry_missing_correct_flag_is_rejected() {
            let raw = r#"{"question_index":0,"submitted":1}"#;
            assert!(serde_json::from_str::<AnswerEntry>(raw).is_err());
        }
    }

    mod item_tests {
        use super::*;

        fn make_item(next_review_at: DateTime<Utc>) -> ReviewableItem {
            let created = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
            ReviewableItem {
                id: 1,
                owner_id: "learner".to_string(),
                title: "Cell biology".to_string(),
                summary: None,
                difficulty: Difficulty::Medium,
                source_url: None,
                review_count: 0,
                last_performance: None,
                last_reviewed_at: None,
                next_review_at,
                created_at: created,
            }
        }

        #[test]
        fn is_due_includes_exact_boundary() {
            let at = Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap();
            let item = make_item(at);
            assert!(item.is_due(at));
            assert!(!item.is_due(at - chrono::TimeDelta::milliseconds(1)));
        }

        #[test]
        fn new_item_titled_uses_defaults() {
            let item = NewItem::titled("Photosynthesis");
            assert_eq!(item.title, "Photosynthesis");
            assert_eq!(item.difficulty, Difficulty::Medium);
            assert!(item.summary.is_none());
            assert!(item.source_url.is_none());
        }
    }

    mod attempt_tests {
        use super::*;

        fn attempt(score: u32, total_questions: u32) -> ReviewAttempt {
            ReviewAttempt {
                id: 1,
                item_id: 1,
                owner_id: "learner".to_string(),
                score,
                total_questions,
                answers: vec![],
                time_taken_seconds: None,
                completed_at: Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap(),
            }
        }

        #[test]
        fn performance_is_score_over_total() {
            assert!((attempt(8, 10).performance() - 0.8).abs() < f64::EPSILON);
        }

        #[test]
        fn performance_matches_scheduler() {
            for (score, total) in [(0, 1), (7, 10), (9, 10), (17, 20), (3, 3)] {
                assert_eq!(
                    attempt(score, total).performance(),
                    crate::scheduler::performance(score, total).unwrap()
                );
            }
        }
    }

    mod json_output_tests {
        use super::*;

        #[test]
        fn ok_with_number() {
            let output = JsonOutput::ok(42);
            assert!(output.success);
            assert_eq!(output.data, Some(42));
            assert!(output.error.is_none());
        }

        #[test]
        fn err_with_owned_string() {
            let output = JsonOutput::<()>::err(String::from("Item not found: 3"));
            assert!(!output.success);
            assert!(output.data.is_none());
            assert_eq!(output.error, Some("Item not found: 3".to_string()));
        }

        #[test]
        fn serializes_ok_correctly() {
            let output = JsonOutput::ok("test");
            let json = serde_json::to_string(&output).unwrap();
            assert!(json.contains("\"success\":true"));
            assert!(json.contains("\"data\":\"test\""));
            assert!(json.contains("\"error\":null"));
        }

        #[test]
        fn serializes_err_correctly() {
            let output = JsonOutput::<()>::err("failure");
            let json = serde_json::to_string(&output).unwrap();
            assert!(json.contains("\"success\":false"));
            assert!(json.contains("\"data\":null"));
            assert!(json.contains("\"error\":\"failure\""));
        }
    }
}

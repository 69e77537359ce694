//! Review moderation oracle.
//!
//! `ModerationClient` is the collaborator boundary; `LocalModerationClient`
//! is a deterministic heuristic standing in until an ML model is wired up.
//! A veto is a structured verdict, not an error: callers branch on `allowed`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const MODERATION_LABELS: [&str; 4] = [
    "OFFENSIVE_LANGUAGE",
    "PERSONAL_ATTACK",
    "IRRELEVANT_CONTENT",
    "SAFE",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationVerdict {
    pub allowed: bool,
    pub blocked_reasons: Vec<String>,
    pub scores: BTreeMap<String, f64>,
    pub message: String,
    pub model_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[async_trait]
pub trait ModerationClient: Send + Sync {
    async fn evaluate(
        &self,
        text: &str,
        teacher_name: &str,
        course_title: &str,
    ) -> ModerationVerdict;
}

/// Keyword / pattern heuristic moderation.
pub struct LocalModerationClient {
    block_threshold: f64,
    model_version: String,
}

const OFFENSIVE_KEYWORDS: &[&str] = &[
    "idiot", "stupid", "dumb", "trash", "hate", "awful", "useless", "terrible", "sucks",
];

const ATTACK_SUBJECTS: &[&str] = &["you", "he", "she", "they", "professor"];
const ATTACK_INSULTS: &[&str] = &["idiot", "moron", "loser", "failure"];
const TEACHER_CONTEXT_INSULTS: &[&str] = &["idiot", "sucks", "awful", "terrible"];

const IRRELEVANT_KEYWORDS: &[&str] = &[
    "dorm", "cafeteria", "parking", "football", "party", "housing",
];

impl Default for LocalModerationClient {
    fn default() -> Self {
        Self {
            block_threshold: 0.55,
            model_version: "local-heuristic-v1".to_string(),
        }
    }
}

impl LocalModerationClient {
    pub fn new(block_threshold: f64, model_version: &str) -> Self {
        Self {
            block_threshold,
            model_version: model_version.to_string(),
        }
    }

    fn score_offensive(lowered: &str) -> f64 {
        let words: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).collect();
        let hits = OFFENSIVE_KEYWORDS
            .iter()
            .filter(|kw| words.contains(*kw))
            .count();
        (hits as f64 * 0.25).min(1.0)
    }

    fn score_personal_attack(lowered: &str, teacher_name: &str) -> f64 {
        let words: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).collect();
        let mut score: f64 = 0.0;

        let has_subject = ATTACK_SUBJECTS.iter().any(|s| words.contains(s));
        let has_insult = ATTACK_INSULTS.iter().any(|s| words.contains(s));
        if has_subject && has_insult {
            score = score.max(0.7);
        }

        // Naming the teacher alongside an insult is the strongest signal.
        if !teacher_name.is_empty() {
            let teacher = teacher_name.to_lowercase();
            let mentions_teacher = lowered.contains(&teacher);
            let insults_nearby = TEACHER_CONTEXT_INSULTS.iter().any(|s| words.contains(s));
            if mentions_teacher && insults_nearby {
                score = score.max(0.8);
            }
        }

        score.min(1.0)
    }

    fn score_irrelevant(lowered: &str, clean_len: usize, teacher: &str, course: &str) -> f64 {
        let words: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).collect();
        let mut hits = IRRELEVANT_KEYWORDS
            .iter()
            .filter(|kw| words.contains(*kw))
            .count();
        if clean_len < 25 {
            hits += 1;
        }
        let mentions_course = !course.is_empty() && lowered.contains(&course.to_lowercase());
        let mentions_teacher = !teacher.is_empty() && lowered.contains(&teacher.to_lowercase());
        if !mentions_course && !mentions_teacher {
            hits += 1;
        }
        (hits as f64 * 0.2).min(1.0)
    }

    fn build_message(allowed: bool, blocked_reasons: &[String]) -> String {
        if allowed {
            return "Thanks! Your review looks constructive.".to_string();
        }
        let reason = blocked_reasons.first().map(String::as_str).unwrap_or("");
        match reason {
            "OFFENSIVE_LANGUAGE" => {
                "Please remove offensive language and focus on the teaching experience."
            }
            "PERSONAL_ATTACK" => {
                "Keep the feedback about teaching quality instead of personal attacks."
            }
            "IRRELEVANT_CONTENT" => {
                "Please focus on course and teaching details to help other students."
            }
            _ => "We could not approve this review. Please make it about the teaching experience.",
        }
        .to_string()
    }

    fn build_suggestion(teacher: &str, course: &str) -> String {
        let teacher = if teacher.is_empty() {
            "the professor"
        } else {
            teacher
        };
        let course = if course.is_empty() { "the course" } else { course };
        format!(
            "Focus on specific teaching aspects. For example: '{teacher} explained key \
             concepts clearly in {course} and the assignments matched the lectures.'"
        )
    }
}

#[async_trait]
impl ModerationClient for LocalModerationClient {
    async fn evaluate(
        &self,
        text: &str,
        teacher_name: &str,
        course_title: &str,
    ) -> ModerationVerdict {
        let clean = text.trim();
        let lowered = clean.to_lowercase();

        let mut scores: BTreeMap<String, f64> = MODERATION_LABELS
            .iter()
            .map(|label| (label.to_string(), 0.0))
            .collect();

        scores.insert(
            "OFFENSIVE_LANGUAGE".to_string(),
            Self::score_offensive(&lowered),
        );
        scores.insert(
            "PERSONAL_ATTACK".to_string(),
            Self::score_personal_attack(&lowered, teacher_name),
        );
        scores.insert(
            "IRRELEVANT_CONTENT".to_string(),
            Self::score_irrelevant(&lowered, clean.chars().count(), teacher_name, course_title),
        );

        let max_risk = MODERATION_LABELS
            .iter()
            .filter(|l| **l != "SAFE")
            .filter_map(|l| scores.get(*l))
            .fold(0.0_f64, |acc, s| acc.max(*s));
        scores.insert("SAFE".to_string(), (1.0 - max_risk).max(0.0));

        let blocked_reasons: Vec<String> = MODERATION_LABELS
            .iter()
            .filter(|l| **l != "SAFE")
            .filter(|l| scores.get(**l).copied().unwrap_or(0.0) >= self.block_threshold)
            .map(|l| l.to_string())
            .collect();

        let allowed = blocked_reasons.is_empty();
        let message = Self::build_message(allowed, &blocked_reasons);
        let suggestion = if allowed {
            None
        } else {
            Some(Self::build_suggestion(teacher_name, course_title))
        };

        ModerationVerdict {
            allowed,
            blocked_reasons,
            scores,
            message,
            model_version: self.model_version.clone(),
            suggestion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LocalModerationClient {
        LocalModerationClient::default()
    }

    #[tokio::test]
    async fn test_constructive_review_allowed() {
        let verdict = client()
            .evaluate(
                "Professor Rossi explained the Algorithms material clearly and the \
                 assignments matched the lectures very well.",
                "Rossi",
                "Algorithms",
            )
            .await;
        assert!(verdict.allowed);
        assert!(verdict.blocked_reasons.is_empty());
        assert!(verdict.suggestion.is_none());
        assert!(verdict.scores["SAFE"] > 0.5);
    }

    #[tokio::test]
    async fn test_personal_attack_blocked() {
        let verdict = client()
            .evaluate(
                "Professor Rossi is an idiot and his Algorithms class sucks completely.",
                "Rossi",
                "Algorithms",
            )
            .await;
        assert!(!verdict.allowed);
        assert!(verdict
            .blocked_reasons
            .contains(&"PERSONAL_ATTACK".to_string()));
        assert!(verdict.suggestion.is_some());
    }

    #[tokio::test]
    async fn test_offensive_pileup_blocked() {
        let verdict = client()
            .evaluate(
                "This awful terrible useless course is trash, I hate everything about it.",
                "Rossi",
                "Algorithms",
            )
            .await;
        assert!(!verdict.allowed);
        assert!(verdict
            .blocked_reasons
            .contains(&"OFFENSIVE_LANGUAGE".to_string()));
    }

    #[tokio::test]
    async fn test_off_topic_short_text_blocked() {
        // Short, no course or teacher mention, campus-life keywords only.
        let verdict = client()
            .evaluate("parking dorm football", "Rossi", "Algorithms")
            .await;
        assert!(!verdict.allowed);
        assert!(verdict
            .blocked_reasons
            .contains(&"IRRELEVANT_CONTENT".to_string()));
    }

    #[tokio::test]
    async fn test_verdict_serializes_camel_case() {
        let verdict = client()
            .evaluate("short and rude: idiot", "Rossi", "Algorithms")
            .await;
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("blockedReasons"));
        assert!(json.contains("modelVersion"));
    }
}

//! Seed to Spec: subject detection, skills, time budget and guards.

use crate::core::{Spec, ThoughtKind, SCHEMA_VERSION};
use crate::errors::StageError;
use crate::pipeline::{RunState, Stage, StageContext};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Stage name and bundle key.
pub const SPEC_STAGE: &str = "spec";

const SUBJECT_KEYWORDS: &[(&str, &[&str])] = &[
    ("math", &["fraction", "algebra", "geometry", "calculate", "equation", "number", "math", "arithmetic"]),
    ("science", &["experiment", "hypothesis", "observation", "biology", "chemistry", "physics", "lab"]),
    ("ela", &["writing", "reading", "literature", "essay", "story", "grammar", "language"]),
    ("social_studies", &["history", "geography", "government", "culture", "society", "civilization"]),
];

const DEFAULT_SUBJECT: &str = "math";

/// Per-band limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GradeProfile {
    max_minutes: u32,
    vocabulary: &'static str,
    complexity: &'static str,
}

const MIDDLE_SCHOOL: GradeProfile = GradeProfile {
    max_minutes: 60,
    vocabulary: "intermediate",
    complexity: "complex",
};

fn grade_profile(band: &str) -> GradeProfile {
    match band.trim().to_ascii_uppercase().as_str() {
        "K-2" => GradeProfile {
            max_minutes: 30,
            vocabulary: "basic",
            complexity: "simple",
        },
        "3-5" => GradeProfile {
            max_minutes: 45,
            vocabulary: "elementary",
            complexity: "moderate",
        },
        "9-12" => GradeProfile {
            max_minutes: 90,
            vocabulary: "advanced",
            complexity: "sophisticated",
        },
        _ => MIDDLE_SCHOOL,
    }
}

/// Picks the subject with the most keyword hits; ties keep the earlier subject.
fn detect_subject(topic: &str) -> (&'static str, Map<String, Value>) {
    let topic = topic.to_lowercase();
    let mut scores = Map::new();
    let mut best: Option<(&'static str, usize)> = None;
    for (subject, keywords) in SUBJECT_KEYWORDS {
        let score = keywords.iter().filter(|k| topic.contains(*k)).count();
        if score == 0 {
            continue;
        }
        scores.insert((*subject).to_string(), json!(score));
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((subject, score));
        }
    }
    (best.map_or(DEFAULT_SUBJECT, |(s, _)| s), scores)
}

fn any_of(topic: &str, words: &[&str]) -> bool {
    words.iter().any(|w| topic.contains(w))
}

fn extract_skills(topic: &str, subject: &str) -> Vec<String> {
    let topic = topic.to_lowercase();
    let mut skills: Vec<&str> = Vec::new();
    match subject {
        "math" => {
            if topic.contains("fraction") {
                skills.extend(["fraction_operations", "rational_numbers", "equivalent_fractions"]);
            }
            if any_of(&topic, &["add", "subtract", "multiply", "divide"]) {
                skills.push("arithmetic_operations");
            }
            if any_of(&topic, &["graph", "plot", "chart"]) {
                skills.push("data_representation");
            }
            if any_of(&topic, &["equation", "solve", "variable"]) {
                skills.push("algebraic_thinking");
            }
        }
        "science" => {
            skills.push("scientific_method");
            if any_of(&topic, &["experiment", "test", "hypothesis"]) {
                skills.push("experimental_design");
            }
            if any_of(&topic, &["observe", "measure", "data"]) {
                skills.push("data_collection");
            }
            if any_of(&topic, &["conclude", "analyze", "interpret"]) {
                skills.push("data_analysis");
            }
        }
        "ela" => {
            if any_of(&topic, &["write", "essay", "composition"]) {
                skills.push("written_communication");
            }
            if any_of(&topic, &["read", "comprehension", "analyze"]) {
                skills.push("reading_comprehension");
            }
            if any_of(&topic, &["persuade", "argue", "convince"]) {
                skills.push("persuasive_writing");
            }
        }
        "social_studies" => {
            if any_of(&topic, &["history", "past", "timeline"]) {
                skills.push("historical_analysis");
            }
            if any_of(&topic, &["geography", "location", "map"]) {
                skills.push("geographic_reasoning");
            }
            if any_of(&topic, &["government", "citizen", "democracy"]) {
                skills.push("civic_understanding");
            }
        }
        _ => {}
    }
    if skills.is_empty() {
        return vec![format!("foundational_{subject}")];
    }
    skills.into_iter().map(str::to_string).collect()
}

fn build_guards(subject: &str, profile: GradeProfile, constraints: &Map<String, Value>) -> Map<String, Value> {
    let mut guards = Map::new();
    guards.insert("subject_area".into(), json!(subject));
    guards.insert("vocabulary_level".into(), json!(profile.vocabulary));
    guards.insert("complexity_level".into(), json!(profile.complexity));
    guards.insert(
        "content_restrictions".into(),
        json!(["age_appropriate_only", "no_sensitive_topics", "educational_context_required"]),
    );
    guards.insert("safety_flags".into(), json!([]));
    for (k, v) in constraints {
        guards.insert(k.clone(), v.clone());
    }
    match subject {
        "math" => {
            guards.insert("math_constraints".into(), json!(["real_world_context", "appropriate_number_ranges"]));
        }
        "science" => {
            guards.insert("science_constraints".into(), json!(["safe_experiments_only", "age_appropriate_concepts"]));
        }
        _ => {}
    }
    guards
}

/// Builds the [`Spec`] every later stage relies on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpecBuilderStage;

impl SpecBuilderStage {
    /// Creates the stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for SpecBuilderStage {
    fn name(&self) -> &str {
        SPEC_STAGE
    }

    async fn run(&self, mut state: RunState, ctx: &StageContext) -> Result<RunState, StageError> {
        let seed = state.seed.clone();
        let topic = seed.topic.trim();
        if topic.is_empty() {
            return Err(StageError::validation(SPEC_STAGE, "seed topic must not be empty"));
        }
        if seed.duration_min == Some(0) {
            return Err(StageError::validation(SPEC_STAGE, "seed duration_min must be positive"));
        }

        ctx.think(
            &mut state,
            ThoughtKind::Analyzing,
            "Analyzing seed",
            Some(json!({"topic": topic, "grade_band": seed.grade_band})),
        )
        .await?;

        let (subject, scores) = detect_subject(topic);
        let decision = if scores.is_empty() {
            format!("No clear subject match, defaulting to '{subject}'")
        } else {
            format!("Determined subject '{subject}'")
        };
        ctx.think(&mut state, ThoughtKind::Deciding, decision, Some(json!({"subject_scores": scores})))
            .await?;

        let skills = extract_skills(topic, subject);
        ctx.think(
            &mut state,
            ThoughtKind::Processing,
            format!("Identified {} target skills", skills.len()),
            Some(json!({"skills": skills})),
        )
        .await?;

        let profile = grade_profile(&seed.grade_band);
        let time_minutes = seed
            .duration_min
            .map_or(profile.max_minutes, |d| d.min(profile.max_minutes));
        ctx.think(
            &mut state,
            ThoughtKind::Deciding,
            format!("Time allocation: {time_minutes} minutes (band limit {})", profile.max_minutes),
            None,
        )
        .await?;

        let spec = Spec {
            subject: subject.to_string(),
            grade_band: seed.grade_band.trim().to_string(),
            skills,
            time_minutes,
            guards: build_guards(subject, profile, &seed.constraints),
            schema_version: SCHEMA_VERSION.to_string(),
        };

        ctx.think(
            &mut state,
            ThoughtKind::Validating,
            "Spec validation complete",
            Some(json!({
                "subject": spec.subject,
                "skills_count": spec.skills.len(),
                "time_minutes": spec.time_minutes,
            })),
        )
        .await?;

        let value = ctx.store_output(&mut state, &spec)?;
        ctx.publish_artifact(SPEC_STAGE, value).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Seed;
    use crate::errors::StageErrorKind;
    use crate::events::CollectingEventSink;
    use crate::pipeline::PipelineContext;
    use std::sync::Arc;

    async fn run(seed: Seed) -> Result<Spec, StageError> {
        let pipeline = PipelineContext::new(Arc::new(CollectingEventSink::new()));
        let ctx = StageContext::new("r1", SPEC_STAGE, vec![], vec![], &pipeline);
        let state = SpecBuilderStage::new()
            .run(RunState::new("r1", "p1", "c1", seed), &ctx)
            .await?;
        Ok(serde_json::from_value(state.bundle().get(SPEC_STAGE).cloned().unwrap()).unwrap())
    }

    #[test]
    fn test_subject_detection() {
        assert_eq!(detect_subject("Fractions on a number line").0, "math");
        assert_eq!(detect_subject("Design a lab experiment").0, "science");
        assert_eq!(detect_subject("Persuasive essay writing").0, "ela");
        assert_eq!(detect_subject("Ancient civilization history").0, "social_studies");
        assert_eq!(detect_subject("Bake sale").0, "math");
    }

    #[test]
    fn test_skills_have_fallback() {
        assert_eq!(
            extract_skills("fractions", "math"),
            vec!["fraction_operations", "rational_numbers", "equivalent_fractions"]
        );
        assert_eq!(extract_skills("bake sale", "math"), vec!["foundational_math"]);
        assert_eq!(extract_skills("plants", "science"), vec!["scientific_method"]);
    }

    #[tokio::test]
    async fn test_builds_spec_with_band_cap() {
        let spec = run(Seed::new("fractions", "3-5").with_duration(90)).await.unwrap();
        assert_eq!(spec.subject, "math");
        assert_eq!(spec.time_minutes, 45);
        assert_eq!(spec.guards["vocabulary_level"], "elementary");
        assert_eq!(spec.schema_version, "0.1");
    }

    #[tokio::test]
    async fn test_default_time_is_band_limit() {
        let spec = run(Seed::new("fractions", "6-8")).await.unwrap();
        assert_eq!(spec.time_minutes, 60);
    }

    #[tokio::test]
    async fn test_rejects_blank_topic_and_zero_duration() {
        let err = run(Seed::new("  ", "6-8")).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Validation);
        let err = run(Seed::new("fractions", "6-8").with_duration(0)).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Validation);
    }
}

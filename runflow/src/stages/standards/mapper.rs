//! Generate, filter, reverse-validate, retry once.

use super::grade::{code_grade, parse_span, GradeBand};
use crate::core::StandardTarget;
use crate::errors::GenerationError;
use crate::generation::{parse_json, GenerationProvider, GenerationRequest, Message, Usage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, warn};

/// Attempts per mapping call: the first try and one narrowed retry.
pub const MAX_ATTEMPTS: usize = 2;

const MAPPER_SYSTEM_PROMPT: &str = "You map K-12 project specs to CCSS-M-like standards. \
Return a JSON array of at most 3 objects with keys code, description, evidence_note. \
Only include standards whose grade lies inside the requested grade band.";

const JUDGE_SYSTEM_PROMPT: &str = "You infer which grades a set of standards belongs to. \
Looking only at the standards given, reply with JSON {\"grade_range\": \"<start>-<end>\", \
\"topic_cluster\": \"<short label>\"} naming the 2-grade span they most likely target.";

/// What the mapper needs to know about the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardsInput {
    /// Subject from the spec.
    pub subject: String,
    /// Requested grade band, e.g. `6-8`.
    pub grade_band: String,
    /// Seed topic.
    pub topic: String,
}

/// Why an attempt was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// The generation call failed or its content was unreadable.
    Generation {
        /// Failure detail.
        message: String,
    },
    /// No candidate survived the grade filter.
    FilteredOut {
        /// Codes that were discarded.
        dropped: Vec<String>,
    },
    /// The judgment call failed or its content was unreadable.
    Judgment {
        /// Failure detail.
        message: String,
    },
    /// The inferred span could not be parsed.
    UnparseableSpan {
        /// Raw span text.
        inferred: String,
    },
    /// The inferred span reaches outside the requested band.
    OutOfBand {
        /// Inferred span text.
        inferred: String,
        /// Requested band.
        band: String,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generation { message } => write!(f, "generation failed: {message}"),
            Self::FilteredOut { dropped } if dropped.is_empty() => {
                write!(f, "no complete candidates were returned")
            }
            Self::FilteredOut { dropped } => {
                write!(f, "every candidate was out of band ({})", dropped.join(", "))
            }
            Self::Judgment { message } => write!(f, "reverse validation failed: {message}"),
            Self::UnparseableSpan { inferred } => {
                write!(f, "reverse validation returned an unreadable span '{inferred}'")
            }
            Self::OutOfBand { inferred, band } => {
                write!(f, "inferred span {inferred} is outside band {band}")
            }
        }
    }
}

/// Everything that happened in one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: usize,
    /// Narrowing hint sent with this attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Payload sent to the generator.
    pub request: Value,
    /// Raw generator output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Generator token usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Complete candidates parsed from the response.
    pub candidates: Vec<StandardTarget>,
    /// Candidates that passed the grade filter.
    pub kept: Vec<StandardTarget>,
    /// Span inferred by the judgment call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferred_span: Option<String>,
    /// Topic cluster inferred by the judgment call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_cluster: Option<String>,
    /// Why the attempt was rejected; `None` when accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
}

/// The accepted mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingOutcome {
    /// Accepted targets, capped.
    pub targets: Vec<StandardTarget>,
    /// Every attempt made, in order.
    pub attempts: Vec<AttemptRecord>,
}

/// Why mapping failed.
#[derive(Debug)]
pub enum MappingFailure {
    /// The generator returned nothing at all. Not retried.
    Empty {
        /// Attempts made, the last one being empty.
        attempts: Vec<AttemptRecord>,
    },
    /// Both attempts were rejected for their content.
    Exhausted {
        /// Both attempts.
        attempts: Vec<AttemptRecord>,
    },
    /// No attempt got usable output from the generator.
    Unavailable {
        /// Both attempts.
        attempts: Vec<AttemptRecord>,
        /// The last generator failure.
        error: GenerationError,
    },
}

impl MappingFailure {
    /// Attempts made before giving up.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Empty { attempts }
            | Self::Exhausted { attempts }
            | Self::Unavailable { attempts, .. } => attempts,
        }
    }
}

impl fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty { .. } => write!(f, "{}", GenerationError::EmptyResponse),
            Self::Exhausted { attempts } => {
                write!(f, "no in-band standards after {} attempts", attempts.len())?;
                for a in attempts {
                    if let Some(rejection) = &a.rejection {
                        write!(f, "; attempt {}: {rejection}", a.attempt)?;
                    }
                }
                Ok(())
            }
            Self::Unavailable { attempts, error } => {
                write!(f, "generation failed on all {} attempts: {error}", attempts.len())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    evidence_note: Option<String>,
}

impl RawCandidate {
    fn complete(self) -> Option<StandardTarget> {
        let field = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Some(StandardTarget::new(
            field(self.code)?,
            field(self.description)?,
            field(self.evidence_note)?,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct Judgment {
    #[serde(default)]
    grade_range: Option<String>,
    #[serde(default)]
    topic_cluster: Option<String>,
}

enum Generated {
    Empty,
    Candidates(Vec<StandardTarget>),
}

enum AttemptResult {
    Accepted(Vec<StandardTarget>),
    /// The reason is on the record.
    Rejected,
    /// The generator call failed or returned unreadable content.
    Unavailable(GenerationError),
    Empty,
}

/// Maps a spec to grade-band standards with one narrowed retry.
#[derive(Clone, Copy)]
pub struct StandardsMapper<'a> {
    provider: &'a dyn GenerationProvider,
    temperature: Option<f64>,
    max_standards: usize,
}

impl<'a> StandardsMapper<'a> {
    /// Creates a mapper.
    #[must_use]
    pub fn new(provider: &'a dyn GenerationProvider, max_standards: usize) -> Self {
        Self {
            provider,
            temperature: None,
            max_standards,
        }
    }

    /// Sets the sampling temperature for both calls.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Runs the mapping.
    pub async fn map(&self, input: &StandardsInput) -> Result<MappingOutcome, MappingFailure> {
        let band = GradeBand::parse(&input.grade_band);
        let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(MAX_ATTEMPTS);
        let mut last_error: Option<GenerationError> = None;

        for number in 1..=MAX_ATTEMPTS {
            let hint = attempts
                .last()
                .and_then(|a| a.rejection.as_ref())
                .map(|r| retry_hint(r, band, &input.topic));
            let mut record = AttemptRecord {
                attempt: number,
                request: mapper_payload(input, hint.as_deref()),
                hint,
                ..AttemptRecord::default()
            };

            match self.attempt(input, band, &mut record).await {
                AttemptResult::Accepted(mut targets) => {
                    targets.truncate(self.max_standards);
                    attempts.push(record);
                    return Ok(MappingOutcome { targets, attempts });
                }
                AttemptResult::Rejected => {
                    if let Some(rejection) = &record.rejection {
                        warn!(attempt = number, %rejection, "standards attempt rejected");
                    }
                    attempts.push(record);
                }
                AttemptResult::Unavailable(error) => {
                    warn!(attempt = number, %error, "standards generation failed");
                    attempts.push(record);
                    last_error = Some(error);
                }
                AttemptResult::Empty => {
                    attempts.push(record);
                    return Err(MappingFailure::Empty { attempts });
                }
            }
        }
        let all_generation = attempts
            .iter()
            .all(|a| matches!(a.rejection, Some(Rejection::Generation { .. })));
        match last_error {
            Some(error) if all_generation => Err(MappingFailure::Unavailable { attempts, error }),
            _ => Err(MappingFailure::Exhausted { attempts }),
        }
    }

    async fn attempt(
        &self,
        input: &StandardsInput,
        band: GradeBand,
        record: &mut AttemptRecord,
    ) -> AttemptResult {
        let candidates = match self.generate(record).await {
            Ok(Generated::Empty) => return AttemptResult::Empty,
            Ok(Generated::Candidates(c)) => c,
            Err(err) => {
                record.rejection = Some(Rejection::Generation {
                    message: err.to_string(),
                });
                return AttemptResult::Unavailable(err);
            }
        };
        record.candidates.clone_from(&candidates);

        let (kept, dropped) = filter_in_band(candidates, band);
        debug!(kept = kept.len(), dropped = dropped.len(), %band, "grade filter applied");
        if kept.is_empty() {
            record.rejection = Some(Rejection::FilteredOut { dropped });
            return AttemptResult::Rejected;
        }
        record.kept.clone_from(&kept);

        let judgment = match self.judge(&kept, &input.topic).await {
            Ok(j) => j,
            Err(err) => {
                record.rejection = Some(Rejection::Judgment {
                    message: err.to_string(),
                });
                return AttemptResult::Rejected;
            }
        };
        record.topic_cluster = judgment.topic_cluster;
        let inferred = judgment.grade_range.unwrap_or_default();
        record.inferred_span = Some(inferred.clone());

        let Some(span) = parse_span(&inferred) else {
            record.rejection = Some(Rejection::UnparseableSpan { inferred });
            return AttemptResult::Rejected;
        };
        if !band.contains_span(span) {
            record.rejection = Some(Rejection::OutOfBand {
                inferred,
                band: band.to_string(),
            });
            return AttemptResult::Rejected;
        }
        AttemptResult::Accepted(kept)
    }

    fn request(&self, system: &str, user: String) -> GenerationRequest {
        let mut request = GenerationRequest::new(vec![Message::system(system), Message::user(user)]);
        request.temperature = self.temperature;
        request
    }

    async fn generate(&self, record: &mut AttemptRecord) -> Result<Generated, GenerationError> {
        let request = self.request(MAPPER_SYSTEM_PROMPT, record.request.to_string());
        let response = self.provider.generate(request).await?;
        record.usage = response.usage;
        record.response = Some(response.content.clone());

        if response.content.trim().is_empty() {
            return Ok(Generated::Empty);
        }
        let items = candidate_items(parse_json::<Value>(&response.content)?)?;
        if items.is_empty() {
            return Ok(Generated::Empty);
        }
        let candidates = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RawCandidate>(item).ok())
            .filter_map(RawCandidate::complete)
            .collect();
        Ok(Generated::Candidates(candidates))
    }

    async fn judge(&self, kept: &[StandardTarget], topic: &str) -> Result<Judgment, GenerationError> {
        let listed: Vec<Value> = kept
            .iter()
            .map(|t| json!({"code": t.code, "description": t.description}))
            .collect();
        let payload = json!({"topic": topic, "standards": listed});
        let response = self
            .provider
            .generate(self.request(JUDGE_SYSTEM_PROMPT, payload.to_string()))
            .await?;
        parse_json(&response.content)
    }
}

/// Accepts a bare array or an object wrapping one under `standards`.
fn candidate_items(value: Value) -> Result<Vec<Value>, GenerationError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("standards") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(GenerationError::Parse("expected a JSON array of standards".to_string())),
        },
        _ => Err(GenerationError::Parse("expected a JSON array of standards".to_string())),
    }
}

/// Splits candidates into those inside the band and the codes dropped.
fn filter_in_band(candidates: Vec<StandardTarget>, band: GradeBand) -> (Vec<StandardTarget>, Vec<String>) {
    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for candidate in candidates {
        let keep = match code_grade(&candidate.code) {
            Some(grade) => band.contains(grade),
            None => !band.is_constrained(),
        };
        if keep {
            kept.push(candidate);
        } else {
            dropped.push(candidate.code);
        }
    }
    (kept, dropped)
}

fn mapper_payload(input: &StandardsInput, hint: Option<&str>) -> Value {
    let mut payload = json!({
        "subject": input.subject,
        "grade_band": input.grade_band,
        "topic": input.topic,
        "instructions": "Return 1-3 standards as a JSON array of {code, description, evidence_note}.",
    });
    if let (Some(hint), Some(map)) = (hint, payload.as_object_mut()) {
        map.insert("retry_hint".to_string(), json!(hint));
    }
    payload
}

fn retry_hint(previous: &Rejection, band: GradeBand, topic: &str) -> String {
    format!(
        "The previous mapping was rejected because {previous}; only return standards clearly within grades {band} and aligned to '{topic}'."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    fn input(band: &str) -> StandardsInput {
        StandardsInput {
            subject: "math".into(),
            grade_band: band.into(),
            topic: "fractions".into(),
        }
    }

    fn candidates(codes: &[&str]) -> String {
        let items: Vec<Value> = codes
            .iter()
            .map(|c| json!({"code": c, "description": format!("desc {c}"), "evidence_note": "shows work"}))
            .collect();
        Value::Array(items).to_string()
    }

    fn judgment(span: &str) -> String {
        json!({"grade_range": span, "topic_cluster": "ratios"}).to_string()
    }

    #[tokio::test]
    async fn test_filter_keeps_in_band_code() {
        let provider = ScriptedProvider::new()
            .respond(candidates(&["5.NF.1", "7.G.3", "9.EE.2"]))
            .respond(judgment("7-8"));
        let outcome = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap();

        let codes: Vec<&str> = outcome.targets.iter().map(|t| t.code.as_str()).collect();
        assert_eq!(codes, vec!["7.G.3"]);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].inferred_span.as_deref(), Some("7-8"));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_out_of_band_judgment_retries_with_hint() {
        let provider = ScriptedProvider::new()
            .respond(candidates(&["6.RP.1"]))
            .respond(judgment("5-6"))
            .respond(candidates(&["7.RP.2"]))
            .respond(judgment("7-8"));
        let outcome = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap();

        assert_eq!(outcome.targets[0].code, "7.RP.2");
        assert_eq!(outcome.attempts.len(), 2);
        let retry = provider.requests()[2].user_prompt().unwrap_or_default().to_string();
        assert!(retry.contains("retry_hint"));
        assert!(retry.contains("5-6"));
        assert!(outcome.attempts[1].hint.is_some());
    }

    #[tokio::test]
    async fn test_filtered_out_twice_fails_after_two_generations() {
        let provider = ScriptedProvider::new()
            .respond(candidates(&["3.NF.1"]))
            .respond(candidates(&["10.A.1"]));
        let err = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap_err();

        assert!(matches!(err, MappingFailure::Exhausted { .. }));
        assert_eq!(err.attempts().len(), 2);
        assert_eq!(provider.calls(), 2);
        let message = err.to_string();
        assert!(message.contains("attempt 1"));
        assert!(message.contains("attempt 2"));
        assert!(message.contains("3.NF.1"));
    }

    #[tokio::test]
    async fn test_empty_response_is_not_retried() {
        let provider = ScriptedProvider::new().respond("   ").respond(candidates(&["7.G.3"]));
        let err = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap_err();
        assert!(matches!(err, MappingFailure::Empty { .. }));
        assert_eq!(provider.calls(), 1);

        let provider = ScriptedProvider::new().respond("```json\n[]\n```");
        let err = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap_err();
        assert!(matches!(err, MappingFailure::Empty { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_span_rejects_attempt() {
        let provider = ScriptedProvider::new()
            .respond(candidates(&["7.G.3"]))
            .respond(judgment("middle grades"))
            .respond(candidates(&["7.G.3"]))
            .respond("not json");
        let err = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap_err();
        let attempts = err.attempts();
        assert!(matches!(attempts[0].rejection, Some(Rejection::UnparseableSpan { .. })));
        assert!(matches!(attempts[1].rejection, Some(Rejection::Judgment { .. })));
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_transport_error_is_retried() {
        let provider = ScriptedProvider::new()
            .fail(GenerationError::RateLimited)
            .respond(candidates(&["8.EE.1"]))
            .respond(judgment("8"));
        let outcome = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap();
        assert_eq!(outcome.targets.len(), 1);
        assert!(matches!(outcome.attempts[0].rejection, Some(Rejection::Generation { .. })));
    }

    #[tokio::test]
    async fn test_generation_failing_twice_is_unavailable() {
        let provider = ScriptedProvider::new()
            .fail(GenerationError::RateLimited)
            .respond("this is not json at all");
        let err = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap_err();
        assert_eq!(provider.calls(), 2);
        assert_eq!(err.attempts().len(), 2);
        assert!(matches!(
            err,
            MappingFailure::Unavailable {
                error: GenerationError::Parse(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_generation_failure_then_filtered_out_is_exhausted() {
        let provider = ScriptedProvider::new()
            .fail(GenerationError::RateLimited)
            .respond(candidates(&["3.NF.1"]));
        let err = StandardsMapper::new(&provider, 3).map(&input("6-8")).await.unwrap_err();
        assert!(matches!(err, MappingFailure::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_incomplete_candidates_dropped_and_list_capped() {
        let mut items: Vec<Value> = ["6.A.1", "6.A.2", "7.A.3", "8.A.4"]
            .iter()
            .map(|c| json!({"code": c, "description": "d", "evidence_note": "e"}))
            .collect();
        items.insert(0, json!({"code": "6.X.1", "description": " ", "evidence_note": "e"}));
        let provider = ScriptedProvider::new()
            .respond(json!({"standards": items}).to_string())
            .respond(judgment("6-7"));
        let outcome = StandardsMapper::new(&provider, 2).map(&input("6-8")).await.unwrap();

        let codes: Vec<&str> = outcome.targets.iter().map(|t| t.code.as_str()).collect();
        assert_eq!(codes, vec!["6.A.1", "6.A.2"]);
        assert_eq!(outcome.attempts[0].candidates.len(), 4);
    }

    #[tokio::test]
    async fn test_codes_without_grade_need_open_band() {
        let provider = ScriptedProvider::new()
            .respond(candidates(&["HSA.CED.1"]))
            .respond(judgment("9-10"));
        let outcome = StandardsMapper::new(&provider, 3).map(&input("")).await.unwrap();
        assert_eq!(outcome.targets[0].code, "HSA.CED.1");

        let (kept, dropped) = filter_in_band(
            vec![StandardTarget::new("HSA.CED.1", "d", "e")],
            GradeBand::parse("9-12"),
        );
        assert!(kept.is_empty());
        assert_eq!(dropped, vec!["HSA.CED.1"]);
    }
}

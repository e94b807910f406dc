//! Built-in model catalog.

use inference_common::{names, LatencyClass, ModeRateLimits, ModelLimits, ModelSpec};
use serde_json::json;

use crate::config::{EndpointConfig, ModelsConfig, RateLimitConfig};

struct Builtin {
    name: &'static str,
    description: &'static str,
    latency_class: LatencyClass,
    input_schema: serde_json::Value,
    output_schema: serde_json::Value,
}

fn builtins() -> Vec<Builtin> {
    vec![
        Builtin {
            name: names::JOB_MATCHING,
            description: "Scores how well a candidate profile matches a job posting",
            latency_class: LatencyClass::Standard,
            input_schema: json!({
                "type": "object",
                "required": ["candidate", "job"],
                "properties": {
                    "candidate": {"type": "object"},
                    "job": {"type": "object"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "score": {"type": "number"},
                    "matchedSkills": {"type": "array", "items": {"type": "string"}},
                    "missingSkills": {"type": "array", "items": {"type": "string"}}
                }
            }),
        },
        Builtin {
            name: names::SKILLS_EXTRACTION,
            description: "Extracts normalized skills from free text such as a CV or posting",
            latency_class: LatencyClass::Fast,
            input_schema: json!({
                "type": "object",
                "required": ["text"],
                "properties": {"text": {"type": "string"}}
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "skills": {"type": "array", "items": {"type": "object"}}
                }
            }),
        },
        Builtin {
            name: names::PERSONALITY_ANALYSIS,
            description: "Scores personality traits from questionnaire answers or text",
            latency_class: LatencyClass::Standard,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "answers": {"type": "array"},
                    "text": {"type": "string"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"traits": {"type": "object"}}
            }),
        },
        Builtin {
            name: names::SEMANTIC_SIMILARITY,
            description: "Semantic similarity between two texts",
            latency_class: LatencyClass::Fast,
            input_schema: json!({
                "type": "object",
                "required": ["a", "b"],
                "properties": {
                    "a": {"type": "string"},
                    "b": {"type": "string"}
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"similarity": {"type": "number"}}
            }),
        },
        Builtin {
            name: names::CAREER_PREDICTION,
            description: "Predicts likely next career steps from a work history",
            latency_class: LatencyClass::Slow,
            input_schema: json!({
                "type": "object",
                "required": ["history"],
                "properties": {"history": {"type": "array"}}
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"predictions": {"type": "array"}}
            }),
        },
    ]
}

fn limits_for(
    name: &str,
    latency_class: LatencyClass,
    models: &ModelsConfig,
    rate_limit: &RateLimitConfig,
) -> ModelLimits {
    let overrides = models.overrides.get(name);
    ModelLimits {
        max_input_bytes: overrides
            .and_then(|o| o.max_input_bytes)
            .unwrap_or(models.max_input_bytes),
        timeout_secs: overrides
            .and_then(|o| o.timeout_secs)
            .unwrap_or_else(|| latency_class.default_timeout_secs()),
        max_concurrency: overrides
            .and_then(|o| o.max_concurrency)
            .unwrap_or(models.max_concurrency)
            .max(1),
        rate_limit: ModeRateLimits {
            realtime_per_minute: rate_limit.realtime_per_minute,
            stream_per_minute: rate_limit.stream_per_minute,
            batch_per_hour: rate_limit.batch_per_hour,
        },
    }
}

/// Catalog entries for the built-in models, with configured overrides applied.
pub fn builtin_specs(models: &ModelsConfig, rate_limit: &RateLimitConfig) -> Vec<ModelSpec> {
    builtins()
        .into_iter()
        .map(|b| ModelSpec {
            name: b.name.to_string(),
            description: b.description.to_string(),
            input_schema: b.input_schema,
            output_schema: b.output_schema,
            latency_class: b.latency_class,
            limits: limits_for(b.name, b.latency_class, models, rate_limit),
        })
        .collect()
}

/// Catalog entry for a configured model-specific endpoint.
///
/// Endpoint schemas are not known to the gateway and accept any JSON value.
pub fn endpoint_spec(
    name: &str,
    endpoint: &EndpointConfig,
    models: &ModelsConfig,
    rate_limit: &RateLimitConfig,
) -> ModelSpec {
    ModelSpec {
        name: name.to_string(),
        description: endpoint.description.clone(),
        input_schema: json!({}),
        output_schema: json!({}),
        latency_class: endpoint.latency_class,
        limits: limits_for(name, endpoint.latency_class, models, rate_limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelOverride;

    #[test]
    fn test_builtin_specs_cover_all_names() {
        let specs = builtin_specs(&ModelsConfig::default(), &RateLimitConfig::default());
        let spec_names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(spec_names, names::BUILTIN.to_vec());
    }

    #[test]
    fn test_default_timeout_follows_latency_class() {
        let specs = builtin_specs(&ModelsConfig::default(), &RateLimitConfig::default());
        let career = specs.iter().find(|s| s.name == names::CAREER_PREDICTION).unwrap();
        assert_eq!(career.latency_class, LatencyClass::Slow);
        assert_eq!(career.limits.timeout_secs, 120);
    }

    #[test]
    fn test_overrides_apply() {
        let mut models = ModelsConfig::default();
        models.overrides.insert(
            names::JOB_MATCHING.to_string(),
            ModelOverride {
                timeout_secs: Some(3),
                max_concurrency: Some(0),
                ..Default::default()
            },
        );
        let specs = builtin_specs(&models, &RateLimitConfig::default());
        let matching = specs.iter().find(|s| s.name == names::JOB_MATCHING).unwrap();
        assert_eq!(matching.limits.timeout_secs, 3);
        // A zero gate would deadlock every caller.
        assert_eq!(matching.limits.max_concurrency, 1);
    }

    #[test]
    fn test_endpoint_spec() {
        let endpoint = EndpointConfig {
            description: "Ranks CVs".to_string(),
            latency_class: LatencyClass::Fast,
            backend_url: None,
        };
        let spec = endpoint_spec("cv-ranker", &endpoint, &ModelsConfig::default(), &RateLimitConfig::default());
        assert_eq!(spec.name, "cv-ranker");
        assert_eq!(spec.limits.timeout_secs, 10);
    }
}

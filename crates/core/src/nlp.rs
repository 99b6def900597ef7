use crate::auth::HEALTHCARE_SCOPE;
use crate::client::upstream_error;
use crate::traits::{EntityAnalyzer, TokenProvider};
use crate::{
    AnalysisError, ConfigError, EntityAnalysis, MedicalEntity, MedicalEntityMention,
    StructuredEntitySummary,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

pub const SERVICE_NAME: &str = "healthcare-nlp";

const GOOGLE_HEALTHCARE_BASE: &str = "https://healthcare.googleapis.com/v1/";

#[derive(Debug, Clone)]
pub struct HealthcareNlpConfig {
    pub endpoint: Url,
}

impl HealthcareNlpConfig {
    pub fn from_endpoint(endpoint: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
        })
    }

    /// `projects/{project}/locations/{location}/services/nlp:analyzeEntities`
    pub fn for_location(project: &str, location: &str) -> Result<Self, ConfigError> {
        if project.trim().is_empty() {
            return Err(ConfigError::Missing("healthcare project"));
        }
        if location.trim().is_empty() {
            return Err(ConfigError::Missing("healthcare location"));
        }

        let endpoint = Url::parse(GOOGLE_HEALTHCARE_BASE)?.join(&format!(
            "projects/{}/locations/{}/services/nlp:analyzeEntities",
            project.trim(),
            location.trim()
        ))?;
        Ok(Self { endpoint })
    }
}

/// Client for the Cloud Healthcare `nlp:analyzeEntities` method.
pub struct HealthcareNlpClient<T> {
    client: Client,
    endpoint: Url,
    tokens: T,
}

impl<T> HealthcareNlpClient<T>
where
    T: TokenProvider + Send + Sync,
{
    pub fn new(client: Client, config: HealthcareNlpConfig, tokens: T) -> Self {
        Self {
            client,
            endpoint: config.endpoint,
            tokens,
        }
    }
}

#[async_trait]
impl<T> EntityAnalyzer for HealthcareNlpClient<T>
where
    T: TokenProvider + Send + Sync,
{
    async fn analyze(&self, text: &str) -> Result<EntityAnalysis, AnalysisError> {
        let token = self.tokens.access_token(HEALTHCARE_SCOPE).await?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(token)
            .json(&json!({ "document_content": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(upstream_error(SERVICE_NAME, response).await);
        }

        let payload: Value = response.json().await?;
        let analysis = analysis_from_response(&payload);

        info!(
            mentions = analysis.mentions.len(),
            entities = analysis.entities.len(),
            "entity analysis complete"
        );
        debug!(structured = %analysis.summary.text, "structured entities");

        Ok(analysis)
    }
}

/// Maps an `analyzeEntities` response. Missing or mistyped fields fall back
/// to placeholders one field at a time; one bad mention never drops the rest.
pub fn analysis_from_response(payload: &Value) -> EntityAnalysis {
    let mentions = payload
        .get("entityMentions")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(mention_from_value).collect::<Vec<_>>())
        .unwrap_or_default();

    let entities = payload
        .get("entities")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(entity_from_value).collect::<Vec<_>>())
        .unwrap_or_default();

    let summary = render_mentions(&mentions);
    EntityAnalysis {
        mentions,
        entities,
        summary,
    }
}

fn mention_from_value(value: &Value) -> MedicalEntityMention {
    let linked_entity_ids = value
        .get("linkedEntities")
        .and_then(Value::as_array)
        .map(|linked| {
            linked
                .iter()
                .map(|entity| text_or(entity.get("entityId"), "Unknown Entity"))
                .collect()
        })
        .unwrap_or_default();

    MedicalEntityMention {
        id: text_or(value.get("mentionId"), "Unknown ID"),
        mention_type: text_or(value.get("type"), "Unknown Type"),
        text: text_or(value.pointer("/text/content"), "Unknown Text"),
        linked_entity_ids,
        confidence: value
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|confidence| confidence.is_finite())
            .unwrap_or(0.0),
    }
}

fn entity_from_value(value: &Value) -> MedicalEntity {
    MedicalEntity {
        id: text_or(value.get("entityId"), "Unknown Entity ID"),
        preferred_term: text_or(value.get("preferredTerm"), "Unknown Term"),
        vocabulary_codes: value
            .get("vocabularyCodes")
            .and_then(Value::as_array)
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn text_or(value: Option<&Value>, fallback: &str) -> String {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Renders mentions into the block handed to the summarizer as context.
pub fn render_mentions(mentions: &[MedicalEntityMention]) -> StructuredEntitySummary {
    let blocks = mentions
        .iter()
        .map(|mention| {
            let linked = if mention.linked_entity_ids.is_empty() {
                "No linked entities".to_string()
            } else {
                format!("Linked Entities: {}", mention.linked_entity_ids.join(", "))
            };

            format!(
                "- ID: {}\n- Type: {}\n- Text: \"{}\"\n- {}\n- Confidence: {:.2}",
                mention.id, mention.mention_type, mention.text, linked, mention.confidence
            )
        })
        .collect::<Vec<_>>();

    let text = if blocks.is_empty() {
        String::new()
    } else {
        format!("Extracted Entities:\n\n{}", blocks.join("\n\n"))
    };

    StructuredEntitySummary {
        text,
        mention_count: mentions.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::test_support::{local_http_client, stub_server, StubServer};
    use axum::http::header::AUTHORIZATION;
    use axum::http::StatusCode;

    #[test]
    fn full_response_is_rendered_deterministically() {
        let payload = json!({
            "entityMentions": [
                {
                    "mentionId": "1",
                    "type": "PROBLEM",
                    "text": { "content": "Diabetes Type 2", "beginOffset": 12 },
                    "linkedEntities": [{ "entityId": "UMLS/C0011860" }, { "entityId": "UMLS/C0011849" }],
                    "confidence": 0.9871
                },
                {
                    "mentionId": "2",
                    "type": "LAB_VALUE",
                    "text": { "content": "140 mg" },
                    "confidence": 0.5
                }
            ],
            "entities": [
                { "entityId": "UMLS/C0011860", "preferredTerm": "Diabetes Mellitus, Non-Insulin-Dependent", "vocabularyCodes": ["ICD10CM/E11"] }
            ]
        });

        let analysis = analysis_from_response(&payload);
        assert_eq!(analysis.mentions.len(), 2);
        assert_eq!(analysis.entities[0].vocabulary_codes, vec!["ICD10CM/E11"]);
        assert_eq!(
            analysis.summary.text,
            "Extracted Entities:\n\n\
             - ID: 1\n- Type: PROBLEM\n- Text: \"Diabetes Type 2\"\n- Linked Entities: UMLS/C0011860, UMLS/C0011849\n- Confidence: 0.99\n\n\
             - ID: 2\n- Type: LAB_VALUE\n- Text: \"140 mg\"\n- No linked entities\n- Confidence: 0.50"
        );
        assert_eq!(analysis.summary.mention_count, 2);
    }

    #[test]
    fn missing_confidence_renders_as_zero() {
        let payload = json!({
            "entityMentions": [{ "mentionId": "7", "type": "MEDICINE", "text": { "content": "metformin" } }]
        });

        let analysis = analysis_from_response(&payload);
        assert_eq!(analysis.mentions[0].confidence, 0.0);
        assert!(analysis.summary.text.ends_with("- Confidence: 0.00"));
    }

    #[test]
    fn malformed_fields_fall_back_per_field() {
        let payload = json!({
            "entityMentions": [
                { "type": 42, "text": "not an object", "linkedEntities": [{}, { "entityId": "X" }], "confidence": "high" },
                { "mentionId": "ok", "type": "PROBLEM", "text": { "content": "anemia" }, "confidence": 0.7 }
            ],
            "entities": [{}]
        });

        let analysis = analysis_from_response(&payload);
        let broken = &analysis.mentions[0];
        assert_eq!(broken.id, "Unknown ID");
        assert_eq!(broken.mention_type, "Unknown Type");
        assert_eq!(broken.text, "Unknown Text");
        assert_eq!(broken.linked_entity_ids, vec!["Unknown Entity", "X"]);
        assert_eq!(broken.confidence, 0.0);

        assert_eq!(analysis.mentions[1].text, "anemia");
        assert_eq!(analysis.entities[0].preferred_term, "Unknown Term");
    }

    #[test]
    fn response_without_mentions_renders_nothing() {
        let analysis = analysis_from_response(&json!({}));
        assert!(analysis.mentions.is_empty());
        assert!(analysis.summary.text.is_empty());
        assert_eq!(analysis.summary.mention_count, 0);
    }

    #[test]
    fn endpoint_is_built_from_project_and_location() -> Result<(), ConfigError> {
        let config = HealthcareNlpConfig::for_location("clinic-123", "asia-south1")?;
        assert_eq!(
            config.endpoint.as_str(),
            "https://healthcare.googleapis.com/v1/projects/clinic-123/locations/asia-south1/services/nlp:analyzeEntities"
        );
        assert!(HealthcareNlpConfig::for_location("", "asia-south1").is_err());
        Ok(())
    }

    fn stub_client(
        server: &StubServer,
    ) -> Result<HealthcareNlpClient<StaticTokenProvider>, ConfigError> {
        let endpoint = format!(
            "{}/v1/projects/clinic-123/locations/us-central1/services/nlp:analyzeEntities",
            server.base_url
        );
        Ok(HealthcareNlpClient::new(
            local_http_client()?,
            HealthcareNlpConfig::from_endpoint(&endpoint)?,
            StaticTokenProvider::new("test-token"),
        ))
    }

    #[tokio::test]
    async fn analyze_posts_the_document_with_a_token() -> Result<(), Box<dyn std::error::Error>> {
        let server = stub_server(
            StatusCode::OK,
            r#"{"entityMentions":[{"mentionId":"1","type":"PROBLEM","text":{"content":"diabetes"},"confidence":0.8}]}"#,
        )
        .await;

        let analysis = stub_client(&server)?.analyze("Patient has diabetes").await?;
        assert_eq!(analysis.mentions.len(), 1);
        assert_eq!(analysis.mentions[0].text, "diabetes");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].path,
            "/v1/projects/clinic-123/locations/us-central1/services/nlp:analyzeEntities"
        );
        assert_eq!(requests[0].headers[AUTHORIZATION], "Bearer test-token");
        assert_eq!(requests[0].body, json!({ "document_content": "Patient has diabetes" }));
        Ok(())
    }

    #[tokio::test]
    async fn outage_keeps_the_google_error_message() -> Result<(), Box<dyn std::error::Error>> {
        let server = stub_server(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error":{"code":503,"message":"The service is currently unavailable.","status":"UNAVAILABLE"}}"#,
        )
        .await;

        let error = stub_client(&server)?
            .analyze("Patient has diabetes")
            .await
            .expect_err("503 must fail");

        match error {
            AnalysisError::Upstream {
                service,
                status,
                message,
            } => {
                assert_eq!(service, SERVICE_NAME);
                assert_eq!(status, 503);
                assert_eq!(message.as_deref(), Some("The service is currently unavailable."));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
        Ok(())
    }
}

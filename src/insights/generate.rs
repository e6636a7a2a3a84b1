use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::InsightsError;
use crate::llm::LLMProvider;

pub const MIN_INSIGHTS: usize = 3;
pub const MAX_INSIGHTS: usize = 4;

const INSIGHTS_PROMPT: &str = "You are a performance analyst reviewing an organisation's KPI scorecard.\n\
Study the KPI data below and return between 3 and 4 insights.\n\
Respond with JSON only, in exactly this shape:\n\
{\"insights\": [{\"title\": \"...\", \"description\": \"one sentence\", \"recommendation\": \"...\", \"icon\": \"...\"}]}\n\
The icon must be one of: trending-up, trending-down, alert-triangle, check-circle, target, lightbulb.\n\n\
KPI data:\n";

const SUMMARY_PROMPT: &str = "You are writing for the executive team.\n\
Summarise the KPI data below in a short paragraph of plain text: overall performance, \
the strongest and weakest perspectives, and one priority for next quarter. \
Do not use markdown or bullet points.\n\n\
KPI data:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsightIcon {
    TrendingUp,
    TrendingDown,
    AlertTriangle,
    CheckCircle,
    Target,
    Lightbulb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub description: String,
    pub recommendation: String,
    pub icon: InsightIcon,
}

#[derive(Debug, Deserialize)]
struct InsightsEnvelope {
    insights: Vec<Insight>,
}

pub fn insights_prompt(snapshot: &Value) -> String {
    format!("{INSIGHTS_PROMPT}{snapshot}")
}

pub fn summary_prompt(snapshot: &Value) -> String {
    format!("{SUMMARY_PROMPT}{snapshot}")
}

/// Models like to wrap JSON in a ```json fence even when told not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_insights(raw: &str) -> Result<Vec<Insight>, String> {
    let envelope: InsightsEnvelope =
        serde_json::from_str(strip_code_fence(raw)).map_err(|e| format!("schema mismatch: {e}"))?;
    let insights = envelope.insights;

    if !(MIN_INSIGHTS..=MAX_INSIGHTS).contains(&insights.len()) {
        return Err(format!(
            "expected {MIN_INSIGHTS}-{MAX_INSIGHTS} insights, got {}",
            insights.len()
        ));
    }
    if let Some(blank) = insights
        .iter()
        .position(|i| i.title.trim().is_empty() || i.description.trim().is_empty())
    {
        return Err(format!("insight #{blank} has an empty title or description"));
    }
    Ok(insights)
}

async fn call_model(
    provider: &dyn LLMProvider,
    prompt: &str,
    config: &Value,
    timeout: Duration,
) -> Result<String, String> {
    match tokio::time::timeout(timeout, provider.generate(prompt, config)).await {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no response within {timeout:?}")),
    }
}

/// One request, no retry. The caller sees a generic message either way.
pub async fn generate_insights(
    provider: &dyn LLMProvider,
    snapshot: &Value,
    timeout: Duration,
) -> Result<Vec<Insight>, InsightsError> {
    let config = serde_json::json!({ "response_format": "json" });
    let raw = call_model(provider, &insights_prompt(snapshot), &config, timeout)
        .await
        .map_err(|e| {
            error!("Insight generation failed: {e}");
            InsightsError::InsightsFailed(e)
        })?;
    debug!("Insight response: {raw}");

    parse_insights(&raw).map_err(|e| {
        error!("Rejected insight response: {e}");
        InsightsError::InsightsFailed(e)
    })
}

pub async fn generate_summary(
    provider: &dyn LLMProvider,
    snapshot: &Value,
    timeout: Duration,
) -> Result<String, InsightsError> {
    let raw = call_model(provider, &summary_prompt(snapshot), &Value::Null, timeout)
        .await
        .map_err(|e| {
            error!("Summary generation failed: {e}");
            InsightsError::SummaryFailed(e)
        })?;

    let summary = raw.trim();
    if summary.is_empty() {
        error!("Summary generation returned empty text");
        return Err(InsightsError::SummaryFailed("empty summary".to_string()));
    }
    Ok(summary.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::MockLLMProvider;
    use serde_json::json;

    const THREE_INSIGHTS: &str = r#"{"insights": [
        {"title": "Revenue ahead", "description": "Financial KPIs beat target.", "recommendation": "Keep pricing.", "icon": "trending-up"},
        {"title": "Churn rising", "description": "Customer churn is above target.", "recommendation": "Review support SLAs.", "icon": "alert-triangle"},
        {"title": "Training gap", "description": "Learning KPIs lag.", "recommendation": "Fund the academy.", "icon": "lightbulb"}
    ]}"#;

    #[test]
    fn test_parse_accepts_fenced_json() {
        let fenced = format!("```json\n{THREE_INSIGHTS}\n```");
        let insights = parse_insights(&fenced).unwrap();
        assert_eq!(insights.len(), 3);
        assert_eq!(insights[1].icon, InsightIcon::AlertTriangle);
    }

    #[test]
    fn test_parse_rejects_unknown_icon() {
        let raw = THREE_INSIGHTS.replace("lightbulb", "rocket");
        assert!(parse_insights(&raw).unwrap_err().contains("schema mismatch"));
    }

    #[test]
    fn test_parse_enforces_insight_count() {
        let two = json!({"insights": [
            {"title": "a", "description": "b", "recommendation": "c", "icon": "target"},
            {"title": "d", "description": "e", "recommendation": "f", "icon": "target"}
        ]});
        let err = parse_insights(&two.to_string()).unwrap_err();
        assert!(err.contains("got 2"));
    }

    #[test]
    fn test_strip_code_fence_leaves_plain_text() {
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
    }

    #[test]
    fn test_prompts_embed_snapshot() {
        let snapshot = json!({"total": 12});
        assert!(insights_prompt(&snapshot).ends_with("{\"total\":12}"));
        assert!(summary_prompt(&snapshot).contains("executive"));
    }

    #[tokio::test]
    async fn test_generate_insights_with_mock() {
        let provider = MockLLMProvider::with_response(THREE_INSIGHTS);
        let insights = generate_insights(&provider, &json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(insights[0].title, "Revenue ahead");
    }

    #[tokio::test]
    async fn test_invalid_model_output_is_generic_failure() {
        let provider = MockLLMProvider::with_response("Sorry, I cannot help with that.");
        let err = generate_insights(&provider, &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, InsightsError::InsightsFailed(_)));
    }

    #[tokio::test]
    async fn test_sub_second_timeout_is_reported_in_millis() {
        let provider = MockLLMProvider::with_response("late").with_delay(Duration::from_millis(200));
        let err = generate_summary(&provider, &json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        match err {
            InsightsError::SummaryFailed(detail) => {
                assert_eq!(detail, "no response within 20ms");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_blank_summary_is_rejected() {
        let provider = MockLLMProvider::with_response("   ");
        assert!(generate_summary(&provider, &json!({}), Duration::from_secs(1))
            .await
            .is_err());
    }
}

//! Nutrition analysis boundary.
//!
//! The core talks to a [`NutritionAnalyzer`] trait object; the OpenAI
//! implementation lives here too. Any transport error, timeout, or
//! schema failure is collapsed into the `reject_unrecognized` action —
//! callers never see an error from this module.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisAction {
    Save,
    RejectNoCalories,
    RejectNotFood,
    RejectInsufficientDetail,
    RejectUnrecognized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub amount: String,
    pub calories_kcal: i32,
}

/// Structured analysis result. When `action` is `Save` the nutrition
/// fields are populated; for rejections only `user_message` matters
/// (except `RejectUnrecognized`, which always uses the fixed reply).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NutritionAnalysis {
    pub action: AnalysisAction,
    #[serde(default)]
    pub meal_name: Option<String>,
    #[serde(default)]
    pub calories_kcal: Option<i32>,
    #[serde(default)]
    pub protein_g: Option<f64>,
    #[serde(default)]
    pub carbs_g: Option<f64>,
    #[serde(default)]
    pub fat_g: Option<f64>,
    #[serde(default)]
    pub weight_g: Option<i32>,
    #[serde(default)]
    pub volume_ml: Option<i32>,
    #[serde(default)]
    pub caffeine_mg: Option<i32>,
    #[serde(default)]
    pub likely_ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl NutritionAnalysis {
    pub fn unrecognized() -> Self {
        Self {
            action: AnalysisAction::RejectUnrecognized,
            meal_name: None,
            calories_kcal: None,
            protein_g: None,
            carbs_g: None,
            fat_g: None,
            weight_g: None,
            volume_ml: None,
            caffeine_mg: None,
            likely_ingredients: Vec::new(),
            user_message: None,
            confidence: 0.0,
        }
    }
}

/// Reject absurd values before they reach the store.
pub fn sanity_check(analysis: &NutritionAnalysis) -> Option<&'static str> {
    let kcal = analysis.calories_kcal.unwrap_or(0);
    if !(0..=10_000).contains(&kcal) {
        return Some("calories out of range");
    }
    for grams in [analysis.protein_g, analysis.carbs_g, analysis.fat_g] {
        let g = grams.unwrap_or(0.0);
        if !(0.0..=1_500.0).contains(&g) {
            return Some("macros out of range");
        }
    }
    if analysis.weight_g.unwrap_or(0) < 0 || analysis.volume_ml.unwrap_or(0) < 0 {
        return Some("negative weight or volume");
    }
    if !(0..=5_000).contains(&analysis.caffeine_mg.unwrap_or(0)) {
        return Some("caffeine out of range");
    }
    if analysis.likely_ingredients.iter().any(|i| i.calories_kcal < 0) {
        return Some("negative ingredient calories");
    }
    None
}

#[async_trait]
pub trait NutritionAnalyzer: Send + Sync {
    async fn analyze_text(&self, text: &str, lang: &str) -> NutritionAnalysis;
    async fn analyze_photo(
        &self,
        photo: Bytes,
        caption: Option<&str>,
        lang: &str,
    ) -> NutritionAnalysis;
}

const SYSTEM_PROMPT: &str = "\
You are a nutrition analysis assistant. Analyze the food described or shown \
and return a structured JSON response.

Rules:
1. If the input is clearly food or drink, estimate nutrition and set action=\"save\".
2. If the input has no calories (e.g. water, supplements), set action=\"reject_no_calories\" \
with a brief user_message explaining why.
3. If the input is not food at all, set action=\"reject_not_food\" with user_message.
4. If the food description lacks sufficient detail for a reasonable estimate, \
set action=\"reject_insufficient_detail\" with user_message.
5. If you cannot recognize what was sent, set action=\"reject_unrecognized\" \
(no user_message needed — a fixed reply is used).
6. Prefer rejection over guessing when uncertain.
7. All numeric values must be non-negative. If values seem absurd, reject.
8. If the user provides explicit numbers (kcal, macros, weight, volume), \
trust and pass them through — do NOT overwrite. Still generate meal_name \
and likely_ingredients.
9. Always generate likely_ingredients when action=\"save\" — this is required.
10. confidence should be 0.0-1.0 reflecting your certainty.";

/// OpenAI chat-completions implementation.
#[derive(Clone)]
pub struct OpenAiAnalyzer {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiAnalyzer {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { http, config })
    }

    async fn call(&self, user_content: serde_json::Value) -> NutritionAnalysis {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_content },
            ],
            "response_format": { "type": "json_object" },
        });

        let response = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "openai request failed");
                return NutritionAnalysis::unrecognized();
            }
        };
        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "openai returned error status");
            return NutritionAnalysis::unrecognized();
        }

        let envelope: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "openai response body unreadable");
                return NutritionAnalysis::unrecognized();
            }
        };
        let content = envelope
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        match serde_json::from_str::<NutritionAnalysis>(content) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "openai returned unparseable analysis");
                NutritionAnalysis::unrecognized()
            }
        }
    }
}

#[async_trait]
impl NutritionAnalyzer for OpenAiAnalyzer {
    async fn analyze_text(&self, text: &str, lang: &str) -> NutritionAnalysis {
        let prompt = format!("Respond in language: {lang}.\n\n{text}");
        self.call(serde_json::Value::String(prompt)).await
    }

    async fn analyze_photo(
        &self,
        photo: Bytes,
        caption: Option<&str>,
        lang: &str,
    ) -> NutritionAnalysis {
        let b64 = base64::engine::general_purpose::STANDARD.encode(&photo);
        let mut content = Vec::new();
        if let Some(caption) = caption {
            content.push(serde_json::json!({ "type": "text", "text": caption }));
        }
        content.push(serde_json::json!({ "type": "text", "text": format!("Respond in language: {lang}.") }));
        content.push(serde_json::json!({
            "type": "image_url",
            "image_url": { "url": format!("data:image/jpeg;base64,{b64}") },
        }));
        self.call(serde_json::Value::Array(content)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save_analysis() -> NutritionAnalysis {
        NutritionAnalysis {
            action: AnalysisAction::Save,
            meal_name: Some("Chicken breast".into()),
            calories_kcal: Some(330),
            protein_g: Some(62.0),
            carbs_g: Some(0.0),
            fat_g: Some(7.2),
            weight_g: Some(200),
            volume_ml: None,
            caffeine_mg: None,
            likely_ingredients: vec![Ingredient {
                name: "chicken breast".into(),
                amount: "200 g".into(),
                calories_kcal: 330,
            }],
            user_message: None,
            confidence: 0.9,
        }
    }

    #[test]
    fn action_tags_match_wire_format() {
        let json = r#"{"action":"reject_no_calories","user_message":"just water"}"#;
        let parsed: NutritionAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.action, AnalysisAction::RejectNoCalories);
        assert_eq!(parsed.user_message.as_deref(), Some("just water"));

        let round = serde_json::to_value(AnalysisAction::RejectUnrecognized).unwrap();
        assert_eq!(round, serde_json::json!("reject_unrecognized"));
    }

    #[test]
    fn sanity_accepts_reasonable_values() {
        assert!(sanity_check(&save_analysis()).is_none());
    }

    #[test]
    fn sanity_rejects_absurd_values() {
        let mut a = save_analysis();
        a.calories_kcal = Some(50_000);
        assert!(sanity_check(&a).is_some());

        let mut a = save_analysis();
        a.protein_g = Some(-3.0);
        assert!(sanity_check(&a).is_some());

        let mut a = save_analysis();
        a.weight_g = Some(-1);
        assert!(sanity_check(&a).is_some());
    }

    #[test]
    fn missing_optional_fields_deserialize_with_defaults() {
        let json = r#"{"action":"save","meal_name":"Tea"}"#;
        let parsed: NutritionAnalysis = serde_json::from_str(json).unwrap();
        assert!(parsed.likely_ingredients.is_empty());
        assert_eq!(parsed.confidence, 0.0);
        assert!(sanity_check(&parsed).is_none());
    }
}

use std::collections::BTreeMap;

use serde_json::Value;

use crate::step::ResultField;

/// Aggregate produced by one workflow run.
///
/// `steps` keeps the last payload seen for every wire step name (including
/// names this crate does not know about); the typed fields are the
/// denormalized view the UI renders.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WorkflowResult {
    pub steps: BTreeMap<String, Value>,
    pub core_skills: Vec<Value>,
    pub ai_analysis_markdown: String,
    pub candidate_analysis: Vec<Value>,
    pub ranked_shortlist: Vec<Value>,
    pub detailed_readout: Vec<Value>,
    pub engagement_plan: Vec<Value>,
    pub fairness_guidance: Vec<Value>,
    pub interview_preparation: Vec<Value>,
    /// Messages from non-fatal step errors, keyed by step name.
    pub step_errors: BTreeMap<String, String>,
}

/// Normalized value for one typed field.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum FieldValue {
    Text(String),
    Items(Vec<Value>),
}

impl FieldValue {
    /// Converts a raw payload into the shape `field` stores.
    ///
    /// Sequence fields accept a single object or scalar as a one-item list;
    /// `null` reads as empty.
    pub(crate) fn from_json(field: ResultField, value: Value) -> Self {
        if field.is_text() {
            let text = match value {
                Value::Null => String::new(),
                Value::String(text) => text,
                Value::Object(ref map) => match map.get("markdown").and_then(Value::as_str) {
                    Some(markdown) => markdown.to_string(),
                    None => value.to_string(),
                },
                other => other.to_string(),
            };
            return FieldValue::Text(text);
        }
        let items = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            Value::Object(map) if map.is_empty() => Vec::new(),
            other => vec![other],
        };
        FieldValue::Items(items)
    }

    pub(crate) fn size(&self) -> usize {
        match self {
            FieldValue::Text(text) => text.chars().count(),
            FieldValue::Items(items) => items.len(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl WorkflowResult {
    /// Size of a field: character count for text, item count for sequences.
    pub fn field_size(&self, field: ResultField) -> usize {
        match field {
            ResultField::AiAnalysisMarkdown => self.ai_analysis_markdown.chars().count(),
            other => self.items(other).map_or(0, <[Value]>::len),
        }
    }

    pub fn is_field_empty(&self, field: ResultField) -> bool {
        self.field_size(field) == 0
    }

    /// Whether every typed field is still at its default.
    pub fn is_empty(&self) -> bool {
        ResultField::ALL
            .into_iter()
            .all(|field| self.is_field_empty(field))
    }

    /// Sequence items for `field`, or `None` for the markdown field.
    pub fn items(&self, field: ResultField) -> Option<&[Value]> {
        let items = match field {
            ResultField::CoreSkills => &self.core_skills,
            ResultField::CandidateAnalysis => &self.candidate_analysis,
            ResultField::RankedShortlist => &self.ranked_shortlist,
            ResultField::DetailedReadout => &self.detailed_readout,
            ResultField::EngagementPlan => &self.engagement_plan,
            ResultField::FairnessGuidance => &self.fairness_guidance,
            ResultField::InterviewPreparation => &self.interview_preparation,
            ResultField::AiAnalysisMarkdown => return None,
        };
        Some(items)
    }

    fn items_mut(&mut self, field: ResultField) -> Option<&mut Vec<Value>> {
        let items = match field {
            ResultField::CoreSkills => &mut self.core_skills,
            ResultField::CandidateAnalysis => &mut self.candidate_analysis,
            ResultField::RankedShortlist => &mut self.ranked_shortlist,
            ResultField::DetailedReadout => &mut self.detailed_readout,
            ResultField::EngagementPlan => &mut self.engagement_plan,
            ResultField::FairnessGuidance => &mut self.fairness_guidance,
            ResultField::InterviewPreparation => &mut self.interview_preparation,
            ResultField::AiAnalysisMarkdown => return None,
        };
        Some(items)
    }

    pub(crate) fn set_field(&mut self, field: ResultField, value: FieldValue) {
        match value {
            FieldValue::Text(text) => {
                if field.is_text() {
                    self.ai_analysis_markdown = text;
                }
            }
            FieldValue::Items(items) => {
                if let Some(slot) = self.items_mut(field) {
                    *slot = items;
                }
            }
        }
    }

    /// Folds a terminal `complete` payload into the accumulated result.
    ///
    /// Non-empty terminal fields win; empty or missing ones leave the
    /// accumulated value in place. Returns the fields that changed.
    pub(crate) fn reconcile_terminal(&mut self, data: &Value) -> Vec<ResultField> {
        let Some(map) = data.as_object() else {
            return Vec::new();
        };
        let mut changed = Vec::new();
        for field in ResultField::ALL {
            let Some(raw) = map.get(field.key()) else {
                continue;
            };
            let value = FieldValue::from_json(field, raw.clone());
            if value.is_empty() {
                continue;
            }
            self.set_field(field, value);
            self.steps.insert(field.key().to_string(), raw.clone());
            changed.push(field);
        }
        for (key, raw) in map {
            if raw.is_null() || ResultField::ALL.iter().any(|f| f.key() == key) {
                continue;
            }
            self.steps.insert(key.clone(), raw.clone());
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_fields_normalize_scalars_and_null() {
        assert_eq!(
            FieldValue::from_json(ResultField::RankedShortlist, json!(null)),
            FieldValue::Items(vec![])
        );
        assert_eq!(
            FieldValue::from_json(ResultField::FairnessGuidance, json!({"note": "x"})),
            FieldValue::Items(vec![json!({"note": "x"})])
        );
        assert_eq!(
            FieldValue::from_json(ResultField::CoreSkills, json!([1, 2])),
            FieldValue::Items(vec![json!(1), json!(2)])
        );
    }

    #[test]
    fn markdown_field_accepts_string_or_markdown_object() {
        assert_eq!(
            FieldValue::from_json(ResultField::AiAnalysisMarkdown, json!("# Hi")),
            FieldValue::Text("# Hi".into())
        );
        assert_eq!(
            FieldValue::from_json(ResultField::AiAnalysisMarkdown, json!({"markdown": "# Hi"})),
            FieldValue::Text("# Hi".into())
        );
    }

    #[test]
    fn reconcile_keeps_accumulated_values_when_terminal_is_empty() {
        let mut result = WorkflowResult::default();
        result.set_field(
            ResultField::RankedShortlist,
            FieldValue::Items(vec![json!({"id": "c1"})]),
        );
        let changed = result.reconcile_terminal(&json!({
            "ranked_shortlist": [],
            "engagement_plan": [{"channel": "email"}],
            "summary_version": 2
        }));
        assert_eq!(changed, vec![ResultField::EngagementPlan]);
        assert_eq!(result.ranked_shortlist, vec![json!({"id": "c1"})]);
        assert_eq!(result.engagement_plan.len(), 1);
        assert_eq!(result.steps.get("summary_version"), Some(&json!(2)));
    }

    #[test]
    fn default_result_is_empty() {
        let result = WorkflowResult::default();
        assert!(result.is_empty());
        assert_eq!(result.items(ResultField::AiAnalysisMarkdown), None);
    }
}

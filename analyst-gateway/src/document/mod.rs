//! Structured requirement schemas and the document model they lower into.
//!
//! Three schemas reach the renderer:
//! - [`RequirementsDocument`]: the full `requirements` payload (`data` field)
//! - [`SmartAnalysis`]: the older SMART summary shape
//! - [`AnalysisReport`]: the report extracted from a whole transcript
//!
//! Each implements [`IntoDocument`], producing a [`DocumentModel`] that
//! [`DocxRenderer`] writes to disk.

mod docx;

pub use docx::{adhoc_filename, document_filename, DocxRenderer, RenderError};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Document model
// ============================================================================

/// Renderer-neutral document: a title and ordered sections.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentModel {
    pub title: String,
    pub sections: Vec<Section>,
}

/// A headed section. `level` 1 is a top-level heading, 2 a subsection.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub heading: String,
    pub level: u8,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Paragraph(String),
    Bullet(String),
}

impl Section {
    fn new(heading: impl Into<String>, level: u8) -> Self {
        Self {
            heading: heading.into(),
            level,
            blocks: Vec::new(),
        }
    }

    fn text(heading: impl Into<String>, text: &str) -> Self {
        let mut section = Self::new(heading, 1);
        section.paragraph(text);
        section
    }

    fn list<S: AsRef<str>>(heading: impl Into<String>, level: u8, items: &[S]) -> Self {
        let mut section = Self::new(heading, level);
        for item in items {
            section.bullet(item.as_ref());
        }
        section
    }

    fn values(heading: impl Into<String>, items: &[Value]) -> Self {
        let described: Vec<String> = items
            .iter()
            .map(describe)
            .filter(|s| !s.is_empty())
            .collect();
        Self::list(heading, 1, &described)
    }

    fn paragraph(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.blocks.push(Block::Paragraph(text.to_string()));
        }
    }

    fn bullet(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.blocks.push(Block::Bullet(text.to_string()));
        }
    }
}

/// Lowers a structured schema into a [`DocumentModel`].
pub trait IntoDocument {
    fn to_document(&self) -> DocumentModel;
}

// ============================================================================
// Shared field types
// ============================================================================

/// Scope given either as prose or as in/out lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scope {
    Text(String),
    Split {
        #[serde(default, deserialize_with = "nullable")]
        in_scope: Vec<Value>,
        #[serde(default, deserialize_with = "nullable")]
        out_of_scope: Vec<Value>,
    },
}

impl Default for Scope {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl Scope {
    fn section(&self, heading: &str) -> Section {
        let mut section = Section::new(heading, 1);
        match self {
            Self::Text(text) => section.paragraph(text),
            Self::Split {
                in_scope,
                out_of_scope,
            } => {
                section.paragraph("In Scope:");
                for item in in_scope {
                    section.bullet(&describe(item));
                }
                section.paragraph("Out of Scope:");
                for item in out_of_scope {
                    section.bullet(&describe(item));
                }
            }
        }
        section
    }
}

/// Treat an explicit `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One-line text for a free-form list entry.
///
/// Strings pass through, objects become `key: value` pairs in key order.
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) => items
            .iter()
            .map(describe)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| {
                let text = describe(value);
                (!text.is_empty()).then(|| format!("{}: {text}", key.replace('_', " ")))
            })
            .collect::<Vec<_>>()
            .join("; "),
    }
}

// ============================================================================
// Full requirements schema
// ============================================================================

/// Project header of a [`RequirementsDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    /// Anything else the model put in the header (goal, domain, sponsor...).
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// The `data` object of a `requirements` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementsDocument {
    pub project: ProjectInfo,
    #[serde(default, deserialize_with = "nullable")]
    pub objectives: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub scope: Scope,
    #[serde(default, deserialize_with = "nullable")]
    pub requirements: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub stakeholders: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub constraints: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub functional_requirements: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub non_functional_requirements: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub use_cases: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub user_stories: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub process_flows: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub kpis: Vec<Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub style_guides: Vec<Value>,
}

impl IntoDocument for RequirementsDocument {
    fn to_document(&self) -> DocumentModel {
        let mut overview = Section::new("1. Project Overview", 1);
        overview.paragraph(&self.project.description);
        for (key, value) in &self.project.details {
            let text = describe(value);
            if !text.is_empty() {
                overview.bullet(&format!("{}: {text}", key.replace('_', " ")));
            }
        }

        let title = match self.project.name.trim() {
            "" => "Requirements Document".to_string(),
            name => name.to_string(),
        };

        DocumentModel {
            title,
            sections: vec![
                overview,
                Section::values("2. Objectives", &self.objectives),
                self.scope.section("3. Scope"),
                Section::values("4. Requirements", &self.requirements),
                Section::values("5. Stakeholders", &self.stakeholders),
                Section::values("6. Constraints", &self.constraints),
                Section::values("7. Functional Requirements", &self.functional_requirements),
                Section::values(
                    "8. Non-Functional Requirements",
                    &self.non_functional_requirements,
                ),
                Section::values("9. Use Cases", &self.use_cases),
                Section::values("10. User Stories", &self.user_stories),
                Section::values("11. Process Flows", &self.process_flows),
                Section::values("12. KPIs", &self.kpis),
                Section::values("13. Style Guides", &self.style_guides),
            ],
        }
    }
}

// ============================================================================
// Legacy SMART schema
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartRequirements {
    #[serde(default, deserialize_with = "nullable")]
    pub specific: String,
    #[serde(default, deserialize_with = "nullable")]
    pub measurable: String,
    #[serde(default, deserialize_with = "nullable")]
    pub achievable: String,
    #[serde(default, deserialize_with = "nullable")]
    pub relevant: String,
    #[serde(default, deserialize_with = "nullable")]
    pub time_bound: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    #[serde(default)]
    pub step: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub question: String,
    #[serde(default, deserialize_with = "nullable")]
    pub answer: String,
}

/// Older reply shape with SMART requirements at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartAnalysis {
    pub smart_requirements: SmartRequirements,
    pub summary: String,
    #[serde(default, alias = "answers", deserialize_with = "nullable")]
    pub questions: Vec<QuestionAnswer>,
}

impl IntoDocument for SmartAnalysis {
    fn to_document(&self) -> DocumentModel {
        let smart = &self.smart_requirements;
        let mut requirements = Section::new("2. SMART Requirements", 1);
        for (label, text) in [
            ("Specific", &smart.specific),
            ("Measurable", &smart.measurable),
            ("Achievable", &smart.achievable),
            ("Relevant", &smart.relevant),
            ("Time-bound", &smart.time_bound),
        ] {
            if !text.trim().is_empty() {
                requirements.bullet(&format!("{label}: {text}"));
            }
        }

        let mut interview = Section::new("3. Interview", 1);
        for qa in &self.questions {
            interview.paragraph(&format!("Q{}: {}", qa.step, qa.question));
            interview.bullet(&qa.answer);
        }

        DocumentModel {
            title: "SMART Requirements Analysis".to_string(),
            sections: vec![Section::text("1. Summary", &self.summary), requirements, interview],
        }
    }
}

// ============================================================================
// Transcript report schema
// ============================================================================

/// Report extracted from a full session transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default, deserialize_with = "nullable")]
    pub goal: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub scope: Scope,
    #[serde(default, deserialize_with = "nullable")]
    pub business_rules: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub kpis: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub use_cases: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub user_stories: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub diagrams_desc: Vec<String>,
}

impl IntoDocument for AnalysisReport {
    fn to_document(&self) -> DocumentModel {
        DocumentModel {
            title: "Business Analysis Report".to_string(),
            sections: vec![
                Section::text("1. Goal", &self.goal),
                Section::text("2. Description", &self.description),
                self.scope.section("3. Scope"),
                Section::list("4. Business Rules", 1, &self.business_rules),
                Section::list("5. KPIs", 1, &self.kpis),
                Section::new("6. Analytical Artifacts", 1),
                Section::list("6.1 Use Cases", 2, &self.use_cases),
                Section::list("6.2 User Stories", 2, &self.user_stories),
                Section::list("6.3 Process Diagrams (Descriptions)", 2, &self.diagrams_desc),
            ],
        }
    }
}

// ============================================================================
// Parsed payloads
// ============================================================================

/// Any schema that can back a draft.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRequirements {
    Detailed(RequirementsDocument),
    Legacy(SmartAnalysis),
    Report(AnalysisReport),
}

impl ParsedRequirements {
    /// Draft title. Session-scoped fallbacks when the schema has no name.
    pub fn title(&self, session_id: i64) -> String {
        match self {
            Self::Detailed(doc) if !doc.project.name.trim().is_empty() => {
                doc.project.name.trim().to_string()
            }
            Self::Detailed(_) | Self::Legacy(_) => format!("Session {session_id} Requirements"),
            Self::Report(_) => format!("Session {session_id} Report"),
        }
    }

    /// Human summary stored as the draft content.
    pub fn summary(&self) -> String {
        let text = match self {
            Self::Detailed(doc) => doc.project.description.trim(),
            Self::Legacy(smart) => smart.summary.trim(),
            Self::Report(report) => report.goal.trim(),
        };
        if text.is_empty() {
            "Generated from chat session".to_string()
        } else {
            text.to_string()
        }
    }

    /// Serialized source data kept alongside the draft.
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Detailed(doc) => serde_json::to_string(doc),
            Self::Legacy(smart) => serde_json::to_string(smart),
            Self::Report(report) => serde_json::to_string(report),
        }
    }
}

impl IntoDocument for ParsedRequirements {
    fn to_document(&self) -> DocumentModel {
        match self {
            Self::Detailed(doc) => doc.to_document(),
            Self::Legacy(smart) => smart.to_document(),
            Self::Report(report) => report.to_document(),
        }
    }
}

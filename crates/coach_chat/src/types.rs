//! Core types for the coaching chat system.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coach_directives::ValidatedDirective;

use crate::error::ChatError;

/// Coaching domain. Each domain has its own agent and its own thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    General,
    Nutrition,
    Training,
    Substances,
    Analytics,
    Medical,
    Recovery,
    Lifestyle,
}

impl Domain {
    /// All domains in declaration order.
    pub const ALL: [Domain; 8] = [
        Self::General,
        Self::Nutrition,
        Self::Training,
        Self::Substances,
        Self::Analytics,
        Self::Medical,
        Self::Recovery,
        Self::Lifestyle,
    ];

    /// Domain used when nothing else matches
    pub const DEFAULT: Domain = Domain::General;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Nutrition => "nutrition",
            Self::Training => "training",
            Self::Substances => "substances",
            Self::Analytics => "analytics",
            Self::Medical => "medical",
            Self::Recovery => "recovery",
            Self::Lifestyle => "lifestyle",
        }
    }

    /// Get the display name for this domain's coach
    pub fn display_name(&self, locale: Locale) -> &'static str {
        match (self, locale) {
            (Self::General, Locale::De) => "Allgemeiner Coach",
            (Self::General, Locale::En) => "General Coach",
            (Self::Nutrition, Locale::De) => "Ernährungscoach",
            (Self::Nutrition, Locale::En) => "Nutrition Coach",
            (Self::Training, Locale::De) => "Trainingscoach",
            (Self::Training, Locale::En) => "Training Coach",
            (Self::Substances, Locale::De) => "Substanz-Coach",
            (Self::Substances, Locale::En) => "Substance Coach",
            (Self::Analytics, Locale::De) => "Analyse-Coach",
            (Self::Analytics, Locale::En) => "Analytics Coach",
            (Self::Medical, Locale::De) => "Gesundheitscoach",
            (Self::Medical, Locale::En) => "Health Coach",
            (Self::Recovery, Locale::De) => "Regenerationscoach",
            (Self::Recovery, Locale::En) => "Recovery Coach",
            (Self::Lifestyle, Locale::De) => "Lifestyle-Coach",
            (Self::Lifestyle, Locale::En) => "Lifestyle Coach",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::General => "🧭",
            Self::Nutrition => "🥗",
            Self::Training => "🏋️",
            Self::Substances => "💊",
            Self::Analytics => "📊",
            Self::Medical => "🩺",
            Self::Recovery => "😴",
            Self::Lifestyle => "🌱",
        }
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == needle)
            .ok_or(ChatError::UnknownDomain(needle))
    }
}

/// UI and response language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    De,
    En,
}

impl Locale {
    pub fn code(&self) -> &'static str {
        match self {
            Self::De => "de",
            Self::En => "en",
        }
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Which agent produced an assistant message, and from which knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribution {
    pub domain: Domain,
    pub display_name: String,
    pub icon: String,
    /// Knowledge block id -> version used in the system instruction
    #[serde(default)]
    pub knowledge_versions: BTreeMap<String, String>,
}

/// Lifecycle status of a confirmable action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Executing,
    Executed,
    Failed,
    Rejected,
}

impl ActionStatus {
    /// Terminal statuses remove the action from its message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated directive awaiting (or past) user confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub directive: ValidatedDirective,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    pub fn new(directive: ValidatedDirective) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            directive,
            status: ActionStatus::Pending,
            error: None,
        }
    }

    /// Prompt line shown to the user.
    pub fn describe(&self) -> String {
        format!("{}: {}", self.directive.kind.label(), self.directive.data.summary())
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID (UUID)
    pub id: String,
    pub role: MessageRole,
    /// Display content, directive blocks removed
    pub content: String,
    /// Content including directive blocks, replayed as history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    pub domain: Domain,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub errored: bool,
}

impl Message {
    /// Create a new user message
    pub fn user(domain: Domain, content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, domain, content.into())
    }

    /// Create a new assistant message
    pub fn assistant(domain: Domain, content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, domain, content.into())
    }

    /// Empty assistant message that is about to receive a stream.
    pub fn placeholder(domain: Domain) -> Self {
        let mut message = Self::new(MessageRole::Assistant, domain, String::new());
        message.streaming = true;
        message
    }

    fn new(role: MessageRole, domain: Domain, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            raw_content: None,
            domain,
            created_at: Utc::now(),
            attribution: None,
            actions: Vec::new(),
            streaming: false,
            errored: false,
        }
    }

    /// Text replayed to the generator: raw content when present.
    pub fn history_text(&self) -> &str {
        self.raw_content.as_deref().unwrap_or(&self.content)
    }
}

/// Router verdict for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub domain: Domain,
    /// Confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl RoutingDecision {
    /// True when no keyword matched and the router fell back to a default.
    pub fn is_fallback(&self) -> bool {
        self.matched_keywords.is_empty() && self.confidence < 1.0
    }
}

/// Ranked routing verdict; the first decision is the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiRoutingDecision {
    pub decisions: Vec<RoutingDecision>,
}

impl MultiRoutingDecision {
    pub fn single(decision: RoutingDecision) -> Self {
        Self {
            decisions: vec![decision],
        }
    }

    /// Designated primary target.
    pub fn primary(&self) -> Option<&RoutingDecision> {
        self.decisions.first()
    }

    /// Targets after the primary, in rank order.
    pub fn secondaries(&self) -> &[RoutingDecision] {
        self.decisions.get(1..).unwrap_or(&[])
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.decisions.iter().map(|d| d.domain).collect()
    }

    pub fn is_multi(&self) -> bool {
        self.decisions.len() > 1
    }
}

/// Operating mode shaping training and substance advice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMode {
    #[default]
    Natural,
    Enhanced,
}

/// Stored user profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub gender: Option<String>,
    pub goal: Option<String>,
    pub activity_level: Option<String>,
    pub mode: TrainingMode,
    pub daily_calorie_target: Option<f64>,
    pub protein_target_g: Option<f64>,
    /// Whether onboarding has been completed
    pub setup_complete: bool,
}

/// Today's nutrition totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutritionTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub meals: Vec<String>,
}

/// A detected deviation from the user's targets or normal ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationAlert {
    pub domain: Domain,
    pub message: String,
}

/// Live user data injected into agent instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserContext {
    pub profile: UserProfile,
    pub today: NutritionTotals,
    pub recent_workouts: Vec<String>,
    pub training_plan: Option<String>,
    pub body_measurements: Vec<String>,
    pub blood_pressure: Vec<String>,
    pub active_substances: Vec<String>,
    pub equipment: Vec<String>,
    pub alerts: Vec<DeviationAlert>,
    /// Notes carried over from earlier sessions
    pub session_notes: Vec<String>,
}

//! Keyword-based intent routing.
//!
//! Every domain owns a keyword set. A message scores
//! `weight × matches / sqrt(set size)` per domain, so large vocabularies do
//! not drown out small, precise ones. Greetings and small talk always go to
//! the default domain.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::RouterConfig;
use crate::types::{Domain, MultiRoutingDecision, RoutingDecision};

static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(hi|hallo|hello|hey|huhu|moin|servus|grüß gott|guten (morgen|tag|abend)|good (morning|evening)|danke( dir| schön| sehr)?|vielen dank|thanks|thank you|ok|okay|alles klar|super|wie geht'?s( dir)?|how are you)[\s!.?,:)]*$",
    )
    .expect("greeting pattern is valid")
});

const NUTRITION_KEYWORDS: &[&str] = &[
    "essen", "gegessen", "mahlzeit", "frühstück", "mittagessen", "abendessen", "snack",
    "kalorien", "kcal", "protein", "eiweiß", "kohlenhydrate", "carbs", "fett", "makros",
    "macros", "ernährung", "diät", "hunger", "rezept", "meal", "breakfast", "lunch", "dinner",
    "calories", "nutrition", "diet", "recipe", "food", "skyr", "quark", "joghurt", "haferflocken",
    "müsli", "banane", "apfel", "orange", "reis", "nudeln", "brot", "hähnchen", "chicken", "eier",
    "salat", "shake", "ballaststoffe", "zucker", "getränk", "trinken",
];

const TRAINING_KEYWORDS: &[&str] = &[
    "training", "trainiert", "workout", "übung", "übungen", "satz", "sätze", "wiederholung",
    "reps", "sets", "bankdrücken", "kniebeuge", "squat", "kreuzheben", "deadlift", "bench",
    "klimmzug", "muskel", "hypertrophie", "kraft", "strength", "cardio", "laufen", "joggen",
    "running", "radfahren", "schwimmen", "gym", "fitnessstudio", "trainingsplan", "split",
    "hantel", "dumbbell", "langhantel", "ausdauer", "plan",
];

const SUBSTANCE_KEYWORDS: &[&str] = &[
    "supplement", "kreatin", "creatine", "vitamin", "magnesium", "zink", "omega", "koffein",
    "caffeine", "dosis", "dose", "dosierung", "einnahme", "eingenommen", "testosteron",
    "testosterone", "trt", "peptid", "peptide", "steroid", "zyklus", "cycle", "injektion",
    "spritze", "kapsel", "tablette", "mg", "mcg",
];

const ANALYTICS_KEYWORDS: &[&str] = &[
    "statistik", "statistics", "auswertung", "analyse", "analysis", "trend", "verlauf",
    "fortschritt", "progress", "entwicklung", "durchschnitt", "average", "diagramm", "chart",
    "vergleich", "compare", "bilanz", "wochenbericht", "report", "zusammenfassung", "summary",
    "letzte woche", "last week", "letzten monat",
];

const MEDICAL_KEYWORDS: &[&str] = &[
    "blutdruck", "blood pressure", "puls", "pulse", "blutwerte", "blutbild", "arzt", "doctor",
    "schmerz", "pain", "symptom", "krank", "medikament", "medication", "cholesterin", "blutzucker",
    "glucose", "herz", "heart", "hämatokrit", "leberwerte", "diagnose", "verletzung", "injury",
];

const RECOVERY_KEYWORDS: &[&str] = &[
    "schlaf", "schlafen", "geschlafen", "sleep", "müde", "tired", "erholung", "recovery",
    "regeneration", "muskelkater", "soreness", "pause", "ruhetag", "rest day", "dehnen",
    "stretching", "mobility", "massage", "sauna", "hrv", "übertraining", "erschöpft",
];

const LIFESTYLE_KEYWORDS: &[&str] = &[
    "stress", "motivation", "gewohnheit", "habit", "routine", "alltag", "arbeit", "work",
    "job", "zeitmanagement", "meditation", "achtsamkeit", "mindset", "wasser", "water",
    "schritte", "steps", "reise", "travel", "urlaub", "ziel", "goal",
];

const GENERAL_KEYWORDS: &[&str] = &[
    "hilfe", "help", "frage", "question", "erklär", "explain", "was kannst du", "what can you",
    "profil", "profile", "einstellung", "settings", "app",
];

/// Keyword set of a domain.
pub fn keywords_for(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::General => GENERAL_KEYWORDS,
        Domain::Nutrition => NUTRITION_KEYWORDS,
        Domain::Training => TRAINING_KEYWORDS,
        Domain::Substances => SUBSTANCE_KEYWORDS,
        Domain::Analytics => ANALYTICS_KEYWORDS,
        Domain::Medical => MEDICAL_KEYWORDS,
        Domain::Recovery => RECOVERY_KEYWORDS,
        Domain::Lifestyle => LIFESTYLE_KEYWORDS,
    }
}

/// Stateless classifier over the domain keyword sets.
#[derive(Debug, Clone, Default)]
pub struct IntentRouter {
    config: RouterConfig,
}

impl IntentRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Whether the text is a greeting or small talk.
    pub fn is_greeting(text: &str) -> bool {
        GREETING_RE.is_match(text.trim().to_lowercase().as_str())
    }

    /// Single best target.
    pub fn classify(&self, text: &str) -> RoutingDecision {
        let normalized = text.trim().to_lowercase();
        if GREETING_RE.is_match(&normalized) {
            return self.greeting_decision();
        }

        self.score(&normalized)
            .into_iter()
            .next()
            .unwrap_or_else(|| self.fallback_decision())
    }

    /// Every target clearing the threshold, best first.
    ///
    /// Analytics is never combined with other domains: when it scores highest
    /// it runs alone, otherwise it is dropped.
    pub fn classify_multi(&self, text: &str) -> MultiRoutingDecision {
        let normalized = text.trim().to_lowercase();
        if GREETING_RE.is_match(&normalized) {
            return MultiRoutingDecision::single(self.greeting_decision());
        }

        let mut scored = self.score(&normalized);
        let Some(top) = scored.first() else {
            return MultiRoutingDecision::single(self.fallback_decision());
        };

        if top.domain == Domain::Analytics {
            scored.truncate(1);
        } else {
            scored.retain(|d| d.domain != Domain::Analytics);
            scored.truncate(self.config.max_targets.max(1));
        }

        MultiRoutingDecision { decisions: scored }
    }

    /// Domains above the threshold, sorted by score descending. Ties keep
    /// declaration order.
    fn score(&self, normalized: &str) -> Vec<RoutingDecision> {
        let mut scored = Vec::new();

        for domain in Domain::ALL {
            let keywords = keywords_for(domain);
            if keywords.is_empty() {
                continue;
            }
            let matched: Vec<String> = keywords
                .iter()
                .filter(|k| normalized.contains(*k))
                .map(|k| k.to_string())
                .collect();
            if matched.is_empty() {
                continue;
            }

            let raw = matched.len() as f64 / (keywords.len() as f64).sqrt();
            let score = self.config.weight(domain) * raw;
            debug!(
                "Routing score {}={:.3} ({} of {} keywords)",
                domain,
                score,
                matched.len(),
                keywords.len()
            );

            if score > self.config.threshold {
                scored.push((score, domain, matched));
            }
        }

        // sort_by is stable, so equal scores keep declaration order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        scored
            .into_iter()
            .map(|(score, domain, matched)| RoutingDecision {
                domain,
                confidence: score.min(1.0),
                reasoning: Some(format!("matched {}", matched.join(", "))),
                matched_keywords: matched,
            })
            .collect()
    }

    fn greeting_decision(&self) -> RoutingDecision {
        RoutingDecision {
            domain: Domain::DEFAULT,
            confidence: 1.0,
            matched_keywords: Vec::new(),
            reasoning: Some("greeting".to_string()),
        }
    }

    fn fallback_decision(&self) -> RoutingDecision {
        RoutingDecision {
            domain: Domain::DEFAULT,
            confidence: self.config.default_confidence,
            matched_keywords: Vec::new(),
            reasoning: Some("no domain cleared the threshold".to_string()),
        }
    }
}

//! Agent registry and system instruction assembly.
//!
//! Agents are plain configuration records, one per domain. The system
//! instruction for a turn is assembled from fixed blocks in this order:
//!
//! 1. onboarding (only while the profile setup is incomplete)
//! 2. ground rules, including the directive wire format
//! 3. role header
//! 4. operating mode
//! 5. communication style
//! 6. static knowledge blocks
//! 7. live user data
//! 8. agent-specific rules
//! 9. deviation alerts
//! 10. carried-over session notes

use std::collections::BTreeMap;

use crate::config::{CommunicationStyle, UserPreferences};
use crate::types::{Attribution, Domain, Locale, TrainingMode, UserContext};

/// Sections of live user data an agent can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDataSection {
    Profile,
    Nutrition,
    Training,
    Body,
    BloodPressure,
    Substances,
    Equipment,
}

/// Versioned static knowledge.
#[derive(Debug, Clone, Copy)]
pub struct KnowledgeBlock {
    pub id: &'static str,
    pub version: &'static str,
    /// Modes the block applies to; empty means every mode
    pub modes: &'static [TrainingMode],
    pub content: &'static str,
}

impl KnowledgeBlock {
    fn applies_to(&self, mode: TrainingMode) -> bool {
        self.modes.is_empty() || self.modes.contains(&mode)
    }
}

/// Generator configuration for one domain.
#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    pub domain: Domain,
    pub knowledge: &'static [&'static str],
    pub sections: &'static [UserDataSection],
    pub rules: Option<&'static str>,
    /// Turns of thread history sent along with the instruction
    pub history_turns: usize,
    pub max_tokens: u32,
}

impl AgentConfig {
    /// Registry lookup; every domain has exactly one agent.
    pub fn for_domain(domain: Domain) -> &'static AgentConfig {
        AGENTS
            .iter()
            .find(|a| a.domain == domain)
            .unwrap_or(&AGENTS[0])
    }

    pub fn attribution(&self, locale: Locale, knowledge_versions: BTreeMap<String, String>) -> Attribution {
        Attribution {
            domain: self.domain,
            display_name: self.domain.display_name(locale).to_string(),
            icon: self.domain.icon().to_string(),
            knowledge_versions,
        }
    }
}

use UserDataSection::*;

static AGENTS: [AgentConfig; 8] = [
    AgentConfig {
        domain: Domain::General,
        knowledge: &["app_overview"],
        sections: &[Profile, Nutrition, Training],
        rules: Some(GENERAL_RULES),
        history_turns: 10,
        max_tokens: 1024,
    },
    AgentConfig {
        domain: Domain::Nutrition,
        knowledge: &["nutrition_basics", "meal_logging", "product_search"],
        sections: &[Profile, Nutrition, Body],
        rules: Some(NUTRITION_RULES),
        history_turns: 10,
        max_tokens: 2048,
    },
    AgentConfig {
        domain: Domain::Training,
        knowledge: &["training_principles", "plan_design", "enhanced_training"],
        sections: &[Profile, Training, Equipment, Body],
        rules: Some(TRAINING_RULES),
        history_turns: 10,
        max_tokens: 3072,
    },
    AgentConfig {
        domain: Domain::Substances,
        knowledge: &["supplement_basics", "enhanced_protocols", "harm_reduction"],
        sections: &[Profile, Substances, BloodPressure],
        rules: Some(SUBSTANCE_RULES),
        history_turns: 10,
        max_tokens: 2048,
    },
    AgentConfig {
        domain: Domain::Analytics,
        knowledge: &["analytics_method"],
        sections: &[Profile, Nutrition, Training, Body, BloodPressure, Substances],
        rules: None,
        history_turns: 6,
        max_tokens: 2048,
    },
    AgentConfig {
        domain: Domain::Medical,
        knowledge: &["medical_safety", "blood_pressure"],
        sections: &[Profile, BloodPressure, Substances, Body],
        rules: Some(MEDICAL_RULES),
        history_turns: 10,
        max_tokens: 2048,
    },
    AgentConfig {
        domain: Domain::Recovery,
        knowledge: &["recovery_basics"],
        sections: &[Profile, Training],
        rules: None,
        history_turns: 10,
        max_tokens: 1536,
    },
    AgentConfig {
        domain: Domain::Lifestyle,
        knowledge: &["habit_building"],
        sections: &[Profile],
        rules: None,
        history_turns: 10,
        max_tokens: 1536,
    },
];

const ALL_MODES: &[TrainingMode] = &[];
const ENHANCED_ONLY: &[TrainingMode] = &[TrainingMode::Enhanced];

static KNOWLEDGE: &[KnowledgeBlock] = &[
    KnowledgeBlock {
        id: "app_overview",
        version: "1.2",
        modes: ALL_MODES,
        content: "The app tracks meals, workouts, body measurements, blood pressure, substances and reminders. Specialized coaches exist for nutrition, training, substances, analytics, health, recovery and lifestyle. Suggest the right coach when a question clearly belongs to one.",
    },
    KnowledgeBlock {
        id: "nutrition_basics",
        version: "2.1",
        modes: ALL_MODES,
        content: "Energy: protein 4 kcal/g, carbohydrates 4 kcal/g, fat 9 kcal/g. Protein target for active people 1.6-2.2 g per kg body weight. A deficit of about 500 kcal per day loses roughly 0.5 kg per week. Prefer whole foods, 25-35 g fiber per day.",
    },
    KnowledgeBlock {
        id: "meal_logging",
        version: "1.4",
        modes: ALL_MODES,
        content: "When the user reports food they ate, estimate the macros of the stated amounts and emit exactly one log_meal directive. Round calories to whole numbers and macros to one decimal.",
    },
    KnowledgeBlock {
        id: "product_search",
        version: "1.0",
        modes: ALL_MODES,
        content: "For branded products with unknown values emit a search_product directive with the product name as query instead of guessing. You will receive the lookup result and then answer.",
    },
    KnowledgeBlock {
        id: "training_principles",
        version: "2.0",
        modes: ALL_MODES,
        content: "Progressive overload drives adaptation. 10-20 hard sets per muscle per week, 6-15 reps for hypertrophy, 1-5 reps for maximal strength, 1-3 reps in reserve on most sets.",
    },
    KnowledgeBlock {
        id: "plan_design",
        version: "1.3",
        modes: ALL_MODES,
        content: "Plans list every exercise with sets and reps (strength) or duration/distance (endurance). Match the split to the available days: 2-3 days full body, 4 days upper/lower, 5-6 days push/pull/legs. Only use equipment the user has.",
    },
    KnowledgeBlock {
        id: "enhanced_training",
        version: "1.1",
        modes: ENHANCED_ONLY,
        content: "Enhanced athletes recover faster and tolerate more volume, but tendons and joints do not adapt at the same rate. Keep progression on heavy compounds conservative.",
    },
    KnowledgeBlock {
        id: "supplement_basics",
        version: "1.5",
        modes: ALL_MODES,
        content: "Evidence-backed supplements: creatine monohydrate 3-5 g daily, vitamin D3 1000-4000 IU when levels are low, omega-3 1-3 g EPA/DHA, caffeine 3-6 mg/kg before training. Magnesium in the evening can support sleep.",
    },
    KnowledgeBlock {
        id: "enhanced_protocols",
        version: "1.2",
        modes: ENHANCED_ONLY,
        content: "The user has chosen enhanced mode. Discuss performance-enhancing compounds factually, focusing on monitoring: blood work before, during and after a cycle (hematocrit, lipids, liver and kidney values, blood pressure).",
    },
    KnowledgeBlock {
        id: "harm_reduction",
        version: "1.0",
        modes: ALL_MODES,
        content: "Never encourage escalating doses. Flag dangerous combinations and recommend medical supervision for prescription substances.",
    },
    KnowledgeBlock {
        id: "analytics_method",
        version: "1.1",
        modes: ALL_MODES,
        content: "Base every statement on the data provided below. Compare weekly averages instead of single days, name the time span you looked at and say clearly when data is missing.",
    },
    KnowledgeBlock {
        id: "medical_safety",
        version: "1.3",
        modes: ALL_MODES,
        content: "You are not a doctor. Give general information, never diagnoses. For chest pain, shortness of breath, severe headache or readings in the crisis range advise immediate medical help.",
    },
    KnowledgeBlock {
        id: "blood_pressure",
        version: "1.0",
        modes: ALL_MODES,
        content: "Categories: normal <120/<80, elevated 120-129/<80, stage 1 130-139 or 80-89, stage 2 >=140 or >=90, crisis >180 or >120. Measure seated after 5 minutes of rest, twice, one minute apart.",
    },
    KnowledgeBlock {
        id: "recovery_basics",
        version: "1.2",
        modes: ALL_MODES,
        content: "7-9 hours of sleep, a consistent sleep schedule, deload every 4-8 weeks, active recovery on rest days. Persistent fatigue and falling performance are signs of overreaching.",
    },
    KnowledgeBlock {
        id: "habit_building",
        version: "1.0",
        modes: ALL_MODES,
        content: "Small, specific habits anchored to existing routines stick best. Track streaks, plan for obstacles and keep the first step under two minutes.",
    },
];

/// Look up a knowledge block by id.
pub fn knowledge_block(id: &str) -> Option<&'static KnowledgeBlock> {
    KNOWLEDGE.iter().find(|b| b.id == id)
}

const GROUND_RULES: &str = r#"## Ground rules
- Answer in the user's language and stay within your specialty.
- Only claim facts about the user that appear in the user data below.
- To change stored data, embed exactly one fenced action block per change. The user confirms every action before it is saved, so never say that something was already saved.
- Action block format (the JSON object must be valid):
```action:<type>
{"field": "value"}
```
- Available types: log_meal, log_workout, log_body, log_blood_pressure, log_substance, save_training_plan, save_product, add_substance, add_reminder, update_profile, update_equipment, search_product.
- Dates are YYYY-MM-DD and times HH:MM. Omit fields you do not know."#;

const ONBOARDING: &str = r#"## Onboarding
The user has not completed their profile yet. Before detailed advice, ask for the missing basics (age, weight, height, goal, activity level) one or two at a time and save them with an update_profile action."#;

const GENERAL_RULES: &str = "Keep answers short. Route detailed nutrition, training or health questions to the specialized coach by name.";
const NUTRITION_RULES: &str = "Always state the calories and protein of a logged meal in your text as well.";
const TRAINING_RULES: &str = "Before saving a new plan, summarize it and ask whether it fits the user's schedule.";
const SUBSTANCE_RULES: &str = "Log intakes with log_substance; register new recurring substances with add_substance.";
const MEDICAL_RULES: &str = "Whenever you log blood pressure, also state its category.";

fn role_header(domain: Domain, locale: Locale) -> String {
    let name = domain.display_name(locale);
    match locale {
        Locale::De => format!(
            "## Rolle\nDu bist der {}. Antworte auf Deutsch, duze den Nutzer und sei konkret.",
            name
        ),
        Locale::En => format!(
            "## Role\nYou are the {}. Answer in English, be friendly and concrete.",
            name
        ),
    }
}

fn mode_block(mode: TrainingMode) -> &'static str {
    match mode {
        TrainingMode::Natural => "## Mode\nThe user trains natural. Do not suggest performance-enhancing drugs.",
        TrainingMode::Enhanced => "## Mode\nThe user trains enhanced and has opted in to factual discussion of performance-enhancing compounds. Prioritize health monitoring.",
    }
}

fn style_block(style: CommunicationStyle) -> &'static str {
    match style {
        CommunicationStyle::Concise => "## Style\nBe brief: a few sentences or a short list.",
        CommunicationStyle::Detailed => "## Style\nExplain your reasoning and give background where helpful.",
        CommunicationStyle::Motivational => "## Style\nBe encouraging and celebrate progress, without exaggerating.",
    }
}

/// Assembled instruction plus the knowledge versions it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemInstruction {
    pub text: String,
    pub knowledge_versions: BTreeMap<String, String>,
}

/// Build the system instruction for one agent turn.
pub fn build_system_instruction(
    agent: &AgentConfig,
    user: &UserContext,
    preferences: &UserPreferences,
) -> SystemInstruction {
    let mode = user.profile.mode;
    let mut blocks: Vec<String> = Vec::new();

    if !user.profile.setup_complete {
        blocks.push(ONBOARDING.to_string());
    }
    blocks.push(GROUND_RULES.to_string());
    blocks.push(role_header(agent.domain, preferences.locale));
    blocks.push(mode_block(mode).to_string());
    if let Some(style) = preferences.style {
        blocks.push(style_block(style).to_string());
    }

    let mut knowledge_versions = BTreeMap::new();
    let knowledge: Vec<&KnowledgeBlock> = agent
        .knowledge
        .iter()
        .filter_map(|id| knowledge_block(id))
        .filter(|b| b.applies_to(mode))
        .collect();
    if !knowledge.is_empty() {
        let mut section = String::from("## Knowledge");
        for block in knowledge {
            section.push_str("\n- ");
            section.push_str(block.content);
            knowledge_versions.insert(block.id.to_string(), block.version.to_string());
        }
        blocks.push(section);
    }

    if let Some(data) = user_data_block(agent.sections, user) {
        blocks.push(data);
    }

    if let Some(rules) = agent.rules {
        blocks.push(format!("## Rules\n{}", rules));
    }

    if preferences.notifications.deviation_alerts {
        let alerts: Vec<&str> = user
            .alerts
            .iter()
            .filter(|a| a.domain == agent.domain || a.domain == Domain::General)
            .map(|a| a.message.as_str())
            .collect();
        if !alerts.is_empty() {
            blocks.push(format!("## Alerts\n- {}", alerts.join("\n- ")));
        }
    }

    if !user.session_notes.is_empty() {
        blocks.push(format!(
            "## Earlier in this conversation\n- {}",
            user.session_notes.join("\n- ")
        ));
    }

    SystemInstruction {
        text: blocks.join("\n\n"),
        knowledge_versions,
    }
}

fn user_data_block(sections: &[UserDataSection], user: &UserContext) -> Option<String> {
    let mut lines = Vec::new();

    for section in sections {
        match section {
            Profile => {
                let p = &user.profile;
                let mut parts = Vec::new();
                if let Some(name) = &p.name {
                    parts.push(format!("name {}", name));
                }
                if let Some(age) = p.age {
                    parts.push(format!("{} years", age));
                }
                if let Some(weight) = p.weight_kg {
                    parts.push(format!("{} kg", weight));
                }
                if let Some(height) = p.height_cm {
                    parts.push(format!("{} cm", height));
                }
                if let Some(goal) = &p.goal {
                    parts.push(format!("goal {}", goal));
                }
                if let Some(level) = &p.activity_level {
                    parts.push(format!("activity {}", level));
                }
                if !parts.is_empty() {
                    lines.push(format!("Profile: {}", parts.join(", ")));
                }
                if let Some(target) = p.daily_calorie_target {
                    let protein = p
                        .protein_target_g
                        .map(|g| format!(", {:.0} g protein", g))
                        .unwrap_or_default();
                    lines.push(format!("Targets: {:.0} kcal{}", target, protein));
                }
            }
            Nutrition => {
                let t = &user.today;
                if t.calories > 0.0 || !t.meals.is_empty() {
                    lines.push(format!(
                        "Today: {:.0} kcal, {:.0} g protein, {:.0} g carbs, {:.0} g fat",
                        t.calories, t.protein, t.carbs, t.fat
                    ));
                    if !t.meals.is_empty() {
                        lines.push(format!("Meals today: {}", t.meals.join("; ")));
                    }
                }
            }
            Training => {
                if !user.recent_workouts.is_empty() {
                    lines.push(format!("Recent workouts: {}", user.recent_workouts.join("; ")));
                }
                if let Some(plan) = &user.training_plan {
                    lines.push(format!("Active plan: {}", plan));
                }
            }
            Body => {
                if !user.body_measurements.is_empty() {
                    lines.push(format!("Body: {}", user.body_measurements.join("; ")));
                }
            }
            BloodPressure => {
                if !user.blood_pressure.is_empty() {
                    lines.push(format!("Blood pressure: {}", user.blood_pressure.join("; ")));
                }
            }
            Substances => {
                if !user.active_substances.is_empty() {
                    lines.push(format!("Active substances: {}", user.active_substances.join("; ")));
                }
            }
            Equipment => {
                if !user.equipment.is_empty() {
                    lines.push(format!("Equipment: {}", user.equipment.join(", ")));
                }
            }
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(format!("## User data\n{}", lines.join("\n")))
    }
}

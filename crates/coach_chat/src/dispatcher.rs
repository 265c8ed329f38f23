//! Multi-agent dispatch.
//!
//! The primary agent streams into the caller's channel as cumulative
//! [`DispatchEvent::Chunk`]s. Secondary agents then run one at a time through
//! the non-streaming entry point; when any of them succeeds the outputs are
//! merged under per-agent headers and sent once as [`DispatchEvent::Merged`].
//!
//! A `search_product` directive in the primary output triggers a single lookup
//! and one follow-up stream grounded on the lookup summary.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use coach_directives::{validate, DirectiveData, DirectiveExtractor, DirectiveKind, ValidationContext};

use crate::agents::{build_system_instruction, AgentConfig};
use crate::config::UserPreferences;
use crate::error::ChatResult;
use crate::llm::{Generation, GenerationRequest, Generator, Turn};
use crate::lookup::{KnowledgeLookup, LookupResult};
use crate::types::{Attribution, Domain, Message, MessageRole, MultiRoutingDecision, UserContext};
use crate::usage::{spawn_usage_report, TokenUsage, UsageRecord, UsageSink};

/// Separator between merged agent outputs.
pub const MERGE_SEPARATOR: &str = "\n\n---\n\n";

/// Emission on the caller's channel
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// Primary content so far
    Chunk { domain: Domain, content: String },
    /// Final merged content of a multi-agent turn
    Merged { content: String },
}

/// One agent's successful output.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutput {
    pub domain: Domain,
    pub content: String,
    pub attribution: Attribution,
}

/// Everything a turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Final content: merged text, or the primary's text
    pub content: String,
    pub primary: Domain,
    pub attribution: Attribution,
    /// Successful outputs, primary first
    pub outputs: Vec<AgentOutput>,
    pub usage: TokenUsage,
    pub lookup: Option<LookupResult>,
    pub merged: bool,
}

/// Inputs shared by every agent of a turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    /// Active thread, without the current user message
    pub history: &'a [Message],
    pub user: &'a UserContext,
    pub preferences: &'a UserPreferences,
}

pub struct Dispatcher {
    generator: Arc<dyn Generator>,
    lookup: Option<Arc<KnowledgeLookup>>,
    usage_sink: Option<Arc<dyn UsageSink>>,
}

impl Dispatcher {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            lookup: None,
            usage_sink: None,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<KnowledgeLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    /// Run every target of a routing decision for one user message.
    ///
    /// Fails only when the primary agent fails. Secondary failures are logged
    /// and left out of the merge.
    pub async fn dispatch(
        &self,
        text: &str,
        decision: &MultiRoutingDecision,
        ctx: &TurnContext<'_>,
        events: &mpsc::Sender<DispatchEvent>,
    ) -> ChatResult<DispatchOutcome> {
        let primary = decision.primary().map(|d| d.domain).unwrap_or(Domain::DEFAULT);
        let agent = AgentConfig::for_domain(primary);
        let instruction = build_system_instruction(agent, ctx.user, ctx.preferences);
        let request = build_request(agent, instruction.text.clone(), text, ctx.history);

        info!("Dispatching to {} (+{} secondary)", primary, decision.secondaries().len());

        let mut usage = TokenUsage::default();
        let mut records = Vec::new();

        let generation = self.stream_agent(primary, &request, events, "").await?;
        self.track(primary, &generation, &mut usage, &mut records);
        let mut content = generation.content;

        let mut lookup = None;
        if let Some((query, amount)) = self.search_query(&content) {
            if let Some(service) = &self.lookup {
                let result = service.resolve_amount(&query, amount).await;
                let prefix = format!("{}\n\n", DirectiveExtractor::strip(&content));

                let follow_up = GenerationRequest {
                    system: format!("{}\n\n## Product lookup\n{}", instruction.text, result.summary),
                    ..request.clone()
                };
                content = match self.stream_agent(primary, &follow_up, events, &prefix).await {
                    Ok(generation) => {
                        self.track(primary, &generation, &mut usage, &mut records);
                        format!("{}{}", prefix, generation.content)
                    }
                    Err(e) => {
                        warn!("Lookup follow-up failed, using summary: {}", e);
                        format!("{}{}", prefix, result.summary)
                    }
                };
                lookup = Some(result);
            }
        }

        let attribution = agent.attribution(ctx.preferences.locale, instruction.knowledge_versions);
        let mut outputs = vec![AgentOutput {
            domain: primary,
            content: content.clone(),
            attribution: attribution.clone(),
        }];

        for secondary in decision.secondaries() {
            let agent = AgentConfig::for_domain(secondary.domain);
            let instruction = build_system_instruction(agent, ctx.user, ctx.preferences);
            let request = build_request(agent, instruction.text, text, ctx.history);

            match self.generator.complete(&request).await {
                Ok(generation) => {
                    self.track(secondary.domain, &generation, &mut usage, &mut records);
                    outputs.push(AgentOutput {
                        domain: secondary.domain,
                        content: generation.content,
                        attribution: agent.attribution(ctx.preferences.locale, instruction.knowledge_versions),
                    });
                }
                Err(e) => warn!("Secondary agent {} failed: {}", secondary.domain, e),
            }
        }

        let merged = outputs.len() > 1;
        if merged {
            content = merge_outputs(&outputs);
            if events.send(DispatchEvent::Merged { content: content.clone() }).await.is_err() {
                debug!("Dispatch receiver closed before merged content");
            }
        }

        if let Some(sink) = &self.usage_sink {
            spawn_usage_report(sink.clone(), records);
        }

        Ok(DispatchOutcome {
            content,
            primary,
            attribution,
            outputs,
            usage,
            lookup,
            merged,
        })
    }

    /// Stream one request, forwarding `prefix` + content so far on every delta.
    ///
    /// Forwarding stops when the receiver is gone; the generation runs on.
    async fn stream_agent(
        &self,
        domain: Domain,
        request: &GenerationRequest,
        events: &mpsc::Sender<DispatchEvent>,
        prefix: &str,
    ) -> ChatResult<Generation> {
        let (tx, mut rx) = mpsc::channel::<String>(64);

        let forward = async {
            let mut content = prefix.to_string();
            let mut open = true;
            while let Some(delta) = rx.recv().await {
                content.push_str(&delta);
                if open
                    && events
                        .send(DispatchEvent::Chunk {
                            domain,
                            content: content.clone(),
                        })
                        .await
                        .is_err()
                {
                    debug!("Dispatch receiver closed, generation continues");
                    open = false;
                }
            }
        };

        let (result, ()) = tokio::join!(self.generator.stream(request, tx), forward);
        result
    }

    fn search_query(&self, content: &str) -> Option<(String, Option<f64>)> {
        let directive = DirectiveExtractor::extract_all(content)
            .into_iter()
            .find(|d| d.kind == DirectiveKind::SearchProduct)?;

        match validate(&directive, &ValidationContext::now()) {
            Ok(validated) => match validated.data {
                DirectiveData::SearchProduct(search) => Some((search.query, search.amount_g)),
                _ => None,
            },
            Err(e) => {
                warn!("Ignoring invalid search directive: {}", e);
                None
            }
        }
    }

    fn track(&self, domain: Domain, generation: &Generation, usage: &mut TokenUsage, records: &mut Vec<UsageRecord>) {
        let call = TokenUsage::new(generation.input_tokens, generation.output_tokens);
        usage.add(call);
        let model = if generation.model.is_empty() {
            self.generator.model()
        } else {
            generation.model.as_str()
        };
        records.push(UsageRecord::new(domain, model, call));
    }
}

/// Last `history_turns` usable messages plus the current user text.
fn build_request(agent: &AgentConfig, system: String, text: &str, history: &[Message]) -> GenerationRequest {
    let mut turns: Vec<Turn> = history
        .iter()
        .filter(|m| !m.errored && !m.streaming && !m.history_text().trim().is_empty())
        .map(|m| match m.role {
            MessageRole::User => Turn::user(m.history_text()),
            MessageRole::Assistant => Turn::assistant(m.history_text()),
        })
        .collect();
    let skip = turns.len().saturating_sub(agent.history_turns);
    turns.drain(..skip);
    turns.push(Turn::user(text));

    GenerationRequest {
        system,
        turns,
        max_tokens: agent.max_tokens,
    }
}

/// Join outputs under `**<icon> <name>**` headers.
pub fn merge_outputs(outputs: &[AgentOutput]) -> String {
    outputs
        .iter()
        .map(|o| {
            format!(
                "**{} {}**\n\n{}",
                o.attribution.icon,
                o.attribution.display_name,
                o.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join(MERGE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChatError, ChatResult};
    use crate::lookup::{LookupSource, ProductHit, ProductSource};
    use crate::mock::{MockGenerator, MockReply};
    use crate::types::{Locale, RoutingDecision};
    use async_trait::async_trait;

    struct OneProduct;

    #[async_trait]
    impl ProductSource for OneProduct {
        async fn search(&self, _query: &str) -> ChatResult<Vec<ProductHit>> {
            Ok(vec![ProductHit {
                name: "Hafer-Müsli Früchte".to_string(),
                brand: Some("Kölln".to_string()),
                energy_kcal_100g: Some(360.0),
                proteins_100g: Some(9.0),
                carbohydrates_100g: Some(60.0),
                fat_100g: Some(6.0),
                serving_size: Some("50 g".to_string()),
                serving_quantity: Some(50.0),
            }])
        }
    }

    fn decision(domains: &[Domain]) -> MultiRoutingDecision {
        MultiRoutingDecision {
            decisions: domains
                .iter()
                .map(|d| RoutingDecision {
                    domain: *d,
                    confidence: 0.8,
                    matched_keywords: vec!["x".to_string()],
                    reasoning: None,
                })
                .collect(),
        }
    }

    async fn run(
        dispatcher: &Dispatcher,
        domains: &[Domain],
        history: &[Message],
    ) -> (ChatResult<DispatchOutcome>, Vec<DispatchEvent>) {
        let user = UserContext::default();
        let preferences = UserPreferences::default();
        let ctx = TurnContext {
            history,
            user: &user,
            preferences: &preferences,
        };
        let (tx, mut rx) = mpsc::channel(256);
        let outcome = dispatcher.dispatch("Nachricht", &decision(domains), &ctx, &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn header(domain: Domain) -> String {
        format!("**{} {}**", domain.icon(), domain.display_name(Locale::De))
    }

    #[tokio::test]
    async fn test_single_target_streams_cumulative_chunks() {
        let mock = MockGenerator::new().add_text("Guten Appetit dir");
        let dispatcher = Dispatcher::new(Arc::new(mock));

        let (outcome, events) = run(&dispatcher, &[Domain::Nutrition], &[]).await;
        let outcome = outcome.unwrap();

        let chunks: Vec<_> = events
            .iter()
            .map(|e| match e {
                DispatchEvent::Chunk { content, .. } => content.as_str(),
                DispatchEvent::Merged { .. } => panic!("unexpected merge"),
            })
            .collect();
        assert_eq!(chunks, vec!["Guten ", "Guten Appetit ", "Guten Appetit dir"]);
        assert_eq!(outcome.content, "Guten Appetit dir");
        assert_eq!(outcome.primary, Domain::Nutrition);
        assert!(!outcome.merged);
    }

    #[tokio::test]
    async fn test_secondaries_are_merged_once() {
        let mock = MockGenerator::new()
            .add_reply(MockReply::text("Iss mehr Protein.").with_usage(100, 10))
            .add_reply(MockReply::text("Trainiere dreimal pro Woche.").with_usage(80, 12));
        let dispatcher = Dispatcher::new(Arc::new(mock.clone()));

        let (outcome, events) = run(&dispatcher, &[Domain::Nutrition, Domain::Training], &[]).await;
        let outcome = outcome.unwrap();

        let expected = format!(
            "{}\n\nIss mehr Protein.{}{}\n\nTrainiere dreimal pro Woche.",
            header(Domain::Nutrition),
            MERGE_SEPARATOR,
            header(Domain::Training)
        );
        assert!(outcome.merged);
        assert_eq!(outcome.content, expected);
        assert_eq!(events.last(), Some(&DispatchEvent::Merged { content: expected }));
        assert_eq!(
            events.iter().filter(|e| matches!(e, DispatchEvent::Merged { .. })).count(),
            1
        );
        assert_eq!(outcome.usage, TokenUsage::new(180, 22));

        let calls = mock.captured_calls();
        assert_eq!(calls[0].method, "stream");
        assert_eq!(calls[1].method, "complete");
    }

    #[tokio::test]
    async fn test_failed_secondary_is_excluded() {
        let mock = MockGenerator::new()
            .add_text("Nur Ernährung.")
            .add_reply(MockReply::failure("rate limited"));
        let dispatcher = Dispatcher::new(Arc::new(mock));

        let (outcome, events) = run(&dispatcher, &[Domain::Nutrition, Domain::Recovery], &[]).await;
        let outcome = outcome.unwrap();

        assert!(!outcome.merged);
        assert_eq!(outcome.outputs.len(), 1);
        assert_eq!(outcome.content, "Nur Ernährung.");
        assert!(events.iter().all(|e| matches!(e, DispatchEvent::Chunk { .. })));
    }

    #[tokio::test]
    async fn test_primary_failure_is_returned() {
        let mock = MockGenerator::new().add_reply(MockReply::failure("overloaded"));
        let dispatcher = Dispatcher::new(Arc::new(mock));

        let (outcome, _) = run(&dispatcher, &[Domain::General], &[]).await;
        assert!(matches!(outcome, Err(ref e) if e.is_provider_error()));
        assert!(matches!(outcome, Err(ChatError::Llm(_))));
    }

    #[tokio::test]
    async fn test_search_directive_triggers_follow_up() {
        let mock = MockGenerator::new()
            .add_text("Ich schaue nach.\n\n```action:search_product\n{\"query\": \"Kölln Hafermüsli Früchte\"}\n```")
            .add_text("Eine Portion hat 180 kcal.");
        let lookup = Arc::new(KnowledgeLookup::new(Arc::new(OneProduct)));
        let dispatcher = Dispatcher::new(Arc::new(mock.clone())).with_lookup(lookup);

        let (outcome, events) = run(&dispatcher, &[Domain::Nutrition], &[]).await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.content, "Ich schaue nach.\n\nEine Portion hat 180 kcal.");
        assert_eq!(outcome.lookup.as_ref().map(|l| l.source), Some(LookupSource::PrimaryDatabase));
        assert!(mock.captured_calls()[1].request.system.contains("Kölln"));
        assert_eq!(
            events.last(),
            Some(&DispatchEvent::Chunk {
                domain: Domain::Nutrition,
                content: outcome.content.clone()
            })
        );
    }

    #[tokio::test]
    async fn test_history_window_skips_errored_turns() {
        let mock = MockGenerator::new().add_text("ok");
        let dispatcher = Dispatcher::new(Arc::new(mock.clone()));

        let mut failed = Message::assistant(Domain::General, "Entschuldigung");
        failed.errored = true;
        let mut answered = Message::assistant(Domain::General, "Hallo!");
        answered.raw_content = Some("Hallo! (raw)".to_string());
        let history: Vec<Message> = (0..12)
            .map(|i| Message::user(Domain::General, format!("frage {}", i)))
            .chain([failed, answered])
            .collect();

        run(&dispatcher, &[Domain::General], &history).await.0.unwrap();

        let turns = &mock.captured_calls()[0].request.turns;
        let limit = AgentConfig::for_domain(Domain::General).history_turns;
        assert_eq!(turns.len(), limit + 1);
        assert_eq!(turns[limit - 1].content, "Hallo! (raw)");
        assert_eq!(turns[limit].content, "Nachricht");
        assert!(turns.iter().all(|t| t.content != "Entschuldigung"));
    }

    #[tokio::test]
    async fn test_closed_receiver_does_not_fail_generation() {
        let mock = MockGenerator::new().add_text("Weiter geht's trotzdem");
        let dispatcher = Dispatcher::new(Arc::new(mock));
        let user = UserContext::default();
        let preferences = UserPreferences::default();
        let ctx = TurnContext {
            history: &[],
            user: &user,
            preferences: &preferences,
        };

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let outcome = dispatcher
            .dispatch("hi", &decision(&[Domain::General]), &ctx, &tx)
            .await
            .unwrap();
        assert_eq!(outcome.content, "Weiter geht's trotzdem");
    }
}

//! Coaching session.
//!
//! Entry point for chat operations: routes each message, dispatches it to the
//! agents, turns directives in the reply into confirmable actions and keeps
//! the thread cache and history store up to date.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use coach_directives::{DirectiveExtractor, ValidationContext};

use crate::actions::{actions_from_directives, ActionController, ActionOutcome, ActionSink};
use crate::config::CoachConfig;
use crate::dispatcher::{DispatchEvent, Dispatcher, TurnContext};
use crate::error::{ChatError, ChatResult};
use crate::llm::Generator;
use crate::lookup::{KnowledgeLookup, LookupResult};
use crate::persistence::FileDataStore;
use crate::router::IntentRouter;
use crate::store::{HistoryStore, Hydration, SessionStorage, ThreadStore};
use crate::types::{Domain, Locale, Message, MultiRoutingDecision, RoutingDecision, UserContext};
use crate::usage::{TokenUsage, UsageSink};

/// Reply shown in place of a failed generation.
pub fn error_message(locale: Locale) -> &'static str {
    match locale {
        Locale::De => "Entschuldigung, da ist etwas schiefgelaufen. Bitte versuche es noch einmal.",
        Locale::En => "Sorry, something went wrong. Please try again.",
    }
}

/// Persistence seams a session writes through.
#[derive(Clone)]
pub struct SessionBackend {
    pub storage: Arc<dyn SessionStorage>,
    pub history: Arc<dyn HistoryStore>,
    pub actions: Arc<dyn ActionSink>,
    pub usage: Option<Arc<dyn UsageSink>>,
}

impl SessionBackend {
    /// Route every seam to one file data store.
    pub fn from_data_store(store: Arc<FileDataStore>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            history: store.clone(),
            actions: store.clone(),
            usage: Some(store),
        }
    }
}

/// Result of one user message.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub user_message: Message,
    /// Final assistant message as stored in the thread
    pub reply: Message,
    pub routing: MultiRoutingDecision,
    /// Validation errors of directives that did not become actions
    pub rejected_directives: Vec<String>,
    pub lookup: Option<LookupResult>,
    pub usage: TokenUsage,
}

/// One user's coaching session.
pub struct CoachSession {
    config: CoachConfig,
    router: IntentRouter,
    dispatcher: Dispatcher,
    store: Arc<ThreadStore>,
    actions: ActionController,
    backend: SessionBackend,
    user: UserContext,
}

impl CoachSession {
    pub fn new(config: CoachConfig, generator: Arc<dyn Generator>, backend: SessionBackend) -> Self {
        let store = Arc::new(ThreadStore::new(&config.threads));
        let mut dispatcher = Dispatcher::new(generator);
        if let Some(sink) = &backend.usage {
            dispatcher = dispatcher.with_usage_sink(sink.clone());
        }

        Self {
            router: IntentRouter::new(config.router.clone()),
            actions: ActionController::new(store.clone(), backend.actions.clone()),
            dispatcher,
            store,
            backend,
            config,
            user: UserContext::default(),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<KnowledgeLookup>) -> Self {
        self.dispatcher = self.dispatcher.with_lookup(lookup);
        self
    }

    pub fn with_user_context(mut self, user: UserContext) -> Self {
        self.user = user;
        self
    }

    pub fn set_user_context(&mut self, user: UserContext) {
        self.user = user;
    }

    pub fn config(&self) -> &CoachConfig {
        &self.config
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    pub fn active_domain(&self) -> Domain {
        self.store.active_domain()
    }

    /// Fill the thread cache once per session.
    pub async fn hydrate(&self) -> ChatResult<Hydration> {
        self.store
            .hydrate(self.backend.storage.as_ref(), self.backend.history.as_ref())
            .await
    }

    pub fn switch_domain(&self, domain: Domain) {
        if self.store.switch_domain(domain) {
            self.save();
        }
    }

    /// Route, dispatch and record one user message.
    ///
    /// Content is forwarded to `events` as it streams. Provider failures do
    /// not fail the call: the reply carries a localized error and `errored`.
    pub async fn send_message(
        &self,
        text: &str,
        events: Option<mpsc::Sender<DispatchEvent>>,
    ) -> ChatResult<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let thread = self.store.active_domain();
        let routing = self.route(text, thread);
        let history = self.store.messages(thread);

        let user_message = Message::user(thread, text);
        self.store.append(user_message.clone());
        let placeholder = Message::placeholder(thread);
        let reply_id = placeholder.id.clone();
        self.store.append(placeholder);

        let ctx = TurnContext {
            history: &history,
            user: &self.user,
            preferences: &self.config.preferences,
        };

        let (tx, mut rx) = mpsc::channel::<DispatchEvent>(64);
        let dispatch = async {
            let tx = tx;
            self.dispatcher.dispatch(text, &routing, &ctx, &tx).await
        };
        let forward = async {
            let mut caller = events;
            while let Some(event) = rx.recv().await {
                let content = match &event {
                    DispatchEvent::Chunk { content, .. } | DispatchEvent::Merged { content } => content,
                };
                if let Err(e) = self.store.update_message_content(&reply_id, content) {
                    debug!("Streaming target vanished: {}", e);
                }
                if let Some(sender) = &caller {
                    if sender.send(event).await.is_err() {
                        caller = None;
                    }
                }
            }
        };
        let (result, ()) = tokio::join!(dispatch, forward);

        let mut rejected_directives = Vec::new();
        let mut lookup = None;
        let mut usage = TokenUsage::default();
        let mut failure = None;

        let reply = match result {
            Ok(outcome) => {
                let directives = DirectiveExtractor::extract_all(&outcome.content);
                let (actions, errors) = actions_from_directives(&directives, &ValidationContext::now());
                rejected_directives = errors;
                lookup = outcome.lookup;
                usage = outcome.usage;

                let display = DirectiveExtractor::strip_all(&outcome.content);
                let raw = (display != outcome.content).then(|| outcome.content.clone());
                info!(
                    "Reply from {} with {} action(s)",
                    outcome.primary,
                    actions.len()
                );

                self.store.update_message(&reply_id, move |message| {
                    message.content = display;
                    message.raw_content = raw;
                    message.attribution = Some(outcome.attribution);
                    message.actions = actions;
                    message.streaming = false;
                    message.clone()
                })?
            }
            Err(e) => {
                warn!("Turn failed: {}", e);
                let locale = self.config.preferences.locale;
                let reply = self.store.update_message(&reply_id, |message| {
                    message.content = error_message(locale).to_string();
                    message.raw_content = None;
                    message.errored = true;
                    message.streaming = false;
                    message.clone()
                })?;
                if !e.is_provider_error() {
                    failure = Some(e);
                }
                reply
            }
        };

        self.record(thread, &user_message).await;
        self.record(thread, &reply).await;
        self.save();

        if let Some(e) = failure {
            return Err(e);
        }

        Ok(TurnOutcome {
            user_message,
            reply,
            routing,
            rejected_directives,
            lookup,
            usage,
        })
    }

    pub async fn confirm_action(&self, action_id: &str) -> ChatResult<ActionOutcome> {
        let outcome = self.actions.confirm(action_id).await?;
        self.save();
        Ok(outcome)
    }

    pub async fn retry_action(&self, action_id: &str) -> ChatResult<ActionOutcome> {
        let outcome = self.actions.retry(action_id).await?;
        self.save();
        Ok(outcome)
    }

    pub fn reject_action(&self, action_id: &str) -> ChatResult<ActionOutcome> {
        let outcome = self.actions.reject(action_id)?;
        self.save();
        Ok(outcome)
    }

    pub fn dismiss_action(&self, action_id: &str) -> ChatResult<ActionOutcome> {
        let outcome = self.actions.dismiss(action_id)?;
        self.save();
        Ok(outcome)
    }

    /// Unmatched follow-ups stay with the agent of the active thread.
    fn route(&self, text: &str, thread: Domain) -> MultiRoutingDecision {
        let routing = self.router.classify_multi(text);
        match routing.primary() {
            Some(primary) if primary.is_fallback() && thread != Domain::DEFAULT => {
                debug!("No keyword matched, staying with {}", thread);
                MultiRoutingDecision::single(RoutingDecision {
                    domain: thread,
                    confidence: primary.confidence,
                    matched_keywords: Vec::new(),
                    reasoning: Some(format!("continuing the {} thread", thread)),
                })
            }
            _ => routing,
        }
    }

    async fn record(&self, domain: Domain, message: &Message) {
        if let Err(e) = self.backend.history.append(domain, message).await {
            warn!("Failed to persist message {}: {}", message.id, e);
        }
    }

    fn save(&self) {
        if let Err(e) = self.store.save_to(self.backend.storage.as_ref()) {
            warn!("Failed to save session cache: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockGenerator, MockReply};
    use crate::store::MemoryStorage;
    use tempfile::TempDir;

    fn session(mock: &MockGenerator) -> (CoachSession, Arc<FileDataStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let data = Arc::new(FileDataStore::new(dir.path()));
        let backend = SessionBackend::from_data_store(data.clone(), Arc::new(MemoryStorage::new()));
        let session = CoachSession::new(CoachConfig::default(), Arc::new(mock.clone()), backend);
        (session, data, dir)
    }

    #[tokio::test]
    async fn test_provider_failure_yields_localized_error() {
        let mock = MockGenerator::new().add_reply(MockReply::failure("upstream 503"));
        let (session, data, _dir) = session(&mock);

        let outcome = session.send_message("Wie viel Protein brauche ich?", None).await.unwrap();
        assert!(outcome.reply.errored);
        assert!(!outcome.reply.streaming);
        assert_eq!(outcome.reply.content, error_message(Locale::De));

        let stored = data.load_recent(Domain::General, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (session, _data, _dir) = session(&MockGenerator::new());
        assert!(matches!(session.send_message("   ", None).await, Err(ChatError::EmptyMessage)));
    }

    #[tokio::test]
    async fn test_unmatched_follow_up_stays_in_active_thread() {
        let mock = MockGenerator::new().add_text("Gern, mach weiter so.");
        let (session, _data, _dir) = session(&mock);
        session.switch_domain(Domain::Training);

        let outcome = session.send_message("und dann?", None).await.unwrap();
        assert_eq!(outcome.routing.primary().map(|d| d.domain), Some(Domain::Training));
        assert_eq!(outcome.reply.attribution.map(|a| a.domain), Some(Domain::Training));
        assert_eq!(session.store().messages(Domain::Training).len(), 2);
        assert!(session.store().messages(Domain::General).is_empty());
    }

    #[tokio::test]
    async fn test_reply_directives_become_actions() {
        let mock = MockGenerator::new().add_text(
            "Notiert.\n\n```action:log_body\n{\"weight_kg\": 82.4}\n```\n\n```action:log_blood_pressure\n{\"systolic\": 70, \"diastolic\": 90}\n```",
        );
        let (session, _data, _dir) = session(&mock);
        let (tx, mut rx) = mpsc::channel(64);

        let outcome = session.send_message("Gewicht 82,4 kg", Some(tx)).await.unwrap();
        assert_eq!(outcome.reply.content, "Notiert.");
        assert!(outcome.reply.raw_content.as_deref().unwrap_or_default().contains("log_body"));
        assert_eq!(outcome.reply.actions.len(), 1);
        assert_eq!(outcome.rejected_directives.len(), 1);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(DispatchEvent::Chunk { .. })));
    }
}

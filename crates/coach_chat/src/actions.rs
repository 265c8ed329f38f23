//! Action lifecycle.
//!
//! ```text
//! pending ──confirm──▶ executing ──▶ executed (removed)
//!    │                     │
//!    │                     └──▶ failed ──retry──▶ executing
//!    └──reject──▶ rejected (removed)
//! ```
//!
//! Status changes happen under the thread store's lock; the persistence call
//! itself runs outside it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use coach_directives::{validate, Directive, ValidatedDirective, ValidationContext};

use crate::error::{ChatError, ChatResult};
use crate::store::ThreadStore;
use crate::types::{Action, ActionStatus};

/// Destination of confirmed records.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn insert(&self, table: &str, record: Value) -> ChatResult<()>;
}

/// Result of a lifecycle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Executed,
    /// Persistence failed; the action stays visible with this error
    Failed(String),
    Rejected,
    Dismissed,
    /// The action was not in a state the call applies to
    Ignored,
}

/// Turn validated directives into pending actions.
///
/// Returns the actions and one message per directive that failed validation.
/// Non-actionable directives are skipped.
pub fn actions_from_directives(directives: &[Directive], ctx: &ValidationContext) -> (Vec<Action>, Vec<String>) {
    let mut actions = Vec::new();
    let mut errors = Vec::new();

    for directive in directives {
        match validate(directive, ctx) {
            Ok(validated) if validated.is_actionable() => actions.push(Action::new(validated)),
            Ok(validated) => debug!("Skipping non-actionable {} directive", validated.kind),
            Err(e) => {
                warn!("Discarding invalid directive: {}", e);
                errors.push(e.to_string());
            }
        }
    }

    (actions, errors)
}

/// Drives actions held in a thread store through their lifecycle.
pub struct ActionController {
    store: Arc<ThreadStore>,
    sink: Arc<dyn ActionSink>,
}

impl ActionController {
    pub fn new(store: Arc<ThreadStore>, sink: Arc<dyn ActionSink>) -> Self {
        Self { store, sink }
    }

    /// Execute a pending action. Anything other than pending is ignored.
    pub async fn confirm(&self, action_id: &str) -> ChatResult<ActionOutcome> {
        self.start(action_id, ActionStatus::Pending).await
    }

    /// Execute a failed action again.
    pub async fn retry(&self, action_id: &str) -> ChatResult<ActionOutcome> {
        self.start(action_id, ActionStatus::Failed).await
    }

    /// Drop a pending action without persisting it.
    pub fn reject(&self, action_id: &str) -> ChatResult<ActionOutcome> {
        self.store.update_action(action_id, |actions, index| {
            if actions[index].status != ActionStatus::Pending {
                return ActionOutcome::Ignored;
            }
            actions.remove(index);
            ActionOutcome::Rejected
        })
    }

    /// Remove an action from view unless it is mid-execution.
    pub fn dismiss(&self, action_id: &str) -> ChatResult<ActionOutcome> {
        self.store.update_action(action_id, |actions, index| {
            if actions[index].status == ActionStatus::Executing {
                return ActionOutcome::Ignored;
            }
            actions.remove(index);
            ActionOutcome::Dismissed
        })
    }

    async fn start(&self, action_id: &str, from: ActionStatus) -> ChatResult<ActionOutcome> {
        let claimed = self.store.update_action(action_id, |actions, index| {
            let action = &mut actions[index];
            if action.status != from {
                return None;
            }
            action.status = ActionStatus::Executing;
            action.error = None;
            Some(action.directive.clone())
        })?;

        match claimed {
            Some(directive) => Ok(self.execute(action_id, directive).await),
            None => {
                debug!("Action {} is not {}, ignoring", action_id, from);
                Ok(ActionOutcome::Ignored)
            }
        }
    }

    async fn execute(&self, action_id: &str, directive: ValidatedDirective) -> ActionOutcome {
        let result = match (directive.kind.target_table(), directive.to_record()) {
            (Some(table), Ok(record)) => self.sink.insert(table, record).await,
            (None, _) => Err(ChatError::Persistence(format!("{} has no target table", directive.kind))),
            (_, Err(e)) => Err(e.into()),
        };

        let outcome = match result {
            Ok(()) => {
                info!("Executed {} action {}", directive.kind, action_id);
                ActionOutcome::Executed
            }
            Err(e) => {
                warn!("Action {} failed: {}", action_id, e);
                ActionOutcome::Failed(e.to_string())
            }
        };

        let applied = self.store.update_action(action_id, |actions, index| match &outcome {
            ActionOutcome::Executed => {
                actions.remove(index);
            }
            ActionOutcome::Failed(message) => {
                actions[index].status = ActionStatus::Failed;
                actions[index].error = Some(message.clone());
            }
            _ => {}
        });
        if let Err(e) = applied {
            warn!("Could not record outcome of action {}: {}", action_id, e);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreadConfig;
    use crate::types::{Domain, Message};
    use coach_directives::DirectiveExtractor;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        inserts: Mutex<Vec<(String, Value)>>,
        failures_left: Mutex<usize>,
    }

    #[async_trait]
    impl ActionSink for RecordingSink {
        async fn insert(&self, table: &str, record: Value) -> ChatResult<()> {
            {
                let mut failures = self.failures_left.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ChatError::Persistence("database unavailable".to_string()));
                }
            }
            self.inserts.lock().push((table.to_string(), record));
            Ok(())
        }
    }

    const MEAL_REPLY: &str = "Eingetragen!\n\n```action:log_meal\n{\"name\": \"Skyr\", \"calories\": 300, \"protein\": 40, \"carbs\": 20, \"fat\": 1}\n```";

    fn setup(failures: usize) -> (ActionController, Arc<ThreadStore>, Arc<RecordingSink>, String) {
        let store = Arc::new(ThreadStore::new(&ThreadConfig::default()));
        let sink = Arc::new(RecordingSink {
            failures_left: Mutex::new(failures),
            ..Default::default()
        });

        let (actions, errors) = actions_from_directives(
            &DirectiveExtractor::extract_all(MEAL_REPLY),
            &ValidationContext::default(),
        );
        assert!(errors.is_empty());
        let action_id = actions[0].id.clone();

        let mut message = Message::assistant(Domain::Nutrition, "Eingetragen!");
        message.actions = actions;
        store.append(message);

        let controller = ActionController::new(store.clone(), sink.clone());
        (controller, store, sink, action_id)
    }

    #[test]
    fn test_non_actionable_directives_are_skipped() {
        let reply = "```action:search_product\n{\"query\": \"Skyr\"}\n```\n```action:log_body\n{}\n```";
        let (actions, errors) = actions_from_directives(
            &DirectiveExtractor::extract_all(reply),
            &ValidationContext::default(),
        );
        assert!(actions.is_empty());
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_double_confirm_inserts_once() {
        let (controller, store, sink, id) = setup(0);

        assert_eq!(controller.confirm(&id).await.unwrap(), ActionOutcome::Executed);
        assert!(matches!(controller.confirm(&id).await, Err(ChatError::ActionNotFound(_))));

        let inserts = sink.inserts.lock();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].0, "meal_logs");
        assert!(store.find_action(&id).is_none());
    }

    #[tokio::test]
    async fn test_failure_stays_visible_until_retry() {
        let (controller, store, sink, id) = setup(1);

        let outcome = controller.confirm(&id).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Failed(ref e) if e.contains("database unavailable")));
        let failed = store.find_action(&id).unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert!(failed.error.is_some());

        assert_eq!(controller.confirm(&id).await.unwrap(), ActionOutcome::Ignored);
        assert_eq!(controller.reject(&id).unwrap(), ActionOutcome::Ignored);
        assert_eq!(controller.retry(&id).await.unwrap(), ActionOutcome::Executed);
        assert_eq!(sink.inserts.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reject_and_dismiss() {
        let (controller, store, sink, id) = setup(0);
        assert_eq!(controller.retry(&id).await.unwrap(), ActionOutcome::Ignored);
        assert_eq!(controller.reject(&id).unwrap(), ActionOutcome::Rejected);
        assert!(store.find_action(&id).is_none());
        assert!(sink.inserts.lock().is_empty());

        let (controller, store, _sink, id) = setup(1);
        controller.confirm(&id).await.unwrap();
        assert_eq!(controller.dismiss(&id).unwrap(), ActionOutcome::Dismissed);
        assert!(store.find_action(&id).is_none());
    }

    #[derive(Default)]
    struct GatedSink {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        inserts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ActionSink for GatedSink {
        async fn insert(&self, table: &str, _record: Value) -> ChatResult<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inserts.lock().push(table.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reject_during_execution_is_ignored() {
        let (_, store, _, id) = setup(0);
        let sink = Arc::new(GatedSink::default());
        let controller = ActionController::new(store.clone(), sink.clone());

        let interfere = async {
            sink.entered.notified().await;
            assert_eq!(store.find_action(&id).unwrap().status, ActionStatus::Executing);
            let rejected = controller.reject(&id).unwrap();
            let dismissed = controller.dismiss(&id).unwrap();
            sink.release.notify_one();
            (rejected, dismissed)
        };
        let (confirmed, (rejected, dismissed)) = tokio::join!(controller.confirm(&id), interfere);

        assert_eq!(rejected, ActionOutcome::Ignored);
        assert_eq!(dismissed, ActionOutcome::Ignored);
        assert_eq!(confirmed.unwrap(), ActionOutcome::Executed);
        assert_eq!(*sink.inserts.lock(), vec!["meal_logs".to_string()]);
        assert!(store.find_action(&id).is_none());
    }

    #[tokio::test]
    async fn test_reject_before_confirm_wins() {
        let (controller, store, sink, id) = setup(0);
        let (rejected, confirmed) = tokio::join!(async { controller.reject(&id) }, controller.confirm(&id));

        assert_eq!(rejected.unwrap(), ActionOutcome::Rejected);
        assert!(matches!(confirmed, Err(ChatError::ActionNotFound(_))));
        assert!(sink.inserts.lock().is_empty());
        assert!(store.find_action(&id).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_confirms_insert_once() {
        let (controller, _store, sink, id) = setup(0);
        let (a, b) = tokio::join!(controller.confirm(&id), controller.confirm(&id));

        let executed = [a, b]
            .into_iter()
            .filter(|r| matches!(r, Ok(ActionOutcome::Executed)))
            .count();
        assert_eq!(executed, 1);
        assert_eq!(sink.inserts.lock().len(), 1);
    }
}

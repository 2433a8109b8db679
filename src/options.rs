use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::sleep;
use tracing::debug;

use crate::api::Backend;

/// Suggestions currently shown under a filter input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuggestionList {
    pub field: String,
    pub values: Vec<String>,
}

/// Debounced typeahead lookup for the account/campaign filter inputs.
/// Every keystroke bumps a generation counter; only the call still holding
/// the latest generation after the debounce window (and again after the
/// response) gets to publish its values.
pub struct AutocompleteProvider {
    backend: Arc<dyn Backend>,
    debounce: Duration,
    limit: usize,
    state: Mutex<SuggestState>,
}

#[derive(Default)]
struct SuggestState {
    generation: u64,
    current: SuggestionList,
}

impl AutocompleteProvider {
    pub fn new(backend: Arc<dyn Backend>, debounce: Duration, limit: usize) -> Self {
        Self {
            backend,
            debounce,
            limit,
            state: Mutex::new(SuggestState::default()),
        }
    }

    /// Returns the fetched suggestions, or `None` when this call was
    /// superseded by a newer keystroke or the lookup failed.
    pub async fn suggest(&self, field: &str, query: &str) -> Option<SuggestionList> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.generation
        };

        sleep(self.debounce).await;
        if self.superseded(generation) {
            return None;
        }

        let outcome = self.backend.options(field, query.trim(), self.limit).await;
        if self.superseded(generation) {
            return None;
        }
        match outcome {
            Ok(values) => {
                let list = SuggestionList {
                    field: field.to_string(),
                    values,
                };
                self.state.lock().current = list.clone();
                Some(list)
            }
            Err(err) => {
                debug!(?err, field, "suggestion lookup failed");
                None
            }
        }
    }

    pub fn current(&self) -> SuggestionList {
        self.state.lock().current.clone()
    }

    fn superseded(&self, generation: u64) -> bool {
        self.state.lock().generation != generation
    }
}

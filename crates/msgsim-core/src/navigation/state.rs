use std::rc::Rc;

use tracing::warn;
use url::Url;

use super::history::HistoryBackend;
use crate::constants::THREAD_QUERY_PARAM;
use crate::events::Subscription;

/// Reads and writes the `thread` reference in the host address.
///
/// The reference is advisory: any string is legal, including an empty one,
/// and only the repository knows whether it names a real thread.
#[derive(Clone)]
pub struct NavigationState {
    history: Rc<dyn HistoryBackend>,
}

impl NavigationState {
    pub fn new(history: Rc<dyn HistoryBackend>) -> Self {
        Self { history }
    }

    pub fn history(&self) -> &Rc<dyn HistoryBackend> {
        &self.history
    }

    /// `Some("")` when the parameter is present but empty
    pub fn current_thread_id(&self) -> Option<String> {
        thread_param(&self.history.location())
    }

    /// Push a new entry so back returns to the previous thread.
    /// `None` (or an empty id) removes the reference.
    pub fn set_current_thread_id(&self, id: Option<&str>) {
        if let Some(url) = with_thread_param(&self.history.location(), id) {
            self.history.push(&url);
        }
    }

    /// Overwrite the current entry in place
    pub fn replace_current_thread_id(&self, id: Option<&str>) {
        if let Some(url) = with_thread_param(&self.history.location(), id) {
            self.history.replace(&url);
        }
    }

    /// Called once per back/forward traversal with the reference it landed on
    pub fn on_thread_id_change(&self, callback: impl Fn(Option<String>) + 'static) -> Subscription {
        self.history
            .on_popstate(Box::new(move |location: &str| callback(thread_param(location))))
    }
}

fn thread_param(location: &str) -> Option<String> {
    let url = match Url::parse(location) {
        Ok(url) => url,
        Err(e) => {
            warn!("Unparseable location {:?}: {}", location, e);
            return None;
        }
    };
    url.query_pairs()
        .find(|(key, _)| key == THREAD_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// `location` with the reference set (first occurrence kept in place, later
/// duplicates dropped) or removed. Unrelated parameters keep their order.
fn with_thread_param(location: &str, id: Option<&str>) -> Option<String> {
    let mut url = match Url::parse(location) {
        Ok(url) => url,
        Err(e) => {
            warn!("Cannot update unparseable location {:?}: {}", location, e);
            return None;
        }
    };
    let id = id.filter(|id| !id.is_empty());

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut placed = false;
    for (key, value) in url.query_pairs() {
        if key != THREAD_QUERY_PARAM {
            pairs.push((key.into_owned(), value.into_owned()));
        } else if let (Some(id), false) = (id, placed) {
            pairs.push((key.into_owned(), id.to_string()));
            placed = true;
        }
    }
    if let (Some(id), false) = (id, placed) {
        pairs.push((THREAD_QUERY_PARAM.to_string(), id.to_string()));
    }

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    Some(url.to_string())
}

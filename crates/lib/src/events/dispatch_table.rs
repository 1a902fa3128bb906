//! Event-type routing, built once per identity at startup.

use super::inbound::EventKind;
use std::collections::HashSet;

/// What the pipeline does with an event of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Forward,
    /// Acknowledged and logged, never forwarded.
    Ignore,
}

/// One route per known event kind. Kinds the bridge does not know forward unless listed.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    message: Route,
    app_mention: Route,
    reaction_added: Route,
    reaction_removed: Route,
    ignored_other: HashSet<String>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self {
            message: Route::Forward,
            app_mention: Route::Forward,
            reaction_added: Route::Forward,
            reaction_removed: Route::Forward,
            ignored_other: HashSet::new(),
        }
    }
}

impl DispatchTable {
    /// Everything forwards except the listed event types.
    pub fn with_ignored<S: AsRef<str>>(ignored: &[S]) -> Self {
        let mut table = Self::default();
        for name in ignored {
            match EventKind::parse(name.as_ref()) {
                EventKind::Message => table.message = Route::Ignore,
                EventKind::AppMention => table.app_mention = Route::Ignore,
                EventKind::ReactionAdded => table.reaction_added = Route::Ignore,
                EventKind::ReactionRemoved => table.reaction_removed = Route::Ignore,
                EventKind::Other(other) => {
                    table.ignored_other.insert(other);
                }
            }
        }
        table
    }

    pub fn route(&self, kind: &EventKind) -> Route {
        match kind {
            EventKind::Message => self.message,
            EventKind::AppMention => self.app_mention,
            EventKind::ReactionAdded => self.reaction_added,
            EventKind::ReactionRemoved => self.reaction_removed,
            EventKind::Other(name) if self.ignored_other.contains(name) => Route::Ignore,
            EventKind::Other(_) => Route::Forward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_forwards_everything() {
        let table = DispatchTable::default();
        for kind in ["message", "app_mention", "reaction_added", "reaction_removed", "team_join"] {
            assert_eq!(table.route(&EventKind::parse(kind)), Route::Forward);
        }
    }

    #[test]
    fn ignored_types_route_to_ignore() {
        let table = DispatchTable::with_ignored(&["message", "team_join"]);
        assert_eq!(table.route(&EventKind::Message), Route::Ignore);
        assert_eq!(table.route(&EventKind::parse("team_join")), Route::Ignore);
        assert_eq!(table.route(&EventKind::AppMention), Route::Forward);
        assert_eq!(table.route(&EventKind::parse("pin_added")), Route::Forward);
    }
}

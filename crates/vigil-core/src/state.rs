use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a plugin instance.
///
/// The forward graph is:
///
/// ```text
/// Unloaded -> Loading -> Loaded -> Initialized -> Running -> Stopped
///                 |          |           |            |         |
///                 +-> Error  +-> Error   +-> Error    +-> Error +-> Initialized | Unloaded
/// ```
///
/// `Error` may only exit to `Unloaded`. `Frozen` is reachable from every state
/// and has no outgoing edge: leaving it requires an explicit un-freeze, which
/// destroys the instance rather than transitioning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Unloaded,
    Loading,
    Loaded,
    Initialized,
    Running,
    Stopped,
    Error,
    Frozen,
}

impl PluginState {
    pub const ALL: [PluginState; 8] = [
        Self::Unloaded,
        Self::Loading,
        Self::Loaded,
        Self::Initialized,
        Self::Running,
        Self::Stopped,
        Self::Error,
        Self::Frozen,
    ];

    /// States reachable from `self` in exactly one step.
    pub fn successors(&self) -> &'static [PluginState] {
        use PluginState::*;
        match self {
            Unloaded => &[Loading, Frozen],
            Loading => &[Loaded, Error, Frozen],
            Loaded => &[Initialized, Error, Frozen],
            Initialized => &[Running, Error, Frozen],
            Running => &[Stopped, Error, Frozen],
            Stopped => &[Initialized, Unloaded, Frozen],
            Error => &[Unloaded, Frozen],
            Frozen => &[],
        }
    }

    pub fn can_transition_to(&self, next: PluginState) -> bool {
        self.successors().contains(&next)
    }

    /// Whether calls may be routed to a plugin in this state.
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Frozen => "frozen",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_only_moves_to_initialized_or_error() {
        let next: Vec<_> = PluginState::ALL
            .into_iter()
            .filter(|s| *s != PluginState::Frozen)
            .filter(|s| PluginState::Loaded.can_transition_to(*s))
            .collect();
        assert_eq!(next, vec![PluginState::Initialized, PluginState::Error]);
    }

    #[test]
    fn running_only_moves_to_stopped_or_error() {
        let next: Vec<_> = PluginState::ALL
            .into_iter()
            .filter(|s| *s != PluginState::Frozen)
            .filter(|s| PluginState::Running.can_transition_to(*s))
            .collect();
        assert_eq!(next, vec![PluginState::Stopped, PluginState::Error]);
    }

    #[test]
    fn frozen_reachable_from_every_other_state() {
        for state in PluginState::ALL {
            if state != PluginState::Frozen {
                assert!(state.can_transition_to(PluginState::Frozen), "{state}");
            }
        }
        assert!(PluginState::Frozen.successors().is_empty());
    }

    #[test]
    fn stopped_can_restart_or_unload() {
        assert!(PluginState::Stopped.can_transition_to(PluginState::Initialized));
        assert!(PluginState::Stopped.can_transition_to(PluginState::Unloaded));
        assert!(!PluginState::Stopped.can_transition_to(PluginState::Running));
    }

    #[test]
    fn display_is_snake_case() {
        assert_eq!(PluginState::Initialized.to_string(), "initialized");
        assert_eq!(
            serde_json::to_string(&PluginState::Frozen).unwrap(),
            "\"frozen\""
        );
    }
}

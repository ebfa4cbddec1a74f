//! Watch loop state machine.
//!
//! The transition function is pure: given the current state, the cursor and
//! an event, it returns the next state, the next cursor and the effect the
//! driver must perform. All I/O lives in [`super::MailWatcher`].

use serde::{Deserialize, Serialize};

use crate::channels::ChangeSignal;

/// State of the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Establishing a session and deriving the cursor.
    Connecting,
    /// Blocked in a bounded wait for mailbox changes.
    IdleWait,
    /// Processing every message above the cursor.
    Draining,
    /// Connection lost; backing off before reconnecting.
    Recovering,
}

impl WatchState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WatchState) -> bool {
        use WatchState::*;

        matches!(
            (self, target),
            (Connecting, IdleWait)
                | (IdleWait, Draining)
                | (Draining, Draining)
                | (Draining, IdleWait)
                | (Recovering, Connecting)
                // Any state can lose the connection.
                | (_, Recovering)
        )
    }
}

impl std::fmt::Display for WatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::IdleWait => "idle_wait",
            Self::Draining => "draining",
            Self::Recovering => "recovering",
        };
        write!(f, "{s}")
    }
}

/// Something that happened while executing an effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Session established; the folder's next UID.
    Connected { uid_next: u32 },
    /// The bounded wait returned, with or without a notification.
    WaitEnded(ChangeSignal),
    /// One message was fully handled (successfully or not).
    MessageCompleted { uid: u32 },
    /// Every message found by the drain has been handled.
    DrainFinished,
    /// The connection is unusable.
    TransportFailed { reason: String },
    /// The recovery pause is over.
    BackoffElapsed,
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a session.
    Connect,
    /// Wait for changes, after the inter-drain pause when `pause` is set.
    Wait { pause: bool },
    /// Search and process every message with a UID above `since`.
    Drain { since: u32 },
    /// Keep draining.
    Continue,
    /// Back off; the next connect replaces the broken session.
    Recover { reason: String },
    /// The event does not apply to the current state.
    Ignore,
}

/// Pure transition function.
pub fn transition(
    state: WatchState,
    cursor: Option<u32>,
    event: WatchEvent,
) -> (WatchState, Option<u32>, Effect) {
    use WatchState::*;

    match (state, event) {
        (_, WatchEvent::TransportFailed { reason }) => (Recovering, None, Effect::Recover { reason }),

        (Connecting, WatchEvent::Connected { uid_next }) => (
            IdleWait,
            Some(uid_next.saturating_sub(1)),
            Effect::Wait { pause: false },
        ),

        (IdleWait, WatchEvent::WaitEnded(_)) => (
            Draining,
            cursor,
            Effect::Drain {
                since: cursor.unwrap_or(0),
            },
        ),

        (Draining, WatchEvent::MessageCompleted { uid }) => {
            let advanced = cursor.map_or(uid, |c| c.max(uid));
            (Draining, Some(advanced), Effect::Continue)
        }

        (Draining, WatchEvent::DrainFinished) => (IdleWait, cursor, Effect::Wait { pause: true }),

        (Recovering, WatchEvent::BackoffElapsed) => (Connecting, None, Effect::Connect),

        (state, _) => (state, cursor, Effect::Ignore),
    }
}

/// The state machine plus its cursor.
#[derive(Debug, Clone)]
pub struct WatchMachine {
    state: WatchState,
    cursor: Option<u32>,
}

impl WatchMachine {
    pub fn new() -> Self {
        Self {
            state: WatchState::Connecting,
            cursor: None,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Last processed UID, `None` until a session is established.
    pub fn cursor(&self) -> Option<u32> {
        self.cursor
    }

    /// Apply an event and return the effect to perform.
    pub fn on_event(&mut self, event: WatchEvent) -> Effect {
        let (state, cursor, effect) = transition(self.state, self.cursor, event);
        debug_assert!(
            state == self.state || self.state.can_transition_to(state),
            "illegal watch transition {} -> {}",
            self.state,
            state
        );
        if state != self.state {
            tracing::debug!(from = %self.state, to = %state, cursor = ?cursor, "Watch state transition");
        }
        self.state = state;
        self.cursor = cursor;
        effect
    }

    /// The effect that resumes the current state from scratch.
    pub fn resume_effect(&self) -> Effect {
        match self.state {
            WatchState::Connecting => Effect::Connect,
            WatchState::IdleWait => Effect::Wait { pause: false },
            WatchState::Draining => Effect::Drain {
                since: self.cursor.unwrap_or(0),
            },
            WatchState::Recovering => Effect::Recover {
                reason: "resumed".to_string(),
            },
        }
    }
}

impl Default for WatchMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        use WatchState::*;
        assert!(Connecting.can_transition_to(IdleWait));
        assert!(IdleWait.can_transition_to(Draining));
        assert!(Draining.can_transition_to(IdleWait));
        assert!(Recovering.can_transition_to(Connecting));
        for state in [Connecting, IdleWait, Draining, Recovering] {
            assert!(state.can_transition_to(Recovering));
        }
    }

    #[test]
    fn state_transitions_invalid() {
        use WatchState::*;
        assert!(!Connecting.can_transition_to(Draining));
        assert!(!IdleWait.can_transition_to(Connecting));
        assert!(!Recovering.can_transition_to(IdleWait));
    }

    #[test]
    fn connect_derives_cursor_from_uid_next() {
        let (state, cursor, effect) = transition(
            WatchState::Connecting,
            None,
            WatchEvent::Connected { uid_next: 42 },
        );
        assert_eq!(state, WatchState::IdleWait);
        assert_eq!(cursor, Some(41));
        assert_eq!(effect, Effect::Wait { pause: false });
    }

    #[test]
    fn empty_mailbox_cursor_is_zero() {
        let (_, cursor, _) = transition(
            WatchState::Connecting,
            None,
            WatchEvent::Connected { uid_next: 0 },
        );
        assert_eq!(cursor, Some(0));
    }

    #[test]
    fn timeout_still_drains() {
        let (state, _, effect) = transition(
            WatchState::IdleWait,
            Some(9),
            WatchEvent::WaitEnded(ChangeSignal::TimedOut),
        );
        assert_eq!(state, WatchState::Draining);
        assert_eq!(effect, Effect::Drain { since: 9 });
    }

    #[test]
    fn cursor_only_moves_forward() {
        let mut machine = WatchMachine::new();
        machine.on_event(WatchEvent::Connected { uid_next: 10 });
        machine.on_event(WatchEvent::WaitEnded(ChangeSignal::TimedOut));
        machine.on_event(WatchEvent::MessageCompleted { uid: 12 });
        machine.on_event(WatchEvent::MessageCompleted { uid: 11 });
        assert_eq!(machine.cursor(), Some(12));

        let effect = machine.on_event(WatchEvent::DrainFinished);
        assert_eq!(effect, Effect::Wait { pause: true });
        assert_eq!(machine.state(), WatchState::IdleWait);
        assert_eq!(machine.cursor(), Some(12));
    }

    #[test]
    fn failure_from_any_state_recovers_and_drops_cursor() {
        for state in [
            WatchState::Connecting,
            WatchState::IdleWait,
            WatchState::Draining,
            WatchState::Recovering,
        ] {
            let (next, cursor, effect) = transition(
                state,
                Some(5),
                WatchEvent::TransportFailed {
                    reason: "reset".into(),
                },
            );
            assert_eq!(next, WatchState::Recovering);
            assert_eq!(cursor, None);
            assert!(matches!(effect, Effect::Recover { .. }));
        }
    }

    #[test]
    fn backoff_returns_to_connecting() {
        let (state, cursor, effect) =
            transition(WatchState::Recovering, None, WatchEvent::BackoffElapsed);
        assert_eq!(state, WatchState::Connecting);
        assert_eq!(cursor, None);
        assert_eq!(effect, Effect::Connect);
    }

    #[test]
    fn stray_event_is_ignored() {
        let (state, cursor, effect) = transition(
            WatchState::IdleWait,
            Some(3),
            WatchEvent::MessageCompleted { uid: 99 },
        );
        assert_eq!(state, WatchState::IdleWait);
        assert_eq!(cursor, Some(3));
        assert_eq!(effect, Effect::Ignore);
    }

    #[test]
    fn resume_effect_matches_state() {
        let mut machine = WatchMachine::new();
        assert_eq!(machine.resume_effect(), Effect::Connect);
        machine.on_event(WatchEvent::Connected { uid_next: 4 });
        assert_eq!(machine.resume_effect(), Effect::Wait { pause: false });
    }

    #[test]
    fn state_display_is_snake_case() {
        assert_eq!(WatchState::IdleWait.to_string(), "idle_wait");
        let json = serde_json::to_string(&WatchState::Recovering).unwrap();
        assert_eq!(json, "\"recovering\"");
    }
}

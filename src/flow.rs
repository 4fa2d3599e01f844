//! Conversation turn-taking between the AI interviewer and the candidate.
//!
//! A small state machine guaranteeing that the two speakers are never
//! considered active at the same time. The AI has priority: starting an AI
//! turn force-closes an open user turn, while a user turn is rejected
//! outright whenever the AI holds the floor. Every accepted turn lands in
//! an append-only history that summaries and logs are derived from.
//!
//! All signals take effect immediately; invalid ones are logged no-ops so
//! upstream event glitches can never corrupt the state.

use log::{debug, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::audio_constants::{MIN_USER_SPEECH_MS, TURN_CHANGE_BUFFER_MS};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Ai,
    User,
}

/// Who currently holds the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOwner {
    Silence,
    Ai,
    User,
}

/// One entry in the turn history. Open turns have no end time yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
}

impl ConversationTurn {
    pub fn duration(&self, now: Instant) -> Duration {
        self.ended_at
            .unwrap_or(now)
            .saturating_duration_since(self.started_at)
    }
}

/// Serializable snapshot of the flow state for a UI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConversationFlowState {
    pub current_turn: TurnOwner,
    pub is_ai_speaking: bool,
    pub is_user_speaking: bool,
    /// None until the first turn change happens.
    pub ms_since_turn_change: Option<u64>,
    pub turn_count: usize,
    /// Duration of the open AI turn, 0 otherwise.
    pub ai_speaking_ms: u64,
    /// Duration of the open user turn, 0 otherwise.
    pub user_speaking_ms: u64,
}

/// Aggregate view over the whole conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub total_turns: usize,
    pub ai_turns: usize,
    pub user_turns: usize,
    /// Sum of all turn durations; open turns count up to `now`.
    pub total_speaking_ms: u64,
}

/// Turn-taking state machine.
pub struct ConversationFlowManager {
    current_turn: TurnOwner,
    ai_speaking: bool,
    user_speaking: bool,
    /// None until the first turn starts or ends, so a fresh manager does
    /// not impose the turn-change buffer on the very first utterance.
    last_turn_change: Option<Instant>,
    history: Vec<ConversationTurn>,
    min_user_speech: Duration,
    turn_change_buffer: Duration,
}

impl ConversationFlowManager {
    pub fn new() -> Self {
        Self {
            current_turn: TurnOwner::Silence,
            ai_speaking: false,
            user_speaking: false,
            last_turn_change: None,
            history: Vec::new(),
            min_user_speech: Duration::from_millis(MIN_USER_SPEECH_MS),
            turn_change_buffer: Duration::from_millis(TURN_CHANGE_BUFFER_MS),
        }
    }

    /// The AI starts speaking. Force-ends an active user turn.
    ///
    /// Returns whether the signal changed state.
    pub fn ai_speaking_started(&mut self) -> bool {
        self.ai_speaking_started_at(Instant::now())
    }

    pub fn ai_speaking_started_at(&mut self, now: Instant) -> bool {
        if self.ai_speaking {
            debug!("ai start ignored: already speaking");
            return false;
        }
        if self.user_speaking {
            warn!("ai starting while user speaks, closing user turn");
            self.user_speaking_ended_at(now);
        }

        self.ai_speaking = true;
        self.current_turn = TurnOwner::Ai;
        self.last_turn_change = Some(now);
        self.history.push(ConversationTurn {
            speaker: Speaker::Ai,
            started_at: now,
            ended_at: None,
        });
        info!("ai turn started");
        true
    }

    /// The AI finished speaking.
    pub fn ai_speaking_ended(&mut self) -> bool {
        self.ai_speaking_ended_at(Instant::now())
    }

    pub fn ai_speaking_ended_at(&mut self, now: Instant) -> bool {
        if !self.ai_speaking {
            debug!("ai end ignored: not speaking");
            return false;
        }
        self.ai_speaking = false;
        self.current_turn = TurnOwner::Silence;
        self.last_turn_change = Some(now);
        let duration = self.close_open_turn(Speaker::Ai, now);
        info!("ai turn ended after {}ms", duration.as_millis());
        true
    }

    /// The user starts speaking. Rejected while the AI holds the floor or
    /// during the turn-change buffer.
    pub fn user_speaking_started(&mut self) -> bool {
        self.user_speaking_started_at(Instant::now())
    }

    pub fn user_speaking_started_at(&mut self, now: Instant) -> bool {
        if self.user_speaking {
            return false;
        }
        if !self.can_user_speak_at(now) {
            debug!("user start rejected: floor not available");
            return false;
        }

        self.user_speaking = true;
        self.current_turn = TurnOwner::User;
        self.last_turn_change = Some(now);
        self.history.push(ConversationTurn {
            speaker: Speaker::User,
            started_at: now,
            ended_at: None,
        });
        info!("user turn started");
        true
    }

    /// The user finished speaking.
    pub fn user_speaking_ended(&mut self) -> bool {
        self.user_speaking_ended_at(Instant::now())
    }

    pub fn user_speaking_ended_at(&mut self, now: Instant) -> bool {
        if !self.user_speaking {
            debug!("user end ignored: not speaking");
            return false;
        }
        self.user_speaking = false;
        self.current_turn = TurnOwner::Silence;
        self.last_turn_change = Some(now);
        let duration = self.close_open_turn(Speaker::User, now);
        info!("user turn ended after {}ms", duration.as_millis());
        true
    }

    /// Whether the user may take the floor right now.
    pub fn can_user_speak(&self) -> bool {
        self.can_user_speak_at(Instant::now())
    }

    pub fn can_user_speak_at(&self, now: Instant) -> bool {
        if self.ai_speaking {
            return false;
        }
        if self.current_turn == TurnOwner::Silence {
            if let Some(changed) = self.last_turn_change {
                if now.saturating_duration_since(changed) < self.turn_change_buffer {
                    return false;
                }
            }
        }
        true
    }

    /// Whether the AI may take the floor right now.
    ///
    /// Besides mutual exclusion, the AI briefly yields after a user turn
    /// shorter than the minimum speech duration ended, since the user most
    /// likely paused mid-thought rather than finished.
    pub fn can_ai_speak(&self) -> bool {
        self.can_ai_speak_at(Instant::now())
    }

    pub fn can_ai_speak_at(&self, now: Instant) -> bool {
        if self.user_speaking {
            return false;
        }
        if let Some(last) = self.history.last() {
            if last.speaker == Speaker::User {
                if let Some(ended) = last.ended_at {
                    let was_brief = last.duration(now) < self.min_user_speech;
                    let just_ended =
                        now.saturating_duration_since(ended) < self.turn_change_buffer;
                    if was_brief && just_ended {
                        return false;
                    }
                }
            }
        }
        true
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.ai_speaking
    }

    pub fn is_user_speaking(&self) -> bool {
        self.user_speaking
    }

    pub fn turn_history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConversationFlowState {
        self.state_at(Instant::now())
    }

    pub fn state_at(&self, now: Instant) -> ConversationFlowState {
        let open_ms = |speaker: Speaker| -> u64 {
            self.history
                .last()
                .filter(|t| t.speaker == speaker && t.ended_at.is_none())
                .map(|t| t.duration(now).as_millis() as u64)
                .unwrap_or(0)
        };

        ConversationFlowState {
            current_turn: self.current_turn,
            is_ai_speaking: self.ai_speaking,
            is_user_speaking: self.user_speaking,
            ms_since_turn_change: self
                .last_turn_change
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            turn_count: self.history.len(),
            ai_speaking_ms: open_ms(Speaker::Ai),
            user_speaking_ms: open_ms(Speaker::User),
        }
    }

    /// Fold the turn history into a summary.
    pub fn summary(&self) -> ConversationSummary {
        self.summary_at(Instant::now())
    }

    pub fn summary_at(&self, now: Instant) -> ConversationSummary {
        let mut summary = ConversationSummary {
            total_turns: self.history.len(),
            ai_turns: 0,
            user_turns: 0,
            total_speaking_ms: 0,
        };
        for turn in &self.history {
            match turn.speaker {
                Speaker::Ai => summary.ai_turns += 1,
                Speaker::User => summary.user_turns += 1,
            }
            summary.total_speaking_ms += turn.duration(now).as_millis() as u64;
        }
        summary
    }

    /// Render the turn history for logs.
    pub fn turn_history_log(&self) -> String {
        let now = Instant::now();
        self.history
            .iter()
            .enumerate()
            .map(|(idx, turn)| {
                let speaker = match turn.speaker {
                    Speaker::Ai => "ai",
                    Speaker::User => "user",
                };
                format!("{}. {} - {}ms", idx + 1, speaker, turn.duration(now).as_millis())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Clear all state and history for a new conversation.
    pub fn reset(&mut self) {
        self.current_turn = TurnOwner::Silence;
        self.ai_speaking = false;
        self.user_speaking = false;
        self.last_turn_change = None;
        self.history.clear();
        debug!("conversation flow reset");
    }

    fn close_open_turn(&mut self, speaker: Speaker, now: Instant) -> Duration {
        if let Some(turn) = self.history.last_mut() {
            if turn.speaker == speaker && turn.ended_at.is_none() {
                turn.ended_at = Some(now);
                return turn.duration(now);
            }
        }
        Duration::ZERO
    }
}

impl Default for ConversationFlowManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "flow_test.rs"]
mod tests;

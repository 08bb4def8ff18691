//! Round domain model.

use chrono::{DateTime, Duration, Utc};
use protocol::{Color, GameState};

/// One round of the color game. Mutated only by the state machine; every
/// other reader gets a snapshot copy.
#[derive(Debug, Clone)]
pub struct Round {
    pub round_id: String,
    pub state: GameState,
    pub result: Option<Color>,
    pub start_time: DateTime<Utc>,
    pub betting_end: Option<DateTime<Utc>>,
}

impl Round {
    pub fn new(round_id: String) -> Self {
        Self {
            round_id,
            state: GameState::RoundStarted,
            result: None,
            start_time: Utc::now(),
            betting_end: None,
        }
    }

    /// Open the betting window for `duration`.
    pub fn start_betting(&mut self, duration: Duration) -> DateTime<Utc> {
        self.state = GameState::Betting;
        let end = Utc::now() + duration;
        self.betting_end = Some(end);
        end
    }

    /// Close betting and fix the drawn result.
    pub fn draw(&mut self, result: Color) {
        self.state = GameState::Drawing;
        self.result = Some(result);
    }

    /// Publish the result.
    pub fn show_result(&mut self) {
        self.state = GameState::Result;
    }

    /// Enter the rest period.
    pub fn end(&mut self) {
        self.state = GameState::RoundEnded;
    }

    /// Bets are accepted only inside the betting window.
    pub fn can_accept_bet(&self) -> bool {
        self.state == GameState::Betting
            && self.betting_end.map(|end| Utc::now() < end).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_lifecycle() {
        let mut round = Round::new("20250101120000".to_string());
        assert_eq!(round.state, GameState::RoundStarted);
        assert!(!round.can_accept_bet());

        round.start_betting(Duration::seconds(10));
        assert_eq!(round.state, GameState::Betting);
        assert!(round.can_accept_bet());

        round.draw(Color::Blue);
        assert_eq!(round.state, GameState::Drawing);
        assert_eq!(round.result, Some(Color::Blue));
        assert!(!round.can_accept_bet());

        round.show_result();
        assert_eq!(round.state, GameState::Result);

        round.end();
        assert_eq!(round.state, GameState::RoundEnded);
    }

    #[test]
    fn test_expired_betting_window_rejects() {
        let mut round = Round::new("20250101120000".to_string());
        round.start_betting(Duration::seconds(-1));
        assert_eq!(round.state, GameState::Betting);
        assert!(!round.can_accept_bet());
    }
}

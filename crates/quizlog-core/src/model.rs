// ABOUTME: Record types stored in the trivia bot's datasets.
// ABOUTME: Player statistics, cached token metadata and in-progress game sessions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime trivia statistics for one player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub username: String,
    pub total_score: u64,
    pub games_played: u32,
    pub correct_answers: u32,
    pub best_streak: u32,
    pub last_played: Option<DateTime<Utc>>,
}

impl PlayerStats {
    /// Fold one finished round into the running totals.
    pub fn record_round(&mut self, points: u64, correct: bool, streak: u32, at: DateTime<Utc>) {
        self.total_score += points;
        self.games_played += 1;
        if correct {
            self.correct_answers += 1;
        }
        self.best_streak = self.best_streak.max(streak);
        self.last_played = Some(at);
    }
}

/// Metadata for a single NFT, as fetched from the metadata provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub traits: BTreeMap<String, String>,
}

/// State of a round in progress in one channel, persisted so a restart
/// can resume or clean it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub round: u32,
    pub token_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_accumulates() {
        let mut stats = PlayerStats::default();
        let now = Utc::now();

        stats.record_round(100, true, 1, now);
        stats.record_round(0, false, 0, now);
        stats.record_round(50, true, 3, now);

        assert_eq!(stats.total_score, 150);
        assert_eq!(stats.games_played, 3);
        assert_eq!(stats.correct_answers, 2);
        assert_eq!(stats.best_streak, 3);
        assert_eq!(stats.last_played, Some(now));
    }

    #[test]
    fn token_metadata_defaults_missing_traits() {
        let token: TokenMetadata = serde_json::from_str(r#"{"name":"Frog #1","image_url":null}"#).unwrap();
        assert!(token.traits.is_empty());
    }
}

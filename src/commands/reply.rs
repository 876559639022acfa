use chrono::{DateTime, Utc};

use crate::cryptohack::ScoreRecord;
use crate::scoreboard::Scoreboard;

pub const SCOREBOARD_TITLE: &str = "CryptoHack Scoreboard";

/// Rendered outcome of a command, handed back to the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Stats(StatsCard),
    Scoreboard(ScoreboardCard),
}

impl Reply {
    /// Line-oriented rendering for platforms without rich messages.
    pub fn lines(&self) -> Vec<String> {
        match self {
            Reply::Text(text) => vec![text.clone()],
            Reply::Stats(card) => vec![card.to_string()],
            Reply::Scoreboard(card) => card.lines(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsCard {
    pub title: String,
    pub url: String,
    pub rank: (u64, u64),
    pub score: (u64, u64),
    pub solves: (u64, u64),
}

impl StatsCard {
    pub fn new(record: &ScoreRecord, url: String) -> Self {
        Self {
            title: record.username.clone(),
            url,
            rank: (record.global_rank, record.num_users),
            score: (record.points, record.total_points),
            solves: (record.challenges_solved, record.total_challenges),
        }
    }
}

impl core::fmt::Display for StatsCard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} | Rank: {} / {} | Score: {} / {} | Solves: {} / {} | {}",
            self.title,
            self.rank.0,
            self.rank.1,
            self.score.0,
            self.score.1,
            self.solves.0,
            self.solves.1,
            self.url
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreboardCard {
    /// `(position, display name, points)`
    pub rows: Vec<(usize, String, u64)>,
    pub omitted: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl ScoreboardCard {
    pub fn new(board: &Scoreboard, generated_at: DateTime<Utc>) -> Self {
        Self {
            rows: board
                .entries
                .iter()
                .map(|e| (e.position, e.display_name.clone(), e.record.points))
                .collect(),
            omitted: board
                .omitted
                .iter()
                .map(|o| o.display_name.clone())
                .collect(),
            generated_at,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} ({})",
            SCOREBOARD_TITLE,
            self.generated_at.format("%Y-%m-%d %H:%M UTC")
        )];

        if self.rows.is_empty() && self.omitted.is_empty() {
            lines.push("No linked CryptoHack accounts yet.".to_string());
        }

        lines.extend(
            self.rows
                .iter()
                .map(|(position, name, points)| format!("{position}. {name}\t{points}")),
        );

        if !self.omitted.is_empty() {
            lines.push(format!(
                "Couldn't fetch scores for: {}",
                self.omitted.join(", ")
            ));
        }

        lines
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::scoreboard::{OmittedEntry, ScoreboardEntry};

    fn record() -> ScoreRecord {
        ScoreRecord {
            username: "alice".to_string(),
            global_rank: 3,
            points: 900,
            total_points: 1000,
            challenges_solved: 9,
            total_challenges: 10,
            num_users: 500,
        }
    }

    #[test]
    fn test_stats_card_line() {
        let card = StatsCard::new(&record(), "https://cryptohack.org/user/alice/".to_string());
        assert_eq!(
            Reply::Stats(card).lines(),
            vec![
                "alice | Rank: 3 / 500 | Score: 900 / 1000 | Solves: 9 / 10 | https://cryptohack.org/user/alice/"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_scoreboard_card_lines() {
        let board = Scoreboard {
            entries: vec![ScoreboardEntry {
                position: 1,
                display_name: "Alice".to_string(),
                record: record(),
            }],
            omitted: vec![OmittedEntry {
                display_name: "Ghost".to_string(),
                remote_username: "ghost".to_string(),
                error: crate::cryptohack::CryptoHackErr::LookupFailed("ghost".to_string()),
            }],
        };
        let at = Utc.with_ymd_and_hms(2025, 10, 18, 12, 30, 0).unwrap();

        assert_eq!(
            ScoreboardCard::new(&board, at).lines(),
            vec![
                "CryptoHack Scoreboard (2025-10-18 12:30 UTC)".to_string(),
                "1. Alice\t900".to_string(),
                "Couldn't fetch scores for: Ghost".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_scoreboard() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let lines = ScoreboardCard::new(&Scoreboard::default(), at).lines();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "No linked CryptoHack accounts yet.");
    }
}

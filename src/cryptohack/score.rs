use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

/// Number of `:`-delimited segments in a userscore response:
///
/// `username:global_rank:points:total_points:challs_solved:total_challs:num_users`
pub const SCORE_SEGMENTS: usize = 7;

const NUMERIC_FIELDS: [&str; SCORE_SEGMENTS - 1] = [
    "global_rank",
    "points",
    "total_points",
    "challenges_solved",
    "total_challenges",
    "num_users",
];

/// A user's standing as reported by the CryptoHack userscore endpoint.
///
/// Cross-field consistency (`points <= total_points`, `global_rank <= num_users`, ...) is
/// expected but deliberately not checked; whatever the remote reports is passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub username: String,
    pub global_rank: u64,
    pub points: u64,
    pub total_points: u64,
    pub challenges_solved: u64,
    pub total_challenges: u64,
    pub num_users: u64,
}

impl ScoreRecord {
    #[instrument(level = "trace")]
    pub fn parse(raw: &str) -> ScoreParseResult<Self> {
        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() != SCORE_SEGMENTS {
            return Err(ScoreParseErr::SegmentCount(segments.len()));
        }

        let mut values = [0u64; SCORE_SEGMENTS - 1];
        for (idx, (segment, field)) in segments[1..].iter().zip(NUMERIC_FIELDS).enumerate() {
            values[idx] =
                segment
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ScoreParseErr::InvalidField {
                        field,
                        value: segment.to_string(),
                    })?;
        }

        let [
            global_rank,
            points,
            total_points,
            challenges_solved,
            total_challenges,
            num_users,
        ] = values;

        Ok(Self {
            username: segments[0].to_string(),
            global_rank,
            points,
            total_points,
            challenges_solved,
            total_challenges,
            num_users,
        })
    }
}

impl std::str::FromStr for ScoreRecord {
    type Err = ScoreParseErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

pub type ScoreParseResult<T> = core::result::Result<T, ScoreParseErr>;

/// The userscore body didn't match the fixed grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreParseErr {
    #[error("expected {SCORE_SEGMENTS} ':'-delimited segments, found {0}")]
    SegmentCount(usize),

    #[error("field '{field}' is not a non-negative integer (got '{value}')")]
    InvalidField { field: &'static str, value: String },
}

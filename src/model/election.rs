use chrono::{DateTime, Utc};
use evote_crypto::SealedData;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use super::mongodb::Id;

pub type ElectionId = Id;
pub type CandidateId = String;

/// Pseudo-candidate for an abstention. Always present in tally output.
pub const BLANK: &str = "blank";

/// Where an election is in its lifecycle relative to a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionPhase {
    Upcoming,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
}

/// An election, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: ElectionId,
    pub title: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_date: DateTime<Utc>,
    pub candidates: Vec<Candidate>,
    /// Encrypted tally, present once the votes have been counted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<SealedData>,
    /// Set when ballot-box tampering has been detected. Never cleared.
    #[serde(default)]
    pub fraud: bool,
}

impl Election {
    pub fn phase(&self, now: DateTime<Utc>) -> ElectionPhase {
        if now <= self.start_date {
            ElectionPhase::Upcoming
        } else if now < self.end_date {
            ElectionPhase::Open
        } else {
            ElectionPhase::Closed
        }
    }

    /// Votes are accepted strictly between the start and end dates.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == ElectionPhase::Open
    }

    /// Election details may only change strictly before voting starts, or
    /// after it ends while no results exist.
    pub fn is_mutable(&self, now: DateTime<Utc>) -> bool {
        now < self.start_date || (now > self.end_date && self.results.is_none())
    }

    /// Is `choice` a valid ballot value for this election?
    pub fn accepts_choice(&self, choice: &str) -> bool {
        choice == BLANK || self.candidates.iter().any(|c| c.id == choice)
    }
}

#[cfg(test)]
pub(crate) mod examples {
    use chrono::Duration;

    use super::*;

    impl Election {
        fn example(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
            Self {
                id: Id::new(),
                title: "Student council".to_string(),
                start_date,
                end_date,
                candidates: vec![
                    Candidate {
                        id: "alice".to_string(),
                        name: "Alice".to_string(),
                    },
                    Candidate {
                        id: "bob".to_string(),
                        name: "Bob".to_string(),
                    },
                ],
                results: None,
                fraud: false,
            }
        }

        pub fn open_example() -> Self {
            let now = Utc::now();
            Self::example(now - Duration::hours(1), now + Duration::hours(1))
        }

        pub fn closed_example() -> Self {
            let now = Utc::now();
            Self::example(now - Duration::hours(2), now - Duration::minutes(5))
        }

        pub fn upcoming_example() -> Self {
            let now = Utc::now();
            Self::example(now + Duration::hours(1), now + Duration::hours(2))
        }
    }
}

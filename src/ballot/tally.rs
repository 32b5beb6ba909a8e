use std::collections::BTreeMap;

use evote_crypto::DecryptionKey;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    ballot::{Ballot, BallotId},
    election::{CandidateId, Election, BLANK},
};

/// Candidate ID to number of votes. Ordered so output is stable.
pub type Counts = BTreeMap<CandidateId, u64>;

/// Every valid choice of `election`, at zero.
pub fn empty_counts(election: &Election) -> Counts {
    election
        .candidates
        .iter()
        .map(|candidate| candidate.id.clone())
        .chain(std::iter::once(BLANK.to_string()))
        .map(|id| (id, 0))
        .collect()
}

/// Outcome of decrypting and counting a set of ballots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub counts: Counts,
    /// Ballots that did not decrypt to a valid choice.
    pub discarded: Vec<BallotId>,
}

impl Tally {
    /// Decrypt and count `ballots`. A ballot that fails to decrypt, or
    /// decrypts to something other than a candidate or blank, is skipped.
    pub fn count(election: &Election, key: &DecryptionKey, ballots: &[Ballot]) -> Self {
        let mut counts = empty_counts(election);
        let mut discarded = Vec::new();
        for ballot in ballots {
            match counter(&mut counts, key, ballot) {
                Ok(count) => *count += 1,
                Err(e) => {
                    warn!("{e}");
                    discarded.push(ballot.id.clone());
                }
            }
        }
        Self { counts, discarded }
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// The counter for the choice in `ballot`.
fn counter<'a>(
    counts: &'a mut Counts,
    key: &DecryptionKey,
    ballot: &Ballot,
) -> Result<&'a mut u64> {
    let choice = key
        .decrypt(&ballot.encrypted_choice)
        .map_err(|_| Error::MalformedBallot(format!("ballot {} does not decrypt", ballot.id)))?;
    std::str::from_utf8(&choice)
        .ok()
        .and_then(|choice| counts.get_mut(choice))
        .ok_or_else(|| {
            Error::MalformedBallot(format!("ballot {} is not a valid choice", ballot.id))
        })
}

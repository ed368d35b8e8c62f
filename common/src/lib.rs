use serde::{Deserialize, Serialize};
use std::fmt;

pub mod network;

pub type PoolId = u64;
pub type Amount = u64;
pub type Timestamp = i64;

/// Opaque caller identity. Compared for equality only, never parsed.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pool record. `pool_id == 0` marks the zero record handed back for ids
/// that were never assigned.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct Pool {
    pub pool_id: PoolId,
    pub tournament_id: String,
    pub match_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub created_at: Timestamp,
    pub closes_at: Timestamp,
    pub is_open: bool,
    pub creator: Identity,
    pub total_amount: Amount,
    pub total_bets: u64,
    pub outcomes: Vec<String>,
}

impl Pool {
    pub fn exists(&self) -> bool {
        self.pool_id != 0
    }

    pub fn has_outcome(&self, outcome: &str) -> bool {
        self.outcomes.iter().any(|candidate| candidate == outcome)
    }
}

// A potential, unrealised pool. Everything the administrator supplies when asking for a new one
#[derive(Serialize, Deserialize, Debug, Default, Eq, PartialEq, Clone)]
pub struct PotentialPool {
    pub tournament_id: String,
    pub match_id: String,
    pub name: String,
    pub description: String,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub closes_at: Timestamp,
    pub category: String,
    pub outcomes: Vec<String>,
}

/// Listing flag kept apart from `Pool::is_open`.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct PoolStatus {
    pub is_active: bool,
    pub last_updated: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Bet {
    pub bettor: Identity,
    pub pool_id: PoolId,
    pub predicted_outcome: String,
    pub amount: Amount,
    pub placed_at: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum LedgerEvent {
    PoolCreated {
        pool_id: PoolId,
        tournament_id: String,
        match_id: String,
        name: String,
        closes_at: Timestamp,
        creator: Identity,
    },
    PoolClosed {
        pool_id: PoolId,
        closed_at: Timestamp,
    },
    BetPlaced {
        pool_id: PoolId,
        bettor: Identity,
        predicted_outcome: String,
        amount: Amount,
        placed_at: Timestamp,
    },
}

impl LedgerEvent {
    pub fn pool_id(&self) -> PoolId {
        match self {
            LedgerEvent::PoolCreated { pool_id, .. }
            | LedgerEvent::PoolClosed { pool_id, .. }
            | LedgerEvent::BetPlaced { pool_id, .. } => *pool_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_membership_is_exact_match() {
        let pool = Pool {
            pool_id: 1,
            outcomes: vec!["Home".into(), "Away".into()],
            ..Default::default()
        };
        assert!(pool.has_outcome("Home"));
        assert!(!pool.has_outcome("home"));
        assert!(!pool.has_outcome("Draw"));
    }

    #[test]
    fn zero_record_does_not_exist() {
        assert!(!Pool::default().exists());
    }
}

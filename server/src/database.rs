use anyhow::Context;
use common::{Amount, Bet, Identity, Pool, PoolId, PoolStatus, Timestamp};
use serde::{Deserialize, Serialize};
use surrealdb::engine::local::{Db, Mem};
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::sql::statements::{BeginStatement, CommitStatement};
use surrealdb::sql::{Id, Thing};
use surrealdb::{Connection, Result, Surreal};

use crate::notify::Mutation;

const POOL: &str = "pool";
const POOL_STATUS: &str = "pool_status";
const BET: &str = "bet";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Record {
    #[allow(dead_code)]
    pub id: Thing,
}

// SurrealDB integers are signed 64-bit, so amounts are stored as decimal text.
mod amount_text {
    use common::Amount;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbPool {
    pub pool_id: PoolId,
    pub tournament_id: String,
    pub match_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(with = "amount_text")]
    pub min_bet: Amount,
    #[serde(with = "amount_text")]
    pub max_bet: Amount,
    pub created_at: Timestamp,
    pub closes_at: Timestamp,
    pub is_open: bool,
    pub creator: Identity,
    #[serde(with = "amount_text")]
    pub total_amount: Amount,
    #[serde(with = "amount_text")]
    pub total_bets: u64,
    pub outcomes: Vec<String>,
}

impl From<&Pool> for DbPool {
    fn from(pool: &Pool) -> Self {
        Self {
            pool_id: pool.pool_id,
            tournament_id: pool.tournament_id.clone(),
            match_id: pool.match_id.clone(),
            name: pool.name.clone(),
            description: pool.description.clone(),
            category: pool.category.clone(),
            min_bet: pool.min_bet,
            max_bet: pool.max_bet,
            created_at: pool.created_at,
            closes_at: pool.closes_at,
            is_open: pool.is_open,
            creator: pool.creator.clone(),
            total_amount: pool.total_amount,
            total_bets: pool.total_bets,
            outcomes: pool.outcomes.clone(),
        }
    }
}

impl From<DbPool> for Pool {
    fn from(value: DbPool) -> Self {
        Self {
            pool_id: value.pool_id,
            tournament_id: value.tournament_id,
            match_id: value.match_id,
            name: value.name,
            description: value.description,
            category: value.category,
            min_bet: value.min_bet,
            max_bet: value.max_bet,
            created_at: value.created_at,
            closes_at: value.closes_at,
            is_open: value.is_open,
            creator: value.creator,
            total_amount: value.total_amount,
            total_bets: value.total_bets,
            outcomes: value.outcomes,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbBet {
    pub bettor: Identity,
    pub pool_id: PoolId,
    pub predicted_outcome: String,
    #[serde(with = "amount_text")]
    pub amount: Amount,
    pub placed_at: Timestamp,
}

impl From<&Bet> for DbBet {
    fn from(bet: &Bet) -> Self {
        Self {
            bettor: bet.bettor.clone(),
            pool_id: bet.pool_id,
            predicted_outcome: bet.predicted_outcome.clone(),
            amount: bet.amount,
            placed_at: bet.placed_at,
        }
    }
}

impl From<DbBet> for Bet {
    fn from(value: DbBet) -> Self {
        Self {
            bettor: value.bettor,
            pool_id: value.pool_id,
            predicted_outcome: value.predicted_outcome,
            amount: value.amount,
            placed_at: value.placed_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DbPoolStatus {
    pub pool_id: PoolId,
    pub is_active: bool,
    pub last_updated: Timestamp,
}

impl DbPoolStatus {
    pub fn new(pool_id: PoolId, status: PoolStatus) -> Self {
        Self {
            pool_id,
            is_active: status.is_active,
            last_updated: status.last_updated,
        }
    }
}

impl From<DbPoolStatus> for (PoolId, PoolStatus) {
    fn from(value: DbPoolStatus) -> Self {
        (
            value.pool_id,
            PoolStatus {
                is_active: value.is_active,
                last_updated: value.last_updated,
            },
        )
    }
}

/// Everything needed to rebuild the ledger after a restart.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub pools: Vec<Pool>,
    pub statuses: Vec<(PoolId, PoolStatus)>,
    pub bets: Vec<Bet>,
}

pub fn bet_key(pool_id: PoolId, bettor: &Identity) -> String {
    format!("{}:{}", pool_id, bettor)
}

fn pool_thing(pool_id: PoolId) -> Thing {
    Thing {
        tb: POOL.into(),
        id: Id::String(pool_id.to_string()),
    }
}

fn bet_thing(pool_id: PoolId, bettor: &Identity) -> Thing {
    Thing {
        tb: BET.into(),
        id: Id::String(bet_key(pool_id, bettor)),
    }
}

pub struct DatabaseConnection<C: Connection> {
    connection: Surreal<C>,
}

impl DatabaseConnection<Client> {
    pub async fn connect(
        address: &str,
        namespace: &str,
        database: &str,
        username: &str,
        password: &str,
    ) -> anyhow::Result<Self> {
        let db = Surreal::new::<Ws>(address)
            .await
            .with_context(|| format!("connecting to {address}"))?;

        db.signin(Root { username, password })
            .await
            .context("signing in")?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(Self { connection: db })
    }
}

impl DatabaseConnection<Db> {
    pub async fn in_memory(namespace: &str, database: &str) -> anyhow::Result<Self> {
        let db = Surreal::new::<Mem>(()).await?;
        db.use_ns(namespace).use_db(database).await?;
        Ok(Self { connection: db })
    }
}

impl<C: Connection> DatabaseConnection<C> {
    pub async fn apply(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::PoolWritten(pool) => self.put_pool(pool).await,
            Mutation::StatusWritten(pool_id, status) => self.put_status(*pool_id, *status).await,
            Mutation::BetPlaced { pool, bet } => self.put_bet_placed(pool, bet).await,
        }
    }

    pub async fn put_pool(&self, pool: &Pool) -> Result<()> {
        let _: Option<Record> = self
            .connection
            .update((POOL, pool.pool_id.to_string()))
            .content(DbPool::from(pool))
            .await?;
        Ok(())
    }

    pub async fn put_status(&self, pool_id: PoolId, status: PoolStatus) -> Result<()> {
        let _: Option<Record> = self
            .connection
            .update((POOL_STATUS, pool_id.to_string()))
            .content(DbPoolStatus::new(pool_id, status))
            .await?;
        Ok(())
    }

    /// Writes a bet and the pool totals that count it in one transaction.
    /// Either both records change or neither does.
    pub async fn put_bet_placed(&self, pool: &Pool, bet: &Bet) -> Result<()> {
        self.connection
            .query(BeginStatement)
            .query("UPDATE $pool_id CONTENT $pool;")
            .bind(("pool_id", pool_thing(pool.pool_id)))
            .bind(("pool", DbPool::from(pool)))
            .query("UPDATE $bet_id CONTENT $bet;")
            .bind(("bet_id", bet_thing(bet.pool_id, &bet.bettor)))
            .bind(("bet", DbBet::from(bet)))
            .query(CommitStatement)
            .await?
            .check()?;
        Ok(())
    }

    pub async fn get_pool(&self, pool_id: PoolId) -> Result<Option<Pool>> {
        let pool: Option<DbPool> = self.connection.select((POOL, pool_id.to_string())).await?;
        Ok(pool.map(Into::into))
    }

    pub async fn get_bet(&self, pool_id: PoolId, bettor: &Identity) -> Result<Option<Bet>> {
        let bet: Option<DbBet> = self.connection.select((BET, bet_key(pool_id, bettor))).await?;
        Ok(bet.map(Into::into))
    }

    pub async fn load_snapshot(&self) -> Result<Snapshot> {
        let pools: Vec<DbPool> = self.connection.select(POOL).await?;
        let statuses: Vec<DbPoolStatus> = self.connection.select(POOL_STATUS).await?;
        let bets: Vec<DbBet> = self.connection.select(BET).await?;

        Ok(Snapshot {
            pools: pools.into_iter().map(Into::into).collect(),
            statuses: statuses.into_iter().map(Into::into).collect(),
            bets: bets.into_iter().map(Into::into).collect(),
        })
    }
}

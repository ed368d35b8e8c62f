use common::{Amount, Bet, Identity, LedgerEvent, PoolId, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{require, LedgerError, LedgerResult};
use crate::notify::{EventSink, Journal, Mutation};
use crate::registry::PoolRegistry;

// One pool's bets keyed by bettor. Presence of a key is the has-bet flag.
type Book = HashMap<Identity, Bet>;

pub struct BetLedger {
    registry: Arc<PoolRegistry>,
    books: RwLock<HashMap<PoolId, Arc<Mutex<Book>>>>,
    events: Arc<dyn EventSink>,
    journal: Arc<dyn Journal>,
}

impl BetLedger {
    pub fn new(
        registry: Arc<PoolRegistry>,
        events: Arc<dyn EventSink>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            registry,
            books: RwLock::new(HashMap::new()),
            events,
            journal,
        }
    }

    /// Rebuilds the bet books from persisted records. Nothing is journaled.
    pub fn restore(
        registry: Arc<PoolRegistry>,
        bets: Vec<Bet>,
        events: Arc<dyn EventSink>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        let mut books: HashMap<PoolId, Book> = HashMap::new();
        for bet in bets {
            books
                .entry(bet.pool_id)
                .or_default()
                .insert(bet.bettor.clone(), bet);
        }
        info!(pools = books.len(), "restored bet books");

        Self {
            registry,
            books: RwLock::new(
                books
                    .into_iter()
                    .map(|(pool_id, book)| (pool_id, Arc::new(Mutex::new(book))))
                    .collect(),
            ),
            events,
            journal,
        }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Validates and records a bet. Every check runs against the locked pool
    /// before anything is written; the bet, the has-bet flag and both pool
    /// totals are committed together.
    pub async fn place_bet(
        &self,
        pool_id: PoolId,
        predicted_outcome: &str,
        amount: Amount,
        bettor: &Identity,
        now: Timestamp,
    ) -> LedgerResult<Bet> {
        require!(pool_id != 0, LedgerError::InvalidPoolId);
        let mut pool = self.registry.lock_pool(pool_id).await?;
        require!(pool.is_open, LedgerError::PoolNotOpen);
        require!(now < pool.closes_at, LedgerError::PoolClosed);
        require!(amount >= pool.min_bet, LedgerError::BetTooLow);
        require!(amount <= pool.max_bet, LedgerError::BetTooHigh);
        require!(amount > 0, LedgerError::InvalidBetAmount);

        let book = self.book(pool_id).await;
        let mut book = book.lock().await;
        require!(!book.contains_key(bettor), LedgerError::AlreadyPlacedBet);
        require!(pool.has_outcome(predicted_outcome), LedgerError::InvalidOutcome);

        PoolRegistry::tally_bet(&mut pool, amount)?;
        let bet = Bet {
            bettor: bettor.clone(),
            pool_id,
            predicted_outcome: predicted_outcome.to_owned(),
            amount,
            placed_at: now,
        };
        book.insert(bettor.clone(), bet.clone());

        self.journal.record(Mutation::BetPlaced {
            pool: pool.clone(),
            bet: bet.clone(),
        });
        self.events.emit(LedgerEvent::BetPlaced {
            pool_id,
            bettor: bettor.clone(),
            predicted_outcome: bet.predicted_outcome.clone(),
            amount,
            placed_at: now,
        });
        info!(pool_id, %bettor, amount, outcome = %bet.predicted_outcome, "bet placed");
        Ok(bet)
    }

    /// `None` is the ordinary answer for a bettor with no bet in the pool.
    pub async fn get_bet_details(&self, bettor: &Identity, pool_id: PoolId) -> Option<Bet> {
        let book = self.books.read().await.get(&pool_id).cloned()?;
        let bet = book.lock().await.get(bettor).cloned();
        if bet.is_none() {
            debug!(pool_id, %bettor, "no bet recorded");
        }
        bet
    }

    pub async fn get_bets_for_pool(&self, pool_id: PoolId) -> Vec<Bet> {
        let Some(book) = self.books.read().await.get(&pool_id).cloned() else {
            return vec![];
        };
        let mut bets: Vec<Bet> = book.lock().await.values().cloned().collect();
        bets.sort_by(|a, b| {
            a.placed_at
                .cmp(&b.placed_at)
                .then_with(|| a.bettor.cmp(&b.bettor))
        });
        bets
    }

    async fn book(&self, pool_id: PoolId) -> Arc<Mutex<Book>> {
        if let Some(book) = self.books.read().await.get(&pool_id) {
            return book.clone();
        }
        self.books.write().await.entry(pool_id).or_default().clone()
    }
}

use common::{Amount, Identity, LedgerEvent, Pool, PoolId, PoolStatus, PotentialPool, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::error::{require, LedgerError, LedgerResult};
use crate::notify::{EventSink, Journal, Mutation};

// Pools and the index of every id ever handed out. Kept under one lock so an
// id, its record and its index slot appear together.
#[derive(Default)]
struct Catalog {
    last_id: PoolId,
    pools: HashMap<PoolId, Arc<Mutex<Pool>>>,
    index: Vec<PoolId>,
}

pub struct PoolRegistry {
    owner: Identity,
    default_status: PoolStatus,
    catalog: RwLock<Catalog>,
    statuses: RwLock<HashMap<PoolId, PoolStatus>>,
    events: Arc<dyn EventSink>,
    journal: Arc<dyn Journal>,
}

impl PoolRegistry {
    pub fn new(
        owner: Identity,
        default_pool_active: bool,
        events: Arc<dyn EventSink>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            owner,
            default_status: PoolStatus {
                is_active: default_pool_active,
                last_updated: 0,
            },
            catalog: RwLock::new(Catalog::default()),
            statuses: RwLock::new(HashMap::new()),
            events,
            journal,
        }
    }

    /// Rebuilds a registry from persisted records. Nothing is journaled.
    pub fn restore(
        owner: Identity,
        default_pool_active: bool,
        mut pools: Vec<Pool>,
        statuses: Vec<(PoolId, PoolStatus)>,
        events: Arc<dyn EventSink>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        let registry = Self::new(owner, default_pool_active, events, journal);
        pools.retain(Pool::exists);
        pools.sort_by_key(|pool| pool.pool_id);

        let mut catalog = Catalog::default();
        for pool in pools {
            catalog.last_id = catalog.last_id.max(pool.pool_id);
            catalog.index.push(pool.pool_id);
            catalog.pools.insert(pool.pool_id, Arc::new(Mutex::new(pool)));
        }
        info!(pools = catalog.index.len(), "restored pool registry");

        Self {
            catalog: RwLock::new(catalog),
            statuses: RwLock::new(statuses.into_iter().collect()),
            ..registry
        }
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub async fn create_pool(
        &self,
        request: PotentialPool,
        caller: &Identity,
        now: Timestamp,
    ) -> LedgerResult<PoolId> {
        require!(*caller == self.owner, LedgerError::NotAuthorized);
        require!(request.min_bet < request.max_bet, LedgerError::InvalidBetLimits);
        require!(!request.outcomes.is_empty(), LedgerError::NoOutcomesProvided);
        require!(request.closes_at > now, LedgerError::ClosesInPast);

        let mut catalog = self.catalog.write().await;
        let pool_id = catalog.last_id + 1;
        let pool = Pool {
            pool_id,
            tournament_id: request.tournament_id,
            match_id: request.match_id,
            name: request.name,
            description: request.description,
            category: request.category,
            min_bet: request.min_bet,
            max_bet: request.max_bet,
            created_at: now,
            closes_at: request.closes_at,
            is_open: true,
            creator: caller.clone(),
            total_amount: 0,
            total_bets: 0,
            outcomes: request.outcomes,
        };

        self.journal.record(Mutation::PoolWritten(pool.clone()));
        self.events.emit(LedgerEvent::PoolCreated {
            pool_id,
            tournament_id: pool.tournament_id.clone(),
            match_id: pool.match_id.clone(),
            name: pool.name.clone(),
            closes_at: pool.closes_at,
            creator: caller.clone(),
        });
        info!(pool_id, name = %pool.name, closes_at = pool.closes_at, "pool created");

        catalog.last_id = pool_id;
        catalog.pools.insert(pool_id, Arc::new(Mutex::new(pool)));
        catalog.index.push(pool_id);
        Ok(pool_id)
    }

    /// Owner-only administrative close, added on top of the core pool
    /// operations. It is the only operation that emits `PoolClosed`. The id
    /// stays in the index; listings filter it out.
    pub async fn close_pool(
        &self,
        pool_id: PoolId,
        caller: &Identity,
        now: Timestamp,
    ) -> LedgerResult<()> {
        require!(*caller == self.owner, LedgerError::NotAuthorized);
        let mut pool = self.lock_pool(pool_id).await?;
        require!(pool.is_open, LedgerError::PoolNotOpen);

        pool.is_open = false;
        self.journal.record(Mutation::PoolWritten(pool.clone()));
        self.events.emit(LedgerEvent::PoolClosed {
            pool_id,
            closed_at: now,
        });
        info!(pool_id, "pool closed");
        Ok(())
    }

    /// Owner-only addition that writes the listing flag read by
    /// [`Self::get_active_pools`]. Without it every pool keeps the configured
    /// default status.
    pub async fn set_pool_status(
        &self,
        pool_id: PoolId,
        is_active: bool,
        caller: &Identity,
        now: Timestamp,
    ) -> LedgerResult<()> {
        require!(*caller == self.owner, LedgerError::NotAuthorized);
        // held until the status is written so the pair is journaled in order
        let _pool = self.lock_pool(pool_id).await?;

        let status = PoolStatus {
            is_active,
            last_updated: now,
        };
        self.statuses.write().await.insert(pool_id, status);
        self.journal.record(Mutation::StatusWritten(pool_id, status));
        debug!(pool_id, is_active, "pool status updated");
        Ok(())
    }

    pub async fn get_pool_status(&self, pool_id: PoolId) -> PoolStatus {
        self.statuses
            .read()
            .await
            .get(&pool_id)
            .copied()
            .unwrap_or(self.default_status)
    }

    /// Pools that are both open and listed, in creation order.
    pub async fn get_active_pools(&self) -> Vec<Pool> {
        let handles: Vec<Arc<Mutex<Pool>>> = {
            let catalog = self.catalog.read().await;
            catalog
                .index
                .iter()
                .filter_map(|id| catalog.pools.get(id).cloned())
                .collect()
        };

        let mut active = Vec::new();
        for handle in handles {
            // pool before status, same order as set_pool_status
            let pool = handle.lock().await;
            let status = self.get_pool_status(pool.pool_id).await;
            if pool.is_open && status.is_active {
                active.push(pool.clone());
            }
        }
        active
    }

    pub async fn get_total_pools(&self) -> u64 {
        self.catalog.read().await.last_id
    }

    /// Unknown ids come back as the zero record; check [`Pool::exists`].
    pub async fn get_pool_by_id(&self, pool_id: PoolId) -> LedgerResult<Pool> {
        require!(pool_id != 0, LedgerError::InvalidPoolId);
        match self.handle(pool_id).await {
            Some(handle) => Ok(handle.lock().await.clone()),
            None => Ok(Pool::default()),
        }
    }

    /// Locks one pool for a read-validate-write cycle.
    pub(crate) async fn lock_pool(&self, pool_id: PoolId) -> LedgerResult<OwnedMutexGuard<Pool>> {
        require!(pool_id != 0, LedgerError::InvalidPoolId);
        let handle = self
            .handle(pool_id)
            .await
            .ok_or(LedgerError::PoolDoesNotExist)?;
        Ok(handle.lock_owned().await)
    }

    /// Adds one accepted bet to the pool totals. Fails without touching the
    /// pool if the amount total would overflow. The caller journals the result
    /// together with the bet.
    pub(crate) fn tally_bet(pool: &mut Pool, amount: Amount) -> LedgerResult<()> {
        let total_amount = pool
            .total_amount
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        let total_bets = pool
            .total_bets
            .checked_add(1)
            .ok_or(LedgerError::AmountOverflow)?;

        pool.total_amount = total_amount;
        pool.total_bets = total_bets;
        Ok(())
    }

    async fn handle(&self, pool_id: PoolId) -> Option<Arc<Mutex<Pool>>> {
        self.catalog.read().await.pools.get(&pool_id).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::notify::NoopJournal;
    use tokio::sync::mpsc;

    pub(crate) const T: Timestamp = 1_700_000_000;

    pub(crate) fn admin() -> Identity {
        Identity::new("admin")
    }

    pub(crate) fn match_pool(closes_at: Timestamp) -> PotentialPool {
        PotentialPool {
            tournament_id: "worlds-2024".into(),
            match_id: "final".into(),
            name: "Grand final".into(),
            description: "Who lifts the trophy".into(),
            min_bet: 10,
            max_bet: 200,
            closes_at,
            category: "esports".into(),
            outcomes: vec!["A".into(), "B".into(), "C".into()],
        }
    }

    fn registry() -> (PoolRegistry, mpsc::UnboundedReceiver<LedgerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel::<LedgerEvent>();
        (
            PoolRegistry::new(admin(), true, Arc::new(tx), Arc::new(NoopJournal)),
            rx,
        )
    }

    #[tokio::test]
    async fn ids_are_sequential_from_one() {
        let (registry, _rx) = registry();
        assert_eq!(registry.get_total_pools().await, 0);
        for expected in 1..=3 {
            let id = registry
                .create_pool(match_pool(T + 100), &admin(), T)
                .await
                .unwrap();
            assert_eq!(id, expected);
            assert_eq!(registry.get_total_pools().await, expected);
        }
    }

    #[tokio::test]
    async fn created_pool_reads_back() {
        let (registry, mut rx) = registry();
        let id = registry
            .create_pool(match_pool(T + 100), &admin(), T)
            .await
            .unwrap();

        let pool = registry.get_pool_by_id(id).await.unwrap();
        assert_eq!(pool.pool_id, 1);
        assert!(pool.is_open);
        assert_eq!(pool.created_at, T);
        assert_eq!(pool.creator, admin());
        assert_eq!(pool.total_amount, 0);
        assert_eq!(pool.total_bets, 0);
        assert_eq!(pool.outcomes, vec!["A", "B", "C"]);

        assert_eq!(
            rx.try_recv().unwrap(),
            LedgerEvent::PoolCreated {
                pool_id: 1,
                tournament_id: "worlds-2024".into(),
                match_id: "final".into(),
                name: "Grand final".into(),
                closes_at: T + 100,
                creator: admin(),
            }
        );
    }

    #[tokio::test]
    async fn rejected_creates_leave_no_trace() {
        let (registry, mut rx) = registry();

        let mut inverted = match_pool(T + 100);
        inverted.min_bet = 200;
        inverted.max_bet = 200;
        let mut no_outcomes = match_pool(T + 100);
        no_outcomes.outcomes.clear();

        let cases = [
            (match_pool(T + 100), Identity::new("mallory"), LedgerError::NotAuthorized),
            (inverted, admin(), LedgerError::InvalidBetLimits),
            (no_outcomes, admin(), LedgerError::NoOutcomesProvided),
            (match_pool(T), admin(), LedgerError::ClosesInPast),
        ];
        for (request, caller, expected) in cases {
            assert_eq!(registry.create_pool(request, &caller, T).await, Err(expected));
        }

        assert_eq!(registry.get_total_pools().await, 0);
        assert!(registry.get_active_pools().await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn zero_and_unknown_ids() {
        let (registry, _rx) = registry();
        assert_eq!(registry.get_pool_by_id(0).await, Err(LedgerError::InvalidPoolId));
        let missing = registry.get_pool_by_id(42).await.unwrap();
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn active_pools_need_both_flags() {
        let (registry, _rx) = registry();
        for _ in 0..3 {
            registry
                .create_pool(match_pool(T + 100), &admin(), T)
                .await
                .unwrap();
        }
        registry.close_pool(2, &admin(), T + 1).await.unwrap();
        registry.set_pool_status(3, false, &admin(), T + 1).await.unwrap();

        let active: Vec<PoolId> = registry
            .get_active_pools()
            .await
            .iter()
            .map(|pool| pool.pool_id)
            .collect();
        assert_eq!(active, vec![1]);

        registry.set_pool_status(3, true, &admin(), T + 2).await.unwrap();
        let active: Vec<PoolId> = registry
            .get_active_pools()
            .await
            .iter()
            .map(|pool| pool.pool_id)
            .collect();
        assert_eq!(active, vec![1, 3]);
        assert_eq!(registry.get_total_pools().await, 3);
    }

    #[tokio::test]
    async fn default_status_is_configurable() {
        let (tx, _rx) = mpsc::unbounded_channel::<LedgerEvent>();
        let registry = PoolRegistry::new(admin(), false, Arc::new(tx), Arc::new(NoopJournal));
        registry
            .create_pool(match_pool(T + 100), &admin(), T)
            .await
            .unwrap();

        assert!(!registry.get_pool_status(1).await.is_active);
        assert!(registry.get_active_pools().await.is_empty());
    }

    #[tokio::test]
    async fn close_pool_checks() {
        let (registry, mut rx) = registry();
        registry
            .create_pool(match_pool(T + 100), &admin(), T)
            .await
            .unwrap();
        rx.try_recv().unwrap();

        assert_eq!(
            registry.close_pool(1, &Identity::new("bob"), T).await,
            Err(LedgerError::NotAuthorized)
        );
        assert_eq!(registry.close_pool(0, &admin(), T).await, Err(LedgerError::InvalidPoolId));
        assert_eq!(registry.close_pool(9, &admin(), T).await, Err(LedgerError::PoolDoesNotExist));

        registry.close_pool(1, &admin(), T + 5).await.unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            LedgerEvent::PoolClosed {
                pool_id: 1,
                closed_at: T + 5
            }
        );
        assert_eq!(registry.close_pool(1, &admin(), T + 6).await, Err(LedgerError::PoolNotOpen));
    }

    #[tokio::test]
    async fn restore_continues_numbering() {
        let pools = vec![
            Pool {
                pool_id: 2,
                is_open: true,
                outcomes: vec!["x".into()],
                ..Default::default()
            },
            Pool {
                pool_id: 1,
                is_open: true,
                outcomes: vec!["y".into()],
                ..Default::default()
            },
        ];
        let statuses = vec![(
            2,
            PoolStatus {
                is_active: false,
                last_updated: T,
            },
        )];
        let registry = PoolRegistry::restore(
            admin(),
            true,
            pools,
            statuses,
            Arc::new(crate::notify::NoopSink),
            Arc::new(NoopJournal),
        );

        assert_eq!(registry.get_total_pools().await, 2);
        let active = registry.get_active_pools().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].pool_id, 1);

        let id = registry
            .create_pool(match_pool(T + 100), &admin(), T)
            .await
            .unwrap();
        assert_eq!(id, 3);
    }
}

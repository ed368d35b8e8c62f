use anyhow::bail;
use common::network::{Connection, Packet, Request, Response};
use common::Identity;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::LedgerError;
use crate::ledger::BetLedger;
use crate::registry::PoolRegistry;

/// What a connection needs to serve requests.
#[derive(Clone)]
pub struct LedgerHandle {
    pub registry: Arc<PoolRegistry>,
    pub bets: Arc<BetLedger>,
    pub clock: Arc<dyn Clock>,
}

impl LedgerHandle {
    pub fn new(bets: Arc<BetLedger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: bets.registry().clone(),
            bets,
            clock,
        }
    }
}

pub async fn handle_listen_server(listener: TcpListener, ledger: LedgerHandle) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "accepting connections");
    loop {
        let (stream, peer) = listener.accept().await?;
        let ledger = ledger.clone();

        tokio::spawn(async move {
            match Connection::<TcpStream>::from_tcp_stream(stream).await {
                Ok(connection) => handle_connection(connection, ledger).await,
                Err(e) => warn!(%peer, "websocket handshake failed: {:#}", e),
            }
        });
    }
}

async fn handle_connection(mut connection: Connection, ledger: LedgerHandle) {
    let identity = match handle_login(&mut connection).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("login refused: {:#}", e);
            connection.send(Packet::Error(e.to_string())).await.ok();
            return;
        }
    };

    info!(%identity, "logged in");
    if let Err(e) = handle_client(&identity, &mut connection, &ledger).await {
        warn!(%identity, "connection dropped: {:#}", e);
        connection.send(Packet::Error(e.to_string())).await.ok();
    }
}

async fn handle_login(connection: &mut Connection) -> anyhow::Result<Identity> {
    let packet = connection.read().await?;
    if let Packet::RequestPacket(request) = packet {
        match request {
            Request::Login { user } => {
                if user.trim().is_empty() {
                    bail!("empty user name");
                }
                let identity = Identity::new(user);
                connection
                    .send(Packet::ResponsePacket(Response::SuccessfulLogin {
                        identity: identity.clone(),
                    }))
                    .await?;
                Ok(identity)
            }
            _ => {
                bail!("bad login");
            }
        }
    } else {
        bail!("Invalid request at login: {:?}", packet);
    }
}

async fn handle_client(
    identity: &Identity,
    connection: &mut Connection,
    ledger: &LedgerHandle,
) -> anyhow::Result<()> {
    loop {
        let packet = connection.read().await;
        match packet {
            Ok(Packet::RequestPacket(Request::Login { .. })) => {
                bail!("Attempted re-login - denied");
            }
            Ok(Packet::RequestPacket(request)) => {
                let reply = match dispatch(request, identity, ledger).await {
                    Ok(response) => Packet::ResponsePacket(response),
                    Err(e) => {
                        debug!(%identity, kind = ?e.kind(), "request rejected: {}", e);
                        Packet::Error(e.to_string())
                    }
                };
                connection.send(reply).await?;
            }
            Ok(pack) => bail!("incorrect packet type: {:?}", pack),
            Err(error) => {
                let aborted = error
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == ErrorKind::ConnectionAborted);
                // connection aborted is considered successful
                return if aborted { Ok(()) } else { Err(error) };
            }
        }
    }
}

/// Runs one request as `identity`, sampling the clock once.
pub async fn dispatch(
    request: Request,
    identity: &Identity,
    ledger: &LedgerHandle,
) -> Result<Response, LedgerError> {
    let now = ledger.clock.now();
    let response = match request {
        Request::Login { .. } => return Err(LedgerError::NotAuthorized),
        Request::WhoAmI => Response::WhoAmI(identity.clone()),
        Request::Owner => Response::Owner(ledger.registry.owner().clone()),
        Request::CreatePool(potential) => {
            Response::PoolCreated(ledger.registry.create_pool(potential, identity, now).await?)
        }
        Request::PlaceBet {
            pool_id,
            outcome,
            amount,
        } => {
            ledger
                .bets
                .place_bet(pool_id, &outcome, amount, identity, now)
                .await?;
            Response::None
        }
        Request::ActivePools => Response::ActivePools(ledger.registry.get_active_pools().await),
        Request::TotalPools => Response::TotalPools(ledger.registry.get_total_pools().await),
        Request::PoolById(pool_id) => Response::Pool(ledger.registry.get_pool_by_id(pool_id).await?),
        Request::PoolStatus(pool_id) => {
            Response::PoolStatus(ledger.registry.get_pool_status(pool_id).await)
        }
        Request::BetDetails { bettor, pool_id } => {
            Response::BetDetails(ledger.bets.get_bet_details(&bettor, pool_id).await)
        }
        Request::PoolBets(pool_id) => Response::PoolBets(ledger.bets.get_bets_for_pool(pool_id).await),
        Request::ClosePool(pool_id) => {
            ledger.registry.close_pool(pool_id, identity, now).await?;
            Response::None
        }
        Request::SetPoolStatus { pool_id, is_active } => {
            ledger
                .registry
                .set_pool_status(pool_id, is_active, identity, now)
                .await?;
            Response::None
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::{NoopJournal, NoopSink};
    use crate::registry::tests::{admin, match_pool, T};
    use common::network::ClientConnection;

    fn ledger(clock: Arc<ManualClock>) -> LedgerHandle {
        let registry = Arc::new(PoolRegistry::new(
            admin(),
            true,
            Arc::new(NoopSink),
            Arc::new(NoopJournal),
        ));
        let bets = Arc::new(BetLedger::new(registry, Arc::new(NoopSink), Arc::new(NoopJournal)));
        LedgerHandle::new(bets, clock)
    }

    #[tokio::test]
    async fn dispatch_uses_the_clock_and_caller() {
        let clock = Arc::new(ManualClock::new(T));
        let ledger = ledger(clock.clone());
        let bob = Identity::new("bob");

        assert_eq!(
            dispatch(Request::CreatePool(match_pool(T + 100)), &bob, &ledger).await,
            Err(LedgerError::NotAuthorized)
        );
        assert_eq!(
            dispatch(Request::CreatePool(match_pool(T + 100)), &admin(), &ledger).await,
            Ok(Response::PoolCreated(1))
        );

        clock.set(T + 100);
        let late = Request::PlaceBet {
            pool_id: 1,
            outcome: "A".into(),
            amount: 50,
        };
        assert_eq!(dispatch(late, &bob, &ledger).await, Err(LedgerError::PoolClosed));
    }

    async fn login(addr: &str, user: &str) -> anyhow::Result<ClientConnection> {
        let mut client = ClientConnection::connect(addr).await?;
        let reply = client.request(Request::Login { user: user.into() }).await?;
        assert_eq!(
            reply,
            Packet::ResponsePacket(Response::SuccessfulLogin {
                identity: Identity::new(user)
            })
        );
        Ok(client)
    }

    #[tokio::test]
    async fn serves_the_protocol_over_websockets() -> anyhow::Result<()> {
        let clock = Arc::new(ManualClock::new(T));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = format!("ws://{}", listener.local_addr()?);
        tokio::spawn(handle_listen_server(listener, ledger(clock.clone())));

        let mut owner = login(&addr, "admin").await?;
        assert_eq!(
            owner.request(Request::CreatePool(match_pool(T + 100))).await?,
            Packet::ResponsePacket(Response::PoolCreated(1))
        );

        clock.set(T + 50);
        let mut x = login(&addr, "x").await?;
        let bet = Request::PlaceBet {
            pool_id: 1,
            outcome: "A".into(),
            amount: 50,
        };
        assert_eq!(x.request(bet).await?, Packet::ResponsePacket(Response::None));
        let again = Request::PlaceBet {
            pool_id: 1,
            outcome: "B".into(),
            amount: 30,
        };
        assert_eq!(x.request(again).await?, Packet::Error("already placed bet".into()));

        match owner.request(Request::PoolById(1)).await? {
            Packet::ResponsePacket(Response::Pool(pool)) => {
                assert_eq!((pool.total_amount, pool.total_bets), (50, 1));
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(
            x.request(Request::Login { user: "admin".into() }).await?,
            Packet::Error("Attempted re-login - denied".into())
        );
        Ok(())
    }

    #[tokio::test]
    async fn first_packet_must_be_login() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = format!("ws://{}", listener.local_addr()?);
        tokio::spawn(handle_listen_server(listener, ledger(Arc::new(ManualClock::new(T)))));

        let mut client = ClientConnection::connect(&addr).await?;
        assert_eq!(
            client.request(Request::WhoAmI).await?,
            Packet::Error("bad login".into())
        );
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::MaybeTlsStream;

use crate::{Amount, Bet, Identity, Pool, PoolId, PoolStatus, PotentialPool};

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq)]
pub enum Request {
    Login { user: String }, // SuccessfulLogin response
    WhoAmI,
    Owner,
    CreatePool(PotentialPool),
    PlaceBet { pool_id: PoolId, outcome: String, amount: Amount }, // None response
    ActivePools,
    TotalPools,
    PoolById(PoolId),
    PoolStatus(PoolId),
    BetDetails { bettor: Identity, pool_id: PoolId },
    PoolBets(PoolId),
    ClosePool(PoolId), // None response
    SetPoolStatus { pool_id: PoolId, is_active: bool }, // None response
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Response {
    None,
    SuccessfulLogin { identity: Identity },
    WhoAmI(Identity),
    Owner(Identity),
    PoolCreated(PoolId),
    ActivePools(Vec<Pool>),
    TotalPools(u64),
    Pool(Pool),
    PoolStatus(PoolStatus),
    BetDetails(Option<Bet>),
    PoolBets(Vec<Bet>),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Packet {
    RequestPacket(Request),
    ResponsePacket(Response),
    Error(String),
}

pub struct Connection<S = TcpStream> {
    connection: socket::TungsteniteWebSocket<S>,
}

/// The dialing side of a [`Connection`].
pub type ClientConnection = Connection<MaybeTlsStream<TcpStream>>;

impl Connection<TcpStream> {
    pub async fn from_tcp_stream(connection: TcpStream) -> anyhow::Result<Self> {
        let ws = socket::TungsteniteWebSocket::accept(connection).await?;

        Ok(Self { connection: ws })
    }
}

impl ClientConnection {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(address).await?;
        Ok(Self {
            connection: socket::TungsteniteWebSocket::from_stream(ws_stream),
        })
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub async fn read(&mut self) -> anyhow::Result<Packet> {
        Ok(rmp_serde::from_slice(&self.connection.read().await?)?)
    }

    pub async fn send(&mut self, data: Packet) -> anyhow::Result<()> {
        self.connection.write_all(&rmp_serde::to_vec(&data)?).await
    }

    /// Sends a request and waits for the matching response packet.
    pub async fn request(&mut self, request: Request) -> anyhow::Result<Packet> {
        self.send(Packet::RequestPacket(request)).await?;
        self.read().await
    }
}

trait WebSocketConnection {
    async fn read(&mut self) -> anyhow::Result<Vec<u8>>;

    async fn write_all(&mut self, buf: &[u8]) -> anyhow::Result<()>;
}

mod socket {
    use super::WebSocketConnection;
    use anyhow::bail;
    use futures_util::{SinkExt, StreamExt};
    use std::io::{Error, ErrorKind};
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::WebSocketStream;

    pub struct TungsteniteWebSocket<S> {
        socket: WebSocketStream<S>,
    }

    impl<S: AsyncRead + AsyncWrite + Unpin> TungsteniteWebSocket<S> {
        pub async fn accept(stream: S) -> anyhow::Result<Self> {
            let ws_stream = tokio_tungstenite::accept_async(stream).await?;
            Ok(Self { socket: ws_stream })
        }

        pub fn from_stream(socket: WebSocketStream<S>) -> Self {
            Self { socket }
        }
    }

    impl<S: AsyncRead + AsyncWrite + Unpin> WebSocketConnection for TungsteniteWebSocket<S> {
        async fn read(&mut self) -> anyhow::Result<Vec<u8>> {
            loop {
                let message = match self.socket.next().await {
                    Some(message) => message?,
                    None => {
                        return Err(Error::new(ErrorKind::ConnectionAborted, "connection closed").into())
                    }
                };
                match message {
                    Message::Binary(data) => return Ok(data),
                    Message::Close(_) => {
                        return Err(Error::new(ErrorKind::ConnectionAborted, "connection closed").into())
                    }
                    // tungstenite answers pings on its own
                    Message::Ping(_) | Message::Pong(_) => continue,
                    _ => bail!("incorrect data type received"),
                }
            }
        }

        async fn write_all(&mut self, buf: &[u8]) -> anyhow::Result<()> {
            Ok(self.socket.send(Message::Binary(buf.to_vec())).await?)
        }
    }
}

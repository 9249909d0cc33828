//! The peer engine: discovery, roster maintenance and message exchange.
//!
//! A [`Host`] owns the UDP socket, the roster of known peers and the
//! malformed-traffic rate limiter. All of that state lives inside one
//! spawned task; callers talk to it through a cloneable [`HostHandle`]
//! that sends commands over a channel, and the engine reports everything
//! that happens on the wire as [`HostNotification`]s over another
//! channel. Dropping the last handle makes the engine announce its leave
//! to every known peer and shut down.

use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tracing::{debug, warn};

use crate::encodings::Encoding;
use crate::errors::ScError;
use crate::pdu::{self, Pdu, PduType, MAX_PDU};
use crate::sceda;

/// Default UDP port of the protocol.
pub const DEFAULT_PORT: u16 = 4412;

/// How long a window of malformed traffic is remembered.
const BAD_WINDOW: Duration = Duration::from_secs(600);
/// How many `BAD` replies are sent per window.
const BAD_REPLIES: i32 = 4;

const CHANNEL_CAPACITY: usize = 100;

type Reply<T> = oneshot::Sender<T>;

/// A participant of the chat as seen by this host.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerInfo {
    /// The peer's IPv4 endpoint. The IP alone identifies the peer.
    pub address: SocketAddr,
    pub nickname: String,
    pub chat_id: String,
}

/// Configuration for a [`Host`].
pub struct HostConfig {
    pub nickname: String,
    pub chat_id: String,
    /// The 16-byte pre-shared key, normally `digest(passphrase)`.
    pub key: [u8; sceda::KEY_LEN],
    pub port: u16,
}

/// Everything the engine reports to the application.
#[derive(Debug)]
pub enum HostNotification {
    /// A new peer announced itself with a hello.
    Hello(PeerInfo),
    /// A peer answered our hello.
    Welcome(PeerInfo),
    /// A peer left the chat.
    Leave(PeerInfo),
    /// A chat message arrived. Decoding the payload per its declared
    /// encoding is the application's concern.
    Message(PeerInfo, Pdu),
    /// A datagram addressed to our chat failed to parse or decrypt; the
    /// raw bytes are attached.
    MalformedReceived(PeerInfo, Vec<u8>),
    /// A peer told us one of *our* PDUs failed to parse on their end.
    MalformedNotification(PeerInfo, Vec<u8>),
    /// A nickname collision: `.0` is the notifying peer, or `None` when
    /// the collision was detected locally; `.1` is the rival.
    Conflict(Option<PeerInfo>, PeerInfo),
    /// The engine has finished running.
    Shutdown,
}

/// Commands sent from a [`HostHandle`] to the engine.
enum HostCommand {
    Send(String),
    SpartanSend(String),
    ManualSend(SocketAddr, Pdu),
    Hello,
    ListPeers(Reply<Vec<PeerInfo>>),
}

/// A handle for talking to a running host engine. Cheap to clone; when
/// the last clone is dropped the engine leaves the chat and shuts down.
#[derive(Clone)]
pub struct HostHandle {
    channel: mpsc::Sender<HostCommand>,
    local_addr: SocketAddr,
    nickname: String,
    chat_id: String,
}

impl HostHandle {
    /// Unicasts a message PDU (ASCII payload) to every known peer.
    pub async fn send(&self, message: impl Into<String>) {
        self.send_internal(HostCommand::Send(message.into())).await
    }

    /// Broadcasts a single message PDU to the whole LAN.
    pub async fn spartan_send(&self, message: impl Into<String>) {
        self.send_internal(HostCommand::SpartanSend(message.into()))
            .await
    }

    /// Serializes and sends one PDU to one endpoint.
    pub async fn manual_send(&self, address: SocketAddr, pdu: Pdu) {
        self.send_internal(HostCommand::ManualSend(address, pdu))
            .await
    }

    /// Forgets every known peer and broadcasts a fresh hello.
    pub async fn hello(&self) {
        self.send_internal(HostCommand::Hello).await
    }

    /// A snapshot of the roster.
    pub async fn list_peers(&self) -> Vec<PeerInfo> {
        let (tx, rx) = oneshot::channel();
        self.send_internal(HostCommand::ListPeers(tx)).await;
        rx.await
            .expect("engine outlives every handle, so the reply cannot be dropped")
    }

    /// The local endpoint as learned during startup.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    async fn send_internal(&self, cmd: HostCommand) {
        // An error here only means the engine is already gone, in which
        // case there is nobody left to deliver anything to anyway.
        self.channel.send(cmd).await.unwrap_or(())
    }
}

/// The engine state. Owned exclusively by the engine task.
pub struct Host {
    socket: Arc<UdpSocket>,
    info: PeerInfo,
    key: [u8; sceda::KEY_LEN],
    broadcast: SocketAddr,
    roster: Vec<PeerInfo>,
    notifications: mpsc::Sender<HostNotification>,
    remaining_bad_replies: i32,
    first_bad: Instant,
}

impl Host {
    /// Binds the socket, announces this host to the LAN and spawns the
    /// engine task.
    ///
    /// The local address is learned from the first datagram the socket
    /// receives, which is our own echoed broadcast hello; this requires a
    /// broadcast-capable interface.
    pub async fn spawn(
        config: HostConfig,
    ) -> Result<(HostHandle, mpsc::Receiver<HostNotification>), ScError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
        socket.set_broadcast(true)?;

        let (notif_sender, notif_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let broadcast = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), config.port);

        let mut host = Host {
            socket: Arc::new(socket),
            info: PeerInfo {
                address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.port),
                nickname: config.nickname,
                chat_id: config.chat_id,
            },
            key: config.key,
            broadcast,
            roster: Vec::new(),
            notifications: notif_sender,
            remaining_bad_replies: BAD_REPLIES,
            first_bad: Instant::now(),
        };

        let hello = host.pdu(PduType::Hello, host.info.nickname.clone().into_bytes());
        host.send_pdu(broadcast, &hello).await;

        // Our own broadcast comes right back; its sender address tells us
        // which IP to ignore from now on.
        let mut buf = [0u8; MAX_PDU];
        let (_, local_addr) = host.socket.recv_from(&mut buf).await?;
        host.info.address = local_addr;

        let nickname = host.info.nickname.clone();
        let chat_id = host.info.chat_id.clone();
        let handle = HostHandle {
            channel: host.spawn_engine(),
            local_addr,
            nickname,
            chat_id,
        };
        Ok((handle, notif_receiver))
    }

    fn spawn_engine(mut self) -> mpsc::Sender<HostCommand> {
        let (cmd_sender, mut cmd_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        task::spawn(async move {
            // One extra byte so an oversized datagram is detectable and
            // can be dropped rather than parsed truncated.
            let mut buf = vec![0u8; MAX_PDU + 1];
            loop {
                let socket = self.socket.clone();
                tokio::select! {
                    maybe_cmd = cmd_receiver.recv() => match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        // Every handle was dropped: leave the chat.
                        None => break,
                    },
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, sender)) if len <= MAX_PDU => {
                            self.handle_datagram(&buf[..len], sender).await
                        }
                        Ok((_, sender)) => {
                            debug!(%sender, "dropping oversized datagram");
                        }
                        Err(e) => warn!(error = %e, "recv failed"),
                    },
                }
            }
            self.leave().await;
            self.notify(HostNotification::Shutdown).await;
        });
        cmd_sender
    }

    async fn handle_command(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Send(message) => {
                let pdu = self.pdu(PduType::Message, message.into_bytes());
                for address in self.roster.iter().map(|p| p.address).collect::<Vec<_>>() {
                    self.send_pdu(address, &pdu).await;
                }
            }
            HostCommand::SpartanSend(message) => {
                let pdu = self.pdu(PduType::Message, message.into_bytes());
                self.send_pdu(self.broadcast, &pdu).await;
            }
            HostCommand::ManualSend(address, pdu) => self.send_pdu(address, &pdu).await,
            HostCommand::Hello => {
                self.roster.clear();
                let hello = self.pdu(PduType::Hello, self.info.nickname.clone().into_bytes());
                self.send_pdu(self.broadcast, &hello).await;
            }
            HostCommand::ListPeers(reply) => reply.send(self.roster.clone()).unwrap_or(()),
        }
    }

    async fn handle_datagram(&mut self, bytes: &[u8], sender: SocketAddr) {
        if sender.ip() == self.info.address.ip() {
            return;
        }
        if !pdu::check_chat_id(bytes, &self.info.chat_id) {
            debug!(%sender, "dropping datagram for another chat");
            return;
        }
        let received = match Pdu::from_bytes(bytes, &self.key) {
            Ok(received) => received,
            Err(e) => {
                debug!(%sender, error = %e, "unparseable datagram");
                return self.handle_bad_datagram(bytes, sender).await;
            }
        };

        let mut info = PeerInfo {
            address: sender,
            nickname: self.nickname_of(sender.ip()),
            chat_id: self.info.chat_id.clone(),
        };

        match received.pdu_type {
            PduType::Hello => {
                info.nickname = text_payload(&received.payload);
                if self.upsert_peer(info.clone(), true).await {
                    self.notify(HostNotification::Hello(info)).await;
                }
                let ack = self.pdu(PduType::Welcome, self.info.nickname.clone().into_bytes());
                self.send_pdu(sender, &ack).await;
            }
            PduType::Welcome => {
                info.nickname = text_payload(&received.payload);
                if self.upsert_peer(info.clone(), true).await {
                    self.notify(HostNotification::Welcome(info)).await;
                }
            }
            PduType::Leave => {
                self.roster.retain(|p| p.address.ip() != sender.ip());
                self.notify(HostNotification::Leave(info)).await;
            }
            PduType::Message => {
                self.notify(HostNotification::Message(info, received)).await;
            }
            PduType::Malformed => {
                self.notify(HostNotification::MalformedNotification(
                    info,
                    received.payload,
                ))
                .await;
            }
            PduType::Conflict => {
                let payload = text_payload(&received.payload);
                // The all-zero address means the conflict is with the
                // sender itself.
                let rival = if payload == "0.0.0.0" {
                    info.clone()
                } else {
                    match payload.parse::<Ipv4Addr>() {
                        Ok(ip) => PeerInfo {
                            address: SocketAddr::new(IpAddr::V4(ip), self.info.address.port()),
                            nickname: self.nickname_of(IpAddr::V4(ip)),
                            chat_id: self.info.chat_id.clone(),
                        },
                        Err(_) => {
                            debug!(%sender, "conflict notification with unparseable address");
                            return;
                        }
                    }
                };
                self.notify(HostNotification::Conflict(Some(info), rival))
                    .await;
            }
        }
    }

    /// A datagram for our chat that could not be parsed: reply with a
    /// rate-limited `BAD` notification and tell the application.
    async fn handle_bad_datagram(&mut self, bytes: &[u8], sender: SocketAddr) {
        if self.first_bad.elapsed() > BAD_WINDOW {
            self.remaining_bad_replies = BAD_REPLIES;
        }
        self.remaining_bad_replies = self.remaining_bad_replies.saturating_sub(1);
        if self.remaining_bad_replies >= 0 {
            let bad = self.pdu(PduType::Malformed, Vec::new());
            self.send_pdu(sender, &bad).await;
            self.first_bad = Instant::now();
        }
        let info = PeerInfo {
            address: sender,
            nickname: String::new(),
            chat_id: self.info.chat_id.clone(),
        };
        self.notify(HostNotification::MalformedReceived(info, bytes.to_vec()))
            .await;
    }

    /// Inserts a peer into the roster, or rewrites the nickname of the
    /// entry already holding its IP. Returns true if the peer is new.
    ///
    /// With `notify_conflict`, a new peer whose nickname is already taken
    /// triggers a `CNF` exchange: each rival is told the other's IP. A
    /// candidate claiming *our* nickname additionally raises a local
    /// conflict and is sent our own IP.
    async fn upsert_peer(&mut self, candidate: PeerInfo, notify_conflict: bool) -> bool {
        let mut known = false;
        for entry in self
            .roster
            .iter_mut()
            .filter(|p| p.address.ip() == candidate.address.ip())
        {
            entry.nickname = candidate.nickname.clone();
            known = true;
        }

        if !known && notify_conflict {
            let rivals: Vec<SocketAddr> = self
                .roster
                .iter()
                .filter(|p| p.nickname == candidate.nickname)
                .map(|p| p.address)
                .collect();
            for rival in rivals {
                let to_rival = self.conflict_pdu(candidate.address.ip());
                self.send_pdu(rival, &to_rival).await;
                let to_candidate = self.conflict_pdu(rival.ip());
                self.send_pdu(candidate.address, &to_candidate).await;
            }
        }

        if notify_conflict && candidate.nickname == self.info.nickname {
            self.notify(HostNotification::Conflict(None, candidate.clone()))
                .await;
            let notification = self.conflict_pdu(self.info.address.ip());
            self.send_pdu(candidate.address, &notification).await;
        }

        if !known {
            self.roster.push(candidate);
        }
        !known
    }

    /// Announces the leave to every known peer.
    async fn leave(&mut self) {
        let pdu = self.pdu(PduType::Leave, Vec::new());
        for peer in mem::take(&mut self.roster) {
            self.send_pdu(peer.address, &pdu).await;
        }
    }

    fn nickname_of(&self, ip: IpAddr) -> String {
        self.roster
            .iter()
            .find(|p| p.address.ip() == ip)
            .map(|p| p.nickname.clone())
            .unwrap_or_default()
    }

    fn pdu(&self, pdu_type: PduType, payload: Vec<u8>) -> Pdu {
        Pdu::new(self.info.chat_id.clone(), pdu_type, Encoding::Ascii, payload)
    }

    fn conflict_pdu(&self, rival: IpAddr) -> Pdu {
        self.pdu(PduType::Conflict, rival.to_string().into_bytes())
    }

    async fn send_pdu(&self, address: SocketAddr, pdu: &Pdu) {
        let bytes = match pdu.to_bytes(&self.key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "cannot frame PDU");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, address).await {
            warn!(%address, error = %e, "send failed");
        }
    }

    async fn notify(&self, notification: HostNotification) {
        // Ignore the error: it only occurs when the application dropped
        // the receiver, and then nobody cares about notifications.
        self.notifications.send(notification).await.unwrap_or(())
    }
}

/// Extracts the textual payload of a PDU: bytes up to the first NUL,
/// decoded leniently. Presentation-grade decoding per the declared
/// encoding is left to the application.
fn text_payload(payload: &[u8]) -> String {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

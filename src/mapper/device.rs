use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use super::messages::{Direction, Message, SignalInfo};
use super::signal::Signal;
use super::{MapperConfig, MapperError, MappingDevice};

const MAX_DATAGRAM: usize = 8192;
const MAX_MESSAGES_PER_POLL: usize = 256;

enum Bus {
    Admin,
    Data,
}

/// This program's registration on the mapping network.
pub struct Device {
    base_name: String,
    id: u64,
    ordinal: u32,
    ready: bool,
    probe_started: Instant,
    settle: Duration,
    announce_pending: bool,
    admin: UdpSocket,
    admin_dest: SocketAddr,
    data: UdpSocket,
    signals: Vec<Signal>,
    polls: u64,
}

/// Every device on the host listens on the same group port.
fn shared_admin_socket(
    group: SocketAddrV4,
    interface: Ipv4Addr,
) -> Result<std::net::UdpSocket, MapperError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port())).into())?;
    socket.join_multicast_v4(group.ip(), &interface)?;
    if !interface.is_unspecified() {
        socket.set_multicast_if_v4(&interface)?;
    }
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

impl Device {
    /// Joins the admin bus and starts claiming `<name>.1`.
    pub async fn bind(name: &str, config: &MapperConfig) -> Result<Self, MapperError> {
        let admin = match config.admin {
            SocketAddr::V4(group) if group.ip().is_multicast() => {
                UdpSocket::from_std(shared_admin_socket(group, config.interface)?)?
            }
            addr => UdpSocket::bind(addr).await?,
        };
        let admin_dest = if config.admin.port() == 0 {
            admin.local_addr()?
        } else {
            config.admin
        };
        let data = UdpSocket::bind((config.interface, 0)).await?;

        let mut device = Self {
            base_name: name.to_string(),
            id: rand::random::<u64>(),
            ordinal: 1,
            ready: false,
            probe_started: Instant::now(),
            settle: config.settle,
            announce_pending: false,
            admin,
            admin_dest,
            data,
            signals: Vec::new(),
            polls: 0,
        };
        debug!(admin = %device.admin_dest, id = device.id, "joined admin bus");
        device.probe().await?;
        Ok(device)
    }

    /// `<name>.<ordinal>`; only final once the device is ready.
    pub fn name(&self) -> String {
        format!("{}.{}", self.base_name, self.ordinal)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn data_addr(&self) -> Result<SocketAddr, MapperError> {
        Ok(self.data.local_addr()?)
    }

    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_dest
    }

    /// Number of completed `poll` calls.
    pub fn poll_count(&self) -> u64 {
        self.polls
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        let prefix = format!("{}/", self.name());
        let local = name.strip_prefix(prefix.as_str()).unwrap_or(name);
        self.signals.iter().find(|s| s.name() == local)
    }

    pub fn add_signal(&mut self, info: SignalInfo) -> Result<Signal, MapperError> {
        if self.signals.iter().any(|s| s.name() == info.name) {
            return Err(MapperError::DuplicateSignal(info.name));
        }
        let signal = Signal::new(info);
        self.signals.push(signal.clone());
        if self.ready {
            self.announce_pending = true;
        }
        Ok(signal)
    }

    /// Flushes pending instance updates, then services bus traffic until
    /// `timeout` has elapsed. Returns the number of messages handled.
    pub async fn poll(&mut self, timeout: Duration) -> Result<usize, MapperError> {
        self.flush().await?;

        let deadline = Instant::now() + timeout;
        let mut admin_buf = [0u8; MAX_DATAGRAM];
        let mut data_buf = [0u8; MAX_DATAGRAM];
        let mut handled = 0;

        while handled < MAX_MESSAGES_PER_POLL {
            let received = timeout_at(deadline, async {
                tokio::select! {
                    r = self.admin.recv_from(&mut admin_buf) => r.map(|(n, from)| (Bus::Admin, n, from)),
                    r = self.data.recv_from(&mut data_buf) => r.map(|(n, from)| (Bus::Data, n, from)),
                }
            })
            .await;

            let (bus, len, from) = match received {
                Ok(result) => result?,
                Err(_elapsed) => break,
            };
            let payload = match bus {
                Bus::Admin => &admin_buf[..len],
                Bus::Data => &data_buf[..len],
            };
            match Message::decode(payload) {
                Ok(msg) => match bus {
                    Bus::Admin => self.handle_admin(msg).await?,
                    Bus::Data => self.handle_data(msg, from),
                },
                Err(e) => debug!(%from, "ignoring datagram: {}", e),
            }
            handled += 1;
        }

        self.advance_name_claim().await?;
        self.flush().await?;
        self.polls += 1;
        Ok(handled)
    }

    async fn probe(&mut self) -> Result<(), MapperError> {
        self.probe_started = Instant::now();
        let probe = Message::Probe {
            name: self.base_name.clone(),
            ordinal: self.ordinal,
            id: self.id,
        };
        self.send_admin(&probe).await
    }

    async fn advance_name_claim(&mut self) -> Result<(), MapperError> {
        if !self.ready && self.probe_started.elapsed() >= self.settle {
            self.ready = true;
            self.announce_pending = true;
            info!(name = %self.name(), "device registered");
        }
        if self.announce_pending {
            self.announce().await?;
        }
        Ok(())
    }

    async fn collide(&mut self) -> Result<(), MapperError> {
        debug!(name = %self.name(), "name collision, trying next ordinal");
        self.ordinal += 1;
        self.probe().await
    }

    async fn handle_admin(&mut self, msg: Message) -> Result<(), MapperError> {
        match msg {
            Message::Probe { name, ordinal, id } if self.claims(&name, ordinal, id) => {
                if self.ready {
                    let taken = Message::NameTaken {
                        name,
                        ordinal,
                        id: self.id,
                    };
                    self.send_admin(&taken).await?;
                } else if id < self.id {
                    self.collide().await?;
                } else {
                    // we outrank the other claimant, which may have missed our claim
                    let taken = Message::NameTaken {
                        name,
                        ordinal,
                        id: self.id,
                    };
                    self.send_admin(&taken).await?;
                }
            }
            Message::NameTaken { name, ordinal, id } if self.claims(&name, ordinal, id) => {
                if !self.ready {
                    self.collide().await?;
                }
            }
            Message::Who => {
                if self.ready {
                    self.announce_pending = true;
                }
            }
            Message::Device { name, id, .. } if id != self.id => {
                trace!(peer = %name, "peer announced");
            }
            _ => {}
        }
        Ok(())
    }

    fn claims(&self, name: &str, ordinal: u32, id: u64) -> bool {
        id != self.id && name == self.base_name && ordinal == self.ordinal
    }

    fn handle_data(&mut self, msg: Message, from: SocketAddr) {
        match msg {
            Message::Subscribe { signal } => match self.signal(&signal) {
                Some(sig) => {
                    let mut state = sig.lock();
                    state.subscribers.insert(from);
                    // resync the newcomer with everything currently present
                    for slot in state.instances.iter_mut().filter(|s| s.value.is_some()) {
                        slot.dirty = true;
                    }
                    info!(%from, signal = %state.info.name, "subscriber added");
                }
                None => debug!(%from, %signal, "subscribe to unknown signal"),
            },
            Message::Unsubscribe { signal } => {
                if let Some(sig) = self.signal(&signal) {
                    if sig.lock().subscribers.remove(&from) {
                        info!(%from, %signal, "subscriber removed");
                    }
                }
            }
            Message::Update {
                signal,
                instance,
                value,
            } => match self.signal(&signal) {
                Some(sig) if sig.lock().info.direction == Direction::Incoming => {
                    let inst = sig.instance(instance);
                    let result = match value {
                        Some(v) => inst.set_value(&v),
                        None => inst.release(),
                    };
                    if let Err(e) = result {
                        warn!(%from, "rejected update: {}", e);
                    }
                }
                Some(_) => debug!(%from, %signal, "update for outgoing signal ignored"),
                None => debug!(%from, %signal, "update for unknown signal"),
            },
            other => trace!(%from, ?other, "unexpected message on data port"),
        }
    }

    async fn announce(&mut self) -> Result<(), MapperError> {
        self.announce_pending = false;
        let announcement = Message::Device {
            name: self.name(),
            id: self.id,
            port: self.data.local_addr()?.port(),
            signals: self.signals.iter().map(Signal::info).collect(),
        };
        self.send_admin(&announcement).await
    }

    /// Sends every dirty outgoing instance to that signal's subscribers.
    async fn flush(&mut self) -> Result<usize, MapperError> {
        if !self.ready {
            return Ok(0);
        }
        let device_name = self.name();
        let mut outbox = Vec::new();

        for sig in &self.signals {
            let mut state = sig.lock();
            if !state.is_outgoing() {
                continue;
            }
            let path = format!("{}/{}", device_name, state.info.name);
            let subscribers: Vec<SocketAddr> = state.subscribers.iter().copied().collect();
            for (instance, slot) in state.instances.iter_mut().enumerate() {
                if !slot.dirty {
                    continue;
                }
                slot.dirty = false;
                if subscribers.is_empty() {
                    continue;
                }
                let update = Message::Update {
                    signal: path.clone(),
                    instance,
                    value: slot.value.clone(),
                };
                outbox.push((update.encode()?, subscribers.clone()));
            }
        }

        let mut sent = 0;
        for (payload, subscribers) in outbox {
            for addr in subscribers {
                self.data.send_to(&payload, addr).await?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    async fn send_admin(&self, msg: &Message) -> Result<(), MapperError> {
        self.admin.send_to(&msg.encode()?, self.admin_dest).await?;
        Ok(())
    }
}

impl MappingDevice for Device {
    fn name(&self) -> String {
        Device::name(self)
    }

    fn ready(&self) -> bool {
        self.ready
    }

    fn poll(&mut self, timeout: Duration) -> impl Future<Output = Result<usize, MapperError>> + Send {
        Device::poll(self, timeout)
    }
}

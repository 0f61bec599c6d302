//! 데이터그램 전송 경계
//!
//! [`Datagram`]은 실제 소켓(`tokio::net::UdpSocket`)과 테스트용 메모리 네트워크
//! ([`memory`]) 공통 인터페이스. [`Transport`]는 그 위에서 슬롯 단위 수신과
//! ID 기반 필터링을 담당한다.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, trace};

use crate::message::{peek_ids, PeerId, REQUEST_LEN};
use crate::{MemberTable, Result, BROADCAST_ID};

/// 비동기 데이터그램 소켓
#[allow(async_fn_in_trait)]
pub trait Datagram {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
}

impl Datagram for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(UdpSocket::send_to(self, buf, target).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(UdpSocket::recv_from(self, buf).await?)
    }
}

/// 슬롯 단위 송수신기
pub struct Transport<D> {
    socket: D,

    /// 자기 ID (자기 메시지 필터링)
    id: PeerId,

    /// 멀티캐스트 목적지
    multicast: SocketAddr,

    /// 한 번의 수신 대기 시간
    slot: Duration,

    buf: Vec<u8>,
}

impl<D: Datagram> Transport<D> {
    pub fn new(socket: D, id: PeerId, multicast: SocketAddr, slot: Duration) -> Self {
        Self {
            socket,
            id,
            multicast,
            slot,
            buf: vec![0u8; REQUEST_LEN * 2],
        }
    }

    pub fn multicast_addr(&self) -> SocketAddr {
        self.multicast
    }

    /// 단일 대상 전송
    pub async fn send_unicast(&self, bytes: &[u8], target: SocketAddr) -> Result<()> {
        self.socket.send_to(bytes, target).await?;
        trace!("unicast {} bytes -> {}", bytes.len(), target);
        Ok(())
    }

    /// 멀티캐스트 그룹 전송
    pub async fn send_multicast(&self, bytes: &[u8]) -> Result<()> {
        self.socket.send_to(bytes, self.multicast).await?;
        trace!("multicast {} bytes -> {}", bytes.len(), self.multicast);
        Ok(())
    }

    /// 한 슬롯 동안 수신
    ///
    /// 필터를 통과한 첫 데이터그램을 반환한다. 일찍 받더라도 슬롯이 끝날
    /// 때까지 기다리므로 호출 한 번이 항상 한 틱에 해당한다.
    /// `members`가 주어지면 (senderId, 송신 IP)가 등록된 멤버인 것만 받는다.
    pub async fn receive_with_timeout(
        &mut self,
        members: Option<&MemberTable>,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        let deadline = Instant::now() + self.slot;
        let mut received = None;

        loop {
            match timeout_at(deadline, self.socket.recv_from(&mut self.buf)).await {
                Err(_) => break,
                Ok(result) => {
                    let (len, source) = result?;
                    let bytes = &self.buf[..len];
                    if accepts(self.id, bytes, source, members) {
                        received = Some((bytes.to_vec(), source));
                        break;
                    }
                }
            }
        }

        sleep_until(deadline).await;
        Ok(received)
    }
}

fn accepts(own_id: PeerId, bytes: &[u8], source: SocketAddr, members: Option<&MemberTable>) -> bool {
    let Some((sender_id, receiver_id)) = peek_ids(bytes) else {
        debug!("너무 짧은 데이터그램 무시: {} bytes from {}", bytes.len(), source);
        return false;
    };

    if sender_id == own_id {
        trace!("자기 메시지 무시");
        return false;
    }

    if receiver_id != own_id && receiver_id != BROADCAST_ID {
        trace!("다른 수신자({}) 대상 메시지 무시", receiver_id);
        return false;
    }

    if let Some(members) = members {
        if !members.is_member(sender_id, source.ip()) {
            debug!("등록되지 않은 송신자 {} ({}) 무시", sender_id, source);
            return false;
        }
    }

    true
}

/// 메모리 기반 멀티캐스트 네트워크 (테스트, 시뮬레이션)
///
/// 엔드포인트마다 무제한 채널을 두고, 멀티캐스트 주소로 보낸 데이터그램은
/// 그룹에 가입한 모든 엔드포인트(송신자 제외)에 복사된다.
pub mod memory {
    use std::collections::HashMap;
    use std::net::{IpAddr, SocketAddr};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use super::Datagram;
    use crate::Result;

    /// 전송된 데이터그램 (수신자별)
    #[derive(Debug, Clone)]
    pub struct Packet {
        pub from: SocketAddr,
        pub to: SocketAddr,
        pub bytes: Vec<u8>,
    }

    type Inbox = mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>;
    type DropFilter = Box<dyn FnMut(&Packet) -> bool + Send>;

    #[derive(Default)]
    struct Inner {
        endpoints: HashMap<SocketAddr, Inbox>,
        groups: HashMap<(IpAddr, u16), Vec<SocketAddr>>,
        drop_filter: Option<DropFilter>,
        sent: Vec<Packet>,
    }

    /// 공유 네트워크 핸들
    #[derive(Clone, Default)]
    pub struct Network {
        inner: Arc<Mutex<Inner>>,
    }

    impl Network {
        pub fn new() -> Self {
            Self::default()
        }

        /// 주소에 엔드포인트 생성
        pub fn bind(&self, addr: SocketAddr) -> Endpoint {
            let (tx, rx) = mpsc::unbounded_channel();
            self.inner.lock().endpoints.insert(addr, tx);
            Endpoint {
                addr,
                network: self.clone(),
                inbox: tokio::sync::Mutex::new(rx),
            }
        }

        /// 멀티캐스트 그룹 가입
        pub fn join(&self, group: SocketAddr, member: SocketAddr) {
            self.inner
                .lock()
                .groups
                .entry((group.ip(), group.port()))
                .or_default()
                .push(member);
        }

        /// 전달 직전 호출되는 손실 필터. true를 반환하면 버림
        pub fn set_drop_filter<F>(&self, filter: F)
        where
            F: FnMut(&Packet) -> bool + Send + 'static,
        {
            self.inner.lock().drop_filter = Some(Box::new(filter));
        }

        /// 지금까지 송신된 데이터그램 (버려진 것 포함, 송신 시점 목적지 기준)
        pub fn sent(&self) -> Vec<Packet> {
            self.inner.lock().sent.clone()
        }

        fn deliver(&self, from: SocketAddr, to: SocketAddr, bytes: &[u8]) {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            inner.sent.push(Packet {
                from,
                to,
                bytes: bytes.to_vec(),
            });

            let targets: Vec<SocketAddr> = if to.ip().is_multicast() {
                inner
                    .groups
                    .get(&(to.ip(), to.port()))
                    .map(|members| members.iter().copied().filter(|m| *m != from).collect())
                    .unwrap_or_default()
            } else {
                vec![to]
            };

            for target in targets {
                let packet = Packet {
                    from,
                    to: target,
                    bytes: bytes.to_vec(),
                };

                if let Some(filter) = inner.drop_filter.as_mut() {
                    if filter(&packet) {
                        continue;
                    }
                }

                if let Some(inbox) = inner.endpoints.get(&target) {
                    let _ = inbox.send((packet.bytes, from));
                }
            }
        }
    }

    /// 네트워크에 연결된 소켓
    pub struct Endpoint {
        addr: SocketAddr,
        network: Network,
        inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>>,
    }

    impl Datagram for Endpoint {
        async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
            self.network.deliver(self.addr, target, buf);
            Ok(buf.len())
        }

        async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
            let mut inbox = self.inbox.lock().await;
            match inbox.recv().await {
                Some((bytes, from)) => {
                    let len = bytes.len().min(buf.len());
                    buf[..len].copy_from_slice(&bytes[..len]);
                    Ok((len, from))
                }
                None => std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::Network;
    use super::*;
    use crate::{Answer, Request};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    const GROUP: &str = "[ff01::10]:50000";

    #[tokio::test(start_paused = true)]
    async fn test_receive_pads_full_slot() {
        let net = Network::new();
        let slot = Duration::from_millis(300);
        let a = Transport::new(net.bind(addr("[fd00::1]:51000")), 1, addr(GROUP), slot);
        let mut b = Transport::new(net.bind(addr("[fd00::2]:50000")), 2, addr(GROUP), slot);

        a.send_unicast(&Answer::hello(1, 2).to_bytes(), addr("[fd00::2]:50000"))
            .await
            .unwrap();

        let start = Instant::now();
        let (bytes, from) = b.receive_with_timeout(None).await.unwrap().unwrap();
        assert_eq!(Instant::now() - start, slot);
        assert_eq!(from, addr("[fd00::1]:51000"));
        assert_eq!(Answer::from_bytes(&bytes).unwrap(), Answer::hello(1, 2));

        let start = Instant::now();
        assert!(b.receive_with_timeout(None).await.unwrap().is_none());
        assert_eq!(Instant::now() - start, slot);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filters_own_and_foreign_messages() {
        let net = Network::new();
        let slot = Duration::from_millis(100);
        let sender = Transport::new(net.bind(addr("[fd00::1]:51000")), 1, addr(GROUP), slot);
        let mut receiver = Transport::new(net.bind(addr("[fd00::2]:50000")), 2, addr(GROUP), slot);
        let target = addr("[fd00::2]:50000");

        // 다른 수신자 대상
        let foreign = Request::close(1, 4).addressed_to(3);
        sender.send_unicast(&foreign.to_bytes(), target).await.unwrap();
        // 자기 ID로 위장
        sender
            .send_unicast(&Request::close(2, 4).to_bytes(), target)
            .await
            .unwrap();
        // 너무 짧음
        sender.send_unicast(&[1, 2, 3], target).await.unwrap();
        assert!(receiver.receive_with_timeout(None).await.unwrap().is_none());

        sender
            .send_unicast(&Request::close(1, 4).addressed_to(2).to_bytes(), target)
            .await
            .unwrap();
        let (bytes, _) = receiver.receive_with_timeout(None).await.unwrap().unwrap();
        assert!(Request::from_bytes(&bytes).unwrap().is_close());
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_filter() {
        let net = Network::new();
        let slot = Duration::from_millis(100);
        let mut sender = Transport::new(net.bind(addr("[fd00::1]:51000")), 1, addr(GROUP), slot);
        let member = Transport::new(net.bind(addr("[fd00::2]:50000")), 2, addr(GROUP), slot);
        let stranger = Transport::new(net.bind(addr("[fd00::3]:50000")), 2, addr(GROUP), slot);

        let mut members = MemberTable::default();
        members.register(2, addr("[fd00::2]:50000"));

        // 같은 ID, 다른 IP
        stranger
            .send_unicast(&Answer::nack(2, 1, 1).to_bytes(), addr("[fd00::1]:51000"))
            .await
            .unwrap();
        assert!(sender.receive_with_timeout(Some(&members)).await.unwrap().is_none());

        member
            .send_unicast(&Answer::nack(2, 1, 1).to_bytes(), addr("[fd00::1]:51000"))
            .await
            .unwrap();
        assert!(sender.receive_with_timeout(Some(&members)).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_multicast_fan_out_and_drop_filter() {
        let net = Network::new();
        let slot = Duration::from_millis(100);
        let sender = Transport::new(net.bind(addr("[fd00::1]:51000")), 1, addr(GROUP), slot);
        let mut r1 = Transport::new(net.bind(addr("[fd00::2]:50000")), 2, addr(GROUP), slot);
        let mut r2 = Transport::new(net.bind(addr("[fd00::3]:50000")), 3, addr(GROUP), slot);
        net.join(addr(GROUP), addr("[fd00::2]:50000"));
        net.join(addr(GROUP), addr("[fd00::3]:50000"));

        net.set_drop_filter(|p| p.to == "[fd00::3]:50000".parse::<SocketAddr>().unwrap());
        sender
            .send_multicast(&Request::hello(1, 2).to_bytes())
            .await
            .unwrap();

        assert!(r1.receive_with_timeout(None).await.unwrap().is_some());
        assert!(r2.receive_with_timeout(None).await.unwrap().is_none());
        assert_eq!(net.sent().len(), 1);
    }
}

//! IPv6 UDP 소켓 설정
//!
//! socket2로 옵션을 설정한 뒤 tokio 소켓으로 변환한다.
//! - 송신자: 서버 포트에 바인딩, 멀티캐스트 송신 인터페이스 지정
//! - 수신자: 클라이언트 포트에 바인딩, 멀티캐스트 그룹 가입

use std::ffi::CString;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::message::REQUEST_LEN;
use crate::{Config, Error, Result, Role, MAX_ALLOWED_CLIENTS};

/// 로컬 모드 루프백 인터페이스 후보
const LOOPBACK_INTERFACES: &[&str] = &["lo0", "lo"];

/// 인터페이스 미지정 시 후보 (앞에서부터 처음 존재하는 것)
const DEFAULT_INTERFACES: &[&str] = &[
    "eno0", "eno1", "eno2", "eth0", "eth1", "eth2", "en0", "en1", "en2", "wlan0", "wlan1",
    "wlan2", "bond0", "bond1", "bond3",
];

/// 인터페이스 이름 → OS 인덱스. 없으면 None
pub fn if_index(name: &str) -> Option<u32> {
    let name = CString::new(name).ok()?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    (index != 0).then_some(index)
}

/// 멀티캐스트 인터페이스 인덱스 결정
pub fn resolve_interface(config: &Config) -> Result<u32> {
    if let Some(name) = &config.interface {
        let index = if_index(name).ok_or_else(|| Error::InterfaceNotFound(name.clone()))?;
        info!("인터페이스 {} (index {})", name, index);
        return Ok(index);
    }

    let candidates = if config.local {
        LOOPBACK_INTERFACES
    } else {
        DEFAULT_INTERFACES
    };

    for name in candidates {
        if let Some(index) = if_index(name) {
            info!("인터페이스 {} (index {})", name, index);
            return Ok(index);
        }
    }

    if config.local {
        return Err(Error::InterfaceNotFound(LOOPBACK_INTERFACES.join("/")));
    }

    warn!("기본 인터페이스를 찾지 못함, 시스템 기본값(index 0) 사용");
    Ok(0)
}

/// 역할에 맞는 소켓 생성
///
/// 반환: (소켓, 멀티캐스트 목적지 주소)
pub fn open_socket(config: &Config, role: Role) -> Result<(UdpSocket, SocketAddr)> {
    let interface = resolve_interface(config)?;
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;

    // 로컬 모드에서는 여러 수신자가 같은 포트를 공유
    if config.local && role == Role::Receiver {
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
    }

    socket.set_nonblocking(true)?;
    socket.set_multicast_if_v6(interface)?;
    if config.local {
        socket.set_multicast_loop_v6(true)?;
    }

    let port = match role {
        Role::Sender => config.server_port,
        Role::Receiver => config.client_port,
    };
    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into())?;
    info!("소켓 바인딩 [::]:{}", port);

    if role == Role::Receiver {
        socket.join_multicast_v6(&config.multicast_addr, interface)?;
        info!("멀티캐스트 그룹 {} 가입", config.multicast_addr);
    }

    socket.set_recv_buffer_size(REQUEST_LEN * MAX_ALLOWED_CLIENTS)?;

    let destination = SocketAddr::V6(SocketAddrV6::new(
        config.multicast_addr,
        config.client_port,
        0,
        interface,
    ));

    let socket = UdpSocket::from_std(socket.into())?;
    Ok((socket, destination))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_interface() {
        assert_eq!(if_index("mnp-no-such-if0"), None);
        assert_eq!(if_index("bad\0name"), None);

        let config = Config {
            interface: Some("mnp-no-such-if0".into()),
            ..Config::default()
        };
        assert!(matches!(
            resolve_interface(&config),
            Err(Error::InterfaceNotFound(_))
        ));
    }
}

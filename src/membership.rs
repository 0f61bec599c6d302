//! 멤버 테이블 (송신측)
//!
//! 발견 단계에서 Hello 응답을 보낸 수신자 목록. 매 발견 주기마다 비우고
//! 다시 채운다. 재전송 대상 주소 조회와 수신 필터링에 사용.

use std::net::{IpAddr, SocketAddr};

use crate::{PeerId, MAX_ALLOWED_CLIENTS};

/// 등록된 수신자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub id: PeerId,
    pub addr: SocketAddr,
}

/// 수신자 목록
#[derive(Debug, Clone)]
pub struct MemberTable {
    members: Vec<Member>,
    capacity: usize,
}

impl Default for MemberTable {
    fn default() -> Self {
        Self::new(MAX_ALLOWED_CLIENTS)
    }
}

impl MemberTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            members: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// 수신자 등록
    ///
    /// 이미 등록된 ID이거나 가득 찼으면 false.
    pub fn register(&mut self, id: PeerId, addr: SocketAddr) -> bool {
        if self.members.len() >= self.capacity || self.members.iter().any(|m| m.id == id) {
            return false;
        }
        self.members.push(Member { id, addr });
        true
    }

    /// ID와 송신 IP가 모두 일치하는 멤버가 있는지
    pub fn is_member(&self, id: PeerId, ip: IpAddr) -> bool {
        self.members.iter().any(|m| m.id == id && m.addr.ip() == ip)
    }

    pub fn address_of(&self, id: PeerId) -> Option<SocketAddr> {
        self.members.iter().find(|m| m.id == id).map(|m| m.addr)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

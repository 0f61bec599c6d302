//! # MNP (Multicast NACK Protocol)
//!
//! IPv6 UDP 멀티캐스트 기반 NACK 윈도우 전송 프로토콜
//!
//! ## 핵심 특징
//! - **멀티캐스트 송신**: 송신자 하나가 발견된 수신자 집합 전체에 전송
//! - **NACK 기반**: ACK 없이 누락된 시퀀스만 요청
//! - **슬라이딩 윈도우**: 고정 크기(1~10) 윈도우로 순서 복원
//! - **타임아웃 에스컬레이션**: 두 번째 타임아웃에서 패킷 포기 (전진 보장)
//! - **단일 루프**: 프로세스당 하나의 협력형 상태 머신, 락 없음

pub mod config;
pub mod error;
pub mod loss;
pub mod membership;
pub mod message;
pub mod net;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod storage;
pub mod timer;
pub mod transport;
pub mod window;

pub use config::{Config, Role};
pub use error::{Error, Result};
pub use membership::{Member, MemberTable};
pub use message::{Answer, AnswerKind, PeerId, Request, RequestKind, SequenceId};
pub use receiver::Receiver;
pub use sender::Sender;
pub use stats::TransferStats;
pub use timer::TimerQueue;
pub use transport::{Datagram, Transport};
pub use window::WindowBuffer;

/// 브로드캐스트 수신자 ID
pub const BROADCAST_ID: PeerId = -1;

/// 데이터 패킷 페이로드 버퍼 크기 (바이트)
pub const PAYLOAD_CAPACITY: usize = 256;

/// 최대 수신자 수 (발견 단계 수신 시도 횟수이기도 함)
pub const MAX_ALLOWED_CLIENTS: usize = 3;

/// 최대 윈도우 크기
pub const MAX_WINDOW_SIZE: usize = 10;

/// 기본 윈도우 크기
pub const DEFAULT_WINDOW_SIZE: usize = 1;

/// 기본 클라이언트(수신자) 포트
pub const DEFAULT_PORT_CLIENT: u16 = 50000;

/// 기본 서버(송신자) 포트
pub const DEFAULT_PORT_SERVER: u16 = 51000;

/// 기본 멀티캐스트 주소
pub const DEFAULT_MULTICAST_ADDR: &str = "ff12::10";

/// 로컬 테스트용 멀티캐스트 주소 (interface-local scope)
pub const DEFAULT_MULTICAST_ADDR_LOCAL: &str = "ff01::10";

/// 기본 슬롯 시간 (밀리초), 상태 머신 한 번의 반복 = 한 틱
pub const DEFAULT_SLOT_TIME_MS: u64 = 300;

/// 기본 대기 시간 (초), Hello 재전송 전 휴지 시간
pub const DEFAULT_IDLE_TIME_SECS: u64 = 2;

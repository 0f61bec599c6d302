//! 프로토콜 메시지 정의
//!
//! 송신자 → 수신자: [`Request`] (Hello / Data / Close)
//! 수신자 → 송신자: [`Answer`] (Hello / Nack / Close)
//!
//! 와이어 포맷은 고정 길이. 헤더는 bincode(fixint, little-endian)로,
//! 페이로드는 256바이트 버퍼에 그대로 붙인다. 모든 메시지의 처음 4바이트는
//! senderId, 다음 4바이트는 receiverId 이므로 전체 디코딩 없이 필터링 가능.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, BROADCAST_ID, MAX_WINDOW_SIZE, PAYLOAD_CAPACITY};

/// 참여자 ID (송신자/수신자 공통)
pub type PeerId = i32;

/// 시퀀스 ID (첫 데이터 패킷은 1)
pub type SequenceId = u32;

/// Request 헤더 길이: i32 + i32 + u8 + i64 + i32
pub const REQUEST_HEADER_LEN: usize = 4 + 4 + 1 + 8 + 4;

/// Request 전체 길이
pub const REQUEST_LEN: usize = REQUEST_HEADER_LEN + PAYLOAD_CAPACITY;

/// Answer 전체 길이: i32 + i32 + u8 + i32
pub const ANSWER_LEN: usize = 4 + 4 + 1 + 4;

const KIND_HELLO: u8 = b'H';
const KIND_DATA: u8 = b'D';
const KIND_CLOSE: u8 = b'C';
const KIND_NACK: u8 = b'N';

/// Request 와이어 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RequestHeader {
    sender_id: i32,
    receiver_id: i32,
    kind: u8,
    payload_len: i64,
    sequence_id: i32,
}

/// Answer 와이어 레코드
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnswerRecord {
    sender_id: i32,
    receiver_id: i32,
    kind: u8,
    sequence_id: i32,
}

/// Request 종류
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// 발견 요청. payloadLength 필드로 윈도우 크기를 전달
    Hello { window_size: u32 },

    /// 데이터 (한 줄)
    Data { payload: Bytes },

    /// 전송 종료 패킷 (윈도우의 마지막 슬롯)
    Close,
}

/// 송신자가 보내는 요청. 전송 후에는 변경하지 않음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub sender_id: PeerId,
    pub receiver_id: PeerId,
    pub sequence: SequenceId,
    pub kind: RequestKind,
}

impl Request {
    /// 브로드캐스트 Hello
    pub fn hello(sender_id: PeerId, window_size: usize) -> Self {
        Self {
            sender_id,
            receiver_id: BROADCAST_ID,
            sequence: 0,
            kind: RequestKind::Hello {
                window_size: window_size as u32,
            },
        }
    }

    /// 브로드캐스트 데이터 패킷
    pub fn data(sender_id: PeerId, sequence: SequenceId, payload: Bytes) -> Result<Self> {
        if payload.len() > PAYLOAD_CAPACITY {
            return Err(Error::PayloadTooLarge {
                max: PAYLOAD_CAPACITY,
                got: payload.len(),
            });
        }

        Ok(Self {
            sender_id,
            receiver_id: BROADCAST_ID,
            sequence,
            kind: RequestKind::Data { payload },
        })
    }

    /// 브로드캐스트 종료 패킷
    pub fn close(sender_id: PeerId, sequence: SequenceId) -> Self {
        Self {
            sender_id,
            receiver_id: BROADCAST_ID,
            sequence,
            kind: RequestKind::Close,
        }
    }

    /// 특정 수신자 대상 복사본 (재전송용)
    pub fn addressed_to(&self, receiver_id: PeerId) -> Self {
        Self {
            receiver_id,
            ..self.clone()
        }
    }

    pub fn is_close(&self) -> bool {
        matches!(self.kind, RequestKind::Close)
    }

    /// 데이터 페이로드 (Data가 아니면 None)
    pub fn payload(&self) -> Option<&Bytes> {
        match &self.kind {
            RequestKind::Data { payload } => Some(payload),
            _ => None,
        }
    }

    /// 종류 문자 ('H', 'D', 'C')
    pub fn kind_byte(&self) -> u8 {
        match self.kind {
            RequestKind::Hello { .. } => KIND_HELLO,
            RequestKind::Data { .. } => KIND_DATA,
            RequestKind::Close => KIND_CLOSE,
        }
    }

    /// 바이트로 직렬화 (항상 REQUEST_LEN 바이트)
    pub fn to_bytes(&self) -> Vec<u8> {
        let (payload_len, payload): (i64, &[u8]) = match &self.kind {
            RequestKind::Hello { window_size } => (*window_size as i64, &[]),
            RequestKind::Data { payload } => (payload.len() as i64, payload.as_ref()),
            RequestKind::Close => (0, &[]),
        };

        let header = RequestHeader {
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            kind: self.kind_byte(),
            payload_len,
            sequence_id: self.sequence as i32,
        };
        let header_bytes = bincode::serialize(&header).unwrap_or_default();

        let mut buf = Vec::with_capacity(REQUEST_LEN);
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(payload);
        buf.resize(REQUEST_LEN, 0);
        buf
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REQUEST_LEN {
            return Err(Error::TruncatedMessage {
                expected: REQUEST_LEN,
                got: bytes.len(),
            });
        }

        let header: RequestHeader = bincode::deserialize(&bytes[..REQUEST_HEADER_LEN])?;
        let sequence = sequence_from_wire(header.sequence_id)?;

        let kind = match header.kind {
            KIND_HELLO => {
                let window_size = u32::try_from(header.payload_len)
                    .map_err(|_| Error::InvalidWindowSize {
                        got: header.payload_len,
                        max: MAX_WINDOW_SIZE,
                    })?;
                RequestKind::Hello { window_size }
            }
            KIND_DATA => {
                let len = usize::try_from(header.payload_len)
                    .ok()
                    .filter(|len| *len <= PAYLOAD_CAPACITY)
                    .ok_or(Error::PayloadTooLarge {
                        max: PAYLOAD_CAPACITY,
                        got: header.payload_len.max(0) as usize,
                    })?;
                let start = REQUEST_HEADER_LEN;
                RequestKind::Data {
                    payload: Bytes::copy_from_slice(&bytes[start..start + len]),
                }
            }
            KIND_CLOSE => RequestKind::Close,
            other => return Err(Error::InvalidMessageKind { kind: other }),
        };

        Ok(Self {
            sender_id: header.sender_id,
            receiver_id: header.receiver_id,
            sequence,
            kind,
        })
    }
}

/// Answer 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerKind {
    /// 발견 응답 (멤버 등록)
    Hello,

    /// 누락 시퀀스 재전송 요청
    Nack,

    /// 종료 확인
    Close,
}

impl AnswerKind {
    fn as_byte(self) -> u8 {
        match self {
            AnswerKind::Hello => KIND_HELLO,
            AnswerKind::Nack => KIND_NACK,
            AnswerKind::Close => KIND_CLOSE,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            KIND_HELLO => Ok(AnswerKind::Hello),
            KIND_NACK => Ok(AnswerKind::Nack),
            KIND_CLOSE => Ok(AnswerKind::Close),
            other => Err(Error::InvalidMessageKind { kind: other }),
        }
    }
}

/// 수신자가 보내는 응답
///
/// `sequence`는 Nack이면 누락된 시퀀스, Close면 수신자의 최종 base, Hello면 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Answer {
    pub sender_id: PeerId,
    pub receiver_id: PeerId,
    pub kind: AnswerKind,
    pub sequence: SequenceId,
}

impl Answer {
    pub fn hello(sender_id: PeerId, receiver_id: PeerId) -> Self {
        Self {
            sender_id,
            receiver_id,
            kind: AnswerKind::Hello,
            sequence: 0,
        }
    }

    pub fn nack(sender_id: PeerId, receiver_id: PeerId, sequence: SequenceId) -> Self {
        Self {
            sender_id,
            receiver_id,
            kind: AnswerKind::Nack,
            sequence,
        }
    }

    pub fn close(sender_id: PeerId, receiver_id: PeerId, base: SequenceId) -> Self {
        Self {
            sender_id,
            receiver_id,
            kind: AnswerKind::Close,
            sequence: base,
        }
    }

    /// 바이트로 직렬화 (항상 ANSWER_LEN 바이트)
    pub fn to_bytes(&self) -> Vec<u8> {
        let record = AnswerRecord {
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            kind: self.kind.as_byte(),
            sequence_id: self.sequence as i32,
        };
        bincode::serialize(&record).unwrap_or_default()
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ANSWER_LEN {
            return Err(Error::TruncatedMessage {
                expected: ANSWER_LEN,
                got: bytes.len(),
            });
        }

        let record: AnswerRecord = bincode::deserialize(&bytes[..ANSWER_LEN])?;

        Ok(Self {
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            kind: AnswerKind::from_byte(record.kind)?,
            sequence: sequence_from_wire(record.sequence_id)?,
        })
    }
}

/// 앞 8바이트에서 (senderId, receiverId) 추출
pub fn peek_ids(bytes: &[u8]) -> Option<(PeerId, PeerId)> {
    if bytes.len() < 8 {
        return None;
    }

    let sender_id = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let receiver_id = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Some((sender_id, receiver_id))
}

fn sequence_from_wire(raw: i32) -> Result<SequenceId> {
    SequenceId::try_from(raw).map_err(|_| Error::InvalidSequence {
        sequence: raw as i64,
    })
}

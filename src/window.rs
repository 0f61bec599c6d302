//! 윈도우 버퍼
//!
//! W개의 슬롯. 슬롯 `i`는 항상 시퀀스 `base + i`에 대응한다.
//! - 송신측: `fill()`로 소스에서 채우고, 만료된 앞 슬롯을 `shift()`로 퇴출
//! - 수신측: 순서 없이 도착한 패킷을 버퍼링하고 `drain()`으로 순서대로 출력

use std::collections::VecDeque;

use tracing::debug;

use crate::message::{PeerId, Request, SequenceId};
use crate::storage::{LineSink, LineSource};
use crate::Result;

/// 윈도우 슬롯
#[derive(Debug, Clone, Default)]
pub struct Slot {
    /// 버퍼링된 요청
    pub request: Option<Request>,

    /// 수신 완료 (수신측: drain 대상)
    pub received: bool,

    /// 타임아웃 경과 (송신측: 퇴출 대상)
    pub expired: bool,

    /// 이 슬롯에 대해 갭/타임아웃 NACK을 이미 보냄 (수신측)
    pub nack_sent: bool,
}

/// 고정 크기 윈도우 버퍼
#[derive(Debug)]
pub struct WindowBuffer {
    base: SequenceId,
    slots: VecDeque<Slot>,

    /// Close 패킷을 이미 채웠는지 (세션당 한 번)
    closed: bool,
}

impl WindowBuffer {
    /// 새 윈도우 생성
    pub fn new(capacity: usize, base: SequenceId) -> Self {
        Self {
            base,
            slots: (0..capacity.max(1)).map(|_| Slot::default()).collect(),
            closed: false,
        }
    }

    pub fn base(&self) -> SequenceId {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 윈도우 끝 (배타)
    pub fn end(&self) -> SequenceId {
        self.base + self.slots.len() as SequenceId
    }

    /// 시퀀스의 슬롯 인덱스. 윈도우 밖이면 None
    pub fn index_of(&self, sequence: SequenceId) -> Option<usize> {
        if sequence < self.base || sequence >= self.end() {
            return None;
        }
        Some((sequence - self.base) as usize)
    }

    pub fn contains(&self, sequence: SequenceId) -> bool {
        self.index_of(sequence).is_some()
    }

    pub fn get(&self, sequence: SequenceId) -> Option<&Slot> {
        self.index_of(sequence).map(|i| &self.slots[i])
    }

    pub fn get_mut(&mut self, sequence: SequenceId) -> Option<&mut Slot> {
        self.index_of(sequence).map(move |i| &mut self.slots[i])
    }

    /// 첫 슬롯 (시퀀스 base)
    pub fn front(&self) -> &Slot {
        &self.slots[0]
    }

    pub fn front_mut(&mut self) -> &mut Slot {
        &mut self.slots[0]
    }

    /// 요청이 들어있는 슬롯 수
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.request.is_some()).count()
    }

    /// 수신 완료 슬롯 수
    pub fn received_count(&self) -> usize {
        self.slots.iter().filter(|s| s.received).count()
    }

    /// Close 패킷이 채워졌는지
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 첫 슬롯을 버리고 나머지를 한 칸씩 당김, base 증가
    pub fn shift(&mut self) {
        self.slots.pop_front();
        self.slots.push_back(Slot::default());
        self.base += 1;
    }

    /// 세션 재시작
    pub fn reset(&mut self, base: SequenceId) {
        for slot in self.slots.iter_mut() {
            *slot = Slot::default();
        }
        self.base = base;
        self.closed = false;
    }

    /// 송신측: 소스에서 윈도우를 가득 채움
    ///
    /// 소스가 끝나면 Close 패킷을 마지막 슬롯으로 한 번만 넣는다.
    /// 새로 채운 슬롯 수 반환.
    pub fn fill<S: LineSource + ?Sized>(
        &mut self,
        source: &mut S,
        sender_id: PeerId,
    ) -> Result<usize> {
        let mut filled = 0;

        while !self.closed {
            let index = self.occupied();
            if index >= self.slots.len() {
                break;
            }

            let sequence = self.base + index as SequenceId;
            let request = match source.read_next_line()? {
                Some(line) => Request::data(sender_id, sequence, line)?,
                None => {
                    debug!("패킷 {} CLOSE 생성", sequence);
                    self.closed = true;
                    Request::close(sender_id, sequence)
                }
            };

            self.slots[index] = Slot {
                request: Some(request),
                ..Slot::default()
            };
            filled += 1;
        }

        Ok(filled)
    }

    /// 수신측: 요청을 해당 슬롯에 버퍼링
    ///
    /// 윈도우 밖이거나 이미 받은 슬롯이면 false.
    pub fn insert(&mut self, request: Request) -> bool {
        match self.get_mut(request.sequence) {
            Some(slot) if !slot.received => {
                slot.request = Some(request);
                slot.received = true;
                true
            }
            _ => false,
        }
    }

    /// 수신측: 첫 슬롯이 수신 완료인 동안 출력하고 shift
    ///
    /// 출력한 줄 수 반환.
    pub fn drain<K: LineSink + ?Sized>(&mut self, sink: &mut K) -> Result<usize> {
        let mut written = 0;

        while self.slots[0].received {
            if let Some(payload) = self.slots[0].request.as_ref().and_then(|r| r.payload()) {
                sink.write_line(payload)?;
                written += 1;
            }
            self.shift();
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySource;
    use crate::RequestKind;
    use bytes::Bytes;

    fn data(sequence: SequenceId, text: &'static str) -> Request {
        Request::data(1, sequence, Bytes::from_static(text.as_bytes())).unwrap()
    }

    #[test]
    fn test_shift_advances_base() {
        let mut window = WindowBuffer::new(3, 1);
        window.insert(data(2, "b\n"));
        window.shift();

        assert_eq!(window.base(), 2);
        assert!(window.front().received);
        assert!(!window.get(4).unwrap().received);
        assert!(window.get(5).is_none());
    }

    #[test]
    fn test_fill_emits_single_close() {
        let mut source = MemorySource::from_text("a\nb\n");
        let mut window = WindowBuffer::new(4, 1);

        assert_eq!(window.fill(&mut source, 1).unwrap(), 3);
        assert!(window.is_closed());
        assert_eq!(window.occupied(), 3);
        assert!(window.get(3).unwrap().request.as_ref().unwrap().is_close());

        // 다시 채워도 Close는 한 번뿐
        window.shift();
        assert_eq!(window.fill(&mut source, 1).unwrap(), 0);
        assert_eq!(window.occupied(), 2);
    }

    #[test]
    fn test_fill_respects_capacity() {
        let mut source = MemorySource::from_text("a\nb\nc\nd\n");
        let mut window = WindowBuffer::new(2, 1);

        assert_eq!(window.fill(&mut source, 1).unwrap(), 2);
        assert_eq!(window.get(2).unwrap().request.as_ref().unwrap().sequence, 2);

        window.shift();
        assert_eq!(window.fill(&mut source, 1).unwrap(), 1);
        let third = window.get(3).unwrap().request.as_ref().unwrap();
        assert_eq!(third.kind, RequestKind::Data { payload: Bytes::from_static(b"c\n") });
    }

    #[test]
    fn test_drain_in_order() {
        let mut window = WindowBuffer::new(3, 1);
        let mut out = Vec::new();

        assert!(window.insert(data(3, "c\n")));
        assert!(window.insert(data(2, "b\n")));
        assert_eq!(window.drain(&mut out).unwrap(), 0);
        assert_eq!(window.received_count(), 2);

        assert!(window.insert(data(1, "a\n")));
        assert!(!window.insert(data(1, "a\n")));
        assert_eq!(window.drain(&mut out).unwrap(), 3);

        assert_eq!(out, b"a\nb\nc\n");
        assert_eq!(window.base(), 4);
        assert!(!window.insert(data(2, "b\n")));
    }

    #[test]
    fn test_out_of_window_rejected() {
        let mut window = WindowBuffer::new(2, 5);
        assert!(!window.insert(data(7, "x\n")));
        assert!(!window.insert(data(4, "x\n")));
        assert_eq!(window.received_count(), 0);

        assert!(window.insert(data(6, "y\n")));
        assert!(window.get(6).unwrap().received);
        assert_eq!(window.received_count(), 1);
    }
}

//! 재전송 타이머 큐
//!
//! 시퀀스별 타임아웃을 만료 순서대로 보관한다. 외부에서 보이는 의미는
//! 델타 리스트(각 항목은 앞선 항목들 대비 남은 틱)와 같지만, 내부에는
//! 절대 데드라인을 저장하므로 취소 시 뒤 항목을 다시 계산할 필요가 없다.
//!
//! 한 틱 = 상태 머신 한 번의 반복 (벽시계 단위 아님).

use std::collections::VecDeque;

use crate::SequenceId;

/// 타이머 항목
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    sequence: SequenceId,
    deadline: u64,
}

/// 데드라인 정렬 타이머 큐
#[derive(Debug, Default)]
pub struct TimerQueue {
    /// 데드라인 오름차순, 같은 데드라인은 등록 순서
    entries: VecDeque<TimerEntry>,

    /// 경과 틱 수
    now: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ticks` 틱 후 만료되는 타이머 등록
    ///
    /// 같은 시퀀스의 기존 타이머는 대체된다.
    pub fn schedule(&mut self, sequence: SequenceId, ticks: u32) {
        self.cancel(sequence);

        let deadline = self.now + ticks as u64;
        let pos = self
            .entries
            .iter()
            .position(|e| e.deadline > deadline)
            .unwrap_or(self.entries.len());

        self.entries.insert(pos, TimerEntry { sequence, deadline });
    }

    /// 타이머 취소. 없으면 아무것도 하지 않음
    pub fn cancel(&mut self, sequence: SequenceId) -> bool {
        match self.entries.iter().position(|e| e.sequence == sequence) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// 한 틱 진행. 헤드가 만료되면 제거하고 그 시퀀스 반환 (호출당 최대 1개)
    pub fn tick(&mut self) -> Option<SequenceId> {
        self.now += 1;

        match self.entries.front() {
            Some(head) if head.deadline <= self.now => {
                self.entries.pop_front().map(|e| e.sequence)
            }
            _ => None,
        }
    }

    /// 남은 틱 수 (이미 지난 항목은 0)
    pub fn remaining(&self, sequence: SequenceId) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.sequence == sequence)
            .map(|e| e.deadline.saturating_sub(self.now))
    }

    /// 델타 리스트 표현: (시퀀스, 앞 항목 대비 남은 틱)
    pub fn deltas(&self) -> Vec<(SequenceId, u64)> {
        let mut prev = self.now;
        self.entries
            .iter()
            .map(|e| {
                let deadline = e.deadline.max(prev);
                let delta = deadline - prev;
                prev = deadline;
                (e.sequence, delta)
            })
            .collect()
    }

    pub fn contains(&self, sequence: SequenceId) -> bool {
        self.entries.iter().any(|e| e.sequence == sequence)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 전체 초기화 (세션 재시작)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.now = 0;
    }
}

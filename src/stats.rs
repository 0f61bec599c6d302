//! 전송 통계

use std::time::{Duration, Instant};

use tracing::info;

/// 세션 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 첫 전송 패킷 수 (데이터 + CLOSE)
    pub packets_sent: u64,

    /// NACK에 의한 재전송 수
    pub retransmissions: u64,

    /// 디버그 손실로 버려진 송신 수
    pub simulated_losses: u64,

    /// 보낸 NACK 수 (수신측)
    pub nacks_sent: u64,

    /// 받은 NACK 수 (송신측)
    pub nacks_received: u64,

    /// 범위 밖이라 거절된 NACK 수
    pub nacks_rejected: u64,

    /// 타이머 만료 수
    pub timeouts: u64,

    /// 포기하고 빈 줄로 대체한 패킷 수 (수신측)
    pub skipped: u64,

    /// 출력한 줄 수 (수신측)
    pub lines_delivered: u64,

    /// 중복/윈도우 밖 데이터 수 (수신측)
    pub duplicates: u64,

    /// 받은 CLOSE 응답 수 (송신측)
    pub close_answers: u64,

    /// 발견 단계에서 등록된 수신자 수
    pub members: u64,

    /// 완료한 전송 세션 수
    pub sessions: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            packets_sent: 0,
            retransmissions: 0,
            simulated_losses: 0,
            nacks_sent: 0,
            nacks_received: 0,
            nacks_rejected: 0,
            timeouts: 0,
            skipped: 0,
            lines_delivered: 0,
            duplicates: 0,
            close_answers: 0,
            members: 0,
            sessions: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 재전송 비율 (재전송 / 첫 전송)
    pub fn retransmission_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.packets_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} | Retransmit: {} ({:.1}%) | Lost(sim): {} | NACK tx/rx/rej: {}/{}/{} | Timeouts: {} | Delivered: {} | Skipped: {} | Members: {}",
            self.elapsed().as_secs_f64(),
            self.packets_sent,
            self.retransmissions,
            self.retransmission_ratio() * 100.0,
            self.simulated_losses,
            self.nacks_sent,
            self.nacks_received,
            self.nacks_rejected,
            self.timeouts,
            self.lines_delivered,
            self.skipped,
            self.members,
        )
    }

    /// 요약을 로그로 출력
    pub fn log_summary(&self) {
        info!("{}", self.summary());
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

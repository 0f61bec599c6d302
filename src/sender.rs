//! 송신자 (서버측)
//!
//! 상태: `Init → Idle → Prepare → Established → Close → (Init | Done)`
//!
//! - 발견: Hello 멀티캐스트 후 응답한 수신자를 멤버로 등록
//! - 전송: 윈도우 단위 멀티캐스트, 패킷별 타이머
//! - NACK: 해당 패킷만 NACK 보낸 수신자에게 재전송
//! - 타임아웃된 선두 슬롯은 퇴출 (ACK 없음, 타임아웃이 곧 완료)

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::loss::LossInjector;
use crate::message::{Answer, AnswerKind, Request, SequenceId, ANSWER_LEN};
use crate::storage::LineSource;
use crate::transport::{Datagram, Transport};
use crate::{Config, MemberTable, Result, TimerQueue, TransferStats, WindowBuffer};

/// 송신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Init,
    Idle,
    Prepare,
    Established,
    Close,
    Done,
}

/// 송신자
pub struct Sender<D, S> {
    /// 설정
    config: Config,

    transport: Transport<D>,
    source: S,

    window: WindowBuffer,
    timers: TimerQueue,
    members: MemberTable,
    loss: LossInjector,

    /// 전송 통계
    stats: TransferStats,

    state: SenderState,

    /// 다음에 처음 보낼 시퀀스
    current: SequenceId,

    /// 직전 반복에서 받은 응답
    pending: Option<(Answer, SocketAddr)>,
}

impl<D: Datagram, S: LineSource> Sender<D, S> {
    /// 새 송신자 생성
    pub fn new(config: Config, transport: Transport<D>, source: S) -> Self {
        Self {
            window: WindowBuffer::new(config.window_size, 1),
            timers: TimerQueue::new(),
            members: MemberTable::new(config.max_members),
            loss: LossInjector::new(config.debug),
            stats: TransferStats::new(),
            state: SenderState::Init,
            current: 1,
            pending: None,
            config,
            transport,
            source,
        }
    }

    /// 손실 주입기 교체 (재현 가능한 시드 등)
    pub fn with_loss(mut self, loss: LossInjector) -> Self {
        self.loss = loss;
        self
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// 통계 반환
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn members(&self) -> &MemberTable {
        &self.members
    }

    pub fn base(&self) -> SequenceId {
        self.window.base()
    }

    pub fn current(&self) -> SequenceId {
        self.current
    }

    /// 전송 종료까지 실행. 루프 모드면 에러가 날 때까지 반환하지 않음
    pub async fn run(&mut self) -> Result<TransferStats> {
        info!(
            "송신자 {} 시작 (윈도우 {}, 멀티캐스트 {})",
            self.config.id,
            self.config.window_size,
            self.transport.multicast_addr()
        );

        while self.state != SenderState::Done {
            self.step().await?;
        }

        Ok(self.stats.clone())
    }

    /// 상태 머신 한 번 진행
    pub async fn step(&mut self) -> Result<SenderState> {
        match self.state {
            SenderState::Init => self.init()?,
            SenderState::Idle => self.idle().await?,
            SenderState::Prepare => self.prepare().await?,
            SenderState::Established => self.established().await?,
            SenderState::Close => self.close().await?,
            SenderState::Done => {}
        }
        Ok(self.state)
    }

    fn transition(&mut self, next: SenderState) {
        info!("송신자 상태 {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn init(&mut self) -> Result<()> {
        self.window = WindowBuffer::new(self.config.window_size, 1);
        self.timers.clear();
        self.members.clear();
        self.pending = None;
        self.current = 1;
        self.source.rewind()?;

        self.transition(SenderState::Idle);
        Ok(())
    }

    async fn idle(&mut self) -> Result<()> {
        debug!("{:?} 대기", self.config.idle_interval);
        tokio::time::sleep(self.config.idle_interval).await;

        let hello = Request::hello(self.config.id, self.config.window_size);
        self.transport.send_multicast(&hello.to_bytes()).await?;
        info!("Hello 전송 (윈도우 {})", self.config.window_size);

        self.transition(SenderState::Prepare);
        Ok(())
    }

    async fn prepare(&mut self) -> Result<()> {
        for _ in 0..self.config.max_members {
            let Some((bytes, source)) = self.transport.receive_with_timeout(None).await? else {
                continue;
            };

            match decode_answer(&bytes) {
                Some(answer) if answer.kind == AnswerKind::Hello => {
                    if self.members.register(answer.sender_id, source) {
                        info!("수신자 {} 등록 ({})", answer.sender_id, source);
                    } else {
                        debug!("수신자 {} 등록 거부 (중복 또는 초과)", answer.sender_id);
                    }
                }
                Some(answer) => debug!("발견 단계에서 {:?} 무시", answer.kind),
                None => {}
            }
        }

        if self.members.is_empty() {
            warn!("응답한 수신자 없음");
            self.transition(SenderState::Idle);
        } else {
            self.stats.members = self.members.len() as u64;
            self.transition(SenderState::Established);
        }
        Ok(())
    }

    async fn established(&mut self) -> Result<()> {
        self.tick_timer();

        let mut nacked = false;
        if let Some((answer, source)) = self.pending.take() {
            match answer.kind {
                AnswerKind::Nack => nacked = self.handle_nack(answer, source).await?,
                AnswerKind::Close => {
                    self.stats.close_answers += 1;
                    info!("수신자 {} CLOSE 응답 (base {})", answer.sender_id, answer.sequence);
                }
                AnswerKind::Hello => debug!("늦은 Hello 응답 무시: {}", answer.sender_id),
            }
        }

        self.retire_expired();
        self.window.fill(&mut self.source, self.config.id)?;

        if !nacked {
            self.send_next().await?;
        }

        self.poll().await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some((answer, source)) = self.pending.take() {
            match answer.kind {
                AnswerKind::Close => {
                    self.stats.close_answers += 1;
                    info!("수신자 {} CLOSE 응답 (base {})", answer.sender_id, answer.sequence);
                }
                AnswerKind::Nack => {
                    // 종료 중단, NACK은 Established에서 처리
                    self.timers.cancel(self.current);
                    self.pending = Some((answer, source));
                    self.transition(SenderState::Established);
                    return Ok(());
                }
                AnswerKind::Hello => {}
            }
        }

        self.tick_timer();
        self.retire_expired();

        if self.window.occupied() == 0 {
            self.finish();
            return Ok(());
        }

        debug!("윈도우 잔여 {} (base {})", self.window.occupied(), self.window.base());
        self.poll().await
    }

    fn finish(&mut self) {
        self.stats.sessions += 1;
        info!("전송 완료 (세션 {})", self.stats.sessions);
        self.stats.log_summary();

        if self.config.loop_mode {
            self.transition(SenderState::Init);
        } else {
            self.transition(SenderState::Done);
        }
    }

    /// 타이머 한 틱, 만료된 패킷 표시
    fn tick_timer(&mut self) {
        if let Some(sequence) = self.timers.tick() {
            if let Some(slot) = self.window.get_mut(sequence) {
                slot.expired = true;
                self.stats.timeouts += 1;
                debug!("패킷 {} 타임아웃", sequence);
            }
        }
    }

    /// 선두의 만료 슬롯 퇴출
    fn retire_expired(&mut self) {
        while self.window.occupied() > 0 && self.window.front().expired {
            debug!("패킷 {} 퇴출", self.window.base());
            self.window.shift();
        }
    }

    /// NACK 처리. 재전송했으면 true
    async fn handle_nack(&mut self, answer: Answer, source: SocketAddr) -> Result<bool> {
        let sequence = answer.sequence;
        self.stats.nacks_received += 1;

        let request = if sequence < self.window.base() {
            warn!(
                "수신자 {}의 NACK {}: 송신 윈도우 밖 (base {})",
                answer.sender_id,
                sequence,
                self.window.base()
            );
            None
        } else if sequence >= self.current {
            warn!(
                "수신자 {}의 NACK {}: 아직 보내지 않은 패킷 (current {})",
                answer.sender_id, sequence, self.current
            );
            None
        } else {
            match self.window.get(sequence).and_then(|slot| slot.request.clone()) {
                Some(request) if request.is_close() => {
                    warn!("CLOSE 패킷 {}에 대한 NACK 무시", sequence);
                    None
                }
                other => other,
            }
        };

        let Some(request) = request else {
            self.stats.nacks_rejected += 1;
            return Ok(false);
        };

        info!("수신자 {}의 NACK {} 수신", answer.sender_id, sequence);
        self.timers.schedule(sequence, self.config.timeout_ticks);
        if let Some(slot) = self.window.get_mut(sequence) {
            slot.expired = false;
        }

        let request = request.addressed_to(answer.sender_id);
        self.stats.retransmissions += 1;

        if self.loss.should_drop(false) {
            self.stats.simulated_losses += 1;
            warn!("패킷 {} 손실 (시뮬레이션)", sequence);
        } else if self.config.local {
            self.transport.send_multicast(&request.to_bytes()).await?;
            debug!("패킷 {} 재전송 (multicast, 대상 {})", sequence, answer.sender_id);
        } else {
            let target = self.members.address_of(answer.sender_id).unwrap_or(source);
            self.transport.send_unicast(&request.to_bytes(), target).await?;
            debug!("패킷 {} 재전송 -> {} ({})", sequence, answer.sender_id, target);
        }

        Ok(true)
    }

    /// current 패킷 첫 전송
    async fn send_next(&mut self) -> Result<()> {
        if self.current >= self.window.end() {
            debug!(
                "윈도우 끝 도달, 전송 없음 (base {}, current {})",
                self.window.base(),
                self.current
            );
            return Ok(());
        }

        let Some(request) = self
            .window
            .get(self.current)
            .and_then(|slot| slot.request.clone())
        else {
            return Ok(());
        };

        let is_close = request.is_close();
        self.stats.packets_sent += 1;

        if self.loss.should_drop(is_close) {
            self.stats.simulated_losses += 1;
            warn!("패킷 {} 손실 (시뮬레이션)", self.current);
        } else {
            self.transport.send_multicast(&request.to_bytes()).await?;
            debug!("패킷 {} 전송", self.current);
        }

        if is_close {
            self.timers
                .schedule(self.current, self.config.close_timeout_ticks());
            info!("CLOSE 패킷 {} 전송", self.current);
            self.transition(SenderState::Close);
        } else {
            self.timers.schedule(self.current, self.config.timeout_ticks);
            self.current += 1;
        }

        Ok(())
    }

    /// 한 슬롯 동안 멤버 응답 대기
    async fn poll(&mut self) -> Result<()> {
        self.pending = self
            .transport
            .receive_with_timeout(Some(&self.members))
            .await?
            .and_then(|(bytes, source)| decode_answer(&bytes).map(|answer| (answer, source)));
        Ok(())
    }
}

/// Answer 길이의 데이터그램만 응답으로 해석
fn decode_answer(bytes: &[u8]) -> Option<Answer> {
    if bytes.len() != ANSWER_LEN {
        debug!("응답이 아닌 데이터그램 무시 ({} bytes)", bytes.len());
        return None;
    }

    match Answer::from_bytes(bytes) {
        Ok(answer) => Some(answer),
        Err(e) => {
            debug!("잘못된 응답 무시: {}", e);
            None
        }
    }
}

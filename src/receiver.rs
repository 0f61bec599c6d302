//! 수신자 (클라이언트측)
//!
//! 상태: `Init → Idle → Prepare → Established → Close → Done`
//!
//! - Hello로 윈도우 크기 협상, 송신자에게 Hello 응답
//! - 순서 없이 도착한 패킷을 윈도우에 버퍼링, base부터 순서대로 출력
//! - base 누락: 첫 번째는 NACK, 두 번째는 빈 줄로 대체하고 진행 (전진 보장)
//! - 빈 줄은 다음 실제 줄이 나갈 때까지 보류. CLOSE 시퀀스 이후 것은 버림

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::message::{Answer, PeerId, Request, RequestKind, SequenceId};
use crate::storage::LineSink;
use crate::transport::{Datagram, Transport};
use crate::{
    Config, Result, TimerQueue, TransferStats, WindowBuffer, BROADCAST_ID, MAX_WINDOW_SIZE,
};

/// 포기한 패킷 자리에 쓰는 줄
const PLACEHOLDER: &[u8] = b"\n";

/// 수신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Init,
    Idle,
    Prepare,
    Established,
    Close,
    Done,
}

/// 수신자
pub struct Receiver<D, K> {
    config: Config,
    transport: Transport<D>,
    sink: K,

    window: WindowBuffer,
    timers: TimerQueue,
    stats: TransferStats,
    state: ReceiverState,

    /// Hello를 보낸 송신자 (없으면 BROADCAST_ID)
    sender_id: PeerId,
    sender_addr: Option<SocketAddr>,

    /// 직전 반복에서 받은 데이터 패킷
    pending: Option<Request>,

    /// 받은 CLOSE 패킷의 시퀀스
    close_sequence: Option<SequenceId>,

    /// 지금까지 본 가장 큰 데이터 시퀀스
    highest_seen: SequenceId,

    /// 아직 기록하지 않은 빈 줄 수 (시퀀스 `base - held .. base`)
    held: usize,
}

impl<D: Datagram, K: LineSink> Receiver<D, K> {
    pub fn new(config: Config, transport: Transport<D>, sink: K) -> Self {
        Self {
            window: WindowBuffer::new(config.window_size, 1),
            timers: TimerQueue::new(),
            stats: TransferStats::new(),
            state: ReceiverState::Init,
            sender_id: BROADCAST_ID,
            sender_addr: None,
            pending: None,
            close_sequence: None,
            highest_seen: 0,
            held: 0,
            config,
            transport,
            sink,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn base(&self) -> SequenceId {
        self.window.base()
    }

    /// 협상된 윈도우 크기
    pub fn window_size(&self) -> usize {
        self.window.capacity()
    }

    /// 윈도우에 버퍼링된 (수신 완료, 미출력) 패킷 수
    pub fn buffered(&self) -> usize {
        self.window.received_count()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// CLOSE 응답까지 실행
    pub async fn run(&mut self) -> Result<TransferStats> {
        info!("수신자 {} 시작", self.config.id);

        while self.state != ReceiverState::Done {
            self.step().await?;
        }

        Ok(self.stats.clone())
    }

    /// 상태 머신 한 번 진행
    pub async fn step(&mut self) -> Result<ReceiverState> {
        match self.state {
            ReceiverState::Init => self.init(),
            ReceiverState::Idle => self.idle().await?,
            ReceiverState::Prepare => self.prepare().await?,
            ReceiverState::Established => self.established().await?,
            ReceiverState::Close => self.close().await?,
            ReceiverState::Done => {}
        }
        Ok(self.state)
    }

    fn transition(&mut self, next: ReceiverState) {
        info!("수신자 상태 {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn init(&mut self) {
        self.window = WindowBuffer::new(self.config.window_size, 1);
        self.timers.clear();
        self.sender_id = BROADCAST_ID;
        self.sender_addr = None;
        self.pending = None;
        self.close_sequence = None;
        self.highest_seen = 0;
        self.held = 0;
        self.transition(ReceiverState::Idle);
    }

    /// Hello 대기
    async fn idle(&mut self) -> Result<()> {
        let Some((bytes, source)) = self.transport.receive_with_timeout(None).await? else {
            return Ok(());
        };

        let request = match Request::from_bytes(&bytes) {
            Ok(request) => request,
            Err(e) => {
                debug!("잘못된 요청 무시: {}", e);
                return Ok(());
            }
        };

        let RequestKind::Hello { window_size } = request.kind else {
            debug!("Hello 대기 중 패킷 {} 무시", request.sequence);
            return Ok(());
        };

        let window_size = window_size as usize;
        if !(1..=MAX_WINDOW_SIZE).contains(&window_size) {
            warn!(
                "송신자 {}의 윈도우 크기 {} 거부 (1~{})",
                request.sender_id, window_size, MAX_WINDOW_SIZE
            );
            return Ok(());
        }

        self.window = WindowBuffer::new(window_size, 1);
        self.timers.clear();
        self.sender_id = request.sender_id;
        self.sender_addr = Some(source);
        info!(
            "송신자 {} ({}) 발견, 윈도우 {}",
            request.sender_id, source, window_size
        );

        self.transition(ReceiverState::Prepare);
        Ok(())
    }

    async fn prepare(&mut self) -> Result<()> {
        self.send_answer(Answer::hello(self.config.id, self.sender_id))
            .await?;

        // 송신자의 발견 단계가 끝날 때까지 여유를 두고 base 타이머 시작
        let ticks = self.config.timeout_ticks + self.config.max_members as u32;
        self.timers.schedule(self.window.base(), ticks);

        self.transition(ReceiverState::Established);
        Ok(())
    }

    async fn established(&mut self) -> Result<()> {
        let expired = self.timers.tick();

        // 같은 반복에서는 데이터 처리가 타이머 만료보다 우선
        let handled = match self.pending.take() {
            Some(request) => self.on_data(request).await?,
            None => false,
        };
        if !handled {
            if let Some(sequence) = expired {
                self.on_timeout(sequence).await?;
            }
        }

        if self.close_reached() {
            self.transition(ReceiverState::Close);
            return Ok(());
        }

        self.poll().await
    }

    async fn close(&mut self) -> Result<()> {
        let base = self.window.base();
        if let Some(sequence) = self.close_sequence.filter(|s| *s > base) {
            info!("CLOSE {} 이전 패킷 미수신 (base {})", sequence, base);
            self.transition(ReceiverState::Established);
            return Ok(());
        }

        let last = self.release_held()?;
        let answer = Answer::close(self.config.id, self.sender_id, last);
        if let Err(e) = self.send_answer(answer).await {
            warn!("CLOSE 응답 전송 실패: {}", e);
        }

        info!("수신 완료 (base {})", last);
        self.stats.log_summary();
        self.transition(ReceiverState::Done);
        Ok(())
    }

    /// 보류한 빈 줄 중 CLOSE 시퀀스 앞의 것만 기록. 최종 base 반환
    fn release_held(&mut self) -> Result<SequenceId> {
        let base = self.window.base();
        let close = self.close_sequence.unwrap_or(base).min(base);
        let first = base - self.held as SequenceId;
        let keep = (close.saturating_sub(first) as usize).min(self.held);

        for _ in 0..keep {
            self.sink.write_line(PLACEHOLDER)?;
        }
        if keep < self.held {
            info!("CLOSE {} 이후 빈 줄 {}개 버림", close, self.held - keep);
        }
        self.held = 0;
        Ok(close)
    }

    fn close_reached(&self) -> bool {
        self.close_sequence
            .is_some_and(|sequence| self.window.base() >= sequence)
    }

    /// 데이터 패킷 처리. base 이전 패킷이면 false
    async fn on_data(&mut self, request: Request) -> Result<bool> {
        let sequence = request.sequence;
        let base = self.window.base();
        debug!("패킷 {} 수신 (base {})", sequence, base);

        if sequence < base {
            self.stats.duplicates += 1;
            debug!("base보다 작은 패킷 {} 무시", sequence);
            return Ok(false);
        }

        self.highest_seen = self.highest_seen.max(sequence);

        if sequence == base {
            if !self.window.insert(request) {
                self.stats.duplicates += 1;
            }
            self.timers.cancel(base);
            self.deliver()?;
            self.timers
                .schedule(self.window.base(), self.config.timeout_ticks);
            return Ok(true);
        }

        if self.window.contains(sequence) {
            if !self.window.insert(request) {
                self.stats.duplicates += 1;
                debug!("중복 패킷 {}", sequence);
            }
        } else {
            debug!("윈도우 밖 패킷 {} (end {})", sequence, self.window.end());
        }

        if self.window.front().nack_sent {
            self.skip_base(sequence).await?;
        } else {
            self.send_nack().await?;
        }
        Ok(true)
    }

    async fn on_timeout(&mut self, sequence: SequenceId) -> Result<()> {
        self.stats.timeouts += 1;
        let base = self.window.base();

        if sequence != base {
            debug!("지난 타이머 {} 무시 (base {})", sequence, base);
            self.timers.schedule(base, self.config.timeout_ticks);
            return Ok(());
        }

        debug!("패킷 {} 타임아웃", base);
        if self.window.front().nack_sent {
            self.skip_base(self.highest_seen).await
        } else {
            self.send_nack().await
        }
    }

    /// base에 대한 NACK 전송, 슬롯 표시 및 타이머 재설정
    async fn send_nack(&mut self) -> Result<()> {
        let base = self.window.base();
        self.window.front_mut().nack_sent = true;
        self.timers.schedule(base, self.config.timeout_ticks);

        self.send_answer(Answer::nack(self.config.id, self.sender_id, base))
            .await?;
        self.stats.nacks_sent += 1;
        warn!("NACK {} 전송", base);
        Ok(())
    }

    /// base 포기: 빈 줄로 대체 (보류) 후 출력
    ///
    /// 새 base가 `reference`보다 뒤처져 있으면 새 base에 대해 바로 NACK.
    async fn skip_base(&mut self, reference: SequenceId) -> Result<()> {
        let base = self.window.base();
        warn!("패킷 {} 포기, 빈 줄로 대체", base);

        let front = self.window.front_mut();
        front.request = None;
        front.received = true;
        self.held += 1;
        self.stats.skipped += 1;

        self.timers.cancel(base);
        self.deliver()?;

        if reference > self.window.base() {
            self.send_nack().await
        } else {
            self.timers
                .schedule(self.window.base(), self.config.timeout_ticks);
            Ok(())
        }
    }

    fn deliver(&mut self) -> Result<()> {
        let mut out = HeldSink {
            sink: &mut self.sink,
            held: &mut self.held,
        };
        let written = self.window.drain(&mut out)?;
        if written > 0 {
            self.stats.lines_delivered += written as u64;
            debug!("{}줄 출력, base {}", written, self.window.base());
        }
        Ok(())
    }

    async fn send_answer(&self, answer: Answer) -> Result<()> {
        match self.sender_addr {
            Some(target) => self.transport.send_unicast(&answer.to_bytes(), target).await,
            None => Ok(()),
        }
    }

    /// 한 슬롯 동안 송신자 요청 대기
    async fn poll(&mut self) -> Result<()> {
        let Some((bytes, _)) = self.transport.receive_with_timeout(None).await? else {
            return Ok(());
        };

        let request = match Request::from_bytes(&bytes) {
            Ok(request) => request,
            Err(e) => {
                debug!("잘못된 요청 무시: {}", e);
                return Ok(());
            }
        };

        if request.sender_id != self.sender_id {
            debug!("다른 송신자 {}의 요청 무시", request.sender_id);
            return Ok(());
        }

        match request.kind {
            RequestKind::Data { .. } => self.pending = Some(request),
            RequestKind::Close => {
                info!("CLOSE {} 수신", request.sequence);
                self.close_sequence = Some(request.sequence);
                self.transition(ReceiverState::Close);
            }
            RequestKind::Hello { .. } => debug!("세션 중 Hello 무시"),
        }
        Ok(())
    }
}

/// 실제 줄을 쓰기 직전에 보류한 빈 줄을 먼저 기록
struct HeldSink<'a, K: ?Sized> {
    sink: &'a mut K,
    held: &'a mut usize,
}

impl<K: LineSink + ?Sized> LineSink for HeldSink<'_, K> {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        while *self.held > 0 {
            self.sink.write_line(PLACEHOLDER)?;
            *self.held -= 1;
        }
        self.sink.write_line(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AnswerKind;
    use crate::transport::memory::{Endpoint, Network};
    use bytes::Bytes;

    const SENDER_ID: PeerId = 1;
    const RECEIVER_ID: PeerId = 7;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn group() -> SocketAddr {
        addr("[ff01::10]:50000")
    }

    fn sender_addr() -> SocketAddr {
        addr("[fd00::1]:51000")
    }

    fn receiver_addr() -> SocketAddr {
        addr("[fd00::7]:50000")
    }

    fn data(sequence: SequenceId, text: &'static str) -> Request {
        Request::data(SENDER_ID, sequence, Bytes::from_static(text.as_bytes())).unwrap()
    }

    fn new_receiver(net: &Network) -> Receiver<Endpoint, Vec<u8>> {
        let config = Config::fast(RECEIVER_ID, 1);
        let transport = Transport::new(
            net.bind(receiver_addr()),
            RECEIVER_ID,
            group(),
            config.slot_duration,
        );
        Receiver::new(config, transport, Vec::new())
    }

    /// Hello 교환을 건너뛰고 윈도우 W로 전송 중 상태
    fn established(net: &Network, window_size: usize) -> Receiver<Endpoint, Vec<u8>> {
        let mut receiver = new_receiver(net);
        receiver.init();
        receiver.window = WindowBuffer::new(window_size, 1);
        receiver.sender_id = SENDER_ID;
        receiver.sender_addr = Some(sender_addr());
        receiver.state = ReceiverState::Established;
        receiver
    }

    fn sender_transport(net: &Network) -> Transport<Endpoint> {
        Transport::new(
            net.bind(sender_addr()),
            SENDER_ID,
            group(),
            std::time::Duration::from_millis(10),
        )
    }

    fn answers(net: &Network) -> Vec<Answer> {
        net.sent()
            .iter()
            .filter(|p| p.to == sender_addr())
            .map(|p| Answer::from_bytes(&p.bytes).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_negotiates_window() {
        let net = Network::new();
        let mut receiver = new_receiver(&net);
        let sender = sender_transport(&net);

        let mut invalid = Request::hello(SENDER_ID, 4);
        invalid.kind = RequestKind::Hello { window_size: 11 };
        sender.send_unicast(&invalid.to_bytes(), receiver_addr()).await.unwrap();
        sender
            .send_unicast(&Request::hello(SENDER_ID, 4).to_bytes(), receiver_addr())
            .await
            .unwrap();

        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Idle);
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Idle);
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Prepare);
        assert_eq!(receiver.window_size(), 4);
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Established);

        assert_eq!(answers(&net), vec![Answer::hello(RECEIVER_ID, SENDER_ID)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_order_delivery_ignores_duplicates() {
        let net = Network::new();
        let mut receiver = established(&net, 3);

        receiver.pending = Some(data(1, "a\n"));
        receiver.step().await.unwrap();
        receiver.pending = Some(data(1, "a\n"));
        receiver.step().await.unwrap();
        receiver.pending = Some(data(2, "b\n"));
        receiver.step().await.unwrap();

        assert_eq!(receiver.sink(), b"a\nb\n");
        assert_eq!(receiver.base(), 3);
        assert_eq!(receiver.stats().duplicates, 1);
        assert_eq!(receiver.stats().lines_delivered, 2);
        assert!(answers(&net).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_sends_single_nack_and_recovers() {
        let net = Network::new();
        let mut receiver = established(&net, 3);

        receiver.pending = Some(data(2, "b\n"));
        receiver.step().await.unwrap();
        assert!(receiver.sink().is_empty());
        assert_eq!(answers(&net), vec![Answer::nack(RECEIVER_ID, SENDER_ID, 1)]);

        receiver.pending = Some(data(1, "a\n"));
        receiver.step().await.unwrap();
        assert_eq!(receiver.sink(), b"a\nb\n");
        assert_eq!(receiver.base(), 3);
        assert_eq!(receiver.stats().nacks_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_gap_forces_skip() {
        let net = Network::new();
        let mut receiver = established(&net, 3);

        receiver.pending = Some(data(2, "b\n"));
        receiver.step().await.unwrap();
        receiver.pending = Some(data(3, "c\n"));
        receiver.step().await.unwrap();

        assert_eq!(receiver.sink(), b"\nb\nc\n");
        assert_eq!(receiver.base(), 4);
        assert_eq!(receiver.stats().skipped, 1);
        assert_eq!(receiver.stats().nacks_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_timeouts_force_placeholder() {
        let net = Network::new();
        let mut receiver = established(&net, 2);
        receiver.timers.schedule(1, 3);

        for _ in 0..3 {
            receiver.step().await.unwrap();
        }
        assert_eq!(answers(&net), vec![Answer::nack(RECEIVER_ID, SENDER_ID, 1)]);
        assert!(receiver.sink().is_empty());

        for _ in 0..3 {
            receiver.step().await.unwrap();
        }
        assert_eq!(receiver.base(), 2);
        assert_eq!(receiver.stats().skipped, 1);
        assert_eq!(receiver.stats().timeouts, 2);
        assert_eq!(receiver.stats().nacks_sent, 1);

        // 빈 줄은 다음 실제 줄 앞에 기록
        assert!(receiver.sink().is_empty());
        receiver.pending = Some(data(2, "b\n"));
        receiver.step().await.unwrap();
        assert_eq!(receiver.sink(), b"\nb\n");
        assert_eq!(receiver.stats().lines_delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_close_sequence_not_written() {
        let net = Network::new();
        let mut receiver = established(&net, 1);
        let sender = sender_transport(&net);

        receiver.pending = Some(data(1, "a\n"));
        receiver.step().await.unwrap();

        // CLOSE(2) 두 번 손실: NACK 후 포기
        for _ in 0..6 {
            receiver.step().await.unwrap();
        }
        assert_eq!(receiver.base(), 3);
        assert_eq!(receiver.stats().skipped, 1);

        sender
            .send_unicast(&Request::close(SENDER_ID, 2).to_bytes(), receiver_addr())
            .await
            .unwrap();
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Close);
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Done);

        assert_eq!(*answers(&net).last().unwrap(), Answer::close(RECEIVER_ID, SENDER_ID, 2));
        assert_eq!(receiver.sink(), b"a\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_data_before_close_written() {
        let net = Network::new();
        let mut receiver = established(&net, 1);
        let sender = sender_transport(&net);

        receiver.pending = Some(data(1, "a\n"));
        receiver.step().await.unwrap();
        for _ in 0..6 {
            receiver.step().await.unwrap();
        }
        assert_eq!(receiver.base(), 3);

        // 2는 데이터였음: CLOSE(3)이면 빈 줄 유지
        sender
            .send_unicast(&Request::close(SENDER_ID, 3).to_bytes(), receiver_addr())
            .await
            .unwrap();
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Close);
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Done);

        assert_eq!(receiver.sink(), b"a\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_forgets_sender() {
        let net = Network::new();
        let mut receiver = established(&net, 2);
        receiver.close_sequence = Some(5);

        receiver.init();
        assert_eq!(receiver.sender_id, BROADCAST_ID);
        assert_eq!(receiver.sender_addr, None);
        assert_eq!(receiver.close_sequence, None);
        assert_eq!(receiver.state(), ReceiverState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_answers_with_final_base() {
        let net = Network::new();
        let mut receiver = established(&net, 2);
        let sender = sender_transport(&net);

        receiver.pending = Some(data(1, "a\n"));
        receiver.step().await.unwrap();
        receiver.pending = Some(data(2, "b\n"));
        sender
            .send_unicast(&Request::close(SENDER_ID, 3).to_bytes(), receiver_addr())
            .await
            .unwrap();

        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Close);
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Done);

        let close = *answers(&net).last().unwrap();
        assert_eq!(close.kind, AnswerKind::Close);
        assert_eq!(close.sequence, 3);
        assert_eq!(receiver.into_sink(), b"a\nb\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_ahead_of_base_waits_for_data() {
        let net = Network::new();
        let mut receiver = established(&net, 2);
        let sender = sender_transport(&net);

        sender
            .send_unicast(&Request::close(SENDER_ID, 3).to_bytes(), receiver_addr())
            .await
            .unwrap();
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Close);
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Established);

        receiver.pending = Some(data(1, "a\n"));
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Established);
        receiver.pending = Some(data(2, "b\n"));
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Close);
        assert_eq!(receiver.step().await.unwrap(), ReceiverState::Done);
        assert_eq!(receiver.sink(), b"a\nb\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_sender_ignored() {
        let net = Network::new();
        let mut receiver = established(&net, 2);
        let sender = sender_transport(&net);

        let foreign = Request::data(99, 1, Bytes::from_static(b"x\n")).unwrap();
        sender.send_unicast(&foreign.to_bytes(), receiver_addr()).await.unwrap();
        receiver.step().await.unwrap();
        receiver.step().await.unwrap();

        assert!(receiver.sink().is_empty());
        assert_eq!(receiver.stats().duplicates, 0);
    }
}

//! 패킷 손실 시뮬레이션 (송신측 디버그)
//!
//! - `debug > 0`: 송신 패킷을 `debug`% 확률로 버림
//! - `debug == -1`: 첫 CLOSE 패킷을 한 번만 버림
//! - Hello는 이 경로를 거치지 않음

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 손실 주입기
#[derive(Debug)]
pub struct LossInjector {
    debug: i32,
    rng: StdRng,
    close_dropped: bool,
}

impl LossInjector {
    pub fn new(debug: i32) -> Self {
        Self::with_rng(debug, StdRng::from_entropy())
    }

    /// 재현 가능한 시드 (테스트)
    pub fn with_seed(debug: i32, seed: u64) -> Self {
        Self::with_rng(debug, StdRng::seed_from_u64(seed))
    }

    fn with_rng(debug: i32, rng: StdRng) -> Self {
        Self {
            debug,
            rng,
            close_dropped: false,
        }
    }

    /// 이번 송신을 버릴지 결정
    pub fn should_drop(&mut self, is_close: bool) -> bool {
        match self.debug {
            -1 => {
                if is_close && !self.close_dropped {
                    self.close_dropped = true;
                    true
                } else {
                    false
                }
            }
            p if p > 0 => self.rng.gen_range(0..100) < p,
            _ => false,
        }
    }
}

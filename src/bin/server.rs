//! MNP 서버 (송신자) - Multicast NACK Protocol
//!
//! 텍스트 파일을 한 줄씩 멀티캐스트로 전송
//! - Hello로 수신자 발견 후 윈도우 단위 전송
//! - NACK 받은 패킷만 해당 수신자에게 재전송
//!
//! 사용법:
//!   cargo run --release --bin mnp-server -- [OPTIONS]
//!
//! 예시:
//!   # 로컬 테스트 (루프백), 윈도우 5
//!   cargo run --release --bin mnp-server -- --local --windowsize 5 --filepath data.txt
//!
//!   # 10% 손실 시뮬레이션 + 반복 전송
//!   cargo run --release --bin mnp-server -- --debug 10 --loop --interface eth0

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mnp::net::open_socket;
use mnp::storage::FileSource;
use mnp::{Config, Error, Role, Sender, Transport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG로 변경 가능)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    let config = match Config::parse_args(Role::Sender, &args) {
        Ok(config) => config,
        Err(Error::HelpRequested) => {
            println!("{}", Config::usage(Role::Sender));
            return Ok(());
        }
        Err(e) if e.is_config() => {
            error!("{}", e);
            eprintln!("{}", Config::usage(Role::Sender));
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    info!("MNP Server starting...");
    info!("ID: {}", config.id);
    info!("Window size: {}", config.window_size);
    info!("Multicast: [{}]:{}", config.multicast_addr, config.client_port);
    info!("File: {}", config.file_path.display());
    if config.debug != 0 {
        info!("Debug loss: {}", config.debug);
    }

    let source = FileSource::open(&config.file_path)?;
    let (socket, multicast) = open_socket(&config, Role::Sender)?;
    let transport = Transport::new(socket, config.id, multicast, config.slot_duration);

    let mut sender = Sender::new(config, transport, source);
    let stats = sender.run().await?;

    info!("Transfer complete: {}", stats.summary());
    Ok(())
}

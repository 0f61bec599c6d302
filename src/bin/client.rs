//! MNP 클라이언트 (수신자) - Multicast NACK Protocol
//!
//! 멀티캐스트 그룹에 가입해 송신자의 Hello를 기다리고, 받은 줄을 순서대로
//! 파일에 기록한다. 기존 파일은 덮어쓰지 않는다.
//!
//! 사용법:
//!   cargo run --release --bin mnp-client -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin mnp-client -- --local --filepath out.txt
//!   cargo run --release --bin mnp-client -- --interface eth0 --id 42 --filepath out.txt

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mnp::net::open_socket;
use mnp::storage::FileSink;
use mnp::{Config, Error, Receiver, Role, Transport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG로 변경 가능)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().collect();
    let config = match Config::parse_args(Role::Receiver, &args) {
        Ok(config) => config,
        Err(Error::HelpRequested) => {
            println!("{}", Config::usage(Role::Receiver));
            return Ok(());
        }
        Err(e) if e.is_config() => {
            error!("{}", e);
            eprintln!("{}", Config::usage(Role::Receiver));
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    info!("MNP Client starting...");
    info!("ID: {}", config.id);
    info!("Multicast: [{}]:{}", config.multicast_addr, config.client_port);
    info!("Output: {}", config.file_path.display());

    let sink = FileSink::create(&config.file_path)?;
    let (socket, multicast) = open_socket(&config, Role::Receiver)?;
    let transport = Transport::new(socket, config.id, multicast, config.slot_duration);

    let mut receiver = Receiver::new(config, transport, sink);
    let stats = receiver.run().await?;

    info!("Transfer complete: {}", stats.summary());
    Ok(())
}

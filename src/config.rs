//! 프로토콜 설정
//!
//! 세션 시작 시 한 번 만들어져 상태 머신에 불변 스냅샷으로 전달된다.

use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    Error, PeerId, Result, DEFAULT_IDLE_TIME_SECS, DEFAULT_MULTICAST_ADDR,
    DEFAULT_MULTICAST_ADDR_LOCAL, DEFAULT_PORT_CLIENT, DEFAULT_PORT_SERVER, DEFAULT_SLOT_TIME_MS,
    DEFAULT_WINDOW_SIZE, MAX_ALLOWED_CLIENTS, MAX_WINDOW_SIZE,
};

/// 프로세스 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 송신자 (서버)
    Sender,

    /// 수신자 (클라이언트)
    Receiver,
}

/// MNP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 이 프로세스의 ID
    pub id: PeerId,

    /// 윈도우 크기 (1 ~ 10). 수신자는 Hello에서 다시 받음
    pub window_size: usize,

    /// 송신자 포트
    pub server_port: u16,

    /// 수신자 포트 (멀티캐스트 목적지 포트)
    pub client_port: u16,

    /// 멀티캐스트 그룹 주소
    pub multicast_addr: Ipv6Addr,

    /// 로컬(루프백) 모드
    /// 포트 재사용 + 루프백 인터페이스, 재전송도 멀티캐스트로 보냄
    pub local: bool,

    /// 전송 완료 후 다시 발견 단계부터 반복 (송신자)
    pub loop_mode: bool,

    /// 손실 시뮬레이션 (송신자)
    /// 0: 없음, 1~100: 손실 확률(%), -1: 첫 CLOSE 패킷 한 번 손실
    pub debug: i32,

    /// 멀티캐스트 인터페이스 이름
    pub interface: Option<String>,

    /// 입력(송신자) / 출력(수신자) 파일 경로
    pub file_path: PathBuf,

    /// 슬롯 시간 (상태 머신 한 번의 반복)
    pub slot_duration: Duration,

    /// Hello 전송 전 대기 시간
    pub idle_interval: Duration,

    /// 패킷 타임아웃 (틱). CLOSE 패킷은 두 배
    pub timeout_ticks: u32,

    /// 최대 수신자 수 = 발견 단계 수신 시도 횟수
    pub max_members: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: default_id(),
            window_size: DEFAULT_WINDOW_SIZE,
            server_port: DEFAULT_PORT_SERVER,
            client_port: DEFAULT_PORT_CLIENT,
            multicast_addr: DEFAULT_MULTICAST_ADDR
                .parse()
                .unwrap_or(Ipv6Addr::UNSPECIFIED),
            local: false,
            loop_mode: false,
            debug: 0,
            interface: None,
            file_path: PathBuf::from("data.txt"),
            slot_duration: Duration::from_millis(DEFAULT_SLOT_TIME_MS),
            idle_interval: Duration::from_secs(DEFAULT_IDLE_TIME_SECS),
            timeout_ticks: MAX_ALLOWED_CLIENTS as u32,
            max_members: MAX_ALLOWED_CLIENTS,
        }
    }
}

impl Config {
    /// 테스트/로컬 실험용 빠른 설정 (짧은 슬롯)
    pub fn fast(id: PeerId, window_size: usize) -> Self {
        Self {
            id,
            window_size,
            slot_duration: Duration::from_millis(10),
            idle_interval: Duration::from_millis(20),
            ..Self::default()
        }
    }

    /// CLOSE 패킷 타임아웃 (일반 타임아웃의 두 배)
    pub fn close_timeout_ticks(&self) -> u32 {
        self.timeout_ticks * 2
    }

    /// 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 1 || self.window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidWindowSize {
                got: self.window_size as i64,
                max: MAX_WINDOW_SIZE,
            });
        }

        if !(-1..=100).contains(&self.debug) {
            return Err(Error::InvalidDebugCode { got: self.debug });
        }

        if self.timeout_ticks == 0 {
            return Err(Error::InvalidValue {
                option: "timeout_ticks".into(),
                value: "0".into(),
            });
        }

        if self.max_members == 0 {
            return Err(Error::InvalidValue {
                option: "max_members".into(),
                value: "0".into(),
            });
        }

        Ok(())
    }

    /// 명령행 인자 파싱 (args[0]은 프로그램 이름)
    pub fn parse_args(role: Role, args: &[String]) -> Result<Self> {
        let mut config = Config::default();
        let mut multicast_override: Option<Ipv6Addr> = None;

        let mut i = 1;
        while i < args.len() {
            let option = args[i].as_str();
            match option {
                "--portserver" => {
                    config.server_port = parse_value(option, args.get(i + 1))?;
                    i += 1;
                }
                "--portclient" => {
                    config.client_port = parse_value(option, args.get(i + 1))?;
                    i += 1;
                }
                "--filepath" => {
                    config.file_path = PathBuf::from(value_of(option, args.get(i + 1))?);
                    i += 1;
                }
                "--multicastaddress" => {
                    multicast_override = Some(parse_value(option, args.get(i + 1))?);
                    i += 1;
                }
                "--windowsize" if role == Role::Sender => {
                    let size: i64 = parse_value(option, args.get(i + 1))?;
                    if size < 1 || size > MAX_WINDOW_SIZE as i64 {
                        return Err(Error::InvalidWindowSize {
                            got: size,
                            max: MAX_WINDOW_SIZE,
                        });
                    }
                    config.window_size = size as usize;
                    i += 1;
                }
                "--local" => {
                    config.local = true;
                }
                "--loop" => {
                    config.loop_mode = true;
                }
                "--id" => {
                    config.id = parse_value(option, args.get(i + 1))?;
                    i += 1;
                }
                "--debug" => {
                    config.debug = parse_value(option, args.get(i + 1))?;
                    if !(-1..=100).contains(&config.debug) {
                        return Err(Error::InvalidDebugCode { got: config.debug });
                    }
                    i += 1;
                }
                "--interface" => {
                    config.interface = Some(value_of(option, args.get(i + 1))?.to_string());
                    i += 1;
                }
                "--help" | "-h" => return Err(Error::HelpRequested),
                other => return Err(Error::UnknownOption(other.to_string())),
            }
            i += 1;
        }

        // 명시적 멀티캐스트 주소가 --local 기본값보다 우선
        config.multicast_addr = match multicast_override {
            Some(addr) => addr,
            None if config.local => DEFAULT_MULTICAST_ADDR_LOCAL
                .parse()
                .unwrap_or(Ipv6Addr::UNSPECIFIED),
            None => config.multicast_addr,
        };

        config.validate()?;
        Ok(config)
    }

    /// 도움말 텍스트
    pub fn usage(role: Role) -> String {
        let program = match role {
            Role::Sender => "mnp-server",
            Role::Receiver => "mnp-client",
        };

        let window = match role {
            Role::Sender => format!(
                "  --windowsize <SIZE>         윈도우 크기 1~{} (기본: {})\n",
                MAX_WINDOW_SIZE, DEFAULT_WINDOW_SIZE
            ),
            Role::Receiver => String::new(),
        };

        format!(
            r#"{program} - MNP (Multicast NACK Protocol)

사용법:
  {program} [OPTIONS]

옵션:
  --portserver <PORT>         송신자 포트 (기본: {server})
  --portclient <PORT>         수신자 포트 (기본: {client})
  --filepath <PATH>           입력/출력 파일 경로 (기본: data.txt)
  --multicastaddress <ADDR>   멀티캐스트 주소 (기본: {mcast}), --local보다 우선
{window}  --local                     로컬 모드: 루프백 인터페이스, 주소 {mcast_local}, 포트 재사용
  --loop                      송신 완료 후 발견 단계부터 반복
  --id <ID>                   사용자 지정 ID (기본: 현재 시간 기반)
  --debug <PERCENT>           송신 패킷 손실 시뮬레이션 확률, -1이면 CLOSE 패킷 한 번 손실
  --interface <NAME>          멀티캐스트 인터페이스
  -h, --help                  이 도움말 출력
"#,
            program = program,
            server = DEFAULT_PORT_SERVER,
            client = DEFAULT_PORT_CLIENT,
            mcast = DEFAULT_MULTICAST_ADDR,
            mcast_local = DEFAULT_MULTICAST_ADDR_LOCAL,
            window = window,
        )
    }
}

/// 현재 시간 기반 기본 ID
fn default_id() -> PeerId {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (secs % i32::MAX as u64) as PeerId
}

fn value_of<'a>(option: &str, value: Option<&'a String>) -> Result<&'a str> {
    value
        .map(String::as_str)
        .ok_or_else(|| Error::MissingValue(option.to_string()))
}

fn parse_value<T: std::str::FromStr>(option: &str, value: Option<&String>) -> Result<T> {
    let raw = value_of(option, value)?;
    raw.parse().map_err(|_| Error::InvalidValue {
        option: option.to_string(),
        value: raw.to_string(),
    })
}

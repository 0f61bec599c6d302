//! 에러 타입 정의

use thiserror::Error;

/// MNP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 메시지 타입: {kind:#04X}")]
    InvalidMessageKind { kind: u8 },

    #[error("메시지 길이 부족: expected {expected}, got {got}")]
    TruncatedMessage { expected: usize, got: usize },

    #[error("유효하지 않은 시퀀스 ID: {sequence}")]
    InvalidSequence { sequence: i64 },

    #[error("페이로드 크기 초과: 최대 {max} 바이트, got {got}")]
    PayloadTooLarge { max: usize, got: usize },

    #[error("윈도우 크기는 1~{max} 사이여야 함: got {got}")]
    InvalidWindowSize { got: i64, max: usize },

    #[error("디버그 코드는 -1~100 사이여야 함: got {got}")]
    InvalidDebugCode { got: i32 },

    #[error("알 수 없는 옵션: {0} (--help 참고)")]
    UnknownOption(String),

    #[error("옵션 값 누락: {0}")]
    MissingValue(String),

    #[error("유효하지 않은 옵션 값: {option}={value}")]
    InvalidValue { option: String, value: String },

    #[error("도움말 요청")]
    HelpRequested,

    #[error("네트워크 인터페이스 없음: {0}")]
    InterfaceNotFound(String),

    #[error("출력 파일이 이미 존재함: {0}")]
    OutputExists(String),
}

impl Error {
    /// 세션 시작 전에 실패해야 하는 설정 에러인지 여부
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidWindowSize { .. }
                | Error::InvalidDebugCode { .. }
                | Error::UnknownOption(_)
                | Error::MissingValue(_)
                | Error::InvalidValue { .. }
                | Error::HelpRequested
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

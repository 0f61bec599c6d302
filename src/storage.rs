//! 입출력 저장소 경계
//!
//! - 송신측: [`LineSource`]에서 한 줄씩 읽어 데이터 패킷으로 포장
//! - 수신측: [`LineSink`]로 순서대로 한 줄씩 기록

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;

use crate::{Error, Result, PAYLOAD_CAPACITY};

/// 송신 데이터 소스
pub trait LineSource {
    /// 다음 줄 (줄바꿈 포함, 최대 PAYLOAD_CAPACITY 바이트). 끝이면 None
    fn read_next_line(&mut self) -> Result<Option<Bytes>>;

    /// 처음으로 되감기 (루프 모드 재시작)
    fn rewind(&mut self) -> Result<()>;
}

/// 수신 데이터 출력
pub trait LineSink {
    fn write_line(&mut self, line: &[u8]) -> Result<()>;
}

/// 파일 기반 소스
pub struct FileSource {
    reader: BufReader<File>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl LineSource for FileSource {
    fn read_next_line(&mut self) -> Result<Option<Bytes>> {
        let mut line = Vec::with_capacity(PAYLOAD_CAPACITY);

        // 긴 줄은 PAYLOAD_CAPACITY 단위로 잘라서 여러 패킷으로 보냄
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                break;
            }

            let room = PAYLOAD_CAPACITY - line.len();
            let window = &available[..available.len().min(room)];

            match window.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    line.extend_from_slice(&window[..=pos]);
                    self.reader.consume(pos + 1);
                    break;
                }
                None => {
                    let taken = window.len();
                    line.extend_from_slice(window);
                    self.reader.consume(taken);
                    if line.len() == PAYLOAD_CAPACITY {
                        break;
                    }
                }
            }
        }

        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Bytes::from(line)))
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// 파일 기반 출력. 기존 파일은 덮어쓰지 않음
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    Error::OutputExists(path.display().to_string())
                }
                _ => Error::Io(e),
            })?;

        Ok(Self { file })
    }
}

impl LineSink for FileSink {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.file.write_all(line)?;
        self.file.flush()?;
        Ok(())
    }
}

/// 메모리 소스 (테스트, 임베딩용)
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    lines: Vec<Bytes>,
    cursor: usize,
}

impl MemorySource {
    pub fn new(lines: Vec<Bytes>) -> Self {
        Self { lines, cursor: 0 }
    }

    /// 텍스트를 줄 단위(줄바꿈 포함)로 분할
    pub fn from_text(text: &str) -> Self {
        let lines = text
            .split_inclusive('\n')
            .map(|l| Bytes::copy_from_slice(l.as_bytes()))
            .collect();
        Self::new(lines)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl LineSource for MemorySource {
    fn read_next_line(&mut self) -> Result<Option<Bytes>> {
        let line = self.lines.get(self.cursor).cloned();
        if line.is_some() {
            self.cursor += 1;
        }
        Ok(line)
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

impl LineSink for Vec<u8> {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.extend_from_slice(line);
        Ok(())
    }
}

impl<T: LineSink + ?Sized> LineSink for &mut T {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        (**self).write_line(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_source_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "first\nsecond\nno newline").unwrap();

        let mut source = FileSource::open(&path).unwrap();
        assert_eq!(source.read_next_line().unwrap().unwrap(), "first\n");
        assert_eq!(source.read_next_line().unwrap().unwrap(), "second\n");
        assert_eq!(source.read_next_line().unwrap().unwrap(), "no newline");
        assert!(source.read_next_line().unwrap().is_none());

        source.rewind().unwrap();
        assert_eq!(source.read_next_line().unwrap().unwrap(), "first\n");
    }

    #[test]
    fn test_file_source_splits_long_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.txt");
        let long = "x".repeat(PAYLOAD_CAPACITY + 10);
        std::fs::write(&path, format!("{}\nend\n", long)).unwrap();

        let mut source = FileSource::open(&path).unwrap();
        let first = source.read_next_line().unwrap().unwrap();
        let second = source.read_next_line().unwrap().unwrap();

        assert_eq!(first.len(), PAYLOAD_CAPACITY);
        assert_eq!(second.len(), 11);
        assert!(second.ends_with(b"\n"));
        assert_eq!(source.read_next_line().unwrap().unwrap(), "end\n");
    }

    #[test]
    fn test_file_sink_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let mut sink = FileSink::create(&path).unwrap();
        sink.write_line(b"a\n").unwrap();
        sink.write_line(b"b\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");

        assert!(matches!(
            FileSink::create(&path),
            Err(Error::OutputExists(_))
        ));
    }

    #[test]
    fn test_memory_source() {
        let mut source = MemorySource::from_text("a\nb\n");
        assert_eq!(source.len(), 2);
        assert_eq!(source.read_next_line().unwrap().unwrap(), "a\n");
        assert_eq!(source.read_next_line().unwrap().unwrap(), "b\n");
        assert!(source.read_next_line().unwrap().is_none());
    }
}

use std::io::{BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::evtx::EvtxRecord;
use crate::output::{Envelope, OutputError, OutputSink};

/// Newline delimited JSON over one TCP connection.
pub struct TcpSink {
    tag: String,
    timeout: Duration,
    stream: Option<BufWriter<TcpStream>>,
}

impl TcpSink {
    pub fn new(tag: &str, timeout: Duration) -> Self {
        Self {
            tag: tag.to_string(),
            timeout,
            stream: None,
        }
    }
}

impl OutputSink for TcpSink {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn open(&mut self, target: &str) -> Result<(), OutputError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(OutputError::MissingTarget("tcp"));
        }
        let addrs = target
            .to_socket_addrs()
            .map_err(|err| OutputError::InvalidTarget {
                target: target.to_string(),
                reason: err.to_string(),
            })?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.timeout))?;
                    self.stream = Some(BufWriter::new(stream));
                    return Ok(());
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => err.into(),
            None => OutputError::InvalidTarget {
                target: target.to_string(),
                reason: "no address resolved".to_string(),
            },
        })
    }

    fn send(&mut self, record: &EvtxRecord) -> Result<(), OutputError> {
        let stream = self.stream.as_mut().ok_or(OutputError::NotOpen)?;
        serde_json::to_writer(&mut *stream, &Envelope::new(&self.tag, record))?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush()?;
        }
        Ok(())
    }
}

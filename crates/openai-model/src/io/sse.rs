use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// Reads the `data` payloads of server-sent events from a chunk stream.
///
/// Comment lines and the `event`, `id` and `retry` fields are skipped.
/// Multiple `data` lines in one event are joined with a line feed. Events
/// that carry no data are dropped.
pub struct Sse {
    buf: String,
    chunks: Chunks,
    eof: bool,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            chunks,
            eof: false,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            while let Some(block) = self.take_block() {
                if let Some(data) = parse_block(&block)? {
                    return Ok(Some(data));
                }
            }

            // Nothing complete in the buffer, read more. A trailing partial
            // event at end of stream is discarded.
            if self.eof {
                return Ok(None);
            }
            match self.chunks.next_chunk().await.map_err(Error::ChunksError)? {
                Some(bytes) => {
                    let Ok(s) = str::from_utf8(&bytes) else {
                        return Err(Error::InvalidPayload);
                    };
                    if s.contains('\r') {
                        self.buf.push_str(&s.replace("\r\n", "\n"));
                    } else {
                        self.buf.push_str(s);
                    }
                }
                None => self.eof = true,
            }
        }
    }

    fn take_block(&mut self) -> Option<String> {
        let end = self.buf.find("\n\n")?;
        let block = self.buf[..end].to_owned();
        self.buf.drain(..end + 2);
        Some(block)
    }
}

fn parse_block(block: &str) -> Result<Option<String>, Error> {
    let mut data: Option<String> = None;
    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => {
                (field, value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "data" => {
                let data = data.get_or_insert_default();
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(value);
            }
            "event" | "id" | "retry" => {}
            _ => return Err(Error::InvalidPayload),
        }
    }
    Ok(data)
}

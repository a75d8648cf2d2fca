// RouterOS API wire format.
//
// A word is a length prefix followed by that many bytes; a sentence is a
// run of words closed by a zero-length word. Replies start with one of
// `!re`, `!done`, `!trap`, `!fatal`, `!empty` and carry `=key=value`
// attribute words.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::Row;
use crate::error::Error;

/// Encode a word length using RouterOS variable-length encoding.
pub(crate) fn encode_length(len: usize, out: &mut Vec<u8>) {
    // Lengths beyond u32 cannot be expressed; callers never send words that large.
    let len = u32::try_from(len).unwrap_or(u32::MAX);
    let bytes = len.to_be_bytes();
    match len {
        0..0x80 => out.push(bytes[3]),
        0x80..0x4000 => out.extend_from_slice(&(len | 0x8000).to_be_bytes()[2..]),
        0x4000..0x20_0000 => out.extend_from_slice(&(len | 0xC0_0000).to_be_bytes()[1..]),
        0x20_0000..0x1000_0000 => out.extend_from_slice(&(len | 0xE000_0000).to_be_bytes()),
        _ => {
            out.push(0xF0);
            out.extend_from_slice(&bytes);
        }
    }
}

/// Encode a full sentence, terminator included.
pub(crate) fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        encode_length(bytes.len(), &mut out);
        out.extend_from_slice(bytes);
    }
    out.push(0);
    out
}

async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<usize, Error> {
    let first = read_byte(reader).await?;
    let (extra, prefix) = match first {
        b if b & 0x80 == 0x00 => (0, u32::from(b)),
        b if b & 0xC0 == 0x80 => (1, u32::from(b & 0x3F)),
        b if b & 0xE0 == 0xC0 => (2, u32::from(b & 0x1F)),
        b if b & 0xF0 == 0xE0 => (3, u32::from(b & 0x0F)),
        0xF0 => (4, 0),
        b => return Err(Error::protocol(format!("unexpected control byte 0x{b:02x}"))),
    };
    let mut len = prefix;
    for _ in 0..extra {
        len = (len << 8) | u32::from(read_byte(reader).await?);
    }
    usize::try_from(len).map_err(|_| Error::protocol("word length overflow"))
}

async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, Error> {
    reader.read_u8().await.map_err(|e| Error::from_io(&e))
}

/// Read one sentence. Returns the words without the terminator.
pub(crate) async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<String>, Error> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| Error::from_io(&e))?;
        words.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    Re,
    Done,
    Trap,
    Fatal,
    Empty,
}

/// A parsed reply sentence.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub kind: ReplyKind,
    pub attrs: Row,
}

impl Reply {
    pub(crate) fn parse(words: &[String]) -> Result<Self, Error> {
        let (head, rest) = words
            .split_first()
            .ok_or_else(|| Error::protocol("empty reply sentence"))?;
        let kind = match head.as_str() {
            "!re" => ReplyKind::Re,
            "!done" => ReplyKind::Done,
            "!trap" => ReplyKind::Trap,
            "!fatal" => ReplyKind::Fatal,
            "!empty" => ReplyKind::Empty,
            other => return Err(Error::protocol(format!("unknown reply type {other}"))),
        };

        let mut attrs = Row::new();
        for word in rest {
            if let Some(pair) = word.strip_prefix('=') {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                attrs.insert(key, value);
            } else if kind == ReplyKind::Fatal {
                // `!fatal` carries a bare reason word.
                attrs.insert("message", word.as_str());
            }
            // `.tag=` and API-specific words are ignored.
        }
        Ok(Self { kind, attrs })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encoded(len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encode_length(len, &mut out);
        out
    }

    #[test]
    fn length_prefix_boundaries() {
        assert_eq!(encoded(0x7F), vec![0x7F]);
        assert_eq!(encoded(0x80), vec![0x80, 0x80]);
        assert_eq!(encoded(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(encoded(0x4000), vec![0xC0, 0x40, 0x00]);
        assert_eq!(encoded(0x20_0000), vec![0xE0, 0x20, 0x00, 0x00]);
        assert_eq!(encoded(0x1000_0000), vec![0xF0, 0x10, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn reads_back_long_words() {
        let long = "x".repeat(300);
        let bytes = encode_sentence(&["/ip/pool/add", long.as_str()]);
        let mut cursor = std::io::Cursor::new(bytes);
        let words = read_sentence(&mut cursor).await.unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[1].len(), 300);
    }

    #[test]
    fn parses_attributes_with_equals_in_value() {
        let words: Vec<String> = ["!re", "=.id=*2", "=comment=a=b", ".tag=7"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let reply = Reply::parse(&words).unwrap();
        assert_eq!(reply.kind, ReplyKind::Re);
        assert_eq!(reply.attrs.id(), Some("*2"));
        assert_eq!(reply.attrs.get("comment"), Some("a=b"));
        assert_eq!(reply.attrs.len(), 2);
    }

    #[test]
    fn rejects_unknown_reply_type() {
        let words = vec!["!bogus".to_string()];
        assert!(matches!(Reply::parse(&words), Err(Error::Protocol { .. })));
    }
}

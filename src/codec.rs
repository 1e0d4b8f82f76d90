//! Line framing for NMEA sentences on a byte stream or datagram socket.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::{Error, Result};
use crate::nmea::{EncodedSentence, MAX_SENTENCE_LEN};

/// Lines longer than this are dropped by the decoder instead of buffered.
const MAX_LINE_LEN: usize = 4 * MAX_SENTENCE_LEN;

/// Writes sentences terminated by CRLF and reads them back with checksum
/// verification.
#[derive(Debug)]
pub struct NmeaCodec {
    lines: LinesCodec,
}

impl NmeaCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LEN),
        }
    }

    fn parse_line(line: Option<String>) -> Result<Option<EncodedSentence>> {
        match line {
            Some(line) => EncodedSentence::parse(&line).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for NmeaCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<EncodedSentence> for NmeaCodec {
    type Error = Error;

    fn encode(&mut self, item: EncodedSentence, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&EncodedSentence>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a EncodedSentence> for NmeaCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a EncodedSentence, dst: &mut BytesMut) -> Result<()> {
        let line = item.as_str().as_bytes();
        dst.reserve(line.len() + 2);
        dst.put_slice(line);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

impl Decoder for NmeaCodec {
    type Item = EncodedSentence;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<EncodedSentence>> {
        loop {
            match self.lines.decode(src).map_err(from_lines_error)? {
                Some(line) if line.trim().is_empty() => continue,
                line => return Self::parse_line(line),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<EncodedSentence>> {
        loop {
            match self.lines.decode_eof(src).map_err(from_lines_error)? {
                Some(line) if line.trim().is_empty() => continue,
                line => return Self::parse_line(line),
            }
        }
    }
}

fn from_lines_error(e: LinesCodecError) -> Error {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            Error::MalformedPayload(format!("line longer than {MAX_LINE_LEN} bytes"))
        }
        LinesCodecError::Io(e) => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::SentenceKind;
    use crate::reading::ReadingSnapshot;

    #[test]
    fn encoder_terminates_with_crlf() {
        let mut codec = NmeaCodec::new();
        let mut buf = BytesMut::new();
        let sentence = EncodedSentence::seal("IIHDM,124.0,M*00").unwrap();
        codec.encode(sentence, &mut buf).unwrap();
        assert_eq!(&buf[..], b"$IIHDM,124.0,M*25\r\n");
    }

    #[test]
    fn decoder_reads_back_a_cycle() {
        let mut codec = NmeaCodec::new();
        let mut buf = BytesMut::new();
        let reading = ReadingSnapshot::default();
        let cycle: Vec<EncodedSentence> = SentenceKind::DEFAULT_CYCLE
            .iter()
            .map(|k| k.encode(&reading).unwrap())
            .collect();
        for sentence in &cycle {
            codec.encode(sentence, &mut buf).unwrap();
        }

        let mut decoded = Vec::new();
        while let Some(sentence) = codec.decode(&mut buf).unwrap() {
            decoded.push(sentence);
        }
        assert_eq!(decoded, cycle);
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_waits_for_line_end_and_skips_blank_lines() {
        let mut codec = NmeaCodec::new();
        let mut buf = BytesMut::from(&b"\r\n$IIHDM,124.0"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(b",M*25\r\n");
        let sentence = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(sentence.sentence_type(), "HDM");
    }

    #[test]
    fn decoder_rejects_bad_checksum() {
        let mut codec = NmeaCodec::new();
        let mut buf = BytesMut::from(&b"$IIHDM,124.0,M*00\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::ChecksumMismatch { expected: 0x25, actual: 0x00 })
        ));
    }

    #[test]
    fn decode_eof_accepts_unterminated_sentence() {
        let mut codec = NmeaCodec::new();
        let mut buf = BytesMut::from(&b"$WIMTA,20.0,C*19"[..]);
        let sentence = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(sentence.as_str(), "$WIMTA,20.0,C*19");
    }
}

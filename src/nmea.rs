use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reading::{wrap_degrees, ReadingSnapshot};

/// Longest sentence NMEA-0183 allows, including `$` and CRLF.
pub const MAX_SENTENCE_LEN: usize = 82;
/// `$`, `*hh` and CRLF take the rest.
pub const MAX_PAYLOAD_LEN: usize = MAX_SENTENCE_LEN - 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentenceKind {
    /// Meteorological composite
    Mda,
    /// Barometric pressure
    Mmb,
    /// Air temperature
    Mta,
    /// Heading, magnetic
    Hdm,
    /// Transducer measurements
    Xdr,
}

impl SentenceKind {
    /// Transmit order within one cycle.
    pub const ORDER: [SentenceKind; 5] = [
        SentenceKind::Mda,
        SentenceKind::Mmb,
        SentenceKind::Mta,
        SentenceKind::Hdm,
        SentenceKind::Xdr,
    ];

    /// Sentences sent every cycle unless configured otherwise.
    pub const DEFAULT_CYCLE: [SentenceKind; 4] = [
        SentenceKind::Mda,
        SentenceKind::Mmb,
        SentenceKind::Hdm,
        SentenceKind::Xdr,
    ];

    pub fn talker(&self) -> &'static str {
        match self {
            Self::Mda | Self::Mmb | Self::Mta => "WI",
            Self::Hdm => "II",
            Self::Xdr => "IN",
        }
    }

    pub fn sentence_type(&self) -> &'static str {
        match self {
            Self::Mda => "MDA",
            Self::Mmb => "MMB",
            Self::Mta => "MTA",
            Self::Hdm => "HDM",
            Self::Xdr => "XDR",
        }
    }

    /// Number of data fields after the address field.
    pub fn field_count(&self) -> usize {
        match self {
            Self::Mda => 20,
            Self::Mmb => 5,
            Self::Mta | Self::Hdm => 2,
            Self::Xdr => 13,
        }
    }

    /// Renders the data fields of this sentence, empty positions included.
    pub fn fields(&self, reading: &ReadingSnapshot) -> Vec<String> {
        let empty = String::new;
        match self {
            Self::Mda => {
                let mut fields = vec![
                    empty(),
                    empty(),
                    bar(reading.pressure_hpa),
                    "B".into(),
                    fixed(reading.air_temp_c, 1),
                    "C".into(),
                ];
                // water temp, humidity, dew point, wind: not measured
                fields.resize(self.field_count(), empty());
                fields
            }
            Self::Mmb => vec![empty(), empty(), bar(reading.pressure_hpa), "B".into(), empty()],
            Self::Mta => vec![fixed(reading.air_temp_c, 1), "C".into()],
            Self::Hdm => vec![heading(reading.heading_magnetic_deg), "M".into()],
            Self::Xdr => vec![
                "C".into(),
                fixed(reading.air_temp_c, 1),
                "C".into(),
                "AirTemp".into(),
                "A".into(),
                fixed(reading.pitch_deg, 1),
                "D".into(),
                "PTCH".into(),
                "A".into(),
                fixed(reading.roll_deg, 1),
                "D".into(),
                "ROLL".into(),
                empty(),
            ],
        }
    }

    /// Fails with `InvalidReading` for a snapshot that does not validate.
    pub fn encode(&self, reading: &ReadingSnapshot) -> Result<EncodedSentence> {
        reading.validate()?;
        let mut payload = String::with_capacity(MAX_SENTENCE_LEN);
        payload.push_str(self.talker());
        payload.push_str(self.sentence_type());
        for field in self.fields(reading) {
            payload.push(',');
            payload.push_str(&field);
        }
        EncodedSentence::from_payload(payload)
    }
}

impl fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sentence_type())
    }
}

impl FromStr for SentenceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SentenceKind::ORDER
            .into_iter()
            .find(|kind| kind.sentence_type().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown sentence type {s:?}")))
    }
}

/// Encodes every kind in `kinds` from one snapshot, stopping at the first failure.
pub fn encode_cycle(kinds: &[SentenceKind], reading: &ReadingSnapshot) -> Result<Vec<EncodedSentence>> {
    kinds.iter().map(|kind| kind.encode(reading)).collect()
}

/// Rounds half away from zero at `places` decimals and prints exactly that many.
fn fixed(value: f64, places: usize) -> String {
    let rounded = round_to(value, places);
    format!("{rounded:.places$}")
}

fn round_to(value: f64, places: usize) -> f64 {
    let scale = 10f64.powi(places as i32);
    // adding 0.0 folds -0.0 into 0.0
    (value * scale).round() / scale + 0.0
}

fn bar(hpa: f64) -> String {
    fixed(hpa / 1000.0, 4)
}

fn heading(deg: f64) -> String {
    let rounded = round_to(wrap_degrees(deg), 1);
    if rounded >= 360.0 {
        fixed(0.0, 1)
    } else {
        fixed(rounded, 1)
    }
}

/// XOR of every byte in `payload`.
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0, |acc, b| acc ^ b)
}

/// A complete `$<payload>*<hh>` sentence, without line terminator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EncodedSentence {
    line: String,
    checksum: u8,
}

impl EncodedSentence {
    /// Wraps a bare payload (address and fields, no `$` or `*`).
    pub fn from_payload(payload: impl Into<String>) -> Result<Self> {
        let payload = payload.into();
        check_payload(&payload)?;
        let checksum = checksum(&payload);
        Ok(EncodedSentence {
            line: format!("${payload}*{checksum:02X}"),
            checksum,
        })
    }

    /// Builds a sentence from a template that may carry a leading `$`, a
    /// placeholder checksum such as `*00`, and trailing line terminators.
    /// The placeholder is discarded and the checksum recomputed.
    pub fn seal(template: &str) -> Result<Self> {
        let body = template.trim_end_matches(['\r', '\n']);
        let body = body.strip_prefix('$').unwrap_or(body);
        let payload = match body.rsplit_once('*') {
            Some((payload, placeholder)) if is_checksum_field(placeholder) || placeholder.is_empty() => {
                payload
            }
            Some(_) => return Err(Error::MalformedPayload(template.to_string())),
            None => body,
        };
        Self::from_payload(payload)
    }

    /// Parses a received sentence and verifies its checksum.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let body = trimmed
            .strip_prefix('$')
            .ok_or_else(|| Error::MalformedPayload(line.to_string()))?;
        let (payload, digits) = body
            .rsplit_once('*')
            .filter(|(_, digits)| is_checksum_field(digits))
            .ok_or_else(|| Error::MalformedPayload(line.to_string()))?;
        let actual = u8::from_str_radix(digits, 16)
            .map_err(|_| Error::MalformedPayload(line.to_string()))?;
        check_payload(payload)?;
        let expected = checksum(payload);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Self::from_payload(payload)
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// Everything between `$` and `*`.
    pub fn payload(&self) -> &str {
        &self.line[1..self.line.len() - 3]
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Address field, e.g. `WIMDA`.
    pub fn address(&self) -> &str {
        self.payload().split(',').next().unwrap_or_default()
    }

    pub fn talker(&self) -> &str {
        self.address().get(..2).unwrap_or_default()
    }

    pub fn sentence_type(&self) -> &str {
        self.address().get(2..).unwrap_or_default()
    }

    /// Data fields after the address.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.payload().split(',').skip(1)
    }

    pub fn into_string(self) -> String {
        self.line
    }
}

impl fmt::Display for EncodedSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl AsRef<str> for EncodedSentence {
    fn as_ref(&self) -> &str {
        &self.line
    }
}

fn is_checksum_field(s: &str) -> bool {
    s.len() == 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn check_payload(payload: &str) -> Result<()> {
    let bad = payload.is_empty()
        || payload.len() > MAX_PAYLOAD_LEN
        || payload
            .chars()
            .any(|c| c == '$' || c == '*' || !c.is_ascii() || c.is_ascii_control());
    if bad {
        Err(Error::MalformedPayload(payload.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> ReadingSnapshot {
        ReadingSnapshot {
            pressure_hpa: 1013.25,
            air_temp_c: 20.0,
            heading_magnetic_deg: 124.0,
            yaw_deg: 124.0,
            pitch_deg: 5.0,
            roll_deg: 355.5,
        }
    }

    #[test]
    fn checksum_is_xor_of_payload() {
        assert_eq!(checksum("GPGLL,4916.45,N,12311.12,W,225444,A"), 0x31);
        assert_eq!(checksum("WIMMB,,,1.0133,B,"), 0x2C);
        assert_eq!(checksum(""), 0);
        assert_eq!(checksum("WIMMB,,,1.0133,B,"), checksum("WIMMB,,,1.0133,B,"));
    }

    #[test]
    fn mda_carries_pressure_in_bar_and_air_temperature() {
        let sentence = SentenceKind::Mda.encode(&reading()).unwrap();
        assert_eq!(sentence.as_str(), "$WIMDA,,,1.0133,B,20.0,C,,,,,,,,,,,,,,*55");
        assert!(sentence.payload().contains("1.0133,B,20.0,C"));
    }

    #[test]
    fn every_kind_matches_its_reference_line() {
        let r = reading();
        let lines: Vec<String> = SentenceKind::ORDER
            .iter()
            .map(|k| k.encode(&r).unwrap().into_string())
            .collect();
        assert_eq!(
            lines,
            vec![
                "$WIMDA,,,1.0133,B,20.0,C,,,,,,,,,,,,,,*55",
                "$WIMMB,,,1.0133,B,*2C",
                "$WIMTA,20.0,C*19",
                "$IIHDM,124.0,M*25",
                "$INXDR,C,20.0,C,AirTemp,A,5.0,D,PTCH,A,355.5,D,ROLL,*1E",
            ]
        );
    }

    #[test]
    fn field_count_is_independent_of_values() {
        let extremes = [
            ReadingSnapshot {
                pressure_hpa: 260.0,
                air_temp_c: -59.96,
                heading_magnetic_deg: 0.0,
                yaw_deg: 0.0,
                pitch_deg: -179.99,
                roll_deg: 0.0,
            },
            reading(),
            ReadingSnapshot {
                pressure_hpa: 1260.0,
                air_temp_c: 85.0,
                heading_magnetic_deg: 359.0,
                yaw_deg: 359.9,
                pitch_deg: 359.99,
                roll_deg: 359.94,
            },
        ];
        for kind in SentenceKind::ORDER {
            for r in &extremes {
                let sentence = kind.encode(r).unwrap();
                assert_eq!(sentence.fields().count(), kind.field_count(), "{kind}");
                assert_eq!(sentence.address(), format!("{}{}", kind.talker(), kind.sentence_type()));
                assert!(sentence.as_str().len() + 2 <= MAX_SENTENCE_LEN);
            }
        }
    }

    #[test]
    fn produced_sentences_verify_against_their_own_checksum() {
        for kind in SentenceKind::ORDER {
            let sentence = kind.encode(&reading()).unwrap();
            let parts: Vec<&str> = sentence.as_str().split('*').collect();
            assert_eq!(parts.len(), 2);
            let recomputed = checksum(parts[0].strip_prefix('$').unwrap());
            assert_eq!(format!("{recomputed:02X}"), parts[1]);
        }
    }

    #[test]
    fn heading_boundaries() {
        let at = |h: f64| {
            let r = ReadingSnapshot {
                heading_magnetic_deg: h,
                ..reading()
            };
            SentenceKind::Hdm.encode(&r).unwrap().fields().next().unwrap().to_string()
        };
        assert_eq!(at(0.0), "0.0");
        assert_eq!(at(359.9), "359.9");
        assert_eq!(at(359.95), "0.0");
        assert_eq!(at(360.0), "0.0");
        assert_eq!(at(-1.0), "359.0");
    }

    #[test]
    fn rounding_is_half_away_from_zero_without_negative_zero() {
        assert_eq!(fixed(20.05, 1), "20.1");
        assert_eq!(fixed(-0.04, 1), "0.0");
        assert_eq!(fixed(-2.25, 1), "-2.3");
        assert_eq!(bar(1013.25), "1.0133");
        assert_eq!(bar(1013.0), "1.0130");
    }

    #[test]
    fn seal_replaces_placeholder_checksum() {
        let sealed = EncodedSentence::seal("WIMMB,,,1.0133,B,*00").unwrap();
        assert_eq!(sealed.as_str(), "$WIMMB,,,1.0133,B,*2C");

        let sealed = EncodedSentence::seal("$IIHDM,124.0,M*00\n").unwrap();
        assert_eq!(sealed.as_str(), "$IIHDM,124.0,M*25");

        let bare = EncodedSentence::seal("IIHDM,124.0,M").unwrap();
        assert_eq!(bare, sealed);
    }

    #[test]
    fn framing_characters_are_rejected() {
        for payload in ["WIMMB,$,B", "WIMMB,*,B,x", "WIMMB,\r\n", "", "WIMTA,20°,C"] {
            assert!(
                matches!(EncodedSentence::from_payload(payload), Err(Error::MalformedPayload(_))),
                "{payload:?}"
            );
        }
        assert!(EncodedSentence::seal("WIMMB,,,1.0,B,*zz").is_err());
    }

    #[test]
    fn payload_longer_than_a_sentence_is_rejected() {
        let longest = format!("WIMDA,{}", "9".repeat(MAX_PAYLOAD_LEN - 6));
        let sentence = EncodedSentence::from_payload(longest.as_str()).unwrap();
        assert_eq!(sentence.as_str().len() + 2, MAX_SENTENCE_LEN);

        let overlong = format!("{longest}9");
        assert!(matches!(
            EncodedSentence::from_payload(overlong),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn encoder_refuses_out_of_range_attitude() {
        for r in [
            ReadingSnapshot {
                pitch_deg: 1e300,
                ..reading()
            },
            ReadingSnapshot {
                roll_deg: f64::MAX,
                ..reading()
            },
        ] {
            assert!(matches!(
                SentenceKind::Xdr.encode(&r),
                Err(Error::InvalidReading { .. })
            ));
        }
    }

    #[test]
    fn parse_verifies_checksum() {
        let parsed = EncodedSentence::parse("$IIHDM,124.0,M*25\r\n").unwrap();
        assert_eq!(parsed.talker(), "II");
        assert_eq!(parsed.sentence_type(), "HDM");
        assert_eq!(parsed.fields().collect::<Vec<_>>(), vec!["124.0", "M"]);

        match EncodedSentence::parse("$IIHDM,124.0,M*26") {
            Err(Error::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, 0x25);
                assert_eq!(actual, 0x26);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(EncodedSentence::parse("IIHDM,124.0,M*25").is_err());
        assert!(EncodedSentence::parse("$IIHDM,124.0,M").is_err());
    }

    #[test]
    fn sentence_kinds_parse_case_insensitively() {
        assert_eq!("mda".parse::<SentenceKind>().unwrap(), SentenceKind::Mda);
        assert_eq!(" XDR ".parse::<SentenceKind>().unwrap(), SentenceKind::Xdr);
        assert!("GGA".parse::<SentenceKind>().is_err());
    }

    #[test]
    fn encode_cycle_keeps_requested_order() {
        let cycle = encode_cycle(&SentenceKind::DEFAULT_CYCLE, &reading()).unwrap();
        let types: Vec<&str> = cycle.iter().map(|s| s.sentence_type()).collect();
        assert_eq!(types, vec!["MDA", "MMB", "HDM", "XDR"]);
    }
}

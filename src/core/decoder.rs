//! Frame decoding.
//!
//! A device frame is plain text: an optional `i` start marker, sequences of
//! groups separated by `fi` (or `if`), groups separated by `;`, and eight
//! comma-separated base-16 fields per group, closed by an optional `f`.
//!
//! ```text
//! i1000,1000,...,1000;1000,...,1000fi1000,...,1000f
//! ```
//!
//! Decoding never fails. Groups that do not carry exactly eight parsable
//! fields are dropped and counted.

use serde::{Deserialize, Serialize};

/// Number of acquisition channels per sample.
pub const CHANNELS: usize = 8;

/// One decoded sample: one integer per channel.
pub type SampleVector = [i64; CHANNELS];

/// Start-of-frame marker.
pub const START_MARKER: char = 'i';

/// End-of-frame marker.
pub const END_MARKER: char = 'f';

/// Marker pairs separating sequences inside a frame.
const SEQUENCE_BOUNDARIES: [&str; 2] = ["fi", "if"];

/// Longest accepted hex token. Anything longer cannot fit the sample type.
const MAX_TOKEN_DIGITS: usize = 15;

/// Result of decoding one or more frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeReport {
    /// Decoded samples in frame order
    pub samples: Vec<SampleVector>,
    /// Non-empty groups discarded for a wrong field count or a bad token
    pub dropped_groups: usize,
}

impl DecodeReport {
    /// Append another report, preserving order.
    pub fn extend(&mut self, other: DecodeReport) {
        self.samples.extend(other.samples);
        self.dropped_groups += other.dropped_groups;
    }
}

/// Decode a raw frame into samples, silently dropping malformed groups.
pub fn decode(raw: &str) -> Vec<SampleVector> {
    decode_with_report(raw).samples
}

/// Decode a raw frame and report how many groups were dropped.
pub fn decode_with_report(raw: &str) -> DecodeReport {
    let mut report = DecodeReport::default();
    let body = strip_markers(raw.trim());

    for sequence in split_sequences(body) {
        for group in sequence.split(';') {
            if group.trim().is_empty() {
                continue;
            }
            match parse_group(group) {
                Some(sample) => report.samples.push(sample),
                None => report.dropped_groups += 1,
            }
        }
    }

    report
}

/// Decode several frames in arrival order.
pub fn decode_frames<'a, I>(frames: I) -> DecodeReport
where
    I: IntoIterator<Item = &'a str>,
{
    let mut report = DecodeReport::default();
    for frame in frames {
        report.extend(decode_with_report(frame));
    }
    report
}

/// Remove one leading start marker and one trailing end marker.
fn strip_markers(text: &str) -> &str {
    let text = text.strip_prefix(START_MARKER).unwrap_or(text);
    text.strip_suffix(END_MARKER).unwrap_or(text)
}

/// Split on either sequence boundary, whichever comes first.
fn split_sequences(text: &str) -> Vec<&str> {
    let mut sequences = Vec::new();
    let mut rest = text;

    loop {
        let next = SEQUENCE_BOUNDARIES
            .iter()
            .filter_map(|marker| rest.find(marker).map(|pos| (pos, marker.len())))
            .min_by_key(|(pos, _)| *pos);

        match next {
            Some((pos, len)) => {
                sequences.push(&rest[..pos]);
                rest = &rest[pos + len..];
            }
            None => {
                sequences.push(rest);
                break;
            }
        }
    }

    sequences
}

fn parse_group(group: &str) -> Option<SampleVector> {
    let tokens: Vec<&str> = group
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.len() != CHANNELS {
        return None;
    }

    let mut sample = [0i64; CHANNELS];
    for (slot, token) in sample.iter_mut().zip(tokens) {
        *slot = parse_hex(token)?;
    }
    Some(sample)
}

fn parse_hex(token: &str) -> Option<i64> {
    if token.len() > MAX_TOKEN_DIGITS || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    i64::from_str_radix(token, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "1000,1000,1000,1000,1000,1000,1000,1000";

    #[test]
    fn test_decode_reference_frame() {
        let raw = format!("i{GROUP};{GROUP}f");
        let samples = decode(&raw);
        assert_eq!(samples, vec![[4096; CHANNELS], [4096; CHANNELS]]);
    }

    #[test]
    fn test_decode_preserves_group_order() {
        let raw = "i0001,0002,0003,0004,0005,0006,0007,0008;\
                   0010,0020,0030,0040,0050,0060,0070,0080fi\
                   00FF,0000,0000,0000,0000,0000,0000,FFFFf";
        let samples = decode(raw);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(samples[1], [16, 32, 48, 64, 80, 96, 112, 128]);
        assert_eq!(samples[2], [255, 0, 0, 0, 0, 0, 0, 65535]);
    }

    #[test]
    fn test_both_sequence_boundaries() {
        let raw = format!("i{GROUP}fi{GROUP}if{GROUP}f");
        assert_eq!(decode(&raw).len(), 3);
    }

    #[test]
    fn test_wrong_field_count_is_dropped() {
        let seven = "1,2,3,4,5,6,7";
        let nine = "1,2,3,4,5,6,7,8,9";
        let raw = format!("i{seven};{GROUP};{nine}f");
        let report = decode_with_report(&raw);
        assert_eq!(report.samples, vec![[4096; CHANNELS]]);
        assert_eq!(report.dropped_groups, 2);
    }

    #[test]
    fn test_unparsable_token_drops_group() {
        let raw = "i1000,1000,ZZZZ,1000,1000,1000,1000,1000;1,1,1,1,1,1,1,1f";
        let report = decode_with_report(raw);
        assert_eq!(report.samples, vec![[1; CHANNELS]]);
        assert_eq!(report.dropped_groups, 1);
    }

    #[test]
    fn test_empty_tokens_are_discarded() {
        let raw = "i1,,2,3,4,5,6,7,8,;f";
        assert_eq!(decode(raw), vec![[1, 2, 3, 4, 5, 6, 7, 8]]);
    }

    #[test]
    fn test_out_of_range_tokens_are_not_wrapped() {
        let raw = "i10000,0,0,0,0,0,0,0f";
        assert_eq!(decode(raw)[0][0], 0x10000);
    }

    #[test]
    fn test_garbage_never_panics() {
        for raw in ["", "i", "f", "if", "fi", ";;;", "ififif", "   ", "\u{1F600}"] {
            assert!(decode(raw).is_empty(), "unexpected samples for {raw:?}");
        }
    }

    #[test]
    fn test_markers_are_optional() {
        assert_eq!(decode(GROUP).len(), 1);
        assert_eq!(decode(&format!("  i{GROUP}f \n")).len(), 1);
    }

    #[test]
    fn test_decode_frames_concatenates() {
        let a = format!("i{GROUP}f");
        let b = "i1,2,3f".to_string();
        let report = decode_frames([a.as_str(), b.as_str(), a.as_str()]);
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.dropped_groups, 1);
    }
}

//! WebVTT transcript parsing.
//!
//! Meeting recordings come with `.vtt` transcripts whose cues are linked to
//! the media FileRef (`file_refs.transcript_file_id`). Cues convert to media
//! fragment selectors so a transcript line can be annotated like a time range.

use serde::{Deserialize, Serialize};

use crate::selector::{round_millis, Selector};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptCue {
    pub id: Option<String>,
    /// Seconds from media start.
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    pub speaker: Option<String>,
}

impl TranscriptCue {
    pub fn fragment_selector(&self) -> Result<Selector> {
        Selector::media_fragment(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTranscript {
    pub cues: Vec<TranscriptCue>,
    /// From a `Language:` header line, when present.
    pub language: Option<String>,
}

/// Parse `HH:MM:SS.mmm`, `MM:SS.mmm` or `SS.mmm` into seconds.
pub fn parse_timestamp(timestamp: &str) -> Result<f64> {
    let invalid = || Error::InvalidInput(format!("invalid WebVTT timestamp: {}", timestamp));
    let parts: Vec<&str> = timestamp.trim().split(':').collect();
    let int = |s: &str| s.parse::<u32>().map(f64::from).map_err(|_| invalid());
    let secs = |s: &str| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(invalid)
    };

    let total = match parts.as_slice() {
        [h, m, s] => int(h)? * 3600.0 + int(m)? * 60.0 + secs(s)?,
        [m, s] => int(m)? * 60.0 + secs(s)?,
        [s] => secs(s)?,
        _ => return Err(invalid()),
    };
    Ok(round_millis(total))
}

/// Render seconds as `H:MM:SS` (or `M:SS` under an hour).
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

fn strip_tags(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// Split a leading `Speaker Name: text` prefix.
fn split_speaker(text: &str) -> (Option<String>, String) {
    if let Some((speaker, rest)) = text.split_once(':') {
        let speaker = speaker.trim();
        let rest = rest.trim();
        if !speaker.is_empty() && !rest.is_empty() {
            return (Some(speaker.to_string()), rest.to_string());
        }
    }
    (None, text.to_string())
}

#[derive(Default)]
struct PendingCue {
    id: Option<String>,
    times: Option<(f64, f64)>,
    lines: Vec<String>,
}

impl PendingCue {
    fn finish(self) -> Option<TranscriptCue> {
        let (start_time, end_time) = self.times?;
        if self.lines.is_empty() {
            return None;
        }
        let (speaker, text) = split_speaker(&self.lines.join(" "));
        Some(TranscriptCue {
            id: self.id,
            start_time,
            end_time,
            text,
            speaker,
        })
    }
}

/// Parse a WebVTT document.
pub fn parse_vtt(content: &str) -> Result<ParsedTranscript> {
    let mut parsed = ParsedTranscript::default();
    let mut cue = PendingCue::default();
    let mut in_note = false;
    let mut in_header = false;

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();

        if line.is_empty() {
            in_note = false;
            in_header = false;
            if let Some(done) = std::mem::take(&mut cue).finish() {
                parsed.cues.push(done);
            }
            continue;
        }
        if in_note {
            continue;
        }
        if line.starts_with("WEBVTT") {
            in_header = true;
            continue;
        }
        if in_header {
            if let Some(lang) = line.strip_prefix("Language:") {
                parsed.language = Some(lang.trim().to_string());
            }
            continue;
        }
        if line.starts_with("NOTE") && cue.times.is_none() {
            in_note = true;
            continue;
        }

        if let Some((start, rest)) = line.split_once("-->") {
            // Cue settings may follow the end timestamp.
            let end = rest.split_whitespace().next().unwrap_or_default();
            let start_time = parse_timestamp(start).map_err(|e| {
                Error::InvalidInput(format!("line {}: {}", lineno + 1, e))
            })?;
            let end_time = parse_timestamp(end).map_err(|e| {
                Error::InvalidInput(format!("line {}: {}", lineno + 1, e))
            })?;
            cue.times = Some((start_time, end_time));
            continue;
        }

        if cue.times.is_none() {
            cue.id = Some(line.to_string());
        } else {
            let text = strip_tags(line);
            if !text.is_empty() {
                cue.lines.push(text);
            }
        }
    }

    if let Some(done) = cue.finish() {
        parsed.cues.push(done);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "WEBVTT\nLanguage: en-US\n\nNOTE exported from Teams\nsecond note line\n\n1\n00:00:01.000 --> 00:00:04.500\n<v Ana>Ana Lopez: I mostly use the</v>\nmobile app\n\n2\n00:05.250 --> 00:07.000 align:start\nSo do I\n\n01:00:00.000 --> 01:00:02.125\nBen: last words";

    #[test]
    fn test_parse_sample() {
        let parsed = parse_vtt(SAMPLE).unwrap();
        assert_eq!(parsed.language.as_deref(), Some("en-US"));
        assert_eq!(parsed.cues.len(), 3);

        let first = &parsed.cues[0];
        assert_eq!(first.id.as_deref(), Some("1"));
        assert_eq!(first.start_time, 1.0);
        assert_eq!(first.end_time, 4.5);
        assert_eq!(first.speaker.as_deref(), Some("Ana Lopez"));
        assert_eq!(first.text, "I mostly use the mobile app");

        let second = &parsed.cues[1];
        assert_eq!(second.start_time, 5.25);
        assert_eq!(second.speaker, None);
        assert_eq!(second.text, "So do I");

        let last = &parsed.cues[2];
        assert_eq!(last.id, None);
        assert_eq!(last.start_time, 3600.0);
        assert_eq!(last.end_time, 3602.125);
        assert_eq!(last.speaker.as_deref(), Some("Ben"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("01:02:03.500").unwrap(), 3723.5);
        assert_eq!(parse_timestamp("02:03.5").unwrap(), 123.5);
        assert_eq!(parse_timestamp("7").unwrap(), 7.0);
        assert!(parse_timestamp("aa:bb").is_err());
        assert!(parse_timestamp("1:2:3:4").is_err());
    }

    #[test]
    fn test_malformed_cue_timing_reports_line() {
        let err = parse_vtt("WEBVTT\n\nxx --> 00:01.000\nhello").unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_cue_without_text_dropped() {
        let parsed = parse_vtt("WEBVTT\n\n00:01.000 --> 00:02.000\n\n").unwrap();
        assert!(parsed.cues.is_empty());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(5.9), "0:05");
        assert_eq!(format_timestamp(125.0), "2:05");
        assert_eq!(format_timestamp(3723.0), "1:02:03");
    }

    #[test]
    fn test_cue_fragment_selector() {
        let parsed = parse_vtt(SAMPLE).unwrap();
        let sel = parsed.cues[0].fragment_selector().unwrap();
        assert_eq!(sel.time_range(), Some((1.0, 4.5)));
    }
}

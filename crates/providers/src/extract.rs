//! Reasoning extraction from plain text.
//!
//! Some backends have no structured reasoning field and put their thinking
//! into the message text instead. Two conventions are recognized, in order:
//!
//! 1. Channel markers: `<|channel|>analysis<|message|>…` holds reasoning and
//!    `<|channel|>final<|message|>…` holds the answer. A channel's content
//!    runs until the next `<|` sentinel or the end of the string.
//! 2. A single leading `<think>…</think>` (or `<thinking>…</thinking>`)
//!    block at the very start of the text.
//!
//! Text matching neither is returned unchanged with no reasoning. Input that
//! could match both takes the first convention.

const CHANNEL: &str = "<|channel|>";
const MESSAGE: &str = "<|message|>";
const SENTINEL: &str = "<|";

const THINK_TAGS: [(&str, &str); 2] = [("<think>", "</think>"), ("<thinking>", "</thinking>")];

/// Text split into answer and reasoning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub reasoning: Option<String>,
}

/// Split `raw` into answer text and reasoning.
pub fn extract(raw: &str) -> Extracted {
    if let Some(found) = extract_channels(raw) {
        return found;
    }
    if let Some(found) = extract_leading_tag(raw) {
        return found;
    }
    Extracted {
        text: raw.to_string(),
        reasoning: None,
    }
}

fn extract_channels(raw: &str) -> Option<Extracted> {
    if !raw.contains(CHANNEL) {
        return None;
    }

    let mut analysis: Vec<&str> = Vec::new();
    let mut final_text: Option<&str> = None;
    let mut matched = false;

    let mut rest = raw;
    while let Some(start) = rest.find(CHANNEL) {
        let after = &rest[start + CHANNEL.len()..];
        let Some(msg_pos) = after.find(MESSAGE) else {
            break;
        };
        // Channel headers may carry extra tokens, e.g. "commentary to=tool"
        let channel = after[..msg_pos].split_whitespace().next().unwrap_or("");
        let body_start = &after[msg_pos + MESSAGE.len()..];
        let body_end = body_start.find(SENTINEL).unwrap_or(body_start.len());
        let body = body_start[..body_end].trim();

        matched = true;
        match channel {
            "analysis" => analysis.push(body),
            "final" => final_text = Some(body),
            _ => {}
        }
        rest = &body_start[body_end..];
    }

    if !matched {
        return None;
    }

    let reasoning = analysis.join("\n");
    Some(Extracted {
        text: final_text.unwrap_or("").to_string(),
        reasoning: (!reasoning.is_empty()).then_some(reasoning),
    })
}

fn extract_leading_tag(raw: &str) -> Option<Extracted> {
    let trimmed = raw.trim_start();
    THINK_TAGS.iter().find_map(|(open, close)| {
        let inner_and_rest = trimmed.strip_prefix(open)?;
        let end = inner_and_rest.find(close)?;
        let reasoning = inner_and_rest[..end].trim();
        let text = inner_and_rest[end + close.len()..].trim();
        Some(Extracted {
            text: text.to_string(),
            reasoning: (!reasoning.is_empty()).then(|| reasoning.to_string()),
        })
    })
}

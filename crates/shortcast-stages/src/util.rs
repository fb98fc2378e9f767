//! Shared helpers for stage implementations

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;

use shortcast_core::error::StageError;
use shortcast_core::state::PipelineState;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new("[a-zA-Z]{4,}").unwrap());
static NON_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new("[^a-zA-Z0-9_-]+").unwrap());

/// Too common to make useful search terms
const STOPWORDS: &[&str] = &[
    "about", "an", "and", "are", "at", "for", "from", "into", "its", "that", "the", "this",
    "what", "with", "your",
];

/// Create the per-job directory layout the stages write into
pub fn ensure_runtime_dirs(state: &PipelineState) -> Result<(), StageError> {
    if state.assets_dir.is_empty() || state.output_dir.is_empty() {
        return Err(StageError::fatal("assets_dir/output_dir not configured"));
    }
    let assets = Path::new(&state.assets_dir);
    fs::create_dir_all(assets)?;
    fs::create_dir_all(Path::new(&state.output_dir))?;
    for sub in ["images", "clips", "audio", "music"] {
        fs::create_dir_all(assets.join(sub))?;
    }
    Ok(())
}

/// Reduce arbitrary text to a safe file stem, at most `limit` characters
pub fn sanitize_filename(text: &str, limit: usize) -> String {
    let cleaned = NON_FILENAME.replace_all(text, "_");
    let cleaned = cleaned.trim_matches('_');
    let base = if cleaned.is_empty() { "file" } else { cleaned };
    base.chars().take(limit).collect()
}

/// `prefix_YYYYmmdd_HHMMSS` plus a suffix such as `.mp4`
pub fn timestamp_name(prefix: &str, suffix: &str) -> String {
    format!("{prefix}_{}{suffix}", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Split text into trimmed sentences, at most `max_sentences`
pub fn split_sentences(text: &str, max_sentences: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.trim().chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            if sentences.len() >= max_sentences {
                return sentences;
            }
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() && sentences.len() < max_sentences {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Frequency-ranked search terms from the topic and script, topic first
pub fn script_to_search_terms(topic: &str, script: &str, max_terms: usize) -> Vec<String> {
    let text = format!("{topic} {script}").to_lowercase();
    let mut freq: HashMap<String, usize> = HashMap::new();
    for m in WORD.find_iter(&text) {
        let token = m.as_str();
        if STOPWORDS.contains(&token) {
            continue;
        }
        *freq.entry(token.to_string()).or_insert(0) += 1;
    }

    // Most frequent first, longer words break ties, then alphabetical.
    let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then(b.0.len().cmp(&a.0.len()))
            .then(a.0.cmp(&b.0))
    });

    let mut terms: Vec<String> = Vec::new();
    let topic = topic.trim();
    if !topic.is_empty() {
        terms.push(topic.to_string());
    }
    for (term, _) in ranked {
        if terms.len() >= max_terms {
            break;
        }
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Rough speaking time at ~2.6 words per second, clamped to the short format
pub fn estimate_narration_seconds(script: &str) -> f64 {
    let words = script.split_whitespace().count().max(1) as f64;
    (words / 2.6).clamp(8.0, 58.0)
}

/// Synthesize a mono 16-bit PCM sine tone.
///
/// Stands in for narration or music when no real audio source is available.
pub fn make_tone_wav(
    path: &Path,
    duration_s: f64,
    freq: f64,
    volume: f64,
) -> Result<(), StageError> {
    const SAMPLE_RATE: u32 = 44_100;
    let amplitude = 32_767.0 * volume.clamp(0.0, 1.0);
    let samples = (SAMPLE_RATE as f64 * duration_s.max(0.1)) as u32;
    let data_len = samples * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    bytes.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes()); // byte rate
    bytes.extend_from_slice(&2u16.to_le_bytes()); // block align
    bytes.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..samples {
        let t = f64::from(i) / f64::from(SAMPLE_RATE);
        let value = (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    fs::write(path, bytes)?;
    Ok(())
}

/// Write a solid dark 24-bit BMP used to pad out thin asset searches
pub fn make_placeholder_image(path: &Path, width: u32, height: u32) -> Result<(), StageError> {
    let row_len = width * 3;
    let padding = (4 - (row_len % 4)) % 4;
    let data_len = (row_len + padding) * height;
    let file_len = 54 + data_len;

    let mut bytes = Vec::with_capacity(file_len as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_len.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&54u32.to_le_bytes()); // pixel data offset
    bytes.extend_from_slice(&40u32.to_le_bytes()); // BITMAPINFOHEADER
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // planes
    bytes.extend_from_slice(&24u16.to_le_bytes()); // bits per pixel
    bytes.extend_from_slice(&0u32.to_le_bytes()); // no compression
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes()); // 72 dpi
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    // BGR, dark navy backdrop
    let pixel = [36u8, 22, 18];
    for _ in 0..height {
        for _ in 0..width {
            bytes.extend_from_slice(&pixel);
        }
        bytes.extend(std::iter::repeat(0u8).take(padding as usize));
    }

    fs::write(path, bytes)?;
    Ok(())
}

/// Write pretty-printed JSON to a file
pub fn write_json(path: &Path, payload: &serde_json::Value) -> Result<(), StageError> {
    fs::write(path, serde_json::to_vec_pretty(payload)?)?;
    Ok(())
}

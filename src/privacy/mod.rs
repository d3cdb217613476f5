//! PII detection and redaction.
//!
//! Regex-layer detection for structured identifiers (emails, phone numbers,
//! IBANs, social security numbers, card numbers). NER and LLM layers are
//! external collaborators; the gate here is what the semantic store and
//! summary persistence call before writing user text.

pub mod audit;

pub use audit::AuditStore;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// How detected PII is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMethod {
    /// `[REDACTED_<LABEL>]`
    Placeholder,
    /// `[<LABEL>_<hash8>]`, stable per value for pseudonymous linkage.
    Hash,
}

/// A detected PII span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiEntity {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
    pub method: String,
}

fn patterns() -> &'static Vec<(&'static str, Regex)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                "EMAIL",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            ),
            (
                "SWISS_PHONE",
                r"(\+41|0041|0)\s?[1-9]\d{1,2}\s?\d{3}\s?\d{2}\s?\d{2}",
            ),
            (
                "IBAN",
                r"\bCH\d{2}\s?\d{4}\s?\d{4}\s?\d{4}\s?\d{4}\s?\d\b",
            ),
            ("SWISS_SSN", r"\b756\.\d{4}\.\d{4}\.\d{2}\b"),
            ("CREDIT_CARD", r"\b(?:\d[ -]*?){13,16}\b"),
            ("PHONE", r"\+?\d[\d -]{7,}\d"),
        ]
        .iter()
        .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|re| (*label, re)))
        .collect()
    })
}

/// Regex-layer PII redactor.
#[derive(Debug, Default)]
pub struct PiiRedactor;

impl PiiRedactor {
    pub fn new() -> Self {
        Self
    }

    /// Detect PII spans without redacting.
    pub fn detect_pii(&self, text: &str) -> Vec<PiiEntity> {
        let mut entities = Vec::new();
        for (label, pattern) in patterns() {
            for found in pattern.find_iter(text) {
                entities.push(PiiEntity {
                    text: found.as_str().to_string(),
                    label: label.to_string(),
                    start: found.start(),
                    end: found.end(),
                    confidence: 0.9,
                    method: "regex".to_string(),
                });
            }
        }
        entities
    }

    /// Replace every detected span.
    pub fn redact(&self, text: &str, method: RedactionMethod) -> String {
        let mut redacted = text.to_string();
        let entities = self.detect_pii(text);
        for entity in &entities {
            let replacement = match method {
                RedactionMethod::Placeholder => format!("[REDACTED_{}]", entity.label),
                RedactionMethod::Hash => hash_pii(&entity.text, &entity.label),
            };
            redacted = redacted.replace(&entity.text, &replacement);
        }
        if !entities.is_empty() {
            tracing::info!(entities = entities.len(), "pii_redacted");
        }
        redacted
    }

    /// Whether text may be stored verbatim: true only when no detection at
    /// or above the confidence threshold exists.
    pub fn is_text_safe_for_storage(&self, text: &str, confidence_threshold: f64) -> bool {
        !self
            .detect_pii(text)
            .iter()
            .any(|entity| entity.confidence >= confidence_threshold)
    }
}

fn hash_pii(text: &str, label: &str) -> String {
    let digest = Sha256::digest(format!("{label}_{text}").as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("[{label}_{hex}]")
}

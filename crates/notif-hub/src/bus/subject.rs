/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Subject and topic token handling.
//!
//! Subjects are dot-separated token sequences. Patterns may contain `*`
//! (matches exactly one token) and `>` (terminal, matches one or more
//! tokens). Events live on `events.<org>.<project>.<topic…>`; DLQ messages on
//! `dlq.<org>.<consumer_group>`; webhook retries on
//! `webhook-retry.<org>.<webhook_id>`.

/// Maximum number of tokens in a topic.
pub const MAX_TOPIC_TOKENS: usize = 16;

/// Maximum total topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Subject prefix for events.
pub const EVENTS_PREFIX: &str = "events";

/// Subject prefix for dead-lettered events.
pub const DLQ_PREFIX: &str = "dlq";

/// Subject prefix for webhook retry jobs.
pub const WEBHOOK_RETRY_PREFIX: &str = "webhook-retry";

/// Validates a concrete topic (no wildcards).
///
/// Topics are 1-16 dot-separated tokens of `[A-Za-z0-9_-]+`, at most 256
/// bytes in total.
pub fn validate_topic(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("Topic cannot be empty".to_string());
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(format!("Topic exceeds {} bytes", MAX_TOPIC_LEN));
    }

    let tokens: Vec<&str> = topic.split('.').collect();
    if tokens.len() > MAX_TOPIC_TOKENS {
        return Err(format!("Topic exceeds {} tokens", MAX_TOPIC_TOKENS));
    }

    for token in tokens {
        if token.is_empty() {
            return Err(format!("Empty token in topic '{}'", topic));
        }
        if !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("Invalid token '{}' in topic '{}'", token, topic));
        }
    }

    Ok(())
}

/// Composes the bus subject for an event.
pub fn event_subject(org_id: &str, project_id: &str, topic: &str) -> String {
    format!("{}.{}.{}.{}", EVENTS_PREFIX, org_id, project_id, topic)
}

/// Composes the bus subject for a DLQ message.
pub fn dlq_subject(org_id: &str, consumer_group: &str) -> String {
    format!("{}.{}.{}", DLQ_PREFIX, org_id, consumer_group)
}

/// Composes the bus subject for a webhook retry job.
pub fn webhook_retry_subject(org_id: &str, webhook_id: &str) -> String {
    format!("{}.{}.{}", WEBHOOK_RETRY_PREFIX, org_id, webhook_id)
}

/// Tests whether a pattern matches a concrete subject.
///
/// `*` consumes exactly one token; `>` consumes one or more remaining
/// tokens and only makes sense as the final pattern token.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    tokens_match(&pattern_tokens, &subject_tokens)
}

fn tokens_match(pattern: &[&str], subject: &[&str]) -> bool {
    match pattern.split_first() {
        None => subject.is_empty(),
        Some((&">", _)) => !subject.is_empty(),
        Some((&"*", rest)) => match subject.split_first() {
            Some((_, subject_rest)) => tokens_match(rest, subject_rest),
            None => false,
        },
        Some((head, rest)) => match subject.split_first() {
            Some((subject_head, subject_rest)) if head == subject_head => {
                tokens_match(rest, subject_rest)
            }
            _ => false,
        },
    }
}

/// Tests whether two subject filters can match a common concrete subject.
///
/// The relation is commutative and reflexive: a filter always overlaps
/// itself, and `overlap(a, b) == overlap(b, a)`.
pub fn subjects_overlap(a: &str, b: &str) -> bool {
    let a_tokens: Vec<&str> = a.split('.').collect();
    let b_tokens: Vec<&str> = b.split('.').collect();

    tokens_overlap(&a_tokens, &b_tokens)
}

fn tokens_overlap(a: &[&str], b: &[&str]) -> bool {
    match (a.split_first(), b.split_first()) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some((&">", _)), Some(_)) | (Some(_), Some((&">", _))) => {
            // ">" matches one-or-more of anything; the other side still has at
            // least one token's worth of pattern, which always matches some
            // concrete continuation.
            true
        }
        (Some((&"*", a_rest)), Some((_, b_rest)))
        | (Some((_, a_rest)), Some((&"*", b_rest))) => tokens_overlap(a_rest, b_rest),
        (Some((a_head, a_rest)), Some((b_head, b_rest))) => {
            a_head == b_head && tokens_overlap(a_rest, b_rest)
        }
    }
}

/// Checks whether a list of subjects overlaps another list.
///
/// Returns the first overlapping pair, if any.
pub fn subject_lists_overlap<'a>(
    ours: &'a [String],
    theirs: &'a [String],
) -> Option<(&'a str, &'a str)> {
    for a in ours {
        for b in theirs {
            if subjects_overlap(a, b) {
                return Some((a.as_str(), b.as_str()));
            }
        }
    }
    None
}

/// Widens a pattern by replacing a terminal `*` with `>`.
///
/// Every subject accepted by the original pattern is accepted by the widened
/// one.
pub fn widen(pattern: &str) -> String {
    match pattern.rsplit_once('.') {
        Some((head, "*")) => format!("{}.>", head),
        None if pattern == "*" => ">".to_string(),
        _ => pattern.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("orders.created").is_ok());
        assert!(validate_topic("a").is_ok());
        assert!(validate_topic("a_b-c.d2").is_ok());

        assert!(validate_topic("").is_err());
        assert!(validate_topic("orders..created").is_err());
        assert!(validate_topic(".orders").is_err());
        assert!(validate_topic("orders.").is_err());
        assert!(validate_topic("orders.crea ted").is_err());
        assert!(validate_topic("orders.*").is_err());
        assert!(validate_topic(&"a.".repeat(17).trim_end_matches('.')).is_err());
        assert!(validate_topic(&"x".repeat(257)).is_err());
    }

    #[test]
    fn test_event_subject_composition() {
        assert_eq!(
            event_subject("acme", "proj", "orders.created"),
            "events.acme.proj.orders.created"
        );
        assert_eq!(dlq_subject("acme", "webhook:w1"), "dlq.acme.webhook:w1");
        assert_eq!(
            webhook_retry_subject("acme", "w1"),
            "webhook-retry.acme.w1"
        );
    }

    #[test]
    fn test_subject_matches_exact() {
        assert!(subject_matches("a.b.c", "a.b.c"));
        assert!(!subject_matches("a.b.c", "a.b"));
        assert!(!subject_matches("a.b.c", "a.b.c.d"));
        assert!(!subject_matches("a.b.c", "a.b.x"));
    }

    #[test]
    fn test_subject_matches_star() {
        assert!(subject_matches("a.*.c", "a.b.c"));
        assert!(subject_matches("*.b.c", "a.b.c"));
        assert!(!subject_matches("a.*", "a"));
        assert!(!subject_matches("a.*", "a.b.c"));
    }

    #[test]
    fn test_subject_matches_gt() {
        assert!(subject_matches("a.>", "a.b"));
        assert!(subject_matches("a.>", "a.b.c.d"));
        assert!(!subject_matches("a.>", "a"));
        assert!(subject_matches(">", "a"));
        assert!(subject_matches(">", "a.b.c"));
    }

    #[test]
    fn test_matcher_is_identity_on_exact_strings() {
        for subject in ["a", "a.b", "orders.created.v2"] {
            assert!(subject_matches(subject, subject));
        }
    }

    #[test]
    fn test_matcher_monotone_under_widening() {
        let cases = [
            ("a.*", vec!["a.b", "a.c"]),
            ("events.acme.*", vec!["events.acme.p1"]),
            ("*", vec!["x"]),
        ];
        for (pattern, subjects) in cases {
            let wide = widen(pattern);
            for subject in subjects {
                assert!(subject_matches(pattern, subject));
                assert!(
                    subject_matches(&wide, subject),
                    "widen({}) = {} should accept {}",
                    pattern,
                    wide,
                    subject
                );
            }
        }
    }

    #[test]
    fn test_overlap_basic() {
        assert!(subjects_overlap("a.b", "a.b"));
        assert!(subjects_overlap("a.*", "a.b"));
        assert!(subjects_overlap("a.>", "a.b.c"));
        assert!(subjects_overlap("*.b", "a.*"));
        assert!(subjects_overlap(">", "x.y.z"));

        assert!(!subjects_overlap("a.b", "a.c"));
        assert!(!subjects_overlap("a.b", "a.b.c"));
        assert!(!subjects_overlap("a.*", "b.*"));
        assert!(!subjects_overlap("a", "a.>"));
    }

    #[test]
    fn test_overlap_commutative() {
        let pairs = [
            ("a.b", "a.*"),
            ("a.>", "a.b.c"),
            ("*.x", "y.*"),
            ("a.b", "c.d"),
            (">", "a"),
            ("events.>", "events.acme.*"),
        ];
        for (a, b) in pairs {
            assert_eq!(
                subjects_overlap(a, b),
                subjects_overlap(b, a),
                "overlap not commutative for ({}, {})",
                a,
                b
            );
        }
    }

    #[test]
    fn test_overlap_reflexive() {
        for s in ["a", "a.b", "a.*", "a.>", ">", "*.*"] {
            assert!(subjects_overlap(s, s), "overlap not reflexive for {}", s);
        }
    }

    #[test]
    fn test_subject_lists_overlap() {
        let ours = vec!["events.>".to_string()];
        let theirs = vec!["dlq.>".to_string(), "events.acme.*".to_string()];
        let hit = subject_lists_overlap(&ours, &theirs);
        assert_eq!(hit, Some(("events.>", "events.acme.*")));

        let disjoint = vec!["dlq.>".to_string()];
        assert!(subject_lists_overlap(&ours, &disjoint).is_none());
    }

    #[test]
    fn test_widen() {
        assert_eq!(widen("a.*"), "a.>");
        assert_eq!(widen("*"), ">");
        assert_eq!(widen("a.b"), "a.b");
        assert_eq!(widen("a.>"), "a.>");
    }
}

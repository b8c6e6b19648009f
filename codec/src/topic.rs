// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic/filter parsing shared by the codec and the trie.
//!
//! The wildcard matching algorithm itself lives in `hebo::trie` - a trie
//! node *is* the match engine, so there is nothing to
//! duplicate here beyond splitting and validating.

use crate::error::DecodeError;

/// Splits a topic or filter on `/`. Empty segments (leading/trailing/
/// doubled slashes) are permitted and treated as ordinary segment values.
#[must_use]
pub fn split(path: &str) -> Vec<&str> {
    path.split('/').collect()
}

/// Validates a published topic name: non-empty, no wildcard characters.
///
/// # Errors
///
/// Returns error if `topic` is empty or contains `+`/`#`.
pub fn validate_topic_name(topic: &str) -> Result<(), DecodeError> {
    if topic.is_empty() {
        return Err(DecodeError::EmptyTopicFilter);
    }
    if topic.split('/').any(|seg| seg == "+" || seg == "#") {
        return Err(DecodeError::WildcardInTopicName);
    }
    Ok(())
}

/// Validates a subscription filter: non-empty, and `#` (if present) only as
/// the final segment.
///
/// # Errors
///
/// Returns error if `filter` is empty or `#` appears mid-filter.
pub fn validate_topic_filter(filter: &str) -> Result<(), DecodeError> {
    if filter.is_empty() {
        return Err(DecodeError::EmptyTopicFilter);
    }
    let segments: Vec<&str> = filter.split('/').collect();
    for (i, seg) in segments.iter().enumerate() {
        if *seg == "#" && i != segments.len() - 1 {
            return Err(DecodeError::MisplacedMultiWildcard);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_keeps_empty_segments() {
        assert_eq!(split("a//b"), vec!["a", "", "b"]);
        assert_eq!(split(""), vec![""]);
    }

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("a/b").is_ok());
        assert!(validate_topic_name("a/+/b").is_err());
        assert!(validate_topic_name("").is_err());
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_topic_filter("a/#").is_ok());
        assert!(validate_topic_filter("a/#/b").is_err());
        assert!(validate_topic_filter("+/b/#").is_ok());
    }
}

//! Topic filter parsing and validation.

use crate::error::TopicFilterError;

/// Splits a comma-separated filter list, trimming whitespace and dropping
/// empty entries, and validates each filter.
///
/// # Errors
///
/// Returns `TopicFilterError::Empty` when nothing usable remains and
/// `TopicFilterError::Invalid` for the first malformed filter.
pub fn parse_topic_filters(raw: &str) -> Result<Vec<String>, TopicFilterError> {
    let filters: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    validate_topic_filters(&filters)?;
    Ok(filters)
}

/// Validates an already split filter list.
///
/// # Errors
///
/// See [`parse_topic_filters`].
pub fn validate_topic_filters(filters: &[String]) -> Result<(), TopicFilterError> {
    if filters.is_empty() {
        return Err(TopicFilterError::Empty);
    }
    filters.iter().try_for_each(|f| validate_topic_filter(f))
}

/// Checks one filter against MQTT wildcard rules: `+` must occupy a whole
/// level and `#` must be the whole last level.
///
/// # Errors
///
/// Returns `TopicFilterError::Invalid` describing the broken rule.
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicFilterError> {
    let invalid = |reason| TopicFilterError::Invalid {
        filter: filter.to_string(),
        reason,
    };

    if filter.is_empty() {
        return Err(invalid("filter is empty"));
    }
    if filter.len() > 65_535 {
        return Err(invalid("filter exceeds 65535 bytes"));
    }
    if filter.contains('\0') {
        return Err(invalid("filter contains a NUL character"));
    }

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != last) {
            return Err(invalid("'#' must be the entire final level"));
        }
        if level.contains('+') && *level != "+" {
            return Err(invalid("'+' must occupy an entire level"));
        }
    }
    Ok(())
}

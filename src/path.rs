//! Property paths
//!
//! A path is `folder/entry[/child...]`. One leading separator is tolerated;
//! empty segments are not.

use crate::error::{Error, Result};

pub const SEPARATOR: char = '/';

/// Longest accepted folder or entry name, in bytes
pub const MAX_NAME_LEN: usize = 128;

/// Check a single folder or entry name
///
/// Names may start with a digit (per-CPU or per-zone entries such as `"0"`)
/// and may contain ASCII alphanumerics, `_`, `-` and `.`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("Name cannot be empty".to_string()));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "Name cannot be longer than {} characters",
            MAX_NAME_LEN
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(Error::InvalidArgument(format!(
            "Name '{}' can only contain letters, numbers, '_', '-' and '.'",
            name
        )));
    }

    Ok(())
}

/// Split a path into its segments
pub fn split(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.strip_prefix(SEPARATOR).unwrap_or(path);
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("empty path".to_string()));
    }

    let segments: Vec<&str> = trimmed.split(SEPARATOR).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidArgument(format!(
            "path '{}' contains an empty segment",
            path
        )));
    }
    Ok(segments)
}

/// Split a path into its folder and at least one entry segment
pub fn split_entry_path(path: &str) -> Result<(&str, Vec<&str>)> {
    let mut segments = split(path)?;
    if segments.len() < 2 {
        return Err(Error::InvalidArgument(format!(
            "path '{}' names a folder, not an entry",
            path
        )));
    }
    let folder = segments.remove(0);
    Ok((folder, segments))
}

pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(segment.as_ref());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("total_mem").is_ok());
        assert!(validate_name("0").is_ok());
        assert!(validate_name("eth0.rx-bytes").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_split() -> Result<()> {
        assert_eq!(split("mem/total")?, vec!["mem", "total"]);
        assert_eq!(split("/mem/total")?, vec!["mem", "total"]);
        assert_eq!(split("mem")?, vec!["mem"]);
        assert!(split("").is_err());
        assert!(split("/").is_err());
        assert!(split("mem//total").is_err());
        assert!(split("mem/total/").is_err());
        Ok(())
    }

    #[test]
    fn test_split_entry_path() -> Result<()> {
        let (folder, rest) = split_entry_path("mem/alloc_count/peak")?;
        assert_eq!(folder, "mem");
        assert_eq!(rest, vec!["alloc_count", "peak"]);
        assert!(matches!(
            split_entry_path("mem"),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_join() {
        assert_eq!(join(&["mem", "total"]), "mem/total");
        assert_eq!(join::<&str>(&[]), "");
    }
}

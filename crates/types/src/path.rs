//! Segment path helpers.
//!
//! A pointer key has the shape `<project_id>/<segment>/<bucket>/<encrypted_path>`
//! where `<segment>` is `l` for the last segment or `s<N>` for segment N.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("invalid segment index: {0}")]
    InvalidSegmentIndex(i64),

    #[error("invalid segment component: {0:?}")]
    InvalidSegmentComponent(String),

    #[error("no bucket component in path: {0:?}")]
    NoBucket(String),
}

/// Split a path into its `/`-separated components.
pub fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('/').collect()
}

/// Join components into a path, skipping empty entries.
pub fn join_paths<I, S>(components: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    components
        .into_iter()
        .map(|c| c.as_ref().to_string())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build a full pointer key from its parts.
///
/// `segment_index` of `-1` addresses the last segment (`l`).
pub fn create_path(
    project_id: &str,
    segment_index: i64,
    bucket: &str,
    path: &str,
) -> Result<String, PathError> {
    if segment_index < -1 {
        return Err(PathError::InvalidSegmentIndex(segment_index));
    }
    let segment = if segment_index == -1 {
        "l".to_string()
    } else {
        format!("s{}", segment_index)
    };
    Ok(join_paths([project_id, segment.as_str(), bucket, path]))
}

/// Extract the `<project_id>/<bucket>` bucket ID used by order issuance.
pub fn bucket_id(path: &str) -> Result<String, PathError> {
    let components = split_path(path);
    if components.len() < 3 {
        return Err(PathError::NoBucket(path.to_string()));
    }
    Ok(join_paths([components[0], components[2]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_path_last_segment() {
        let path = create_path("proj", -1, "bucket", "a/b").expect("path");
        assert_eq!(path, "proj/l/bucket/a/b");
    }

    #[test]
    fn create_path_indexed_segment() {
        let path = create_path("proj", 3, "bucket", "a").expect("path");
        assert_eq!(path, "proj/s3/bucket/a");
    }

    #[test]
    fn create_path_rejects_negative_index() {
        assert!(create_path("proj", -2, "bucket", "a").is_err());
    }

    #[test]
    fn create_path_skips_empty_components() {
        let path = create_path("proj", -1, "", "").expect("path");
        assert_eq!(path, "proj/l");
    }

    #[test]
    fn bucket_id_from_full_path() {
        assert_eq!(bucket_id("proj/s0/bucket/enc").expect("bucket"), "proj/bucket");
        assert!(bucket_id("proj/l").is_err());
    }
}

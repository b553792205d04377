//! Test fixtures for transcode output locations.

/// Temporary directory and an output path inside it that does not exist yet.
pub type TempOutput = (tempfile::TempDir, std::path::PathBuf);

/// Creates a temporary directory with an `output.mp4` destination.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created. This is acceptable
/// in test fixtures where failures indicate environment issues.
pub fn create_temp_output() -> TempOutput {
    let temp_dir = tempfile::tempdir().unwrap();
    let output = temp_dir.path().join("output.mp4");
    (temp_dir, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_output_is_fresh() {
        let (temp_dir, output) = create_temp_output();

        assert!(temp_dir.path().is_dir());
        assert!(!output.exists());
        assert_eq!(output.parent(), Some(temp_dir.path()));
    }
}

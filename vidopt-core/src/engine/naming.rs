//! Default output file names.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};

/// `transcoded_yyyyMMdd_HHmmss.mp4` for the given instant.
pub fn default_output_name<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("transcoded_{}.mp4", now.format("%Y%m%d_%H%M%S"))
}

/// Default output path inside `dir`, named after the local time.
pub fn default_output_path(dir: &Path) -> PathBuf {
    dir.join(default_output_name(&Local::now()))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn test_output_name_uses_timestamp() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(default_output_name(&instant), "transcoded_20240307_090502.mp4");
    }

    #[test]
    fn test_output_path_is_inside_directory() {
        let path = default_output_path(Path::new("/tmp/out"));
        assert_eq!(path.parent(), Some(Path::new("/tmp/out")));
        assert!(
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("transcoded_") && name.ends_with(".mp4"))
        );
    }
}

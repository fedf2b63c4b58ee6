use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Timestamp of a missing file. Anything that exists is newer.
pub const MISSING_TIMESTAMP: f64 = -2.0;

/// Modification time of `path` in seconds since the epoch, including the
/// sub-second part.
pub fn get_timestamp(path: impl AsRef<Path>) -> f64 {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return MISSING_TIMESTAMP,
    };
    match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

pub fn exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    #[test]
    fn missing_file_is_oldest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(get_timestamp(dir.path().join("nope")), MISSING_TIMESTAMP);
    }

    #[test]
    fn reads_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let f = File::create(&path).unwrap();
        f.set_modified(UNIX_EPOCH + Duration::from_millis(1_500)).unwrap();
        assert_eq!(get_timestamp(&path), 1.5);
        assert!(get_timestamp(&path) < SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64());
    }
}

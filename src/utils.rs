use crate::InventoryError;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Writes `bytes` to `dir/file_name`, creating `dir` if needed.
pub async fn write_output(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, InventoryError> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(sanitize_filename(file_name));
    fs::write(&path, bytes).await?;
    info!("Wrote {} ({})", path.display(), format_bytes(bytes.len()));
    Ok(path)
}

/// Accepts `YYYY-MM-DD` or `DD/MM/YYYY`.
pub fn parse_date(input: &str) -> Result<NaiveDate, InventoryError> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(input, "%d/%m/%Y"))
        .map_err(|_| InventoryError::Validation(format!("invalid date '{input}'")))
}

/// Cuts `text` to at most `max` characters, marking the cut with `…`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("CHECK LIST_20240115_1430.pdf"), "CHECK LIST_20240115_1430.pdf");
        assert_eq!(sanitize_filename("test/file.txt"), "test_file.txt");
        assert_eq!(sanitize_filename("test:file?.txt"), "test_file_.txt");
    }

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(parse_date("2024-01-05").unwrap(), expected);
        assert_eq!(parse_date("05/01/2024").unwrap(), expected);
        assert!(matches!(parse_date("Jan 5"), Err(InventoryError::Validation(_))));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Olinda", 10), "Olinda");
        assert_eq!(truncate("Fábrica Jaboatão", 8), "Fábrica…");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[tokio::test]
    async fn test_write_output_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("reports");
        let path = write_output(&target, "a:b.pdf", b"%PDF").await.unwrap();
        assert_eq!(path, target.join("a_b.pdf"));
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF");
    }
}

//! Bounded capture of sandbox output

use tokio::io::{AsyncRead, AsyncReadExt};

/// Appended to a stream cut at the character limit
pub const TRUNCATION_MARKER: &str = "\n\n--- Output truncated (limit reached) ---";

/// Cut `text` to at most `max_chars` characters, appending the marker when
/// anything was removed
pub fn truncate_output(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text,
        Some((cut, _)) => {
            let mut truncated = text;
            truncated.truncate(cut);
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        }
    }
}

/// Byte budget that always holds `max_chars` characters plus one more, so a
/// stream cut by the budget is still detected as over the character limit
pub fn capture_budget(max_chars: usize) -> usize {
    max_chars.saturating_add(1).saturating_mul(4)
}

/// Read a stream to EOF, keeping the first `cap` bytes and discarding the
/// rest so the writer never blocks on a full pipe
pub async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }

    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_untouched() {
        assert_eq!(truncate_output("hello\n".to_string(), 10), "hello\n");
        assert_eq!(truncate_output(String::new(), 10), "");
        assert_eq!(truncate_output("exact".to_string(), 5), "exact");
    }

    #[test]
    fn test_long_output_truncated_with_marker() {
        let max = 100;
        let out = truncate_output("x".repeat(max * 3), max);
        assert_eq!(out.chars().count(), max + TRUNCATION_MARKER.chars().count());
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let out = truncate_output("é".repeat(20), 10);
        assert!(out.starts_with(&"é".repeat(10)));
        assert_eq!(out.chars().count(), 10 + TRUNCATION_MARKER.chars().count());
    }

    #[tokio::test]
    async fn test_read_capped_drains_everything() {
        let data = vec![b'a'; 50_000];
        let kept = read_capped(&data[..], 1_000).await.unwrap();
        assert_eq!(kept.len(), 1_000);

        let kept = read_capped(&b"small"[..], 1_000).await.unwrap();
        assert_eq!(kept, b"small");
    }

    #[test]
    fn test_budget_exceeds_char_limit() {
        let max = 10;
        let text = String::from_utf8_lossy(&vec![b'a'; capture_budget(max)]).into_owned();
        assert!(truncate_output(text, max).ends_with(TRUNCATION_MARKER));
    }
}

//! Fixed-size character chunking with overlap (§4.5: "split into chunks of C characters
//! with overlap O ... with trimming of whitespace-only chunks").

pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let stride = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_with_overlap() {
        let text = "a".repeat(2500);
        let chunks = chunk_text(&text, 1000, 200);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[test]
    fn drops_whitespace_only_chunks() {
        let text = format!("{}{}", "x".repeat(10), " ".repeat(20));
        let chunks = chunk_text(&text, 10, 0);
        assert_eq!(chunks, vec!["x".repeat(10)]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 1000, 200).is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunk_text("short text", 1000, 200);
        assert_eq!(chunks, vec!["short text".to_string()]);
    }
}

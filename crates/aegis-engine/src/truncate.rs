/// Default ceiling for `inspect_function` results.
pub const DEFAULT_MAX_INSPECT: usize = 32 * 1024;

/// Truncate text that exceeds `max_bytes` at a char boundary and append a
/// marker showing original vs kept size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut boundary = max_bytes;
    while !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_limit_is_untouched() {
        assert_eq!(truncate_output("def f(): pass", 1024), "def f(): pass");
    }

    #[test]
    fn exact_boundary_no_truncation() {
        let input = "a".repeat(100);
        assert_eq!(truncate_output(&input, 100), input);
    }

    #[test]
    fn one_over_truncates() {
        let input = "a".repeat(101);
        let result = truncate_output(&input, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.ends_with("[truncated: 101 bytes -> 100 bytes]"));
    }

    #[test]
    fn backs_off_to_char_boundary() {
        // 4-byte chars; a 10 byte cut lands inside the third one.
        let input = "🦀".repeat(10);
        let result = truncate_output(&input, 10);
        assert!(result.starts_with("🦀🦀\n"));
        assert!(result.contains("[truncated: 40 bytes -> 8 bytes]"));
    }
}

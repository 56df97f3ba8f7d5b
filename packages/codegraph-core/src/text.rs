//! Small line-indexed text helpers shared by the reconciler and the splitter driver's snippet
//! validation.

/// Extracts the inclusive, 1-indexed line range `[start_line, end_line]` from `content`, joined
/// with `\n` (no trailing newline). Lines are split the same way `diff::diff` counts them.
pub fn extract_lines(content: &str, start_line: u32, end_line: u32) -> String {
    if start_line == 0 || end_line < start_line {
        return String::new();
    }
    content
        .lines()
        .skip(start_line as usize - 1)
        .take((end_line - start_line + 1) as usize)
        .collect::<Vec<_>>()
        .join("\n")
}

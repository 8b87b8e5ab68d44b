// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wrapping and cursor-positioning logic for the multiline input box.
//!
//! [`wrap_content`] converts a raw string and byte-index cursor into a list of
//! visual lines and the `(row, col)` position of the cursor in those lines.
//! It respects both explicit newlines and soft-wrap at a given display-column
//! limit, and handles multi-byte UTF-8 and wide (CJK / emoji) characters
//! correctly via `unicode_width`.

use unicode_width::UnicodeWidthChar;

/// Output of [`wrap_content`].
#[derive(Debug, PartialEq, Eq)]
pub struct WrapState {
    /// Visual lines produced by splitting on `\n` and soft-wrapping at `width`.
    /// Always contains at least one element (possibly `""`).
    pub lines: Vec<String>,
    /// Index into `lines` that contains the cursor position.
    pub cursor_row: usize,
    /// Display-column offset within `lines[cursor_row]` of the cursor.
    pub cursor_col: usize,
}

/// Wrap `content` into visual lines of at most `width` display columns and
/// compute where `cursor_byte` (a UTF-8 byte offset into `content`) falls in
/// the resulting line grid.
///
/// Rules
/// -----
/// * `'\n'` always starts a new visual line.
/// * A character that *would* push the column count past `width` is
///   soft-wrapped: it starts a new visual line at column 0.
/// * Wide characters (e.g. CJK ideographs) count as 2 columns.
/// * Zero-width characters (e.g. combining marks) count as 0 columns.
/// * `cursor_byte` is clamped to `content.len()` if out of range.
/// * When `width == 0` soft-wrapping is disabled (infinite line width).
///
/// The returned `cursor_row` / `cursor_col` values are suitable for passing
/// directly to `frame.set_cursor_position`.
pub fn wrap_content(content: &str, width: usize, cursor_byte: usize) -> WrapState {
    let cursor_byte = cursor_byte.min(content.len());

    let mut lines: Vec<String> = Vec::new();
    let mut cur_line = String::new();
    let mut cur_col: usize = 0; // display columns on the current line
    let mut cur_byte: usize = 0;
    let mut c_row: usize = 0;
    let mut c_col: usize = 0;
    let mut cursor_placed = false;

    for ch in content.chars() {
        let ch_bytes = ch.len_utf8();
        let ch_width = if ch == '\n' {
            0
        } else {
            UnicodeWidthChar::width(ch).unwrap_or(1)
        };

        // Soft-wrap: if adding this non-newline char would exceed `width`,
        // flush the current line and start a new one first.
        let soft_wrap =
            width > 0 && ch != '\n' && ch_width > 0 && cur_col + ch_width > width;
        if soft_wrap {
            lines.push(std::mem::take(&mut cur_line));
            cur_col = 0;
        }

        // The cursor sits *before* the character at `cursor_byte`.
        if !cursor_placed && cur_byte == cursor_byte {
            cursor_placed = true;
            c_row = lines.len();
            c_col = cur_col;
        }

        if ch == '\n' {
            lines.push(std::mem::take(&mut cur_line));
            cur_col = 0;
        } else {
            cur_line.push(ch);
            cur_col += ch_width;
        }

        cur_byte += ch_bytes;
    }

    // Cursor at the very end of the string.
    if !cursor_placed && cur_byte == cursor_byte {
        c_row = lines.len();
        c_col = cur_col;
        // If the final line is exactly full the cursor logically starts the
        // next visual line (consistent with how most terminals render it).
        if width > 0 && c_col >= width {
            c_row += 1;
            c_col = 0;
        }
    }

    // Push whatever remains on the current line.
    lines.push(cur_line);

    // Ensure cursor_row is a valid index (can happen if cursor is on a newly
    // started line after a full-width line or a trailing newline).
    while c_row >= lines.len() {
        lines.push(String::new());
    }

    WrapState { lines, cursor_row: c_row, cursor_col: c_col }
}

/// Given an already-computed `WrapState`, return the byte offset in `content`
/// that corresponds to visual `(target_row, target_col)`.
///
/// If `target_col` exceeds the length of the target visual line the cursor is
/// placed at the end of that line (clamped).  This matches the behaviour of
/// most editors when moving vertically across lines of different lengths.
pub fn byte_offset_at_row_col(content: &str, width: usize, target_row: usize, target_col: usize) -> usize {
    // Re-run the wrap loop, stopping when we enter the target row and have
    // consumed `target_col` display columns (or the line ends).
    let mut lines: Vec<String> = Vec::new();
    let mut cur_line = String::new();
    let mut cur_col: usize = 0;
    let mut cur_byte: usize = 0;
    // byte-start of each visual line
    let mut line_start_bytes: Vec<usize> = vec![0];

    for ch in content.chars() {
        let ch_bytes = ch.len_utf8();
        let ch_width = if ch == '\n' {
            0
        } else {
            UnicodeWidthChar::width(ch).unwrap_or(1)
        };
        let soft_wrap = width > 0 && ch != '\n' && ch_width > 0 && cur_col + ch_width > width;
        if soft_wrap {
            lines.push(std::mem::take(&mut cur_line));
            cur_col = 0;
            line_start_bytes.push(cur_byte);
        }
        if ch == '\n' {
            lines.push(std::mem::take(&mut cur_line));
            cur_col = 0;
            line_start_bytes.push(cur_byte + ch_bytes);
        } else {
            cur_line.push(ch);
            cur_col += ch_width;
        }
        cur_byte += ch_bytes;
    }
    lines.push(cur_line);

    // Clamp target_row to valid range.
    let target_row = target_row.min(lines.len().saturating_sub(1));
    let line_start = line_start_bytes[target_row];
    let line_text = &lines[target_row];

    // Walk the target line until we reach target_col display columns.
    let mut col = 0usize;
    let mut byte_off = line_start;
    for ch in line_text.chars() {
        if col >= target_col {
            break;
        }
        col += UnicodeWidthChar::width(ch).unwrap_or(1);
        byte_off += ch.len_utf8();
    }
    byte_off.min(content.len())
}

/// Adjust `scroll_offset` so that `cursor_row` is inside the visible window.
///
/// * If the cursor is above the window, the window scrolls up.
/// * If the cursor is below the window, the window scrolls down just enough
///   to make the cursor the last visible row.
/// * `visible_height == 0` is a no-op.
pub fn adjust_scroll(cursor_row: usize, visible_height: usize, scroll_offset: &mut usize) {
    if visible_height == 0 {
        return;
    }
    if cursor_row < *scroll_offset {
        *scroll_offset = cursor_row;
    } else if cursor_row >= *scroll_offset + visible_height {
        *scroll_offset = cursor_row + 1 - visible_height;
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::borrow::Cow;

use comfy_table::{Table, presets::ASCII_BORDERS_ONLY_CONDENSED};

use super::Listing;

/// Maximum width for free-form columns
const MAX_WIDE_COLUMN_WIDTH: usize = 60;

/// Columns that get truncated in table mode
const WIDE_COLUMNS: &[&str] = &["LABELS", "CACHE", "WATCHING", "ERROR"];

/// Truncate a string to max_len chars, adding "..." if truncated
fn truncate_value(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        Cow::Borrowed(s)
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        Cow::Owned(format!("{}...", truncated))
    }
}

pub struct TableFormatter;

impl TableFormatter {
    pub fn format(listing: &Listing, no_headers: bool) -> String {
        if listing.is_empty() {
            return "No resources found".to_string();
        }

        let mut table = Table::new();
        table.load_preset(ASCII_BORDERS_ONLY_CONDENSED);

        let wide: Vec<bool> = listing
            .columns
            .iter()
            .map(|col| WIDE_COLUMNS.contains(&col.as_str()))
            .collect();

        if !no_headers {
            table.set_header(&listing.columns);
        }

        for row in &listing.rows {
            let cells: Vec<Cow<'_, str>> = row
                .iter()
                .zip(wide.iter().chain(std::iter::repeat(&false)))
                .map(|(val, &wide)| {
                    if wide {
                        truncate_value(val, MAX_WIDE_COLUMN_WIDTH)
                    } else {
                        Cow::Borrowed(val.as_str())
                    }
                })
                .collect();
            table.add_row(cells);
        }

        format!("{}\n({} rows)", table, listing.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_value() {
        assert!(matches!(truncate_value("hello", 10), Cow::Borrowed("hello")));
        assert!(matches!(truncate_value("1234567890", 10), Cow::Borrowed(_)));

        let long = truncate_value("this is a very long string that needs truncation", 20);
        assert!(long.ends_with("..."));
        assert_eq!(long.chars().count(), 20);
    }

    #[test]
    fn test_truncate_value_unicode() {
        let result = truncate_value("日本語テストです長い文字列", 8);
        assert_eq!(result.chars().count(), 8);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn test_wide_column_truncated() {
        let mut listing = Listing::new(&["NAME", "LABELS"]);
        listing.push(vec!["web-0".to_string(), "a".repeat(80)]);

        let output = TableFormatter::format(&listing, false);
        assert!(!output.contains(&"a".repeat(80)));
        assert!(output.contains("..."));
        assert!(output.ends_with("(1 rows)"));
    }

    #[test]
    fn test_normal_column_kept() {
        let mut listing = Listing::new(&["NAME", "UID"]);
        listing.push(vec!["web-0".to_string(), "a".repeat(80)]);
        assert!(TableFormatter::format(&listing, false).contains(&"a".repeat(80)));
    }

    #[test]
    fn test_no_headers() {
        let mut listing = Listing::new(&["CLUSTER"]);
        listing.push(vec!["prod".to_string()]);
        assert!(TableFormatter::format(&listing, false).contains("CLUSTER"));
        assert!(!TableFormatter::format(&listing, true).contains("CLUSTER"));
    }

    #[test]
    fn test_empty() {
        assert_eq!(TableFormatter::format(&Listing::new(&["NAME"]), false), "No resources found");
    }
}

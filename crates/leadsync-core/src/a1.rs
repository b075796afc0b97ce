//! A1-notation helpers. Columns are zero-based, rows are one-based as in the sheet UI.

/// Base-26 column letters: 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Inverse of [`column_letter`]. Case-insensitive.
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut n = 0usize;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let value = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n = n.checked_mul(26)?.checked_add(value)?;
    }
    Some(n - 1)
}

pub fn quote_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

/// The whole tab.
pub fn tab_range(tab: &str) -> String {
    quote_tab(tab)
}

/// One row spanning `width` columns starting at column A.
pub fn row_range(tab: &str, row: usize, width: usize) -> String {
    let last = column_letter(width.max(1) - 1);
    format!("{}!A{row}:{last}{row}", quote_tab(tab))
}

pub fn cell_range(tab: &str, col: usize, row: usize) -> String {
    format!("{}!{}{row}", quote_tab(tab), column_letter(col))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CellRef {
    pub col: Option<usize>,
    pub row: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct A1Range {
    pub tab: String,
    pub start: Option<CellRef>,
    pub end: Option<CellRef>,
}

impl A1Range {
    /// Zero-based inclusive column bounds; `None` upper bound means unbounded.
    pub fn col_bounds(&self) -> (usize, Option<usize>) {
        let start = self.start.and_then(|c| c.col).unwrap_or(0);
        let end = match (self.start, self.end) {
            (_, Some(end)) => end.col,
            (Some(start), None) => start.col,
            (None, None) => None,
        };
        (start, end)
    }

    /// One-based inclusive row bounds; `None` upper bound means unbounded.
    pub fn row_bounds(&self) -> (usize, Option<usize>) {
        let start = self.start.and_then(|c| c.row).unwrap_or(1);
        let end = match (self.start, self.end) {
            (_, Some(end)) => end.row,
            (Some(start), None) => start.row,
            (None, None) => None,
        };
        (start, end)
    }
}

/// Parses `Tab`, `'My Tab'!A1`, `Tab!A1:C9`, `Tab!A:C` and `Tab!2:2`.
pub fn parse_range(input: &str) -> Option<A1Range> {
    let input = input.trim();
    let (tab, rest) = if let Some(quoted) = input.strip_prefix('\'') {
        let mut tab = String::new();
        let mut chars = quoted.char_indices().peekable();
        let mut close = None;
        while let Some((idx, ch)) = chars.next() {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    tab.push('\'');
                    chars.next();
                    continue;
                }
                close = Some(idx + 1);
                break;
            }
            tab.push(ch);
        }
        (tab, &quoted[close?..])
    } else {
        match input.find('!') {
            Some(idx) => (input[..idx].to_string(), &input[idx..]),
            None => (input.to_string(), ""),
        }
    };

    if tab.is_empty() {
        return None;
    }
    if rest.is_empty() {
        return Some(A1Range {
            tab,
            start: None,
            end: None,
        });
    }
    let cells = rest.strip_prefix('!')?;
    let (start, end) = match cells.split_once(':') {
        Some((a, b)) => (parse_cell(a)?, Some(parse_cell(b)?)),
        None => (parse_cell(cells)?, None),
    };
    Some(A1Range {
        tab,
        start: Some(start),
        end,
    })
}

fn parse_cell(text: &str) -> Option<CellRef> {
    let split = text
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(text.len());
    let (letters, digits) = text.split_at(split);
    let col = if letters.is_empty() {
        None
    } else {
        Some(column_index(letters)?)
    };
    let row = if digits.is_empty() {
        None
    } else {
        Some(digits.parse::<usize>().ok().filter(|r| *r > 0)?)
    };
    if col.is_none() && row.is_none() {
        return None;
    }
    Some(CellRef { col, row })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_follow_base_26() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
        for idx in [0, 7, 26, 300, 18_277] {
            assert_eq!(column_index(&column_letter(idx)), Some(idx));
        }
        assert_eq!(column_index("a"), Some(0));
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn ranges_quote_tab_names() {
        assert_eq!(row_range("Main Leads", 7, 3), "'Main Leads'!A7:C7");
        assert_eq!(cell_range("Bob's", 27, 2), "'Bob''s'!AB2");
        assert_eq!(tab_range("Extra"), "'Extra'");
    }

    #[test]
    fn parses_quoted_and_bare_ranges() {
        let r = parse_range("'Bob''s Leads'!B2:D9").unwrap();
        assert_eq!(r.tab, "Bob's Leads");
        assert_eq!(r.col_bounds(), (1, Some(3)));
        assert_eq!(r.row_bounds(), (2, Some(9)));

        let whole = parse_range("Main").unwrap();
        assert_eq!(whole.tab, "Main");
        assert_eq!(whole.col_bounds(), (0, None));
        assert_eq!(whole.row_bounds(), (1, None));

        let cell = parse_range("'Main Leads'!H7").unwrap();
        assert_eq!(cell.col_bounds(), (7, Some(7)));
        assert_eq!(cell.row_bounds(), (7, Some(7)));

        let cols = parse_range("Main!A:C").unwrap();
        assert_eq!(cols.row_bounds(), (1, None));
        assert_eq!(cols.col_bounds(), (0, Some(2)));

        let rows = parse_range("Main!1:1").unwrap();
        assert_eq!(rows.row_bounds(), (1, Some(1)));
        assert_eq!(rows.col_bounds(), (0, None));
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!(parse_range("").is_none());
        assert!(parse_range("'unterminated").is_none());
        assert!(parse_range("Main!").is_none());
        assert!(parse_range("Main!A0").is_none());
        assert!(parse_range("'Main'junk").is_none());
    }
}

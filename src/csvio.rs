//! Minimal quoted-CSV reading and writing for the flat-file interchange
//! formats (side-channel score files, consolidated outputs, agreement
//! report). Quoting on write is unconditional so downstream spreadsheet
//! tooling never has to guess at embedded commas.

pub fn quote_field(field: &str) -> String {
    let mut quoted = String::with_capacity(field.len() + 2);
    quoted.push('"');
    for character in field.chars() {
        if character == '"' {
            quoted.push('"');
        }
        quoted.push(character);
    }
    quoted.push('"');
    quoted
}

pub fn format_row_quoted(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| quote_field(field))
        .collect::<Vec<String>>()
        .join(",")
}

pub fn format_row_plain(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| {
            if field.contains(',') || field.contains('"') || field.contains('\n') {
                quote_field(field)
            } else {
                field.clone()
            }
        })
        .collect::<Vec<String>>()
        .join(",")
}

/// Parses CSV text into rows of fields. Handles quoted fields, doubled
/// quotes, CRLF line endings, and embedded newlines inside quotes. Returns
/// `None` when a quoted field is left unterminated.
pub fn parse_rows(text: &str) -> Option<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(character) = chars.next() {
        if in_quotes {
            match character {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(character),
            }
            continue;
        }

        match character {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(character),
        }
    }

    if in_quotes {
        return None;
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    Some(rows)
}

//! Identifier and literal quoting for DDL, which cannot take bind parameters.

/// Quotes an identifier the way `quote_ident()` does server-side, except that
/// it always quotes so case and reserved words are preserved verbatim.
pub fn quote_ident(ident: &str) -> String {
    let mut quoted = String::with_capacity(ident.len() + 2);
    quoted.push('"');
    for c in ident.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Quotes a string literal. Backslashes switch to the `E'...'` form so the
/// result is correct whatever `standard_conforming_strings` is set to.
pub fn quote_literal(value: &str) -> String {
    let escape = value.contains('\\');
    let mut quoted = String::with_capacity(value.len() + 3);
    if escape {
        quoted.push('E');
    }
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

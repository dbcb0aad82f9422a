// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! Light textual scanning of Clojure source.
//!
//! Two jobs, neither of which needs a real reader: pull the namespace out
//! of a buffer so evaluations run in the right context, and walk backwards
//! from a cursor to find the enclosing call and which argument the cursor
//! sits on. Heuristics, not a parser: line comments and strings are
//! respected, reader macros are not.

use lazy_static::lazy_static;
use regex::Regex;

const TEXT_DELIMITER: char = '"';
const TEXT_ESCAPE: char = '\\';
const COMMENT_DELIMITER: char = ';';

lazy_static! {
    /// First `(ns …)` or `(in-ns '…)` form in the buffer.
    static ref NS_FORM: Regex =
        Regex::new(r"\((?:in-)?ns[\s,]+'?([\w\-.*+!?<>=]+)").unwrap();
}

/// The enclosing call at the end of a text fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionInfo {
    pub function_name: String,
    /// Zero-based index of the argument under the cursor; `0` while still
    /// on the function name or its first argument.
    pub parameter_position: usize,
}

/// Namespace the buffer's code lives in, `"user"` when no ns form exists.
pub fn namespace_of(source: &str) -> &str {
    NS_FORM
        .captures(source)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .unwrap_or("user")
}

/// Scan backwards from the end of `text` (everything before the cursor)
/// for the innermost unclosed `(`. Returns `None` for unbalanced or empty
/// fragments.
pub fn expression_info(text: &str) -> Option<ExpressionInfo> {
    let uncommented = remove_comments(text);
    let chars: Vec<char> = uncommented.chars().collect();
    let relative = relative_expression_info(&chars, '(')?;

    let name: String = chars[relative.start + 1..]
        .iter()
        .skip_while(|c| is_whitespace(**c))
        .take_while(|c| !is_operator_delimiter(**c))
        .collect();
    if name.is_empty() {
        return None;
    }

    Some(ExpressionInfo {
        function_name: name,
        parameter_position: relative.parameters.max(0) as usize,
    })
}

fn is_whitespace(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn is_operator_delimiter(c: char) -> bool {
    is_whitespace(c) || c == '(' || c == '{' || c == '['
}

fn is_open_delimiter(c: char) -> bool {
    c == '(' || c == '{' || c == '['
}

/// Opening counterpart of a closing delimiter.
fn opening_for(close: char) -> Option<char> {
    match close {
        ')' => Some('('),
        '}' => Some('{'),
        ']' => Some('['),
        TEXT_DELIMITER => Some(TEXT_DELIMITER),
        _ => None,
    }
}

struct RelativeInfo {
    /// Index of the opening delimiter within the scanned slice.
    start: usize,
    /// May end at -1 when the cursor is still on the function name.
    parameters: i64,
}

fn relative_expression_info(chars: &[char], open_char: char) -> Option<RelativeInfo> {
    let mut pos: i64 = chars.len() as i64 - 1;
    let mut parameters: i64 = -1;
    let mut new_parameter_found = false;

    while pos >= 0 {
        let index = pos as usize;
        let c = chars[index];

        // The opening delimiter we are looking for (escaped quotes do not
        // open strings).
        if c == open_char && (open_char != TEXT_DELIMITER || index == 0 || chars[index - 1] != TEXT_ESCAPE)
        {
            if new_parameter_found {
                // That "parameter" was the function name itself.
                parameters -= 1;
            }
            return Some(RelativeInfo {
                start: index,
                parameters,
            });
        }

        // Inside a string everything else is payload.
        if open_char == TEXT_DELIMITER {
            pos -= 1;
            continue;
        }

        // An unsearched-for opening delimiter means the fragment is
        // unbalanced.
        if is_open_delimiter(c) {
            return None;
        }

        if is_whitespace(c) {
            if !new_parameter_found {
                parameters += 1;
                new_parameter_found = true;
            }
            pos -= 1;
            continue;
        }

        // A closing delimiter: skip the whole nested form it closes.
        if let Some(inner_open) = opening_for(c) {
            let inner = relative_expression_info(&chars[..index], inner_open)?;
            pos = inner.start as i64 - 1;
            parameters += 1;
            new_parameter_found = true;
            continue;
        }

        new_parameter_found = false;
        pos -= 1;
    }

    None
}

/// Strip `;` line comments, leaving strings intact.
fn remove_comments(text: &str) -> String {
    text.lines()
        .map(strip_line_comment)
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_line_comment(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut inside_string = false;

    for (i, c) in chars.iter().enumerate() {
        if *c == TEXT_DELIMITER {
            inside_string = !inside_string || (i > 0 && chars[i - 1] == TEXT_ESCAPE);
            continue;
        }
        if *c == COMMENT_DELIMITER && !inside_string {
            return chars[..i].iter().collect();
        }
    }

    line.to_string()
}

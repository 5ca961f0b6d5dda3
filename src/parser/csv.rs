//! CSV fixture parsing for data-driven scripts.

use regex::Regex;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::OnceLock;

use super::script::QUOTE_PLACEHOLDER;

fn csv_regex() -> &'static Regex {
    static CSV: OnceLock<Regex> = OnceLock::new();
    CSV.get_or_init(|| {
        Regex::new(r#"([^\s,"]+)|"([^"]*)"|\s*,\s*"#).expect("csv pattern is valid")
    })
}

/// One data row, keyed by header name in header order.
/// Columns missing from a short row hold `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataRow {
    columns: Vec<(String, Option<String>)>,
}

impl DataRow {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(h, _)| h == header)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn contains(&self, header: &str) -> bool {
        self.columns.iter().any(|(h, _)| h == header)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.columns.iter().map(|(h, v)| (h.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Split one CSV line into its values. Separators are dropped; quoted values
/// lose their surrounding quotes.
pub fn tokenize_csv(line: &str) -> Vec<String> {
    let protected = line.trim().replace("\\\"", QUOTE_PLACEHOLDER);
    csv_regex()
        .captures_iter(&protected)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().trim().replace(QUOTE_PLACEHOLDER, "\\\""))
        .collect()
}

/// Parse CSV text. The first line is the header row; `None` when there is no
/// header (empty text or a header line with no values).
pub fn parse_csv(text: &str, ignore_blanks: bool) -> Option<Vec<DataRow>> {
    let mut lines = text.lines().map(str::trim);
    let headers = tokenize_csv(lines.next()?);
    if headers.is_empty() {
        return None;
    }

    let rows = lines
        .filter(|line| !(ignore_blanks && line.is_empty()))
        .map(|line| {
            let mut values = tokenize_csv(line).into_iter();
            DataRow {
                columns: headers
                    .iter()
                    .map(|h| (h.clone(), values.next()))
                    .collect(),
            }
        })
        .collect();
    Some(rows)
}

/// Parse a CSV file. `None` when the file is missing or has no header row.
pub fn parse_csv_file(path: &Path, ignore_blanks: bool) -> Option<Vec<DataRow>> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_csv(&text, ignore_blanks),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            log::warn!("unable to read data file {}: {}", path.display(), e);
            Some(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_csv() {
        assert_eq!(tokenize_csv("first, last ,age"), vec!["first", "last", "age"]);
        assert_eq!(
            tokenize_csv(r#""Bo Bo", "Smith, Jr." , 3"#),
            vec!["Bo Bo", "Smith, Jr.", "3"]
        );
    }

    #[test]
    fn test_tokenize_csv_escaped_quote() {
        assert_eq!(
            tokenize_csv(r#""say \"hi\"",x"#),
            vec![r#"say \"hi\""#, "x"]
        );
    }

    #[test]
    fn test_parse_csv_zips_headers() {
        let rows = parse_csv("user,pass\njoe,secret\n\nann\n", true).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("user"), Some("joe"));
        assert_eq!(rows[0].get("pass"), Some("secret"));
        assert_eq!(rows[1].get("user"), Some("ann"));
        assert!(rows[1].contains("pass"));
        assert_eq!(rows[1].get("pass"), None);
    }

    #[test]
    fn test_parse_csv_keeps_blank_rows_when_asked() {
        let rows = parse_csv("a,b\n\n1,2", false).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("a"), None);
    }

    #[test]
    fn test_parse_csv_without_header() {
        assert!(parse_csv("", true).is_none());
        assert!(parse_csv(" , \n1,2", true).is_none());
        assert_eq!(parse_csv("a,b", true), Some(vec![]));
    }

    #[test]
    fn test_parse_csv_file_missing() {
        assert!(parse_csv_file(Path::new("/no/such/data.csv"), true).is_none());
    }
}

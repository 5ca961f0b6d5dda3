pub mod csv;
pub mod script;
pub mod types;

pub use csv::{parse_csv, parse_csv_file, tokenize_csv, DataRow};
pub use script::{parse, parse_line, parse_script, parse_script_file, tokenize};
pub use types::{Command, CommandValidity};

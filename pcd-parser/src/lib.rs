pub mod parsers;

pub use parsers::{get_extension, Extension, Parser, ParserProvider};

//! SQL generation for feature stores
//!
//! Identifier handling, filter encoding, statement compilation and DDL.

pub mod ddl;
pub mod filter;
pub mod sanitize;
pub mod statement;

pub use ddl::{CreateTable, DdlGenerator};
pub use sanitize::{POSTGRES_RESERVED_WORDS, qualify_table, quote_identifier, validate_identifier};
pub use statement::{BindParam, CountStatement, Statement, StatementCompiler};

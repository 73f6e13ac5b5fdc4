//! tablemerge - merge staging tables into canonical tables.
//!
//! Records are copied from "import" tables into canonical tables of an
//! Airtable-style base without inserting duplicates, empty fields of existing
//! records are filled in, and reference fields are rebuilt from textual key
//! lists once every table has been copied.

pub mod cli;
pub mod config;
pub mod migrate;
pub mod staging;
pub mod store;

//! Immutable column storage for tabula.
//!
//! This crate focuses on:
//! - A fixed-length [`BitSet`] used to describe which rows of a table are visible.
//! - A dynamically typed [`Value`] shared by every column representation.
//! - The [`Column`] storage adapter (plain values, typed numbers, dictionary-encoded strings).
//! - [`ColumnTable`], an ordered, name-indexed set of shared column handles.

#![forbid(unsafe_code)]

mod bitmap;
mod column;
mod table;
mod types;

pub use crate::bitmap::{BitSet, Ones};
pub use crate::column::{
    Column, ColumnRef, DictionaryColumn, DictionaryLookup, NumberColumn, ValueColumn,
};
pub use crate::table::{
    ColumnSchema, ColumnTable, ColumnType, ColumnarError, ColumnarResult, TableBuilder,
};
pub use crate::types::Value;

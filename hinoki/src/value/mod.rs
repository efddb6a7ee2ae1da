//! Object types of the language.
//!
//! Each type implements [`Object`][`crate::heap::Object`]
//! and extends [`Heap`][`crate::heap::Heap`]
//! with constructors and accessors.

pub use self::{
    character::Character,
    number::Number,
    pair::Pair,
    symbol::{Symbol, SymbolTable},
    vector::Vector,
};

mod character;
mod number;
mod pair;
mod symbol;
mod vector;

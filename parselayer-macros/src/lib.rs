//! Procedural macros for the parselayer project.
//!
//! `#[derive(Record)]` and `#[derive(Fields)]` generate the static field descriptors and the
//! field-by-field conversion code that the core crate's converter drives. Field and
//! container options are given through `#[parse(...)]` attributes:
//!
//! - container: `class = "Name"`, `endpoint = "path"` (records only)
//! - field: `rename = "wire"`, `skip`, `omit_empty`, `flatten`, `extra`, `ignore`

#[allow(unused_extern_crates)]
extern crate self as parselayer_macros;

mod shape;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `FieldSet`, `FromWire`, `ToWire` and `Record` for a named-field struct.
///
/// Records encode to a Pointer when used as a field value and decode from either a full
/// object or a Pointer.
#[proc_macro_derive(Record, attributes(parse))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    shape::expand(&input, true)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derives `FieldSet`, `FromWire` and `ToWire` for a named-field struct that is embedded in
/// records, either flattened or as a nested object.
#[proc_macro_derive(Fields, attributes(parse))]
pub fn derive_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    shape::expand(&input, false)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

//! cayx Derive — procedural macros for the cayx persistence engine.
//!
//! Provides `#[derive(DataObject)]` for typed mapping of fetched data rows.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derive macro mapping a data row to a struct.
///
/// # Example
///
/// ```ignore
/// #[derive(DataObject)]
/// #[cayx(entity = "Artist")]
/// pub struct ArtistRow {
///     #[cayx(column = "ARTIST_ID")]
///     pub id: i64,
///     pub artist_name: String,
///     pub date_of_birth: Option<String>,
/// }
/// ```
///
/// Columns default to the upper-cased field name (`artist_name` → `ARTIST_NAME`).
///
/// Generates:
/// - `ENTITY_NAME` constant (defaults to the struct name)
/// - `COLUMNS` constant, in field order
/// - `FromDataRow` trait implementation
#[proc_macro_derive(DataObject, attributes(cayx))]
pub fn derive_data_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let entity_name = match cayx_attr(&input.attrs, "entity")? {
        Some(entity) => entity,
        None => name.to_string(),
    };

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "DataObject can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "DataObject can only be derived for structs",
            ));
        }
    };

    let mut columns = Vec::with_capacity(fields.len());
    let mut from_row_fields = Vec::with_capacity(fields.len());
    for field in fields {
        let Some(ident) = &field.ident else {
            continue;
        };
        let column = match cayx_attr(&field.attrs, "column")? {
            Some(column) => column,
            None => ident.to_string().trim_start_matches("r#").to_uppercase(),
        };
        let field_type = &field.ty;

        from_row_fields.push(quote! {
            #ident: <#field_type as ::cayx_core::row::FromValue>::from_value(row.get(#column))
                .map_err(|e| ::cayx_core::error::CayxError::InvalidOperation {
                    message: format!("column {}: {}", #column, e),
                    context: #entity_name.to_string(),
                })?
        });
        columns.push(column);
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            pub const ENTITY_NAME: &'static str = #entity_name;

            pub const COLUMNS: &'static [&'static str] = &[#(#columns),*];
        }

        impl #impl_generics ::cayx_core::row::FromDataRow for #name #ty_generics #where_clause {
            fn from_row(row: &::cayx_core::row::DataRow) -> ::cayx_core::error::CayxResult<Self> {
                Ok(Self {
                    #(#from_row_fields),*
                })
            }
        }
    })
}

/// Value of `#[cayx(key = "...")]`, if present.
fn cayx_attr(attrs: &[syn::Attribute], key: &str) -> syn::Result<Option<String>> {
    for attr in attrs {
        if !attr.path().is_ident("cayx") {
            continue;
        }
        let meta = attr.parse_args::<syn::Meta>()?;
        if let syn::Meta::NameValue(nv) = meta
            && nv.path.is_ident(key)
        {
            return match nv.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(s),
                    ..
                }) => Ok(Some(s.value())),
                other => Err(syn::Error::new_spanned(other, "expected a string literal")),
            };
        }
    }
    Ok(None)
}

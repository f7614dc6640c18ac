//! Procedural macros for the inventory graph layer
//!
//! - `#[derive(Entity)]` - Decode a scanned node into a plain struct

use convert_case::{Case, Casing};
use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, parse_macro_input};

/// Implement `inventory_graph::orm::Entity` for a struct with named fields.
///
/// # Usage
///
/// ```ignore
/// #[derive(Entity)]
/// #[entity(descriptor = "LOCATION")] // defaults to the struct name in UPPER_SNAKE case
/// pub struct Location {
///     #[entity(id)]
///     pub id: String,
///     pub name: String,
///     #[entity(column = "site_survey_needed")]
///     pub survey: Option<bool>,
///     #[entity(skip)] // filled with Default::default()
///     pub cached: usize,
/// }
/// ```
///
/// The descriptor static must be in scope where the struct is defined.
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

enum FieldKind {
    Id,
    Column(String),
    Skip,
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    let mut descriptor = Ident::new(
        &name.to_string().to_case(Case::UpperSnake),
        Span::call_site(),
    );
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("descriptor") {
                let value: LitStr = meta.value()?.parse()?;
                descriptor = value.parse()?;
                Ok(())
            } else {
                Err(meta.error("expected `descriptor = \"...\"`"))
            }
        })?;
    }

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(name, "Entity can only be derived for structs"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(name, "Entity needs named fields"));
    };

    let mut inits = Vec::with_capacity(fields.named.len());
    for field in &fields.named {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "unnamed field"))?;
        let kind = field_kind(field, ident)?;
        inits.push(match kind {
            FieldKind::Id => quote! {
                #ident: ::inventory_graph::orm::FromId::from_id(node.id())?
            },
            FieldKind::Column(column) => quote! {
                #ident: node.get(#column)?
            },
            FieldKind::Skip => quote! {
                #ident: ::std::default::Default::default()
            },
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::inventory_graph::orm::Entity for #name #ty_generics #where_clause {
            fn descriptor() -> &'static ::inventory_graph::orm::EntityDescriptor {
                &#descriptor
            }

            fn from_node(
                node: &::inventory_graph::orm::Node,
            ) -> ::std::result::Result<Self, ::inventory_graph::orm::Error> {
                if !::std::ptr::eq(node.entity(), Self::descriptor()) {
                    return ::std::result::Result::Err(::inventory_graph::orm::Error::Invariant(
                        ::std::format!(
                            "cannot decode a {} node as {}",
                            node.entity().label,
                            ::std::stringify!(#name)
                        ),
                    ));
                }
                ::std::result::Result::Ok(Self {
                    #(#inits,)*
                })
            }
        }
    })
}

fn field_kind(field: &syn::Field, ident: &Ident) -> syn::Result<FieldKind> {
    let mut kind = FieldKind::Column(ident.to_string());
    for attr in field.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                kind = FieldKind::Id;
                Ok(())
            } else if meta.path.is_ident("skip") {
                kind = FieldKind::Skip;
                Ok(())
            } else if meta.path.is_ident("column") {
                let value: LitStr = meta.value()?.parse()?;
                kind = FieldKind::Column(value.value());
                Ok(())
            } else {
                Err(meta.error("expected `id`, `skip` or `column = \"...\"`"))
            }
        })?;
    }
    Ok(kind)
}

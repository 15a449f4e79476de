use std::collections::HashMap;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    spanned::Spanned, Data, DeriveInput, Field, Fields, GenericArgument, Ident, LitStr,
    PathArguments, Token, Type,
};

const CAPABILITIES: &[&str] = &[
    "soft_delete",
    "deleted_at",
    "deleted_by",
    "created_at",
    "created_by",
    "modified_at",
    "modified_by",
    "tenant",
    "version",
];

pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct KeyField<'a> {
    ident: &'a Ident,
    ty: &'a Type,
    column: String,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let type_name = name.to_string();
    let table = extract_table(input)?;
    reject_rename_all(input)?;
    let fields = named_fields(input)?;

    // Rust field name -> serialized row field.
    let mut columns = HashMap::new();
    for field in fields {
        if let Some(ident) = field.ident.as_ref() {
            let column = serde_name(field)?.unwrap_or_else(|| ident.to_string());
            columns.insert(ident.to_string(), column);
        }
    }

    let mut keys: Vec<KeyField> = Vec::new();
    let mut generated = false;
    let mut navigations = Vec::new();
    let mut capabilities = Vec::new();

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let column = columns
            .get(&ident.to_string())
            .cloned()
            .unwrap_or_else(|| ident.to_string());

        for attr in &field.attrs {
            if !attr.path().is_ident("entity") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("key") {
                    keys.push(KeyField {
                        ident,
                        ty: &field.ty,
                        column: column.clone(),
                    });
                    return Ok(());
                }
                if meta.path.is_ident("generated") {
                    generated = true;
                    return Ok(());
                }
                if meta.path.is_ident("navigation") {
                    let mut fk = Vec::new();
                    meta.parse_nested_meta(|inner| {
                        if !inner.path.is_ident("fk") {
                            return Err(inner.error("expected `fk(child_field = parent_field)`"));
                        }
                        inner.parse_nested_meta(|pair| {
                            let child = pair
                                .path
                                .get_ident()
                                .ok_or_else(|| pair.error("expected a field name"))?
                                .to_string();
                            let parent: Ident = pair.value()?.parse()?;
                            let parent = columns.get(&parent.to_string()).cloned().ok_or_else(|| {
                                syn::Error::new(
                                    parent.span(),
                                    format!("Entity derive: no field named `{}` on this struct", parent),
                                )
                            })?;
                            fk.push((child, parent));
                            Ok(())
                        })
                    })?;
                    navigations.push(navigation_tokens(&column, &field.ty, &fk)?);
                    return Ok(());
                }
                if let Some(cap) = CAPABILITIES.iter().find(|c| meta.path.is_ident(**c)) {
                    let method = format_ident!("{}", cap);
                    capabilities.push(quote! { .#method(#column) });
                    return Ok(());
                }
                Err(meta.error("unsupported entity attribute"))
            })?;
        }
    }

    if keys.is_empty() {
        if let Some(field) = fields
            .iter()
            .find(|f| f.ident.as_ref().is_some_and(|i| i == "id"))
        {
            let ident = field.ident.as_ref().ok_or_else(|| syn::Error::new(field.span(), "unnamed field"))?;
            keys.push(KeyField {
                ident,
                ty: &field.ty,
                column: serde_name(field)?.unwrap_or_else(|| "id".to_string()),
            });
        }
    }
    if keys.is_empty() {
        return Err(syn::Error::new(
            name.span(),
            "Entity derive: no field marked with #[entity(key)] and no field named `id`",
        ));
    }
    if generated && keys.len() > 1 {
        return Err(syn::Error::new(
            name.span(),
            "Entity derive: `generated` requires a single key field",
        ));
    }

    let key_idents: Vec<_> = keys.iter().map(|k| k.ident).collect();
    let key_types: Vec<_> = keys.iter().map(|k| k.ty).collect();
    let key_columns: Vec<_> = keys.iter().map(|k| k.column.as_str()).collect();
    let (key_type, key_expr) = if keys.len() == 1 {
        let (ty, ident) = (key_types[0], key_idents[0]);
        (quote! { #ty }, quote! { ::std::clone::Clone::clone(&self.#ident) })
    } else {
        (
            quote! { (#(#key_types),*) },
            quote! { (#(::std::clone::Clone::clone(&self.#key_idents)),*) },
        )
    };
    let generated = generated.then(|| quote! { .generated_key() });

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::generic_repo::Entity for #name #ty_generics #where_clause {
            const TABLE: &'static str = #table;

            type Key = #key_type;

            fn key(&self) -> Self::Key {
                #key_expr
            }

            fn describe() -> ::generic_repo::EntityType {
                ::generic_repo::EntityType::builder(#table, #type_name)
                    .key(&[#(#key_columns),*])
                    #generated
                    #(#navigations)*
                    #(#capabilities)*
                    .build()
            }
        }
    })
}

fn named_fields(input: &DeriveInput) -> syn::Result<&syn::punctuated::Punctuated<Field, Token![,]>> {
    if let Data::Struct(data_struct) = &input.data {
        if let Fields::Named(fields) = &data_struct.fields {
            return Ok(&fields.named);
        }
    }
    Err(syn::Error::new(
        input.ident.span(),
        "Entity derive: only structs with named fields are supported",
    ))
}

fn extract_table(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }

        let mut table = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let value: LitStr = meta.value()?.parse()?;
                table = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported entity attribute"))
            }
        })?;

        if let Some(t) = table {
            return Ok(t);
        }
    }

    // Default: snake_case struct name + "s"
    Ok(format!("{}s", to_snake_case(&input.ident.to_string())))
}

/// Row field names are taken from the fields themselves, so a container-level
/// `rename_all` would make them disagree with what serde writes.
fn reject_rename_all(input: &DeriveInput) -> syn::Result<()> {
    for attr in &input.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") || meta.path.is_ident("rename_all_fields") {
                return Err(meta.error(
                    "Entity derive: #[serde(rename_all)] is not supported, rename fields individually",
                ));
            }
            if meta.input.peek(Token![=]) {
                let _: syn::Expr = meta.value()?.parse()?;
            } else if meta.input.peek(syn::token::Paren) {
                let _: proc_macro2::Group = meta.input.parse()?;
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// `#[serde(rename = "...")]` on a field, if any.
fn serde_name(field: &Field) -> syn::Result<Option<String>> {
    let mut rename = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") && meta.input.peek(Token![=]) {
                let value: LitStr = meta.value()?.parse()?;
                rename = Some(value.value());
            } else if meta.input.peek(Token![=]) {
                let _: syn::Expr = meta.value()?.parse()?;
            } else if meta.input.peek(syn::token::Paren) {
                let _: proc_macro2::Group = meta.input.parse()?;
            }
            Ok(())
        })?;
    }
    Ok(rename)
}

fn navigation_tokens(name: &str, ty: &Type, fk: &[(String, String)]) -> syn::Result<TokenStream2> {
    if fk.is_empty() {
        return Err(syn::Error::new(
            ty.span(),
            "navigation needs at least one fk(child_field = parent_field) pair",
        ));
    }
    let (target, collection) = navigation_target(ty).ok_or_else(|| {
        syn::Error::new(
            ty.span(),
            "navigation fields must be Vec<T>, Option<T> or Option<Box<T>>",
        )
    })?;
    let pairs = fk.iter().map(|(child, parent)| quote! { (#child, #parent) });
    let method = if collection {
        quote! { collection }
    } else {
        quote! { reference }
    };
    Ok(quote! { .#method::<#target>(#name, &[#(#pairs),*]) })
}

/// The child entity type and whether the navigation is a collection.
fn navigation_target(ty: &Type) -> Option<(&Type, bool)> {
    let (wrapper, inner) = single_generic(ty)?;
    match wrapper.to_string().as_str() {
        "Vec" => Some((inner, true)),
        "Option" => match single_generic(inner) {
            Some((boxed, target)) if boxed == "Box" => Some((target, false)),
            _ => Some((inner, false)),
        },
        "Box" => Some((inner, false)),
        _ => None,
    }
}

fn single_generic(ty: &Type) -> Option<(&Ident, &Type)> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some((&segment.ident, inner)),
        _ => None,
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}

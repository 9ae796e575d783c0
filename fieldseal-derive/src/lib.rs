//! Derive macros for `fieldseal`.
//!
//! `#[derive(EncryptedFields)]` lists the `#[encrypted]` fields of a struct
//! so that `FieldCodec::encrypt_entity` and `decrypt_entity` can walk them.

#![warn(clippy::pedantic, clippy::nursery)]

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, GenericArgument, PathArguments, Type};

/// Derive macro implementing `fieldseal::entity::EncryptedFields`.
///
/// Only `String` and `Option<String>` fields may carry `#[encrypted]`.
/// `None` values are skipped.
///
/// # Example
///
/// ```rust,ignore
/// use fieldseal_derive::EncryptedFields;
///
/// #[derive(EncryptedFields)]
/// struct Customer {
///     id: u64,
///     #[encrypted]
///     email: String,
///     #[encrypted]
///     nickname: Option<String>,
/// }
/// ```
#[proc_macro_derive(EncryptedFields, attributes(encrypted))]
pub fn derive_encrypted_fields(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input).unwrap_or_else(syn::Error::into_compile_error).into()
}

enum Kind {
    Text,
    OptionalText,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "EncryptedFields can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "EncryptedFields requires named fields",
        ));
    };

    let mut slots = Vec::new();
    for field in &fields.named {
        let Some(attr) = field.attrs.iter().find(|attr| attr.path().is_ident("encrypted")) else {
            continue;
        };
        attr.meta.require_path_only()?;

        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let name = ident.to_string();
        let slot = match field_kind(&field.ty) {
            Some(Kind::Text) => quote! {
                slots.push(::fieldseal::entity::FieldSlot::new(#name, &mut self.#ident));
            },
            Some(Kind::OptionalText) => quote! {
                if let ::core::option::Option::Some(value) = self.#ident.as_mut() {
                    slots.push(::fieldseal::entity::FieldSlot::new(#name, value));
                }
            },
            None => {
                return Err(syn::Error::new_spanned(
                    &field.ty,
                    "#[encrypted] fields must be `String` or `Option<String>`",
                ))
            }
        };
        slots.push(slot);
    }

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::fieldseal::entity::EncryptedFields for #ident #ty_generics #where_clause {
            #[allow(unused_mut)]
            fn encrypted_fields_mut(&mut self) -> ::std::vec::Vec<::fieldseal::entity::FieldSlot<'_>> {
                let mut slots = ::std::vec::Vec::new();
                #(#slots)*
                slots
            }
        }
    })
}

fn field_kind(ty: &Type) -> Option<Kind> {
    let segment = last_segment(ty)?;
    match &segment.arguments {
        PathArguments::None if segment.ident == "String" => Some(Kind::Text),
        PathArguments::AngleBracketed(args)
            if segment.ident == "Option" && args.args.len() == 1 =>
        {
            match args.args.first() {
                Some(GenericArgument::Type(inner)) => match field_kind(inner)? {
                    Kind::Text => Some(Kind::OptionalText),
                    Kind::OptionalText => None,
                },
                _ => None,
            }
        }
        _ => None,
    }
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(path) if path.qself.is_none() => path.path.segments.last(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_string_and_option_fields() {
        let input: DeriveInput = parse_quote! {
            struct Customer {
                id: u64,
                #[encrypted]
                email: String,
                #[encrypted]
                nickname: Option<String>,
                note: String,
            }
        };

        let output = expand(&input).unwrap().to_string();
        assert!(output.contains("EncryptedFields for Customer"));
        assert!(output.contains("\"email\""));
        assert!(output.contains("\"nickname\""));
        assert!(!output.contains("\"note\""));
        assert!(!output.contains("\"id\""));
    }

    #[test]
    fn test_qualified_string_is_accepted() {
        let input: DeriveInput = parse_quote! {
            struct Row {
                #[encrypted]
                secret: std::string::String,
                #[encrypted]
                other: core::option::Option<std::string::String>,
            }
        };
        assert!(expand(&input).is_ok());
    }

    #[test]
    fn test_non_text_field_is_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Row {
                #[encrypted]
                amount: u64,
            }
        };
        let err = expand(&input).unwrap_err();
        assert!(err.to_string().contains("String"));
    }

    #[test]
    fn test_enum_and_tuple_struct_are_rejected() {
        let input: DeriveInput = parse_quote! {
            enum Choice { A, B }
        };
        assert!(expand(&input).is_err());

        let input: DeriveInput = parse_quote! {
            struct Pair(#[encrypted] String, String);
        };
        assert!(expand(&input).is_err());
    }

    #[test]
    fn test_attribute_arguments_are_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Row {
                #[encrypted(mode = "aead")]
                secret: String,
            }
        };
        assert!(expand(&input).is_err());
    }
}

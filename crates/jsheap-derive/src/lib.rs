//! Derive macros for `jsheap`.
//!
//! `#[derive(Trace)]` marks every field of a struct or enum. Fields that can
//! never hold heap references may be excluded with `#[jsheap(skip)]`.
//! `#[derive(HeapObject)]` adds a `HeapObject` impl with the type name as the
//! class name (override with `#[jsheap(name = "...")]`).

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Attribute, Data, DeriveInput, Field,
    Fields, GenericParam, Generics, Ident, Index, LitStr, Path,
};

/// Container-level options shared by both derives.
struct ContainerOptions {
    krate: Path,
    name: Option<LitStr>,
}

impl ContainerOptions {
    fn parse(attrs: &[Attribute]) -> Result<Self, syn::Error> {
        let mut options = Self {
            krate: parse_quote!(::jsheap),
            name: None,
        };

        for attr in attrs {
            if !attr.path().is_ident("jsheap") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("crate") {
                    options.krate = meta.value()?.parse()?;
                    Ok(())
                } else if meta.path.is_ident("name") {
                    options.name = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("unsupported attribute"))
                }
            })?;
        }

        Ok(options)
    }
}

fn is_skipped(field: &Field) -> Result<bool, syn::Error> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("jsheap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute"))
            }
        })?;
    }
    Ok(skip)
}

#[proc_macro_derive(Trace, attributes(jsheap))]
pub fn derive_trace(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_trace(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.into_compile_error().into(),
    }
}

#[proc_macro_derive(HeapObject, attributes(jsheap))]
pub fn derive_heap_object(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_heap_object(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.into_compile_error().into(),
    }
}

fn expand_trace(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let options = ContainerOptions::parse(&input.attrs)?;
    let krate = &options.krate;
    let name = &input.ident;
    let generics = add_trait_bounds(krate, input.generics.clone());
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let trace_body = generate_trace_body(krate, name, &input.data)?;

    Ok(quote! {
        unsafe impl #impl_generics #krate::Trace for #name #ty_generics #where_clause {
            #[inline]
            #[allow(unused_variables)]
            fn trace(&self, marker: &mut #krate::Marker) {
                #trace_body
            }
        }
    })
}

fn expand_heap_object(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let options = ContainerOptions::parse(&input.attrs)?;
    let krate = &options.krate;
    let name = &input.ident;
    let class_name = options
        .name
        .unwrap_or_else(|| LitStr::new(&name.to_string(), name.span()));
    let generics = add_trait_bounds(krate, input.generics.clone());
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #krate::HeapObject for #name #ty_generics #where_clause {
            const NAME: &'static str = #class_name;
        }
    })
}

fn add_trait_bounds(krate: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_trace = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Trace")
                } else {
                    false
                }
            });
            if !has_trace {
                type_param.bounds.push(parse_quote!(#krate::Trace));
            }
            type_param.bounds.push(parse_quote!('static));
        }
    }
    generics
}

fn generate_trace_body(krate: &Path, name: &Ident, data: &Data) -> Result<TokenStream, syn::Error> {
    match data {
        Data::Struct(data) => generate_struct_trace(krate, &data.fields),
        Data::Enum(data) => generate_enum_trace(krate, name, data),
        Data::Union(u) => Ok(quote_spanned! {
            u.union_token.span => compile_error!("`Trace` must be manually implemented for unions");
        }),
    }
}

fn generate_struct_trace(krate: &Path, fields: &Fields) -> Result<TokenStream, syn::Error> {
    let mut calls = Vec::new();
    match fields {
        Fields::Named(f) => {
            for field in &f.named {
                if is_skipped(field)? {
                    continue;
                }
                let name = &field.ident;
                calls.push(quote_spanned! {field.span() =>
                    #krate::Trace::trace(&self.#name, marker);
                });
            }
        }
        Fields::Unnamed(f) => {
            for (i, field) in f.unnamed.iter().enumerate() {
                if is_skipped(field)? {
                    continue;
                }
                let index = Index::from(i);
                calls.push(quote_spanned! {field.span() =>
                    #krate::Trace::trace(&self.#index, marker);
                });
            }
        }
        Fields::Unit => {}
    }
    Ok(quote! { #(#calls)* })
}

fn generate_enum_trace(
    krate: &Path,
    name: &Ident,
    data: &syn::DataEnum,
) -> Result<TokenStream, syn::Error> {
    let mut arms = Vec::new();
    for variant in &data.variants {
        let var_name = &variant.ident;
        let arm = match &variant.fields {
            Fields::Named(f) => {
                let mut bindings = Vec::new();
                let mut calls = Vec::new();
                for (i, field) in f.named.iter().enumerate() {
                    let ident = field.ident.as_ref().ok_or_else(|| {
                        syn::Error::new_spanned(field, "named field without identifier")
                    })?;
                    if is_skipped(field)? {
                        bindings.push(quote! { #ident: _ });
                        continue;
                    }
                    let binding = format_ident!("field{}", i);
                    bindings.push(quote! { #ident: #binding });
                    calls.push(quote! { #krate::Trace::trace(#binding, marker); });
                }
                quote! {
                    #name::#var_name { #(#bindings),* } => {
                        #(#calls)*
                    }
                }
            }
            Fields::Unnamed(f) => {
                let mut bindings = Vec::new();
                let mut calls = Vec::new();
                for (i, field) in f.unnamed.iter().enumerate() {
                    if is_skipped(field)? {
                        bindings.push(quote! { _ });
                        continue;
                    }
                    let binding = format_ident!("field{}", i);
                    calls.push(quote! { #krate::Trace::trace(#binding, marker); });
                    bindings.push(quote! { #binding });
                }
                quote! {
                    #name::#var_name(#(#bindings),*) => {
                        #(#calls)*
                    }
                }
            }
            Fields::Unit => quote! {
                #name::#var_name => {}
            },
        };
        arms.push(arm);
    }

    if arms.is_empty() {
        return Ok(quote! {});
    }

    Ok(quote! {
        match self {
            #(#arms)*
        }
    })
}

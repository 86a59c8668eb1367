extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{parse_macro_input, Data, DeriveInput, Error, Fields, Index};

/// Derives `dg_node_serialize::Streamable`.
///
/// Struct fields are written in declaration order. Fieldless enums are written
/// as a single byte and read back through `TryFrom<u8>`.
#[proc_macro_derive(Streamable)]
pub fn derive_streamable(input: TokenStream) -> TokenStream {
    let input: DeriveInput = parse_macro_input!(input);
    let name = input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let (to_bytes, from_bytes) = match create_streamable(&input.data) {
        Ok(bodies) => bodies,
        Err(e) => return e.to_compile_error().into(),
    };
    let gen = quote! {
        impl #impl_generics dg_node_serialize::Streamable for #name #ty_generics #where_clause {
            fn to_bytes(&self) -> Vec<u8> {
                #to_bytes
            }
            fn from_bytes<T: AsRef<[u8]>>(bytes: &mut std::io::Cursor<T>) -> Result<Self, std::io::Error>
            where
                Self: Sized,
            {
                #from_bytes
            }
        }
    };
    gen.into()
}

fn create_streamable(data: &Data) -> Result<(TokenStream2, TokenStream2), Error> {
    match data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(fields) => {
                let to_bytes = fields.named.iter().map(|f| {
                    let name = &f.ident;
                    quote_spanned! {f.span()=>
                        bytes.extend(dg_node_serialize::Streamable::to_bytes(&self.#name));
                    }
                });
                let reads = fields.named.iter().map(|f| {
                    let name = &f.ident;
                    quote_spanned! {f.span()=>
                        let #name = dg_node_serialize::Streamable::from_bytes(bytes)?;
                    }
                });
                let assign = fields.named.iter().map(|f| &f.ident);
                Ok((
                    quote! {
                        let mut bytes = vec![];
                        #(#to_bytes)*
                        bytes
                    },
                    quote! {
                        #(#reads)*
                        Ok(Self {
                            #(#assign,)*
                        })
                    },
                ))
            }
            Fields::Unnamed(fields) => {
                let to_bytes = fields.unnamed.iter().enumerate().map(|(i, f)| {
                    let index = Index::from(i);
                    quote_spanned! {f.span()=>
                        bytes.extend(dg_node_serialize::Streamable::to_bytes(&self.#index));
                    }
                });
                let locals: Vec<_> = (0..fields.unnamed.len())
                    .map(|i| format_ident!("field_{}", i))
                    .collect();
                let reads = fields.unnamed.iter().zip(&locals).map(|(f, local)| {
                    quote_spanned! {f.span()=>
                        let #local = dg_node_serialize::Streamable::from_bytes(bytes)?;
                    }
                });
                Ok((
                    quote! {
                        let mut bytes = vec![];
                        #(#to_bytes)*
                        bytes
                    },
                    quote! {
                        #(#reads)*
                        Ok(Self(#(#locals),*))
                    },
                ))
            }
            Fields::Unit => Ok((quote! { vec![] }, quote! { Ok(Self) })),
        },
        Data::Enum(e) => {
            if let Some(v) = e.variants.iter().find(|v| !matches!(v.fields, Fields::Unit)) {
                return Err(Error::new(
                    v.span(),
                    "Streamable can only be derived for fieldless enums",
                ));
            }
            Ok((
                quote_spanned! {e.enum_token.span()=>
                    vec![*self as u8]
                },
                quote_spanned! {e.enum_token.span()=>
                    use std::io::Read;
                    let mut enum_buf: [u8; 1] = [0; 1];
                    bytes.read_exact(&mut enum_buf)?;
                    Self::try_from(enum_buf[0]).map_err(|_| {
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("Invalid enum discriminant: {}", enum_buf[0]),
                        )
                    })
                },
            ))
        }
        Data::Union(u) => Err(Error::new(
            u.union_token.span(),
            "Streamable cannot be derived for unions",
        )),
    }
}

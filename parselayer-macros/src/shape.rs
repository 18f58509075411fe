use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Ident, LitStr, Type, ext::IdentExt, spanned::Spanned};

#[derive(Default)]
struct ContainerAttrs {
    class: Option<String>,
    endpoint: Option<String>,
}

#[derive(Default)]
struct FieldAttrs {
    rename: Option<String>,
    skip: bool,
    omit_empty: bool,
    flatten: bool,
    extra: bool,
    ignore: bool,
}

struct FieldInfo {
    ident: Ident,
    ty: Type,
    attrs: FieldAttrs,
}

impl FieldInfo {
    fn name(&self) -> String {
        self.ident.unraw().to_string()
    }

    fn wire_name(&self) -> String {
        self.attrs
            .rename
            .clone()
            .unwrap_or_else(|| lower_camel(&self.name()))
    }

    fn renamed(&self) -> bool {
        self.attrs.rename.is_some() && self.wire_name() != lower_camel(&self.name())
    }

    fn visible(&self) -> bool {
        !self.attrs.ignore && !self.attrs.extra && !self.attrs.flatten
    }
}

pub(crate) fn expand(input: &DeriveInput, record: bool) -> syn::Result<TokenStream> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "parselayer derives do not support generic types",
        ));
    }

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(input.span(), "parselayer derives only support structs"));
    };
    let syn::Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new(
            data.fields.span(),
            "parselayer derives only support structs with named fields",
        ));
    };

    let container = container_attrs(input)?;
    if !record && (container.class.is_some() || container.endpoint.is_some()) {
        return Err(syn::Error::new(
            input.span(),
            "`class` and `endpoint` are only valid on #[derive(Record)]",
        ));
    }

    let mut fields = Vec::with_capacity(named.named.len());
    for field in &named.named {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let attrs = field_attrs(field)?;
        fields.push(FieldInfo { ident, ty: field.ty.clone(), attrs });
    }

    let extras: Vec<_> = fields.iter().filter(|f| f.attrs.extra).collect();
    if extras.len() > 1 {
        return Err(syn::Error::new(extras[1].ident.span(), "only one field may be marked `extra`"));
    }

    let name = &input.ident;
    let name_str = name.to_string();
    let flat: Vec<_> = fields.iter().filter(|f| f.attrs.flatten && !f.attrs.ignore).collect();
    let visible: Vec<_> = fields.iter().filter(|f| f.visible()).collect();

    let descriptors = fields.iter().filter(|f| !f.attrs.ignore && !f.attrs.extra).map(|f| {
        let ident = f.name();
        let wire = f.wire_name();
        let renamed = f.renamed();
        let ty = &f.ty;
        let omit_empty = f.attrs.omit_empty;
        let skip = f.attrs.skip;
        let embedded = if f.attrs.flatten {
            quote!(::core::option::Option::Some(
                <#ty as ::parselayer::record::FieldSet>::shape
            ))
        } else {
            quote!(::core::option::Option::None)
        };
        quote! {
            ::parselayer::metadata::FieldDescriptor {
                ident: #ident,
                wire_name: #wire,
                renamed: #renamed,
                kind: <#ty as ::parselayer::wire::FromWire>::kind,
                omit_empty: #omit_empty,
                skip: #skip,
                embedded: #embedded,
            }
        }
    });

    let decode_arms = visible.iter().map(|f| {
        let ident = &f.ident;
        let (ident_str, normalized, renamed) = match_parts(f);
        quote! {
            if key.matches(#ident_str, #normalized, #renamed) {
                ::parselayer::wire::decode_into(&mut self.#ident, value)?;
                return ::core::result::Result::Ok(true);
            }
        }
    });
    let decode_flat = flat.iter().map(|f| {
        let ident = &f.ident;
        quote! {
            if ::parselayer::record::FieldSet::decode_field(&mut self.#ident, key, value)? {
                return ::core::result::Result::Ok(true);
            }
        }
    });

    let renamed_wires: Vec<String> =
        visible.iter().filter(|f| f.renamed()).map(|f| f.wire_name()).collect();

    let encode_arms = visible.iter().filter(|f| !shadowed(f, &renamed_wires)).map(|f| {
        let ident = &f.ident;
        let (ident_str, normalized, renamed) = match_parts(f);
        quote! {
            if key.matches(#ident_str, #normalized, #renamed) {
                return ::core::option::Option::Some(::parselayer::wire::ToWire::to_wire(&self.#ident));
            }
        }
    });
    let encode_flat = flat.iter().map(|f| {
        let ident = &f.ident;
        quote! {
            if let ::core::option::Option::Some(value) =
                ::parselayer::record::FieldSet::encode_field(&self.#ident, key)
            {
                return ::core::option::Option::Some(value);
            }
        }
    });

    let encode_all = fields.iter().filter_map(|f| {
        let ident = &f.ident;
        if f.attrs.ignore || f.attrs.extra || f.attrs.skip || shadowed(f, &renamed_wires) {
            return None;
        }
        if f.attrs.flatten {
            return Some(quote! {
                ::parselayer::record::FieldSet::encode_fields(&self.#ident, out);
            });
        }
        let wire = f.wire_name();
        let insert = quote! {
            out.insert(
                ::std::string::String::from(#wire),
                ::parselayer::wire::ToWire::to_wire(&self.#ident),
            );
        };
        Some(if f.attrs.omit_empty {
            quote! {
                if !::parselayer::wire::ToWire::is_empty_wire(&self.#ident) {
                    #insert
                }
            }
        } else {
            insert
        })
    });

    let extra_body = match extras.first() {
        Some(f) => {
            let ident = &f.ident;
            quote!(::core::option::Option::Some(&mut self.#ident))
        }
        None => {
            let chain = flat.iter().map(|f| {
                let ident = &f.ident;
                quote! {
                    if let ::core::option::Option::Some(extra) =
                        ::parselayer::record::FieldSet::extra_mut(&mut self.#ident)
                    {
                        return ::core::option::Option::Some(extra);
                    }
                }
            });
            quote! {
                #(#chain)*
                ::core::option::Option::None
            }
        }
    };

    let object_id_body = match fields.iter().find(|f| f.ident == "object_id" && f.visible()) {
        Some(_) => quote!(::core::option::Option::Some(self.object_id.as_str())),
        None => {
            let chain = flat.iter().map(|f| {
                let ident = &f.ident;
                quote! {
                    if let ::core::option::Option::Some(id) =
                        ::parselayer::record::FieldSet::object_id(&self.#ident)
                    {
                        return ::core::option::Option::Some(id);
                    }
                }
            });
            quote! {
                #(#chain)*
                ::core::option::Option::None
            }
        }
    };

    let field_set = quote! {
        impl ::parselayer::record::FieldSet for #name {
            fn shape() -> &'static ::parselayer::metadata::Shape {
                static SHAPE: ::parselayer::metadata::Shape = ::parselayer::metadata::Shape {
                    name: #name_str,
                    fields: &[#(#descriptors),*],
                };
                &SHAPE
            }

            #[allow(unused_variables)]
            fn decode_field(
                &mut self,
                key: &::parselayer::metadata::FieldKey<'_>,
                value: &::parselayer::__private::Value,
            ) -> ::parselayer::error::ConvertResult<bool> {
                #(#decode_arms)*
                #(#decode_flat)*
                ::core::result::Result::Ok(false)
            }

            #[allow(unused_variables)]
            fn encode_field(
                &self,
                key: &::parselayer::metadata::FieldKey<'_>,
            ) -> ::core::option::Option<::parselayer::__private::Value> {
                #(#encode_arms)*
                #(#encode_flat)*
                ::core::option::Option::None
            }

            #[allow(unused_variables)]
            fn encode_fields(
                &self,
                out: &mut ::parselayer::__private::Map<::std::string::String, ::parselayer::__private::Value>,
            ) {
                #(#encode_all)*
            }

            fn extra_mut(
                &mut self,
            ) -> ::core::option::Option<
                &mut ::parselayer::__private::Map<::std::string::String, ::parselayer::__private::Value>,
            > {
                #extra_body
            }

            fn object_id(&self) -> ::core::option::Option<&str> {
                #object_id_body
            }
        }
    };

    let conversions = if record {
        quote! {
            impl ::parselayer::wire::FromWire for #name {
                fn decode_from(
                    &mut self,
                    value: &::parselayer::__private::Value,
                ) -> ::parselayer::error::ConvertResult<()> {
                    ::parselayer::record::decode_record(self, value)
                }

                fn kind() -> ::parselayer::metadata::FieldKind {
                    ::parselayer::metadata::FieldKind::Record
                }
            }

            impl ::parselayer::wire::ToWire for #name {
                fn to_wire(&self) -> ::parselayer::__private::Value {
                    ::parselayer::record::pointer_to(self)
                }

                fn is_empty_wire(&self) -> bool {
                    ::parselayer::record::FieldSet::object_id(self).is_none_or(str::is_empty)
                }
            }
        }
    } else {
        quote! {
            impl ::parselayer::wire::FromWire for #name {
                fn decode_from(
                    &mut self,
                    value: &::parselayer::__private::Value,
                ) -> ::parselayer::error::ConvertResult<()> {
                    ::parselayer::record::decode_fields(self, value)
                }

                fn kind() -> ::parselayer::metadata::FieldKind {
                    ::parselayer::metadata::FieldKind::Record
                }
            }

            impl ::parselayer::wire::ToWire for #name {
                fn to_wire(&self) -> ::parselayer::__private::Value {
                    let mut out = ::parselayer::__private::Map::new();
                    ::parselayer::record::FieldSet::encode_fields(self, &mut out);
                    ::parselayer::__private::Value::Object(out)
                }
            }
        }
    };

    let record_impl = if record {
        let class = container.class.unwrap_or(name_str);
        let endpoint = container.endpoint.map(|endpoint| {
            quote! {
                fn endpoint() -> ::std::string::String {
                    ::std::string::String::from(#endpoint)
                }
            }
        });
        quote! {
            impl ::parselayer::record::Record for #name {
                fn class_name() -> &'static str {
                    #class
                }

                #endpoint
            }
        }
    } else {
        TokenStream::new()
    };

    Ok(quote! {
        #field_set
        #conversions
        #record_impl
    })
}

/// A plain field whose default wire name is claimed by a renamed field is never written.
fn shadowed(field: &FieldInfo, renamed_wires: &[String]) -> bool {
    !field.renamed() && !field.attrs.flatten && renamed_wires.contains(&field.wire_name())
}

fn match_parts(field: &FieldInfo) -> (String, String, bool) {
    let ident = field.name();
    let normalized = normalize(&ident);
    (ident, normalized, field.renamed())
}

fn container_attrs(input: &DeriveInput) -> syn::Result<ContainerAttrs> {
    let mut attrs = ContainerAttrs::default();
    for attr in &input.attrs {
        if !attr.path().is_ident("parse") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("class") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.class = Some(value.value());
            } else if meta.path.is_ident("endpoint") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.endpoint = Some(value.value());
            } else {
                return Err(meta.error("unknown container attribute"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

fn field_attrs(field: &syn::Field) -> syn::Result<FieldAttrs> {
    let mut attrs = FieldAttrs::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("parse") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                match value.value().as_str() {
                    "-" => attrs.ignore = true,
                    "" => return Err(meta.error("`rename` needs a non-empty name")),
                    name => attrs.rename = Some(name.to_owned()),
                }
            } else if meta.path.is_ident("skip") {
                attrs.skip = true;
            } else if meta.path.is_ident("omit_empty") {
                attrs.omit_empty = true;
            } else if meta.path.is_ident("flatten") {
                attrs.flatten = true;
            } else if meta.path.is_ident("extra") {
                attrs.extra = true;
            } else if meta.path.is_ident("ignore") {
                attrs.ignore = true;
            } else {
                return Err(meta.error("unknown field attribute"));
            }
            Ok(())
        })?;
    }
    Ok(attrs)
}

fn lower_camel(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let mut upper = false;
    for c in ident.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else if out.is_empty() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

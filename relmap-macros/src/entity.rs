use darling::ast::Data;
use darling::{FromDeriveInput, FromField};
use heck::ToSnakeCase;
use proc_macro2::TokenStream;
use quote::quote;
use syn::DeriveInput;

use crate::common::type_utils::{RelationShape, relation_shape, resolve_crate_path};

#[derive(FromField)]
#[darling(attributes(column))]
pub(crate) struct EntityField {
    pub ident: Option<syn::Ident>,
    pub ty: syn::Type,

    /// Column name override: #[column(name = "user_name")]
    #[darling(default)]
    pub name: Option<String>,

    /// Not mapped at all
    #[darling(default)]
    pub skip: bool,

    #[darling(default)]
    pub primary_key: bool,

    /// Never written, read back after save
    #[darling(default)]
    pub ignored: bool,

    /// Literal SQL written instead of the field value
    #[darling(default)]
    pub default: Option<String>,

    /// Field holds another entity (or a Vec of them)
    #[darling(default)]
    pub reference: bool,

    #[darling(default)]
    pub foreign_key: Option<String>,
}

#[derive(FromDeriveInput)]
#[darling(attributes(entity), supports(struct_named))]
pub(crate) struct EntityInput {
    ident: syn::Ident,
    generics: syn::Generics,

    #[darling(default, rename = "crate")]
    crate_path: Option<syn::Path>,

    table: String,

    data: Data<darling::util::Ignored, EntityField>,
}

struct Relation<'a> {
    ident: &'a syn::Ident,
    name: String,
    shape: RelationShape,
    target: &'a syn::Type,
}

pub(crate) fn derive_entity_impl(input: &DeriveInput) -> TokenStream {
    let entity = match EntityInput::from_derive_input(input) {
        Ok(e) => e,
        Err(e) => return e.write_errors(),
    };
    match impl_entity(entity) {
        Ok(tokens) => tokens,
        Err(e) => e.into_compile_error(),
    }
}

fn impl_entity(input: EntityInput) -> syn::Result<TokenStream> {
    let ident = input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Entity cannot be derived for generic types",
        ));
    }
    if input.table.is_empty() {
        return Err(syn::Error::new_spanned(&ident, "table name cannot be empty"));
    }

    let db = {
        let root = resolve_crate_path(input.crate_path, "::relmap");
        quote! { #root::db }
    };
    let type_name = ident.to_string();
    let table = &input.table;

    let fields = match input.data {
        Data::Struct(s) => s.fields,
        Data::Enum(_) => {
            return Err(syn::Error::new_spanned(
                &ident,
                "Entity only supports structs with named fields",
            ));
        }
    };

    let mut specs = Vec::new();
    let mut value_arms = Vec::new();
    let mut column_arms = Vec::new();
    let mut relations = Vec::new();
    let mut primary_keys = 0;

    for field in &fields {
        if field.skip {
            continue;
        }
        let field_ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(&field.ty, "named fields only"))?;
        let name = field_ident.to_string();
        let column = field.name.clone().unwrap_or_else(|| name.to_snake_case());
        let default = match &field.default {
            Some(expr) => quote! { ::core::option::Option::Some(#expr) },
            None => quote! { ::core::option::Option::None },
        };
        let foreign_key = match &field.foreign_key {
            Some(fk) => quote! { ::core::option::Option::Some(#fk) },
            None => quote! { ::core::option::Option::None },
        };

        if field.reference {
            if field.primary_key || field.ignored || field.default.is_some() {
                return Err(syn::Error::new_spanned(
                    field_ident,
                    "a reference cannot be a primary key, ignored or defaulted",
                ));
            }
            let (shape, target) = relation_shape(&field.ty).ok_or_else(|| {
                syn::Error::new_spanned(
                    &field.ty,
                    "references must be T, Box<T>, Option<T>, Option<Box<T>> or Vec<T>",
                )
            })?;
            let shape_expr = if shape.is_many() {
                quote! { #db::FieldShape::Many(<#target as #db::Entity>::entity) }
            } else {
                quote! { #db::FieldShape::One(<#target as #db::Entity>::entity) }
            };
            specs.push(quote! {
                #db::FieldSpec {
                    name: #name,
                    column: #column,
                    shape: #shape_expr,
                    foreign_key: #foreign_key,
                    ..#db::FieldSpec::default()
                }
            });
            relations.push(Relation {
                ident: field_ident,
                name,
                shape,
                target,
            });
            continue;
        }

        if field.foreign_key.is_some() {
            return Err(syn::Error::new_spanned(
                field_ident,
                "foreign_key only applies to references",
            ));
        }
        if field.primary_key {
            primary_keys += 1;
        }

        let primary_key = field.primary_key;
        let ignored = field.ignored;
        specs.push(quote! {
            #db::FieldSpec {
                name: #name,
                column: #column,
                primary_key: #primary_key,
                ignored: #ignored,
                default: #default,
                ..#db::FieldSpec::default()
            }
        });
        value_arms.push(quote! {
            #name => ::core::option::Option::Some(#db::ToValue::to_value(&self.#field_ident)),
        });
        column_arms.push(quote! {
            #column => {
                self.#field_ident = #db::FromValue::from_value(value)?;
                ::core::result::Result::Ok(true)
            }
        });
    }

    if primary_keys != 1 {
        return Err(syn::Error::new_spanned(
            &ident,
            "an entity needs exactly one #[column(primary_key)] field",
        ));
    }

    let associated_arms = relations.iter().map(|r| associated_arm(&db, r));
    let load_arms = relations.iter().map(|r| load_arm(&db, r));

    Ok(quote! {
        impl #ident {
            pub const TABLE: &'static str = #table;
        }

        impl #db::Entity for #ident {
            fn entity() -> &'static #db::EntityDescriptor {
                static FIELDS: &[#db::FieldSpec] = &[
                    #(#specs),*
                ];
                static ENTITY: #db::EntityDescriptor = #db::EntityDescriptor {
                    type_key: ::core::concat!(::core::module_path!(), "::", #type_name),
                    type_name: #type_name,
                    table_name: #table,
                    fields: FIELDS,
                };
                &ENTITY
            }
        }

        impl #db::DynEntity for #ident {
            fn descriptor(&self) -> &'static #db::EntityDescriptor {
                <Self as #db::Entity>::entity()
            }

            fn field_value(&self, field: &str) -> ::core::option::Option<#db::Value> {
                match field {
                    #(#value_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn set_column(
                &mut self,
                column: &str,
                value: #db::Value,
            ) -> ::core::result::Result<bool, #db::DbError> {
                match column {
                    #(#column_arms)*
                    _ => ::core::result::Result::Ok(false),
                }
            }

            fn associated_mut(
                &mut self,
                field: &str,
            ) -> ::std::vec::Vec<&mut (dyn #db::DynEntity + 'static)> {
                match field {
                    #(#associated_arms)*
                    _ => ::std::vec::Vec::new(),
                }
            }

            #[allow(unused_variables)]
            fn load_association(
                &mut self,
                field: &str,
                rows: &[#db::Row],
            ) -> ::core::result::Result<(), #db::DbError> {
                match field {
                    #(#load_arms)*
                    other => ::core::result::Result::Err(#db::DbError::Decode(::std::format!(
                        "{} has no association named {}",
                        #type_name,
                        other
                    ))),
                }
            }
        }

        impl #db::Preloadable for #ident {
            fn root_entity(&self) -> &'static #db::EntityDescriptor {
                <Self as #db::Entity>::entity()
            }

            fn roots(&mut self) -> #db::Roots<'_> {
                #db::Roots::One(self)
            }
        }
    })
}

fn associated_arm(db: &TokenStream, relation: &Relation<'_>) -> TokenStream {
    let Relation { ident, name, .. } = relation;
    let body = match relation.shape {
        RelationShape::Plain => quote! {
            ::std::vec![&mut self.#ident as &mut (dyn #db::DynEntity + 'static)]
        },
        RelationShape::Boxed => quote! {
            ::std::vec![&mut *self.#ident as &mut (dyn #db::DynEntity + 'static)]
        },
        RelationShape::Optional => quote! {
            self.#ident
                .as_mut()
                .map(|e| e as &mut (dyn #db::DynEntity + 'static))
                .into_iter()
                .collect()
        },
        RelationShape::OptionalBoxed => quote! {
            self.#ident
                .as_deref_mut()
                .map(|e| e as &mut (dyn #db::DynEntity + 'static))
                .into_iter()
                .collect()
        },
        RelationShape::Many => quote! {
            self.#ident
                .iter_mut()
                .map(|e| e as &mut (dyn #db::DynEntity + 'static))
                .collect()
        },
    };
    quote! { #name => #body, }
}

fn load_arm(db: &TokenStream, relation: &Relation<'_>) -> TokenStream {
    let Relation {
        ident,
        name,
        target,
        ..
    } = relation;
    let from_row = quote! { <#target as #db::Entity>::from_row };
    let body = match relation.shape {
        RelationShape::Many => quote! {
            self.#ident = rows
                .iter()
                .map(#from_row)
                .collect::<::core::result::Result<::std::vec::Vec<_>, _>>()?;
        },
        shape => {
            let wrap = match shape {
                RelationShape::Boxed => quote! { ::std::boxed::Box::new(entity) },
                RelationShape::Optional => quote! { ::core::option::Option::Some(entity) },
                RelationShape::OptionalBoxed => {
                    quote! { ::core::option::Option::Some(::std::boxed::Box::new(entity)) }
                }
                _ => quote! { entity },
            };
            quote! {
                if let ::core::option::Option::Some(row) = rows.first() {
                    let entity = #from_row(row)?;
                    self.#ident = #wrap;
                }
            }
        }
    };
    quote! {
        #name => {
            #body
            ::core::result::Result::Ok(())
        }
    }
}

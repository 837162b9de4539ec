use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

#[derive(Default)]
struct ColumnAttr {
    skip: bool,
    name: Option<String>,
}

/// Parse #[column(skip)] and #[column(name = "family:qualifier")]
fn parse_column_attr(field: &syn::Field) -> syn::Result<ColumnAttr> {
    let mut column = ColumnAttr::default();
    for attr in &field.attrs {
        if attr.path().is_ident("column") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    column.skip = true;
                } else if meta.path.is_ident("name") {
                    let lit: syn::LitStr = meta.value()?.parse()?;
                    column.name = Some(lit.value());
                } else {
                    return Err(meta.error("unknown column option, expected `skip` or `name`"));
                }
                Ok(())
            })?;
        }
    }
    Ok(column)
}

enum KeyStrategy {
    Assigned,
    Sequence(i64),
    Uuid,
}

/// Parse #[primary_key], #[primary_key(sequence)], #[primary_key(sequence, initial_value = N)]
/// or #[primary_key(uuid)]
fn parse_primary_key(field: &syn::Field) -> syn::Result<Option<KeyStrategy>> {
    let Some(attr) = field
        .attrs
        .iter()
        .find(|attr| attr.path().is_ident("primary_key"))
    else {
        return Ok(None);
    };

    if matches!(attr.meta, syn::Meta::Path(_)) {
        return Ok(Some(KeyStrategy::Assigned));
    }

    let mut sequence = false;
    let mut uuid = false;
    let mut initial_value = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("sequence") {
            sequence = true;
        } else if meta.path.is_ident("uuid") {
            uuid = true;
        } else if meta.path.is_ident("initial_value") {
            let lit: syn::LitInt = meta.value()?.parse()?;
            initial_value = Some(lit.base10_parse::<i64>()?);
        } else {
            return Err(meta.error(
                "unknown primary_key option, expected `sequence`, `uuid` or `initial_value`",
            ));
        }
        Ok(())
    })?;

    match (sequence, uuid, initial_value) {
        (true, true, _) => Err(syn::Error::new_spanned(
            attr,
            "primary_key cannot be both `sequence` and `uuid`",
        )),
        (true, false, value) => Ok(Some(KeyStrategy::Sequence(value.unwrap_or(1)))),
        (false, _, Some(_)) => Err(syn::Error::new_spanned(
            attr,
            "`initial_value` only applies to `sequence` keys",
        )),
        (false, true, None) => Ok(Some(KeyStrategy::Uuid)),
        (false, false, None) => Ok(Some(KeyStrategy::Assigned)),
    }
}

#[derive(Default)]
struct RelationAttr {
    kind: Option<&'static str>,
    target: Option<String>,
    key_target: Option<String>,
    cascade: bool,
}

/// Parse #[relation(one_to_many, target = "Child", key_target = "Key", cascade)]
fn parse_relation(field: &syn::Field) -> syn::Result<Option<RelationAttr>> {
    let Some(attr) = field
        .attrs
        .iter()
        .find(|attr| attr.path().is_ident("relation"))
    else {
        return Ok(None);
    };

    let mut relation = RelationAttr::default();
    attr.parse_nested_meta(|meta| {
        let kind = if meta.path.is_ident("one_to_one") {
            Some("OneToOne")
        } else if meta.path.is_ident("one_to_many") {
            Some("OneToMany")
        } else if meta.path.is_ident("many_to_one") {
            Some("ManyToOne")
        } else if meta.path.is_ident("many_to_many") {
            Some("ManyToMany")
        } else {
            None
        };

        if let Some(kind) = kind {
            if relation.kind.is_some() {
                return Err(meta.error("relation kind given more than once"));
            }
            relation.kind = Some(kind);
        } else if meta.path.is_ident("cascade") {
            relation.cascade = true;
        } else if meta.path.is_ident("target") {
            let lit: syn::LitStr = meta.value()?.parse()?;
            relation.target = Some(lit.value());
        } else if meta.path.is_ident("key_target") {
            let lit: syn::LitStr = meta.value()?.parse()?;
            relation.key_target = Some(lit.value());
        } else {
            return Err(meta.error(
                "unknown relation option, expected a kind (`one_to_one`, `one_to_many`, \
                 `many_to_one`, `many_to_many`), `target`, `key_target` or `cascade`",
            ));
        }
        Ok(())
    })?;
    Ok(Some(relation))
}

#[derive(Default)]
struct PersistentAttr {
    table: Option<String>,
    name: Option<String>,
    unique_constraints: Vec<String>,
    identity_class: Option<String>,
}

/// Parse #[persistent(table = "...", name = "...", unique = "...", identity_class = "...")]
fn parse_persistent_attr(input: &DeriveInput) -> syn::Result<PersistentAttr> {
    let mut parsed = PersistentAttr::default();
    for attr in &input.attrs {
        if attr.path().is_ident("persistent") {
            attr.parse_nested_meta(|meta| {
                let slot = if meta.path.is_ident("table") {
                    &mut parsed.table
                } else if meta.path.is_ident("name") {
                    &mut parsed.name
                } else if meta.path.is_ident("identity_class") {
                    &mut parsed.identity_class
                } else if meta.path.is_ident("unique") {
                    let lit: syn::LitStr = meta.value()?.parse()?;
                    parsed.unique_constraints.push(lit.value());
                    return Ok(());
                } else {
                    return Err(meta.error(
                        "unknown persistent option, expected `table`, `name`, `unique` or `identity_class`",
                    ));
                };
                let lit: syn::LitStr = meta.value()?.parse()?;
                *slot = Some(lit.value());
                Ok(())
            })?;
        }
    }
    Ok(parsed)
}

/// Derive macro for the Persistable trait
///
/// Generates the type's metadata descriptor and position-indexed field
/// accessors. Field positions follow declaration order, skipping fields
/// marked `#[column(skip)]`. Each field type must implement `FieldValue`.
///
/// ## Attributes
///
/// - `#[persistent(table = "...")]` - table name (defaults to the type name)
/// - `#[persistent(name = "...")]` - type name used in metadata (defaults to the struct name)
/// - `#[persistent(unique = "...")]`, `#[persistent(identity_class = "...")]` - metadata the
///   datastore cannot honour; reported per the ignorable-metadata setting
/// - `#[primary_key]` - the key field; `#[primary_key(sequence)]` or `#[primary_key(uuid)]`
///   for generated keys
/// - `#[column(name = "family:qualifier")]` - column override
/// - `#[column(skip)]` - not persisted
/// - `#[relation(many_to_one, target = "Team", cascade)]` - relation to another persistent type
///
/// ## Example
///
/// ```text
/// #[derive(Persistent, Default)]
/// #[persistent(table = "people")]
/// struct Person {
///     #[primary_key]
///     pub key: String,
///     pub name: String,
///     #[relation(one_to_many, target = "Pet", cascade)]
///     pub pets: Vec<ObjectRef>,
/// }
/// ```
#[proc_macro_derive(Persistent, attributes(persistent, primary_key, column, relation))]
pub fn derive_persistent(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_persistent(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_persistent(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => panic!("Persistent only supports structs with named fields"),
        },
        _ => panic!("Persistent only supports structs"),
    };

    let attr = parse_persistent_attr(input)?;
    let type_name = attr.name.unwrap_or_else(|| name.to_string());
    let table_call = attr.table.map(|table| quote! { .table(#table) });
    let unique_calls = attr
        .unique_constraints
        .iter()
        .map(|constraint| quote! { .unique_constraint(#constraint) });
    let identity_call = attr
        .identity_class
        .map(|class| quote! { .identity_class(#class) });

    let mut persisted = Vec::new();
    for field in fields {
        let column = parse_column_attr(field)?;
        if !column.skip {
            persisted.push((field, column.name));
        }
    }

    let mut descriptor_fields = Vec::new();
    let mut getters = Vec::new();
    let mut setters = Vec::new();

    for (position, (field, column)) in persisted.into_iter().enumerate() {
        let field_ident = field.ident.as_ref().unwrap();
        let field_ty = &field.ty;
        let field_name = field_ident.to_string().trim_start_matches("r#").to_string();

        let key_call = match parse_primary_key(field)? {
            None => quote! {},
            Some(KeyStrategy::Assigned) => quote! { .primary_key() },
            Some(KeyStrategy::Sequence(initial_value)) => quote! {
                .primary_key()
                .value_strategy(wide_row_storage::ValueStrategy::Sequence { initial_value: #initial_value })
            },
            Some(KeyStrategy::Uuid) => quote! {
                .primary_key()
                .value_strategy(wide_row_storage::ValueStrategy::Uuid)
            },
        };

        let column_call = column.map(|column| quote! { .column(#column) });

        let relation_calls = match parse_relation(field)? {
            None => quote! {},
            Some(relation) => {
                let kind = syn::Ident::new(
                    relation.kind.unwrap_or("ManyToOne"),
                    proc_macro2::Span::call_site(),
                );
                let target = relation.target.map(|t| quote! { .target(#t) });
                let key_target = relation.key_target.map(|t| quote! { .key_target(#t) });
                let cascade = relation.cascade.then(|| quote! { .cascade_delete() });
                quote! {
                    .relation(wide_row_storage::RelationKind::#kind)
                    #target
                    #key_target
                    #cascade
                }
            }
        };

        descriptor_fields.push(quote! {
            .field(
                wide_row_storage::FieldDescriptor::new(
                    #field_name,
                    <#field_ty as wide_row_storage::FieldValue>::field_type(),
                )
                #key_call
                #column_call
                #relation_calls
            )
        });

        getters.push(quote! {
            #position => Ok(wide_row_storage::FieldValue::to_value(&self.#field_ident)),
        });

        setters.push(quote! {
            #position => {
                self.#field_ident = <#field_ty as wide_row_storage::FieldValue>::from_value(value)?;
                Ok(())
            }
        });
    }

    let expanded = quote! {
        impl #impl_generics wide_row_storage::Persistable for #name #ty_generics #where_clause {
            fn type_name() -> &'static str {
                #type_name
            }

            fn descriptor() -> wide_row_storage::TypeDescriptor {
                wide_row_storage::TypeDescriptor::builder(#type_name)
                    #table_call
                    #(#descriptor_fields)*
                    #(#unique_calls)*
                    #identity_call
                    .build()
            }

            fn field_value(
                &self,
                position: usize,
            ) -> Result<wide_row_storage::Value, wide_row_storage::StorageError> {
                match position {
                    #(#getters)*
                    _ => Err(wide_row_storage::StorageError::Usage(format!(
                        "{} has no field at position {}",
                        #type_name, position
                    ))),
                }
            }

            fn set_field_value(
                &mut self,
                position: usize,
                value: wide_row_storage::Value,
            ) -> Result<(), wide_row_storage::StorageError> {
                match position {
                    #(#setters)*
                    _ => Err(wide_row_storage::StorageError::Usage(format!(
                        "{} has no field at position {}",
                        #type_name, position
                    ))),
                }
            }
        }
    };

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn first_field(input: &DeriveInput) -> &syn::Field {
        match &input.data {
            Data::Struct(data) => data.fields.iter().next().unwrap(),
            _ => unreachable!(),
        }
    }

    fn error_of<T>(result: syn::Result<T>) -> String {
        match result {
            Ok(_) => panic!("attribute was accepted"),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn relation_kinds_and_options() {
        let input: DeriveInput = parse_quote! {
            struct Owner {
                #[relation(one_to_many, target = "Pet", key_target = "Tag", cascade)]
                pets: Vec<ObjectRef>,
            }
        };
        let relation = parse_relation(first_field(&input)).unwrap().unwrap();
        assert_eq!(relation.kind, Some("OneToMany"));
        assert_eq!(relation.target.as_deref(), Some("Pet"));
        assert_eq!(relation.key_target.as_deref(), Some("Tag"));
        assert!(relation.cascade);
    }

    #[test]
    fn misspelled_relation_kind_is_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Owner {
                #[relation(one_to_mny, target = "Pet")]
                pets: Vec<ObjectRef>,
            }
        };
        assert!(error_of(parse_relation(first_field(&input))).contains("unknown relation option"));

        let input: DeriveInput = parse_quote! {
            struct Owner {
                #[relation(one_to_many, many_to_one, target = "Pet")]
                pets: Vec<ObjectRef>,
            }
        };
        assert!(error_of(parse_relation(first_field(&input))).contains("more than once"));
    }

    #[test]
    fn primary_key_strategies() {
        let input: DeriveInput = parse_quote! {
            struct Ticket {
                #[primary_key(sequence, initial_value = 100)]
                id: i64,
            }
        };
        assert!(matches!(
            parse_primary_key(first_field(&input)).unwrap(),
            Some(KeyStrategy::Sequence(100))
        ));

        let input: DeriveInput = parse_quote! {
            struct Session {
                #[primary_key(uuid)]
                id: String,
            }
        };
        assert!(matches!(
            parse_primary_key(first_field(&input)).unwrap(),
            Some(KeyStrategy::Uuid)
        ));
    }

    #[test]
    fn misspelled_or_conflicting_key_options_are_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Ticket {
                #[primary_key(seqence)]
                id: i64,
            }
        };
        assert!(error_of(parse_primary_key(first_field(&input))).contains("unknown primary_key option"));

        let input: DeriveInput = parse_quote! {
            struct Ticket {
                #[primary_key(sequence, uuid)]
                id: i64,
            }
        };
        assert!(parse_primary_key(first_field(&input)).is_err());

        let input: DeriveInput = parse_quote! {
            struct Ticket {
                #[primary_key(initial_value = 5)]
                id: i64,
            }
        };
        assert!(parse_primary_key(first_field(&input)).is_err());
    }

    #[test]
    fn unknown_column_and_type_options_are_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Person {
                #[column(nmae = "details:name")]
                name: String,
            }
        };
        assert!(error_of(parse_column_attr(first_field(&input))).contains("unknown column option"));

        let input: DeriveInput = parse_quote! {
            #[persistent(tabel = "people")]
            struct Person {
                name: String,
            }
        };
        assert!(error_of(parse_persistent_attr(&input)).contains("unknown persistent option"));
    }

    #[test]
    fn attribute_errors_become_compile_errors() {
        let input: DeriveInput = parse_quote! {
            struct Owner {
                #[primary_key]
                key: String,
                #[relation(one_to_mny, target = "Pet")]
                pets: Vec<ObjectRef>,
            }
        };
        assert!(error_of(expand_persistent(&input)).contains("unknown relation option"));

        let input: DeriveInput = parse_quote! {
            struct Owner {
                #[primary_key]
                key: String,
                #[relation(one_to_many, target = "Pet")]
                pets: Vec<ObjectRef>,
            }
        };
        let expanded = expand_persistent(&input).unwrap().to_string();
        assert!(expanded.contains("OneToMany"));
    }
}

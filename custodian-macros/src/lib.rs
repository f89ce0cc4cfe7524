// These lints are triggered by darling's generated code for
// `#[darling(default)]`.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_continue)]

use darling::{FromDeriveInput, FromField, ast::Data, util::PathList};
use heck::{
    ToKebabCase, ToLowerCamelCase, ToShoutyKebabCase, ToShoutySnakeCase, ToSnakeCase,
    ToUpperCamelCase,
};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Attribute, DeriveInput, Ident, Path, Token, ext::IdentExt, meta::ParseNestedMeta,
    parse_macro_input, parse_quote,
};

#[allow(clippy::doc_markdown, reason = "false positive")]
/// Build a PascalCase enum variant name from a type path.
fn path_to_pascal_ident(path: &Path) -> Ident {
    let combined = path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("_");
    let pascal = combined.to_upper_camel_case();
    let span = path
        .segments
        .last()
        .map_or_else(proc_macro2::Span::call_site, |segment| segment.ident.span());
    Ident::new(&pascal, span)
}

/// Returns the kind override or the default kebab-case name from the ident.
fn default_kind(ident: &Ident, kind: Option<String>) -> String {
    kind.unwrap_or_else(|| ident.to_string().to_kebab_case())
}

/// Consume the value of a serde meta item this derive does not read.
fn skip_meta(meta: &ParseNestedMeta<'_>) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(|inner| skip_meta(&inner))?;
    }
    Ok(())
}

/// Read the serialize-side value of `#[serde(key = "..")]` or
/// `#[serde(key(serialize = ".."))]`.
fn serde_name(attrs: &[Attribute], key: &str) -> syn::Result<Option<String>> {
    let mut found = None;
    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if !meta.path.is_ident(key) {
                return skip_meta(&meta);
            }
            if meta.input.peek(Token![=]) {
                found = Some(meta.value()?.parse::<syn::LitStr>()?.value());
                return Ok(());
            }
            meta.parse_nested_meta(|side| {
                if side.path.is_ident("serialize") {
                    found = Some(side.value()?.parse::<syn::LitStr>()?.value());
                    Ok(())
                } else {
                    skip_meta(&side)
                }
            })
        })?;
    }
    Ok(found)
}

/// A serde `rename_all` rule, applied to field names.
#[derive(Debug, Clone, Copy)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn from_attrs(attrs: &[Attribute]) -> darling::Result<Option<Self>> {
        let Some(rule) = serde_name(attrs, "rename_all")? else {
            return Ok(None);
        };
        let rule = match rule.as_str() {
            "lowercase" => Self::Lower,
            "UPPERCASE" => Self::Upper,
            "PascalCase" => Self::Pascal,
            "camelCase" => Self::Camel,
            "snake_case" => Self::Snake,
            "SCREAMING_SNAKE_CASE" => Self::ScreamingSnake,
            "kebab-case" => Self::Kebab,
            "SCREAMING-KEBAB-CASE" => Self::ScreamingKebab,
            other => {
                return Err(darling::Error::custom(format!(
                    "unknown serde `rename_all` rule `{other}`"
                )));
            }
        };
        Ok(Some(rule))
    }

    /// Field names are snake case already, so the snake rules are identity.
    fn apply(self, field: &str) -> String {
        match self {
            Self::Lower => field.to_ascii_lowercase(),
            Self::Upper => field.to_ascii_uppercase(),
            Self::Pascal => field.to_upper_camel_case(),
            Self::Camel => field.to_lower_camel_case(),
            Self::Snake => field.to_snake_case(),
            Self::ScreamingSnake => field.to_shouty_snake_case(),
            Self::Kebab => field.to_kebab_case(),
            Self::ScreamingKebab => field.to_shouty_kebab_case(),
        }
    }
}

/// Configuration for the `#[entity(...)]` struct attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(entity), forward_attrs(serde), supports(struct_named))]
struct EntityArgs {
    ident: Ident,
    vis: syn::Visibility,
    attrs: Vec<Attribute>,
    data: Data<(), EntityField>,
    #[darling(default)]
    kind: Option<String>,
    /// Event types wrapped by a generated event enum.
    #[darling(default)]
    events: PathList,
    #[darling(default)]
    event_enum: Option<String>,
    #[darling(default)]
    derives: Option<PathList>,
}

/// Configuration for `#[entity(...)]` on a field.
#[derive(Debug, FromField)]
#[darling(attributes(entity), forward_attrs(serde))]
struct EntityField {
    ident: Option<Ident>,
    ty: syn::Type,
    attrs: Vec<Attribute>,
    #[darling(default)]
    id: bool,
    #[darling(default)]
    state: bool,
    #[darling(default)]
    soft_delete: bool,
    #[darling(default)]
    tenant: bool,
    #[darling(default)]
    concurrency_stamp: bool,
    #[darling(default)]
    audit: bool,
    #[darling(default)]
    events: bool,
    /// Stored column name, for types whose serialized key serde
    /// attributes do not describe.
    #[darling(default)]
    column: Option<String>,
}

impl EntityField {
    /// The key this field is stored under.
    ///
    /// A serde `rename` or container `rename_all` decides the key. An
    /// explicit `column` must then agree with it.
    fn column(&self, rule: Option<RenameRule>) -> darling::Result<String> {
        let name = self
            .ident
            .as_ref()
            .map(|ident| ident.unraw().to_string())
            .unwrap_or_default();
        let serialized = match serde_name(&self.attrs, "rename")? {
            Some(renamed) => Some(renamed),
            None => rule.map(|rule| rule.apply(&name)),
        };
        match (&self.column, serialized) {
            (Some(column), Some(serialized)) if *column != serialized => {
                Err(darling::Error::custom(format!(
                    "`column = \"{column}\"` disagrees with the serialized key `{serialized}`"
                ))
                .with_span(&self.ty))
            }
            (Some(column), _) => Ok(column.clone()),
            (None, serialized) => Ok(serialized.unwrap_or(name)),
        }
    }
}

/// Captures the event type path and its generated enum variant identifier.
struct EventSpec<'a> {
    path: &'a Path,
    variant: Ident,
}

impl<'a> EventSpec<'a> {
    /// Build an event spec from a type path.
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            variant: path_to_pascal_ident(path),
        }
    }
}

/// Parse derive input with darling and render errors as tokens.
fn parse_or_error<T, F>(input: &DeriveInput, f: F) -> TokenStream2
where
    T: FromDeriveInput,
    F: FnOnce(T) -> TokenStream2,
{
    match T::from_derive_input(input) {
        Ok(args) => f(args),
        Err(err) => err.write_errors(),
    }
}

/// Fields picked out of the struct by role.
#[derive(Default)]
struct Roles<'a> {
    id: Option<&'a EntityField>,
    state: Option<&'a EntityField>,
    soft_delete: Option<&'a EntityField>,
    tenant: Option<&'a EntityField>,
    concurrency_stamp: Option<&'a EntityField>,
    audit: Option<&'a EntityField>,
    events: Option<&'a EntityField>,
}

impl<'a> Roles<'a> {
    fn collect(fields: &'a [EntityField]) -> darling::Result<Self> {
        let mut errors = darling::Error::accumulator();
        let mut roles = Self::default();

        for field in fields {
            let flags = [
                (field.id, &mut roles.id, "id"),
                (field.state, &mut roles.state, "state"),
                (field.soft_delete, &mut roles.soft_delete, "soft_delete"),
                (field.tenant, &mut roles.tenant, "tenant"),
                (
                    field.concurrency_stamp,
                    &mut roles.concurrency_stamp,
                    "concurrency_stamp",
                ),
                (field.audit, &mut roles.audit, "audit"),
                (field.events, &mut roles.events, "events"),
            ];
            let mut marked = false;
            for (set, slot, name) in flags {
                if !set {
                    continue;
                }
                marked = true;
                if slot.is_some() {
                    errors.push(
                        darling::Error::custom(format!("more than one field marked `{name}`"))
                            .with_span(&field.ty),
                    );
                } else {
                    *slot = Some(field);
                }
            }
            if field.column.as_deref() == Some("") {
                errors.push(darling::Error::custom("`column` must not be empty").with_span(&field.ty));
            }
            if field.column.is_some() && !marked {
                errors.push(
                    darling::Error::custom("`column` only applies to a capability field")
                        .with_span(&field.ty),
                );
            }
        }

        // Unmarked `id` and `state` fields are picked up by name.
        let named = |name: &str| {
            fields
                .iter()
                .find(|f| f.ident.as_ref().is_some_and(|ident| ident == name))
        };
        roles.id = roles.id.or_else(|| named("id"));
        roles.state = roles.state.or_else(|| named("state"));

        if roles.id.is_none() {
            errors.push(darling::Error::custom(
                "no id field: name a field `id` or mark one with `#[entity(id)]`",
            ));
        }
        if roles.state.is_none() {
            errors.push(darling::Error::custom(
                "no state field: name an `ObjectState` field `state` or mark one with \
                 `#[entity(state)]`",
            ));
        }

        errors.finish_with(roles)
    }
}

/// Extract `T` from `Vec<T>`.
fn vec_element(ty: &syn::Type) -> Option<&syn::Type> {
    let syn::Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Vec" {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

/// Derives `Entity` and the capability traits for a struct.
///
/// This macro generates:
/// - `Entity` implementation (`KIND`, `Id`, `Event`, state accessors)
/// - One capability trait implementation per marked field
/// - `Entity::capabilities` listing exactly those capabilities
/// - Optionally, an event enum wrapping several concrete event types
///
/// # Field attributes
///
/// - `id` - Identifier field (default: the field named `id`)
/// - `state` - `ObjectState` field (default: the field named `state`)
/// - `soft_delete` - `bool` deleted flag
/// - `tenant` - `Option<i64>` tenant id
/// - `concurrency_stamp` - `Option<String>` token
/// - `audit` - `AuditInfo`
/// - `events` - `Vec<Event>` queue; its element type becomes `Entity::Event`
///
/// The stored column of a capability field is the key serde writes for it,
/// following `#[serde(rename)]` and the struct's `#[serde(rename_all)]`.
/// Capability fields take an optional `column = "name"` for types
/// serialized by hand; it is rejected when it disagrees with a serde rename.
///
/// # Struct attributes
///
/// - `kind = "name"` - Storage kind (default: kebab-case struct name)
/// - `events(Type1, Type2, ...)` - Generate an event enum wrapping these
///   types, with `EventKind` and `From` impls
/// - `event_enum = "Name"` - Override the generated enum name (default:
///   `{Struct}Event`)
/// - `derives(Trait1, ...)` - Extra derives for the generated enum. `Clone`
///   is always included
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Entity)]
/// #[entity(kind = "customer", events(CustomerRenamed))]
/// pub struct Customer {
///     id: i64,
///     name: String,
///     #[entity(soft_delete)]
///     is_deleted: bool,
///     #[entity(tenant)]
///     tenant_id: Option<i64>,
///     #[entity(events)]
///     #[serde(skip)]
///     events: Vec<CustomerEvent>,
///     #[serde(skip)]
///     state: ObjectState,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_entity_impl(&input).into()
}

/// Internal entry point that returns tokens for the entity derive.
fn derive_entity_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<EntityArgs, _>(input, |args| generate_entity_impl(args, input))
}

/// Generate the event enum for `events(...)`, if any.
fn generate_event_enum(args: &EntityArgs) -> TokenStream2 {
    let event_specs: Vec<EventSpec<'_>> = args.events.iter().map(EventSpec::new).collect();
    if event_specs.is_empty() {
        return TokenStream2::new();
    }

    let struct_name = &args.ident;
    let struct_vis = &args.vis;
    let event_enum_name = args.event_enum.as_ref().map_or_else(
        || Ident::new(&format!("{struct_name}Event"), struct_name.span()),
        |name| Ident::new(name, struct_name.span()),
    );
    let event_types: Vec<&Path> = event_specs.iter().map(|spec| spec.path).collect();
    let variant_names: Vec<&Ident> = event_specs.iter().map(|spec| &spec.variant).collect();

    let user_derives = args.derives.clone().unwrap_or_default();
    let derives = quote! { #[derive(Clone, #(#user_derives),*)] };

    quote! {
        #[doc = concat!("Domain events raised by [`", stringify!(#struct_name), "`].")]
        #derives
        #struct_vis enum #event_enum_name {
            #(
                #[doc = concat!("[`", stringify!(#event_types), "`]")]
                #variant_names(#event_types)
            ),*
        }

        impl ::custodian::event::EventKind for #event_enum_name {
            fn kind(&self) -> &'static str {
                match self {
                    #(Self::#variant_names(_) => <#event_types as ::custodian::event::DomainEvent>::KIND),*
                }
            }
        }

        #(
            impl From<#event_types> for #event_enum_name {
                fn from(event: #event_types) -> Self {
                    Self::#variant_names(event)
                }
            }
        )*
    }
}

/// Generate the entity derive implementation tokens.
#[allow(clippy::too_many_lines)]
fn generate_entity_impl(args: EntityArgs, input: &DeriveInput) -> TokenStream2 {
    let fields = match &args.data {
        Data::Struct(fields) => &fields.fields,
        Data::Enum(_) => {
            return darling::Error::unsupported_shape("enum")
                .with_span(&args.ident)
                .write_errors();
        }
    };
    let roles = match Roles::collect(fields) {
        Ok(roles) => roles,
        Err(err) => return err.with_span(&args.ident).write_errors(),
    };
    let (Some(id_field), Some(state_field)) = (roles.id, roles.state) else {
        return TokenStream2::new();
    };

    let struct_name = &args.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let kind = default_kind(struct_name, args.kind.clone());
    let event_enum = generate_event_enum(&args);

    let id_ident = &id_field.ident;
    let id_ty = &id_field.ty;
    let state_ident = &state_field.ident;

    let event_ty: syn::Type = match roles.events {
        Some(field) => match vec_element(&field.ty) {
            Some(inner) => inner.clone(),
            None => {
                return darling::Error::custom("`events` field must be a `Vec<Event>`")
                    .with_span(&field.ty)
                    .write_errors();
            }
        },
        None => parse_quote!(::custodian::entity::NoEvents),
    };

    let mut errors = darling::Error::accumulator();
    let rule = errors.handle(RenameRule::from_attrs(&args.attrs)).flatten();
    let mut column_of = |field: Option<&EntityField>| {
        field.and_then(|field| errors.handle(field.column(rule)))
    };
    let deleted_column = column_of(roles.soft_delete);
    let tenant_column = column_of(roles.tenant);
    let stamp_column = column_of(roles.concurrency_stamp);
    if let Err(err) = errors.finish() {
        return err.with_span(&args.ident).write_errors();
    }

    let mut chain = Vec::new();
    let mut capability_impls = Vec::new();

    if let (Some(field), Some(column)) = (roles.soft_delete, deleted_column) {
        let ident = &field.ident;
        chain.push(quote!(.soft_delete()));
        capability_impls.push(quote! {
            impl #impl_generics ::custodian::capability::SoftDelete for #struct_name #ty_generics #where_clause {
                const DELETED_COLUMN: &'static str = #column;

                fn is_deleted(&self) -> bool {
                    self.#ident
                }
            }
        });
    }

    if let (Some(field), Some(column)) = (roles.tenant, tenant_column) {
        let ident = &field.ident;
        chain.push(quote!(.multi_tenant()));
        capability_impls.push(quote! {
            impl #impl_generics ::custodian::capability::MultiTenant for #struct_name #ty_generics #where_clause {
                const TENANT_COLUMN: &'static str = #column;

                fn tenant_id(&self) -> Option<i64> {
                    self.#ident
                }

                fn set_tenant_id(&mut self, tenant_id: Option<i64>) {
                    self.#ident = tenant_id;
                }
            }
        });
    }

    if let (Some(field), Some(column)) = (roles.concurrency_stamp, stamp_column) {
        let ident = &field.ident;
        chain.push(quote!(.concurrency_stamped()));
        capability_impls.push(quote! {
            impl #impl_generics ::custodian::capability::ConcurrencyStamped for #struct_name #ty_generics #where_clause {
                const STAMP_COLUMN: &'static str = #column;

                fn concurrency_stamp(&self) -> Option<&str> {
                    self.#ident.as_deref()
                }

                fn set_concurrency_stamp(&mut self, stamp: String) {
                    self.#ident = Some(stamp);
                }
            }
        });
    }

    if let Some(field) = roles.audit {
        let ident = &field.ident;
        chain.push(quote!(.audited()));
        capability_impls.push(quote! {
            impl #impl_generics ::custodian::capability::Audited for #struct_name #ty_generics #where_clause {
                fn audit(&self) -> &::custodian::audit::AuditInfo {
                    &self.#ident
                }

                fn audit_mut(&mut self) -> &mut ::custodian::audit::AuditInfo {
                    &mut self.#ident
                }
            }
        });
    }

    if let Some(field) = roles.events {
        let ident = &field.ident;
        chain.push(quote!(.domain_events()));
        capability_impls.push(quote! {
            impl #impl_generics ::custodian::capability::HasDomainEvents for #struct_name #ty_generics #where_clause {
                fn domain_events(&self) -> &[#event_ty] {
                    &self.#ident
                }

                fn domain_events_mut(&mut self) -> &mut Vec<#event_ty> {
                    &mut self.#ident
                }
            }
        });
    }

    quote! {
        #event_enum

        impl #impl_generics ::custodian::entity::Entity for #struct_name #ty_generics #where_clause {
            const KIND: &'static str = #kind;
            type Id = #id_ty;
            type Event = #event_ty;

            fn id(&self) -> &Self::Id {
                &self.#id_ident
            }

            fn object_state(&self) -> ::custodian::entity::ObjectState {
                self.#state_ident
            }

            fn set_object_state(&mut self, state: ::custodian::entity::ObjectState) {
                self.#state_ident = state;
            }

            fn capabilities() -> ::custodian::capability::Capabilities<Self> {
                ::custodian::capability::Capabilities::none() #(#chain)*
            }
        }

        #(#capability_impls)*
    }
}

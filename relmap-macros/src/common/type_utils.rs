use syn::{GenericArgument, PathArguments, Type};

/// How a relation field holds its entity (or entities).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationShape {
    /// `T`
    Plain,
    /// `Box<T>`
    Boxed,
    /// `Option<T>`
    Optional,
    /// `Option<Box<T>>`
    OptionalBoxed,
    /// `Vec<T>`
    Many,
}

impl RelationShape {
    pub fn is_many(self) -> bool {
        self == RelationShape::Many
    }
}

/// Returns `(wrapper ident, inner type)` for `Wrapper<Inner>`.
fn single_generic(ty: &Type) -> Option<(&syn::Ident, &Type)> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    if type_path.qself.is_some() {
        return None;
    }
    let segment = type_path.path.segments.last()?;
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    if args.args.len() != 1 {
        return None;
    }
    match args.args.first() {
        Some(GenericArgument::Type(inner)) => Some((&segment.ident, inner)),
        _ => None,
    }
}

/// A bare path type without generic arguments, e.g. `User` or `crate::m::User`.
fn is_plain_path(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) if type_path.qself.is_none() => type_path
            .path
            .segments
            .iter()
            .all(|s| matches!(s.arguments, PathArguments::None)),
        _ => false,
    }
}

/// Classifies a relation field type, returning its shape and the entity type
/// it refers to. `None` for any unsupported shape.
pub fn relation_shape(ty: &Type) -> Option<(RelationShape, &Type)> {
    if is_plain_path(ty) {
        return Some((RelationShape::Plain, ty));
    }

    let (wrapper, inner) = single_generic(ty)?;
    match wrapper.to_string().as_str() {
        "Vec" if is_plain_path(inner) => Some((RelationShape::Many, inner)),
        "Box" if is_plain_path(inner) => Some((RelationShape::Boxed, inner)),
        "Option" if is_plain_path(inner) => Some((RelationShape::Optional, inner)),
        "Option" => match single_generic(inner) {
            Some((boxed, entity)) if boxed == "Box" && is_plain_path(entity) => {
                Some((RelationShape::OptionalBoxed, entity))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Resolve crate path with fallback
pub fn resolve_crate_path(provided: Option<syn::Path>, default: &str) -> syn::Path {
    provided.unwrap_or_else(|| syn::parse_str(default).expect("valid path"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn classifies_supported_shapes() {
        let cases: Vec<(Type, RelationShape)> = vec![
            (parse_quote!(User), RelationShape::Plain),
            (parse_quote!(Box<User>), RelationShape::Boxed),
            (parse_quote!(Option<User>), RelationShape::Optional),
            (parse_quote!(Option<Box<models::User>>), RelationShape::OptionalBoxed),
            (parse_quote!(Vec<Comment>), RelationShape::Many),
        ];
        for (ty, expected) in cases {
            let (shape, _) = relation_shape(&ty).expect("supported shape");
            assert_eq!(shape, expected);
        }
    }

    #[test]
    fn rejects_other_shapes() {
        let cases: Vec<Type> = vec![
            parse_quote!(Vec<Option<User>>),
            parse_quote!(Option<Vec<User>>),
            parse_quote!(std::rc::Rc<User>),
            parse_quote!(&'static User),
            parse_quote!((User, User)),
        ];
        for ty in cases {
            assert!(relation_shape(&ty).is_none());
        }
    }
}

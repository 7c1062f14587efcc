use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Expr, FnArg, ImplItem, ItemImpl, Lit, LitStr, Meta, Type, parse_macro_input, spanned::Spanned,
};

extern crate proc_macro;

/// Registers the checker functions of an `impl` block as test cases.
///
/// Every associated function whose name starts with the prefix (`chk` unless
/// given as `#[checkers(prefix = "...")]`) becomes a case, in declaration
/// order. The kind comes from the sole parameter: `&Transaction`, `&Session`
/// or `&[Session]`. The doc comment must read `name: expectation`.
///
/// The block gains `fn test_cases() -> session_tester::Result<Vec<TestCase>>`.
///
/// ```ignore
/// struct Login;
///
/// #[checkers]
/// impl Login {
///     /// Status: every request answers 200
///     fn chk_status(t: &Transaction) -> bool {
///         t.status_code == Some(200)
///     }
/// }
///
/// let cases = Login::test_cases()?;
/// ```
#[proc_macro_attribute]
pub fn checkers(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut prefix = String::from("chk");
    let prefix_parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("prefix") {
            prefix = meta.value()?.parse::<LitStr>()?.value();
            Ok(())
        } else {
            Err(meta.error("expected `prefix = \"...\"`"))
        }
    });
    parse_macro_input!(attr with prefix_parser);
    let ast = parse_macro_input!(item as ItemImpl);

    match expand(&ast, &prefix) {
        Ok(expanded) => expanded.into(),
        Err(e) => {
            let err = e.to_compile_error();
            quote! { #ast #err }.into()
        }
    }
}

enum Kind {
    Transaction,
    Session,
    AllSessions,
}

fn expand(ast: &ItemImpl, prefix: &str) -> syn::Result<TokenStream2> {
    let mut errors: Option<syn::Error> = None;
    let mut cases = Vec::new();

    for item in &ast.items {
        let ImplItem::Fn(f) = item else { continue };
        let name = &f.sig.ident;
        if !name.to_string().starts_with(prefix) {
            continue;
        }
        match checker(f) {
            Ok((doc, kind)) => {
                let ctor = match kind {
                    Kind::Transaction => format_ident!("transaction"),
                    Kind::Session => format_ident!("session"),
                    Kind::AllSessions => format_ident!("all_sessions"),
                };
                cases.push(quote! {
                    ::session_tester::TestCase::from_doc(
                        #doc,
                        ::session_tester::Checker::#ctor(Self::#name),
                    )?
                });
            }
            Err(e) => match &mut errors {
                Some(all) => all.combine(e),
                None => errors = Some(e),
            },
        }
    }
    if let Some(e) = errors {
        return Err(e);
    }

    let self_ty = &ast.self_ty;
    let (impl_generics, _, where_clause) = ast.generics.split_for_impl();
    Ok(quote! {
        #ast

        impl #impl_generics #self_ty #where_clause {
            /// The checkers of this block as test cases, in declaration order.
            pub fn test_cases() -> ::session_tester::Result<::std::vec::Vec<::session_tester::TestCase>> {
                ::session_tester::case::merge_cases(
                    ::std::vec::Vec::new(),
                    ::std::vec![#(#cases),*],
                )
            }
        }
    })
}

fn checker(f: &syn::ImplItemFn) -> syn::Result<(String, Kind)> {
    let name = &f.sig.ident;
    let doc = f
        .attrs
        .iter()
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(nv) if nv.path.is_ident("doc") => match &nv.value {
                Expr::Lit(lit) => match &lit.lit {
                    Lit::Str(s) => Some(s.value()),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if doc.trim().is_empty() {
        return Err(syn::Error::new(
            name.span(),
            format!("checker `{name}` needs a doc comment of the form `name: expectation`"),
        ));
    }

    let mut inputs = f.sig.inputs.iter();
    let (Some(input), None) = (inputs.next(), inputs.next()) else {
        return Err(syn::Error::new(
            f.sig.inputs.span(),
            format!("checker `{name}` must take exactly one parameter"),
        ));
    };
    let FnArg::Typed(arg) = input else {
        return Err(syn::Error::new(
            input.span(),
            format!("checker `{name}` must be an associated function without `self`"),
        ));
    };

    let kind = match &*arg.ty {
        Type::Reference(r) => match &*r.elem {
            Type::Path(p) if last_ident_is(p, "Transaction") => Some(Kind::Transaction),
            Type::Path(p) if last_ident_is(p, "Session") => Some(Kind::Session),
            Type::Slice(s) => match &*s.elem {
                Type::Path(p) if last_ident_is(p, "Session") => Some(Kind::AllSessions),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    };
    kind.map(|k| (doc, k)).ok_or_else(|| {
        syn::Error::new(
            arg.ty.span(),
            format!("checker `{name}` must take `&Transaction`, `&Session` or `&[Session]`"),
        )
    })
}

fn last_ident_is(p: &syn::TypePath, ident: &str) -> bool {
    p.path.segments.last().is_some_and(|s| s.ident == ident)
}

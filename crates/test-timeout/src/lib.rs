//! Test attributes that fail a test once it runs past a deadline instead of
//! letting a stuck session loop hang the whole suite.
//!
//! `#[timeout]` wraps a synchronous test, `#[tokio_timeout_test]` an async one
//! on a fresh current-thread runtime. Both take an optional limit in seconds.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_LIMIT_SECS: u64 = 30;

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    expand(attr.into(), item, Flavor::Sync)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    expand(attr.into(), item, Flavor::Tokio)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

#[derive(Clone, Copy)]
enum Flavor {
    Sync,
    Tokio,
}

fn expand(attr: TokenStream2, item: ItemFn, flavor: Flavor) -> syn::Result<TokenStream2> {
    let limit = parse_limit(attr)?;
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = item;

    let body = match (flavor, sig.asyncness.take()) {
        (Flavor::Sync, None) => quote! { (move || #block)() },
        (Flavor::Tokio, Some(_)) => quote! {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("test runtime")
                .block_on(async move {
                    match tokio::time::timeout(__limit, async move #block).await {
                        Ok(output) => output,
                        Err(_) => panic!("test exceeded {:?}", __limit),
                    }
                })
        },
        (Flavor::Sync, Some(_)) => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "use #[tokio_timeout_test] for async tests",
            ))
        }
        (Flavor::Tokio, None) => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "#[tokio_timeout_test] needs an async fn",
            ))
        }
    };

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_marker(attr))
        .collect();

    Ok(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let __limit = std::time::Duration::from_secs(#limit);
            let (__done, __outcome) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || #body));
                let _ = __done.send(result);
            });
            match __outcome.recv_timeout(__limit) {
                Ok(Ok(output)) => output,
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {:?}", __limit)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without a result")
                }
            }
        }
    })
}

fn parse_limit(attr: TokenStream2) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_LIMIT_SECS);
    }
    let lit: LitInt = syn::parse2(attr)?;
    match lit.base10_parse::<u64>()? {
        0 => Err(syn::Error::new_spanned(lit, "timeout must be at least one second")),
        secs => Ok(secs),
    }
}

/// `#[test]` and `#[tokio::test]` are replaced by the generated `#[test]`.
fn is_test_marker(attr: &Attribute) -> bool {
    let path = attr.path();
    path.is_ident("test")
        || (path.segments.len() == 2
            && path.segments[0].ident == "tokio"
            && path.segments[1].ident == "test")
}

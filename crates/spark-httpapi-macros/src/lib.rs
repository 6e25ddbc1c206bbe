//! spark-httpapi 过程宏入口。
//!
//! # 设计意图（Why）
//! - 每个 HTTP 契约都需要一个“把方法调用翻译为调度请求”的代理实现，
//!   手写代理既重复又容易与路径模板脱节，因此在编译期统一生成；
//! - 同时为契约登记运行期构造函数，使运行期绑定器无需任何手写的按类型代码。
//!
//! # 集成方式（How）
//! - 在 trait 上标注 `#[spark_httpapi::http_api]`；
//! - 每个方法必须是 `async fn(&self, ...) -> Result<T, E>`，并带有且仅有一个
//!   `#[get]`/`#[post]`/`#[put]`/`#[patch]`/`#[delete]`/`#[head]`/`#[options]` 路径属性；
//! - 可选 `#[cache(秒数)]` 为 GET 动作声明响应缓存；参数上的 `#[body]` 表示 JSON 请求体，
//!   与路径占位符同名的参数进入路径，其余参数进入查询串；
//! - `E` 需实现 `From<spark_httpapi::HttpApiError>`。

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{
    Attribute, Error, FnArg, Ident, ItemTrait, LitInt, LitStr, Pat, ReturnType, TraitItem,
    TraitItemFn, TypeParamBound, parse_macro_input, parse_quote, spanned::Spanned,
};

/// 为 trait 生成 HTTP 代理、`HttpApi` 实现与运行期登记项。
///
/// # 语义说明（What）
/// - **输入**：无泛型参数的 trait，所有条目均为带路径属性的 `async fn`；
/// - **输出**：
///   - 原 trait（追加 `Send + Sync + 'static` 约束并交由 `async_trait` 改写）；
///   - 隐藏的代理结构体及其 trait 实现；
///   - `impl HttpApi for dyn Trait`；
///   - `inventory::submit!` 登记的 `ContractRegistration`。
///
/// # 风险提示（Trade-offs）
/// - 生成代码通过 `::spark_httpapi` 绝对路径引用运行时，调用方不得重命名该依赖；
/// - 参数必须是简单标识符模式，解构模式无法映射为查询键名。
#[proc_macro_attribute]
pub fn http_api(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return Error::new(Span::call_site(), "#[http_api] 不接受参数")
            .to_compile_error()
            .into();
    }

    let item = parse_macro_input!(item as ItemTrait);
    expand_http_api(item)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

const METHODS: [(&str, &str); 7] = [
    ("get", "Get"),
    ("post", "Post"),
    ("put", "Put"),
    ("patch", "Patch"),
    ("delete", "Delete"),
    ("head", "Head"),
    ("options", "Options"),
];

struct Route {
    variant: Ident,
    path: LitStr,
    cache_secs: Option<LitInt>,
}

fn expand_http_api(mut item: ItemTrait) -> Result<TokenStream2, Error> {
    if !item.generics.params.is_empty() {
        return Err(Error::new(
            item.generics.span(),
            "#[http_api] 暂不支持带泛型参数的 trait",
        ));
    }

    add_auto_bounds(&mut item);

    let trait_ident = item.ident.clone();
    let proxy_ident = format_ident!("__{}HttpApiProxy", trait_ident);
    let mut proxy_methods = Vec::new();

    for trait_item in &mut item.items {
        match trait_item {
            TraitItem::Fn(method) => proxy_methods.push(expand_method(&trait_ident, method)?),
            other => {
                return Err(Error::new(other.span(), "#[http_api] 契约只能包含方法"));
            }
        }
    }

    Ok(quote! {
        #[::spark_httpapi::async_trait]
        #item

        const _: () = {
            #[doc(hidden)]
            struct #proxy_ident {
                dispatcher: ::spark_httpapi::ApiDispatcher,
            }

            #[::spark_httpapi::async_trait]
            impl #trait_ident for #proxy_ident {
                #(#proxy_methods)*
            }

            impl ::spark_httpapi::HttpApi for dyn #trait_ident {
                fn create(dispatcher: ::spark_httpapi::ApiDispatcher) -> ::std::sync::Arc<Self> {
                    ::std::sync::Arc::new(#proxy_ident { dispatcher })
                }
            }

            ::spark_httpapi::inventory::submit! {
                ::spark_httpapi::ContractRegistration::of::<dyn #trait_ident>()
            }
        };
    })
}

/// 追加尚未声明的 `Send`、`Sync` 与 `'static` 约束。
fn add_auto_bounds(item: &mut ItemTrait) {
    let declares = |name: &str| {
        item.supertraits.iter().any(|bound| match bound {
            TypeParamBound::Trait(bound) => bound
                .path
                .segments
                .last()
                .is_some_and(|segment| segment.ident == name),
            TypeParamBound::Lifetime(lifetime) => name == "'static" && lifetime.ident == "static",
            _ => false,
        })
    };
    let mut extra: Vec<TypeParamBound> = Vec::new();
    if !declares("Send") {
        extra.push(parse_quote!(::core::marker::Send));
    }
    if !declares("Sync") {
        extra.push(parse_quote!(::core::marker::Sync));
    }
    if !declares("'static") {
        extra.push(parse_quote!('static));
    }
    if item.colon_token.is_none() && !extra.is_empty() {
        item.colon_token = Some(Default::default());
    }
    item.supertraits.extend(extra);
}

fn take_route(attrs: &mut Vec<Attribute>, span: Span) -> Result<Route, Error> {
    let mut route: Option<(Ident, LitStr)> = None;
    let mut cache_secs = None;
    let mut kept = Vec::with_capacity(attrs.len());

    for attr in attrs.drain(..) {
        let verb = METHODS
            .iter()
            .find(|(name, _)| attr.path().is_ident(name))
            .map(|(_, variant)| *variant);
        if let Some(variant) = verb {
            if route.is_some() {
                return Err(Error::new(
                    attr.span(),
                    "#[http_api] 每个方法只能声明一个 HTTP 方法属性",
                ));
            }
            let path: LitStr = attr.parse_args()?;
            route = Some((Ident::new(variant, attr.span()), path));
        } else if attr.path().is_ident("cache") {
            if cache_secs.is_some() {
                return Err(Error::new(attr.span(), "#[cache] 只能声明一次"));
            }
            cache_secs = Some(attr.parse_args::<LitInt>()?);
        } else {
            kept.push(attr);
        }
    }
    *attrs = kept;

    let (variant, path) = route.ok_or_else(|| {
        Error::new(
            span,
            "#[http_api] 方法缺少 HTTP 方法属性，例如 #[get(\"/orders/{id}\")]",
        )
    })?;
    Ok(Route {
        variant,
        path,
        cache_secs,
    })
}

/// 解析路径模板中的 `{name}` 占位符。
fn placeholder_names(path: &LitStr) -> Result<Vec<String>, Error> {
    let value = path.value();
    let mut names = Vec::new();
    let mut rest = value.as_str();
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| Error::new(path.span(), "路径模板中存在未闭合的 `{`"))?;
        names.push(after[..close].to_owned());
        rest = &after[close + 1..];
    }
    Ok(names)
}

fn expand_method(trait_ident: &Ident, method: &mut TraitItemFn) -> Result<TokenStream2, Error> {
    let sig_span = method.sig.span();
    if method.sig.asyncness.is_none() {
        return Err(Error::new(sig_span, "#[http_api] 仅支持 async fn"));
    }
    if !method.sig.generics.params.is_empty() {
        return Err(Error::new(
            method.sig.generics.span(),
            "#[http_api] 暂不支持带泛型参数的方法",
        ));
    }
    if method.default.is_some() {
        return Err(Error::new(sig_span, "#[http_api] 契约方法不能提供默认实现"));
    }
    if matches!(method.sig.output, ReturnType::Default) {
        return Err(Error::new(
            sig_span,
            "#[http_api] 方法必须返回 Result<T, E>",
        ));
    }

    let route = take_route(&mut method.attrs, sig_span)?;
    let placeholders = placeholder_names(&route.path)?;

    let mut inputs = method.sig.inputs.iter_mut();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(Error::new(
                sig_span,
                "#[http_api] 方法的第一个参数必须是 &self",
            ));
        }
    }

    let mut steps = Vec::new();
    let mut bound_placeholders = Vec::new();
    let mut has_body = false;
    for input in inputs {
        let typed = match input {
            FnArg::Typed(typed) => typed,
            FnArg::Receiver(receiver) => {
                return Err(Error::new(receiver.span(), "#[http_api] 不支持多个 self 参数"));
            }
        };
        let is_body = take_marker(&mut typed.attrs, "body");
        let Pat::Ident(pat) = typed.pat.as_ref() else {
            return Err(Error::new(
                typed.pat.span(),
                "#[http_api] 参数必须是简单标识符",
            ));
        };
        let ident = pat.ident.clone();
        let name = ident.to_string();
        let key = name.trim_start_matches("r#").to_owned();

        if is_body {
            if has_body {
                return Err(Error::new(ident.span(), "#[http_api] 每个方法只能有一个 #[body] 参数"));
            }
            has_body = true;
            steps.push(quote! { let __request = __request.json_body(&#ident)?; });
        } else if placeholders.iter().any(|placeholder| *placeholder == key) {
            bound_placeholders.push(key.clone());
            steps.push(quote! { let __request = __request.path_param(#key, &#ident); });
        } else {
            steps.push(quote! { let __request = __request.query(#key, &#ident)?; });
        }
    }

    if let Some(missing) = placeholders
        .iter()
        .find(|placeholder| !bound_placeholders.contains(placeholder))
    {
        return Err(Error::new(
            route.path.span(),
            format!("路径占位符 `{{{missing}}}` 没有同名参数"),
        ));
    }

    let sig = &method.sig;
    let action_name = format!("{}::{}", trait_ident, sig.ident);
    let variant = &route.variant;
    let path = &route.path;
    let cache = route
        .cache_secs
        .as_ref()
        .map(|secs| quote! { .with_cache_secs(#secs) });

    Ok(quote! {
        #sig {
            static __ACTION: ::spark_httpapi::ApiAction = ::spark_httpapi::ApiAction::new(
                #action_name,
                ::spark_httpapi::HttpMethod::#variant,
                #path,
            ) #cache;
            let __request = self.dispatcher.request(&__ACTION);
            #(#steps)*
            ::core::result::Result::map_err(
                self.dispatcher.invoke(__request).await,
                ::core::convert::Into::into,
            )
        }
    })
}

/// 移除参数上的标记属性，返回是否存在。
fn take_marker(attrs: &mut Vec<Attribute>, name: &str) -> bool {
    let before = attrs.len();
    attrs.retain(|attr| !attr.path().is_ident(name));
    attrs.len() != before
}

use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use crate::transports::DefaultTransportFactory;
use crate::types::Dsn;
use crate::ClientOptions;

/// The first of `names` that is set to a non-empty value.
fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()))
}

fn text_var(names: &[&str]) -> Option<Cow<'static, str>> {
    first_var(names).map(Cow::Owned)
}

/// Fills the options that are still unset.
///
/// | option | source |
/// |---|---|
/// | `transport` | [`DefaultTransportFactory`] |
/// | `dsn` | `TRACELET_DSN`, an invalid value leaves the client disabled |
/// | `release` | `TRACELET_RELEASE` |
/// | `environment` | `TRACELET_ENVIRONMENT`, else `debug` or `release` by build profile |
/// | `offline_cache_dir` | `TRACELET_OFFLINE_CACHE_DIR` |
/// | `http_proxy` | `HTTP_PROXY` or `http_proxy` |
/// | `https_proxy` | `HTTPS_PROXY` or `https_proxy`, else `http_proxy` |
///
/// # Examples
/// ```
/// std::env::set_var("TRACELET_RELEASE", "release-from-env");
///
/// let options = tracelet::ClientOptions::default();
/// assert_eq!(options.release, None);
/// assert!(options.transport.is_none());
///
/// let options = tracelet::apply_defaults(options);
/// assert_eq!(options.release, Some("release-from-env".into()));
/// assert!(options.transport.is_some());
/// ```
pub fn apply_defaults(mut opts: ClientOptions) -> ClientOptions {
    opts.transport
        .get_or_insert_with(|| Arc::new(DefaultTransportFactory));
    if opts.dsn.is_none() {
        opts.dsn = first_var(&["TRACELET_DSN"]).and_then(|dsn| dsn.parse::<Dsn>().ok());
    }
    if opts.release.is_none() {
        opts.release = text_var(&["TRACELET_RELEASE"]);
    }
    if opts.environment.is_none() {
        let profile = if cfg!(debug_assertions) { "debug" } else { "release" };
        opts.environment =
            Some(text_var(&["TRACELET_ENVIRONMENT"]).unwrap_or(Cow::Borrowed(profile)));
    }
    if opts.offline_cache_dir.is_none() {
        opts.offline_cache_dir = first_var(&["TRACELET_OFFLINE_CACHE_DIR"]).map(PathBuf::from);
    }
    if opts.http_proxy.is_none() {
        opts.http_proxy = text_var(&["HTTP_PROXY", "http_proxy"]);
    }
    if opts.https_proxy.is_none() {
        opts.https_proxy =
            text_var(&["HTTPS_PROXY", "https_proxy"]).or_else(|| opts.http_proxy.clone());
    }
    opts
}

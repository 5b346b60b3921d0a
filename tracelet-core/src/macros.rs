/// Returns the intended release for tracelet as an `Option<Cow<'static, str>>`.
///
/// This can be used with `ClientOptions` to set the release name.  It uses
/// the information supplied by cargo to calculate a release.
///
/// # Examples
///
/// ```
/// let options = tracelet_core::ClientOptions {
///     release: tracelet_core::release_name!(),
///     ..Default::default()
/// };
/// assert!(options.release.unwrap().contains('@'));
/// ```
#[macro_export]
macro_rules! release_name {
    () => {{
        ::std::option_env!("CARGO_PKG_NAME").and_then(|name| {
            ::std::option_env!("CARGO_PKG_VERSION").map(|version| {
                ::std::borrow::Cow::<'static, str>::Owned(format!("{}@{}", name, version))
            })
        })
    }};
}

/// Prints SDK-internal diagnostics.
///
/// Output goes to stderr, prefixed with `[tracelet]`, if the client bound to
/// the current hub has `debug` enabled.  With the `debug-logs` feature the
/// message goes to the `log` crate under the `tracelet` target instead.
///
/// This looks up the current client, so it must not be invoked while the
/// stack lock of a hub is held.
#[macro_export]
#[doc(hidden)]
macro_rules! tracelet_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "debug-logs")]
        {
            ::log::debug!(target: "tracelet", $($arg)*);
        }
        #[cfg(not(feature = "debug-logs"))]
        {
            $crate::Hub::with(|hub| {
                if hub.client().is_some_and(|c| c.options().debug) {
                    eprint!("[tracelet] ");
                    eprintln!($($arg)*);
                }
            });
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn release_name_uses_cargo_metadata() {
        let release = crate::release_name!().unwrap();
        assert_eq!(release, format!("tracelet-core@{}", env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn debug_without_client_is_silent() {
        crate::tracelet_debug!("nothing bound: {}", 42);
    }
}

use std::borrow::Cow;

use crate::types::{Dsn, ParseDsnError};

/// Values accepted wherever a DSN is configured.
///
/// Strings are parsed after trimming. Blank strings, `None` and `()` mean
/// "no DSN", which leaves the client disabled.
pub trait IntoDsn {
    /// Resolves the value to an optional DSN.
    fn into_dsn(self) -> Result<Option<Dsn>, ParseDsnError>;
}

fn parse_text(text: &str) -> Result<Option<Dsn>, ParseDsnError> {
    match text.trim() {
        "" => Ok(None),
        dsn => dsn.parse().map(Some),
    }
}

macro_rules! into_dsn_by_parsing {
    ($($ty:ty),*) => {
        $(
            impl IntoDsn for $ty {
                fn into_dsn(self) -> Result<Option<Dsn>, ParseDsnError> {
                    parse_text(&self)
                }
            }
        )*
    };
}

into_dsn_by_parsing!(&str, String, Cow<'_, str>);

impl IntoDsn for () {
    fn into_dsn(self) -> Result<Option<Dsn>, ParseDsnError> {
        Ok(None)
    }
}

impl IntoDsn for Dsn {
    fn into_dsn(self) -> Result<Option<Dsn>, ParseDsnError> {
        Ok(Some(self))
    }
}

impl IntoDsn for &Dsn {
    fn into_dsn(self) -> Result<Option<Dsn>, ParseDsnError> {
        Ok(Some(self.clone()))
    }
}

impl<T: IntoDsn> IntoDsn for Option<T> {
    fn into_dsn(self) -> Result<Option<Dsn>, ParseDsnError> {
        self.map_or(Ok(None), IntoDsn::into_dsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_means_no_dsn() {
        assert_eq!("".into_dsn().unwrap(), None);
        assert_eq!(Cow::Borrowed(" \t").into_dsn().unwrap(), None);
        assert_eq!(None::<&str>.into_dsn().unwrap(), None);
        assert_eq!(().into_dsn().unwrap(), None);
    }

    #[test]
    fn text_is_trimmed_and_parsed() {
        let dsn = String::from(" https://key@example.com/7\n")
            .into_dsn()
            .unwrap()
            .unwrap();
        assert_eq!(dsn.project_id().value(), 7);
        assert_eq!((&dsn).into_dsn().unwrap(), Some(dsn));
        assert!(Some("ftp://key@example.com/7").into_dsn().is_err());
    }
}

/// Implements `Serialize` and `Deserialize` for a type through its
/// `Display` and `FromStr` implementations.
macro_rules! impl_str_serde {
    ($type:ty, $expectation:expr) => {
        impl ::serde::ser::Serialize for $type {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: ::serde::ser::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> ::serde::de::Deserialize<'de> for $type {
            fn deserialize<D>(deserializer: D) -> Result<$type, D::Error>
            where
                D: ::serde::de::Deserializer<'de>,
            {
                struct V;

                impl<'de> ::serde::de::Visitor<'de> for V {
                    type Value = $type;

                    fn expecting(&self, formatter: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                        formatter.write_str($expectation)
                    }

                    fn visit_str<E>(self, value: &str) -> Result<$type, E>
                    where
                        E: ::serde::de::Error,
                    {
                        value
                            .parse()
                            .map_err(|_| E::invalid_value(::serde::de::Unexpected::Str(value), &self))
                    }
                }

                deserializer.deserialize_str(V)
            }
        }
    };
}

/// Implements `Serialize` and `Deserialize` for a fixed size byte id that is
/// rendered as lowercase hex.
macro_rules! impl_hex_id {
    ($type:ident, $len:expr, $name:expr) => {
        impl Default for $type {
            fn default() -> Self {
                Self(::rand::random::<[u8; $len]>())
            }
        }

        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}", ::hex::encode(self.0))
            }
        }

        impl ::std::fmt::Debug for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}({})", stringify!($type), self)
            }
        }

        impl ::std::str::FromStr for $type {
            type Err = ::hex::FromHexError;

            fn from_str(input: &str) -> Result<Self, Self::Err> {
                let mut buf = [0; $len];
                ::hex::decode_to_slice(input, &mut buf)?;
                Ok(Self(buf))
            }
        }

        impl From<[u8; $len]> for $type {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl_str_serde!($type, $name);
    };
}

//! Macro for defining validated string newtypes.

/// Macro to define a validated string identifier.
///
/// The caller provides the type name, a human-readable kind string (used in
/// error messages), and a validation function `fn(&str) -> Result<(), IdError>`.
/// This generates:
///
/// - `parse()` / `FromStr` / `TryFrom<&str>` / `TryFrom<String>` with validation
/// - `as_str()`, `AsRef<str>`, `Display`
/// - `Serialize` and validated `Deserialize` implementations
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// string_id!(NodeName, "node name", validate_node_name);
///
/// let node: NodeName = "worker-0.rack1".parse()?;
/// ```
#[macro_export]
macro_rules! string_id {
    ($name:ident, $kind:literal, $validate:path) => {
        /// A validated string identifier.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The human-readable kind, used in error messages.
            pub const KIND: &'static str = $kind;

            /// Parses and validates an identifier from a string.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                $validate(s)?;
                Ok(Self(s.to_string()))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = $crate::IdError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::IdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                $validate(&s)?;
                Ok(Self(s))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::try_from(s).map_err(serde::de::Error::custom)
            }
        }
    };
}

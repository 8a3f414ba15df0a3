//! Newtype IDs for type-safe record references.
//!
//! Document IDs are opaque strings assigned by whichever device creates the
//! record. Use the `define_id!` macro to create wrappers that prevent mixing
//! IDs from different collections.

/// Macro to define a type-safe document ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `new()`, `generate()` (random UUID v4) and `as_str()`
/// - `From<String>`, `From<&str>` and `Display`
///
/// # Example
///
/// ```rust
/// # use fieldtrack_core::define_id;
/// define_id!(CustomerId);
/// define_id!(PlanId);
///
/// let customer_id = CustomerId::new("c-1");
/// let plan_id = PlanId::new("c-1");
///
/// // These are different types, so this won't compile:
/// // let _: CustomerId = plan_id;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an ID from an existing document identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(::uuid::Uuid::new_v4().to_string())
            }

            /// Get the underlying identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(OrganizationId);
define_id!(UserId);
define_id!(CustomerId);
define_id!(PlanId);

impl OrganizationId {
    /// Identifier of the distinguished system-global organization.
    pub const SYSTEM: &'static str = "system";

    /// The system-global organization that hosts the bootstrap super-admin.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Self::SYSTEM)
    }

    /// Whether this is the system-global organization.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }
}

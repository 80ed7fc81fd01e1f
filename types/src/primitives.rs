//! Fixed-size byte newtypes.

//---------------------------------------------------------------------------------------------------- Import
use std::fmt;

use bincode::{Decode, Encode};

//---------------------------------------------------------------------------------------------------- Macro
/// Declare a 32-byte newtype with hex `Debug`/`Display`.
macro_rules! bytes32 {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// The all-zero value.
            pub const ZERO: Self = Self([0; 32]);

            /// Borrow the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parse from a 64-character hex string.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut buf = [0; 32];
                hex::decode_to_slice(s, &mut buf)?;
                Ok(Self(buf))
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }
    };
}

bytes32! {
    /// A 32-byte content-addressed identifier.
    Hash
}

bytes32! {
    /// Tag preventing double-spend of a one-time key.
    KeyImage
}

bytes32! {
    /// A one-time output key or a transaction public key.
    PublicKey
}

bytes32! {
    /// Application-level tag grouping transactions, carried in tx extra.
    PaymentId
}

//---------------------------------------------------------------------------------------------------- Signature
/// One ring-signature component: a `(c, r)` scalar pair.
#[derive(Copy, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Signature {
    pub c: [u8; 32],
    pub r: [u8; 32],
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signature(c: {}, r: {})",
            hex::encode(self.c),
            hex::encode(self.r)
        )
    }
}

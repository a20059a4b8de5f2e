use std::fmt::Debug;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// A user supplied secret: a login password or a key passphrase.
///
/// The bytes are scrubbed on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct Password(Vec<u8>);

impl Password {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<Vec<u8>> for Password {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Password {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::Password;

    #[test]
    fn debug_hides_secret() {
        let password = Password::from("hunter2");
        assert_eq!(format!("{password:?}"), "Password(***)");
        assert!(!format!("{password:?}").contains("hunter2"));
    }

    #[test]
    fn empty_password() {
        assert!(Password::from("").is_empty());
        assert!(!Password::from(String::from("x")).is_empty());
    }
}

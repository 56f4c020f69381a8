//! SSH key passphrase providers

use secrecy::SecretString;

/// Supplies the SSH key passphrase so remote execution never prompts
pub trait Authenticator: Send + Sync {
    /// `None` when the key has no passphrase
    fn passphrase(&self) -> Option<&SecretString>;
}

/// Key without a passphrase
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPassphrase;

impl Authenticator for NoPassphrase {
    fn passphrase(&self) -> Option<&SecretString> {
        None
    }
}

/// Passphrase known up front, e.g. read from the environment at startup
pub struct StaticPassphrase {
    passphrase: SecretString,
}

impl StaticPassphrase {
    pub fn new(passphrase: SecretString) -> Self {
        Self { passphrase }
    }
}

impl Authenticator for StaticPassphrase {
    fn passphrase(&self) -> Option<&SecretString> {
        Some(&self.passphrase)
    }
}

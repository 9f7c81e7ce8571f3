//! Implementation of auth methods
//!
//! The server names the plugin to use in the handshake, or later in an auth
//! switch request. [plugin_for] looks the name up and returns an [AuthPlugin]
//! that computes the first response and reacts to any further auth packages.
//!
//! Note that `caching_sha2_password` full authentication sends the password
//! RSA encrypted with a key the server hands us over the same unencrypted
//! channel. With a man in the middle this offers no protection, so pin the key
//! with [crate::options::ConnectionOptions::server_public_key] where that matters.
use sha1::{Digest, Sha1};

use crate::error::{ConnectionErrorContent, ConnectionResult};

/// Name of the SHA1 based challenge response plugin
pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";

/// Name of the SHA256 based plugin, default in mysql 8
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

/// What to do after an auth package has been handled by [AuthPlugin::progress]
#[derive(Debug, PartialEq, Eq)]
pub enum AuthProgress {
    /// Wait for the next package from the server
    Continue,
    /// Send this data to the server and wait for its answer
    Send(Vec<u8>),
    /// The plugin is done, the server should answer with OK or ERR
    Done,
}

/// An authentication method
pub trait AuthPlugin: Send {
    /// The name of the plugin as used in the protocol
    fn name(&self) -> &'static str;

    /// The response sent directly in the handshake response or after an auth switch
    fn quick_auth(&mut self, password: &str) -> Vec<u8>;

    /// Handle an auth package (starting with 0x01) from the server
    fn progress(&mut self, password: &str, package: &[u8]) -> ConnectionResult<AuthProgress>;
}

/// Look up the plugin with the given name
///
/// `scramble` is the challenge sent by the server. `server_public_key` is a PEM
/// encoded RSA key to use for full authentication instead of asking the server
pub fn plugin_for(
    name: &str,
    scramble: &[u8],
    server_public_key: Option<&str>,
) -> ConnectionResult<Box<dyn AuthPlugin>> {
    match name {
        MYSQL_NATIVE_PASSWORD => Ok(Box::new(MysqlNativePassword {
            scramble: scramble.to_vec(),
        })),
        #[cfg(feature = "sha2_auth")]
        CACHING_SHA2_PASSWORD => Ok(Box::new(CachingSha2Password {
            scramble: scramble.to_vec(),
            server_public_key: server_public_key.map(|v| v.to_string()),
            awaiting_key: false,
        })),
        _ => {
            let _ = server_public_key;
            Err(ConnectionErrorContent::UnknownAuthPlugin(name.to_string()).into())
        }
    }
}

/// Strip the trailing NUL some servers include in the scramble
pub(crate) fn trim_scramble(scramble: &[u8]) -> &[u8] {
    match scramble.split_last() {
        Some((0, rest)) => rest,
        _ => scramble,
    }
}

/// Compute the mysql_native_password response
///
/// SHA1( password ) ^ SHA1( seed + SHA1( SHA1( password ) ) )
/// <https://mariadb.com/kb/en/connection/#mysql_native_password-plugin>
pub fn native_password_scramble(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let pw_hash: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let pw_hash_hash: [u8; 20] = Sha1::digest(pw_hash).into();

    let mut ctx = Sha1::new();
    ctx.update(trim_scramble(scramble));
    ctx.update(pw_hash_hash);
    let pw_seed_hash_hash: [u8; 20] = ctx.finalize().into();

    pw_hash
        .iter()
        .zip(pw_seed_hash_hash.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// SHA1 challenge response authentication
pub struct MysqlNativePassword {
    /// The challenge from the server
    scramble: Vec<u8>,
}

impl AuthPlugin for MysqlNativePassword {
    fn name(&self) -> &'static str {
        MYSQL_NATIVE_PASSWORD
    }

    fn quick_auth(&mut self, password: &str) -> Vec<u8> {
        native_password_scramble(password, &self.scramble)
    }

    fn progress(&mut self, _password: &str, package: &[u8]) -> ConnectionResult<AuthProgress> {
        Err(ConnectionErrorContent::Auth(format!(
            "unexpected {} byte auth package for {MYSQL_NATIVE_PASSWORD}",
            package.len()
        ))
        .into())
    }
}

/// Compute the caching_sha2_password fast auth response
///
/// XOR(SHA256(password), SHA256(SHA256(SHA256(password)), seed))
#[cfg(feature = "sha2_auth")]
pub fn caching_sha2_scramble(password: &str, scramble: &[u8]) -> Vec<u8> {
    use sha2::Sha256;
    if password.is_empty() {
        return Vec::new();
    }
    let pw_hash: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let pw_hash_hash: [u8; 32] = Sha256::digest(pw_hash).into();

    let mut ctx = Sha256::new();
    ctx.update(pw_hash_hash);
    ctx.update(trim_scramble(scramble));
    let seed_hash: [u8; 32] = ctx.finalize().into();

    pw_hash
        .iter()
        .zip(seed_hash.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Encrypt the NUL terminated password XOR the scramble with the server's RSA key
#[cfg(feature = "sha2_auth")]
pub fn rsa_encrypt_password(
    password: &str,
    scramble: &[u8],
    public_key_pem: &str,
) -> ConnectionResult<Vec<u8>> {
    use rand::rngs::OsRng;
    use rsa::{RsaPublicKey, pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey};

    let scramble = trim_scramble(scramble);
    if scramble.is_empty() {
        return Err(ConnectionErrorContent::Auth("empty scramble".to_string()).into());
    }
    let mut pw = password.as_bytes().to_vec();
    pw.push(0);
    for (i, b) in pw.iter_mut().enumerate() {
        *b ^= scramble[i % scramble.len()];
    }

    let key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_key_pem))
        .map_err(|e| ConnectionErrorContent::Auth(format!("invalid server public key: {e}")))?;
    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &pw)
        .map_err(|e| ConnectionErrorContent::Auth(format!("rsa encryption failed: {e}")).into())
}

/// SHA256 based authentication with server side caching
///
/// Fast auth succeeds when the server has the password hash cached. Otherwise
/// the server asks for full auth, and we send the password RSA encrypted.
#[cfg(feature = "sha2_auth")]
pub struct CachingSha2Password {
    /// The challenge from the server
    scramble: Vec<u8>,
    /// PEM encoded key configured by the user
    server_public_key: Option<String>,
    /// We asked the server for its public key
    awaiting_key: bool,
}

#[cfg(feature = "sha2_auth")]
impl AuthPlugin for CachingSha2Password {
    fn name(&self) -> &'static str {
        CACHING_SHA2_PASSWORD
    }

    fn quick_auth(&mut self, password: &str) -> Vec<u8> {
        caching_sha2_scramble(password, &self.scramble)
    }

    fn progress(&mut self, password: &str, package: &[u8]) -> ConnectionResult<AuthProgress> {
        let Some((0x01, data)) = package.split_first() else {
            return Err(ConnectionErrorContent::Auth(format!(
                "unexpected auth package for {CACHING_SHA2_PASSWORD}"
            ))
            .into());
        };
        if self.awaiting_key {
            self.awaiting_key = false;
            let pem = std::str::from_utf8(data).map_err(|_| {
                ConnectionErrorContent::Auth("server public key is not utf-8".to_string())
            })?;
            return Ok(AuthProgress::Send(rsa_encrypt_password(
                password,
                &self.scramble,
                pem,
            )?));
        }
        match data {
            // Fast auth succeeded, an OK package follows
            [0x03] => Ok(AuthProgress::Continue),
            // Perform full authentication
            [0x04] => {
                if let Some(pem) = &self.server_public_key {
                    Ok(AuthProgress::Send(rsa_encrypt_password(
                        password,
                        &self.scramble,
                        pem,
                    )?))
                } else {
                    self.awaiting_key = true;
                    Ok(AuthProgress::Send(vec![0x02]))
                }
            }
            _ => Err(ConnectionErrorContent::Auth(format!(
                "unexpected auth package for {CACHING_SHA2_PASSWORD}"
            ))
            .into()),
        }
    }
}
